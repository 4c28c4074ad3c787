//! MPD manifest emission for DASH output mode.
//!
//! The manifest is a handful of nested elements with attribute soup; plain
//! string composition through an indent-aware writer covers it.

use std::fmt::Write;

const SCHEMA: &str = "urn:mpeg:dash:schema:mpd:2011";
const PROFILES: &str = "urn:mpeg:dash:profile:isoff-live:2011";
const INDENT_STEP: &str = "  ";

/// Manifest parameters. Time values are in seconds unless noted.
#[derive(Debug, Clone)]
pub struct DashConfig {
    // MPD.
    pub min_buffer_time: u32,
    pub media_presentation_duration: u32,
    pub mpd_type: String,

    // Period.
    pub start_time: u32,
    pub period_duration: u32,

    // AdaptationSet.
    pub segment_alignment: bool,
    pub bitstream_switching: bool,
    pub max_width: u32,
    pub max_height: u32,
    pub max_framerate: u32,

    // ContentComponent.
    pub cc_id: u32,
    pub content_type: String,

    // SegmentTemplate. Timescale and chunk duration are in milliseconds.
    pub timescale: u32,
    pub chunk_duration: u32,
    pub media: String,
    pub start_number: String,
    pub initialization: String,

    // Representation.
    pub rep_id: String,
    pub mimetype: String,
    pub codecs: String,
    pub width: u32,
    pub height: u32,
    pub start_with_sap: u32,
    pub bandwidth: u32,
    pub framerate: u32,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            min_buffer_time: 1,
            media_presentation_duration: 36_000, // 10 hours
            mpd_type: "static".to_string(),
            start_time: 0,
            period_duration: 36_000,
            segment_alignment: true,
            bitstream_switching: false,
            max_width: 1920,
            max_height: 1080,
            max_framerate: 60,
            cc_id: 1,
            content_type: "video".to_string(),
            timescale: 1000,
            chunk_duration: 5000,
            media: String::new(),
            start_number: "1".to_string(),
            initialization: String::new(),
            rep_id: String::new(),
            mimetype: "video/webm".to_string(),
            codecs: "vp9".to_string(),
            width: 1920,
            height: 1080,
            start_with_sap: 1,
            bandwidth: 1_000_000, // bits
            framerate: 30,
        }
    }
}

/// Indent-aware MPD writer.
#[derive(Debug, Default)]
pub struct DashWriter {
    name: String,
    id: String,
    indent: String,
    initialized: bool,
}

impl DashWriter {
    /// Stores the name and stream id used for the SegmentTemplate media and
    /// initialization patterns. Both must be non-empty.
    pub fn init(&mut self, name: &str, id: &str) -> bool {
        if name.is_empty() || id.is_empty() {
            log::error!("[Dash] empty name or id");
            return false;
        }
        self.name = name.to_string();
        self.id = id.to_string();
        self.initialized = true;
        true
    }

    /// SegmentTemplate media pattern for the stream configured in `init`.
    pub fn media_pattern(&self) -> String {
        format!("{}_{}_$Number$.webm", self.name, self.id)
    }

    /// SegmentTemplate initialization target: chunk 0 carries the stream
    /// headers.
    pub fn initialization_name(&self) -> String {
        format!("{}_{}_0.webm", self.name, self.id)
    }

    /// Writes the manifest built from `config` into `manifest`. Returns
    /// false when called before `init`.
    pub fn write_manifest(&mut self, config: &DashConfig, manifest: &mut String) -> bool {
        if !self.initialized {
            log::error!("[Dash] write_manifest before init");
            return false;
        }

        manifest.clear();
        let _ = write!(
            manifest,
            "<MPD xmlns=\"{}\" type=\"{}\" minBufferTime=\"PT{}S\" \
             mediaPresentationDuration=\"PT{}\" profiles=\"{}\">\n",
            SCHEMA, config.mpd_type, config.min_buffer_time,
            config.media_presentation_duration, PROFILES
        );
        self.increase_indent();

        let _ = write!(
            manifest,
            "{}<Period start=\"PT{}S\" duration=\"PT{}\">\n",
            self.indent, config.start_time, config.period_duration
        );
        self.increase_indent();

        let _ = write!(
            manifest,
            "{}<AdaptationSet segmentAlignment=\"{}\" bitstreamSwitching=\"{}\" \
             maxWidth=\"{}\" maxHeight=\"{}\" maxFrameRate=\"{}\">\n",
            self.indent,
            config.segment_alignment,
            config.bitstream_switching,
            config.max_width,
            config.max_height,
            config.max_framerate
        );
        self.increase_indent();

        let _ = write!(
            manifest,
            "{}<ContentComponent id=\"{}\" contentType=\"{}\"/>\n",
            self.indent, config.cc_id, config.content_type
        );
        let _ = write!(
            manifest,
            "{}<SegmentTemplate timescale=\"{}\" duration=\"{}\" media=\"{}\" \
             startNumber=\"{}\" initialization=\"{}\"/>\n",
            self.indent,
            config.timescale,
            config.chunk_duration,
            config.media,
            config.start_number,
            config.initialization
        );
        let _ = write!(
            manifest,
            "{}<Representation id=\"{}\" mimeType=\"{}\" codecs=\"{}\" width=\"{}\" \
             height=\"{}\" startWithSAP=\"{}\" bandwidth=\"{}\" framerate=\"{}\">\
             </Representation>\n",
            self.indent,
            config.rep_id,
            config.mimetype,
            config.codecs,
            config.width,
            config.height,
            config.start_with_sap,
            config.bandwidth,
            config.framerate
        );

        let _ = write!(manifest, "{}</AdaptationSet>\n", self.indent);
        self.decrease_indent();
        let _ = write!(manifest, "{}</Period>\n", self.indent);
        self.decrease_indent();
        let _ = write!(manifest, "{}</MPD>\n", self.indent);

        self.reset_indent();
        true
    }

    fn increase_indent(&mut self) {
        self.indent.push_str(INDENT_STEP);
    }

    fn decrease_indent(&mut self) {
        let len = self.indent.len().saturating_sub(INDENT_STEP.len());
        self.indent.truncate(len);
    }

    fn reset_indent(&mut self) {
        self.indent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_rejects_empty_names() {
        let mut writer = DashWriter::default();
        assert!(!writer.init("", "video"));
        assert!(!writer.init("stream", ""));
        assert!(writer.init("stream", "video"));
    }

    #[test]
    fn manifest_requires_init() {
        let mut writer = DashWriter::default();
        let mut manifest = String::new();
        assert!(!writer.write_manifest(&DashConfig::default(), &mut manifest));
    }

    #[test]
    fn template_patterns_include_name_and_stream() {
        let mut writer = DashWriter::default();
        writer.init("live", "video");
        assert_eq!(writer.media_pattern(), "live_video_$Number$.webm");
        assert_eq!(writer.initialization_name(), "live_video_0.webm");
    }

    #[test]
    fn manifest_structure_and_attributes() {
        let mut writer = DashWriter::default();
        writer.init("live", "video");
        let mut config = DashConfig::default();
        config.media = writer.media_pattern();
        config.initialization = writer.initialization_name();
        config.rep_id = "video".to_string();
        config.width = 640;
        config.height = 480;
        config.chunk_duration = 1000;

        let mut manifest = String::new();
        assert!(writer.write_manifest(&config, &mut manifest));

        assert!(manifest.starts_with("<MPD "));
        assert!(manifest.contains(PROFILES));
        assert!(manifest.contains("<Period "));
        assert!(manifest.contains("<AdaptationSet "));
        assert!(manifest.contains("<ContentComponent id=\"1\" contentType=\"video\"/>"));
        assert!(manifest.contains("timescale=\"1000\""));
        assert!(manifest.contains("duration=\"1000\""));
        assert!(manifest.contains("media=\"live_video_$Number$.webm\""));
        assert!(manifest.contains("initialization=\"live_video_0.webm\""));
        assert!(manifest.contains("width=\"640\" height=\"480\""));
        assert!(manifest.trim_end().ends_with("</MPD>"));

        // Element order: MPD > Period > AdaptationSet > children.
        let period = manifest.find("<Period").unwrap();
        let adaptation = manifest.find("<AdaptationSet").unwrap();
        let component = manifest.find("<ContentComponent").unwrap();
        let template = manifest.find("<SegmentTemplate").unwrap();
        let representation = manifest.find("<Representation").unwrap();
        assert!(period < adaptation);
        assert!(adaptation < component);
        assert!(component < template);
        assert!(template < representation);
    }

    #[test]
    fn indent_resets_between_manifests() {
        let mut writer = DashWriter::default();
        writer.init("live", "audio");
        let config = DashConfig::default();
        let mut first = String::new();
        let mut second = String::new();
        writer.write_manifest(&config, &mut first);
        writer.write_manifest(&config, &mut second);
        assert_eq!(first, second);
    }
}
