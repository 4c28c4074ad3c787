//! File-writing data sink.
//!
//! Two modes:
//! - DASH: one file per chunk, named by the chunk id, in the configured
//!   directory;
//! - single-file: everything appended to one `YYYYMMDDhhmmss.webm` named
//!   after the local time at init.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;

use crate::sink::{DataSink, SinkChunk};

/// Chunk-to-disk sink.
pub struct FileWriter {
    dash_mode: bool,
    directory: PathBuf,
    file: Option<File>,
    file_name: Option<PathBuf>,
}

impl FileWriter {
    /// Prepares the output directory (created if missing). In single-file
    /// mode the output name is derived from the current local time and the
    /// file is opened immediately.
    pub fn init(dash_mode: bool, directory: impl Into<PathBuf>) -> std::io::Result<Self> {
        let directory = directory.into();
        if !directory.as_os_str().is_empty() {
            std::fs::create_dir_all(&directory)?;
        }

        let mut writer = Self { dash_mode, directory, file: None, file_name: None };
        if !dash_mode {
            let name = format!("{}.webm", Local::now().format("%Y%m%d%H%M%S"));
            let path = writer.directory.join(name);
            writer.file = Some(
                OpenOptions::new().create(true).append(true).open(&path)?,
            );
            log::info!("[FileWriter] writing stream to {}", path.display());
            writer.file_name = Some(path);
        }
        Ok(writer)
    }

    /// Path of the single-file output, when in single-file mode.
    pub fn file_name(&self) -> Option<&PathBuf> {
        self.file_name.as_ref()
    }

    fn write_dash_chunk(&self, chunk: &SinkChunk) -> std::io::Result<()> {
        let path = self.directory.join(&chunk.id);
        let mut file = File::create(&path)?;
        file.write_all(&chunk.data)?;
        file.sync_data()
    }

    fn append_chunk(&mut self, chunk: &SinkChunk) -> std::io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(std::io::Error::other("file writer has no open file"));
        };
        file.write_all(&chunk.data)?;
        file.flush()
    }
}

impl DataSink for FileWriter {
    fn name(&self) -> &'static str {
        "FileWriter"
    }

    fn ready(&self) -> bool {
        true
    }

    fn write_chunk(&mut self, chunk: &SinkChunk) -> bool {
        let result = if self.dash_mode {
            self.write_dash_chunk(chunk)
        } else {
            self.append_chunk(chunk)
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                log::error!("[FileWriter] write of chunk {} failed: {}", chunk.id, err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn dash_mode_writes_one_file_per_chunk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = FileWriter::init(true, dir.path()).expect("init");

        for i in 0..3 {
            let ok = writer.write_chunk(&SinkChunk {
                id: format!("stream_video_{}.webm", i),
                data: Bytes::from(vec![i as u8; 16]),
            });
            assert!(ok);
        }

        for i in 0..3u8 {
            let path = dir.path().join(format!("stream_video_{}.webm", i));
            let contents = std::fs::read(&path).expect("chunk file");
            assert_eq!(contents, vec![i; 16]);
        }
    }

    #[test]
    fn single_file_mode_appends_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = FileWriter::init(false, dir.path()).expect("init");
        let path = writer.file_name().expect("file name").clone();
        assert!(path.extension().is_some_and(|e| e == "webm"));
        // YYYYMMDDhhmmss: 14 digits.
        let stem = path.file_stem().expect("stem").to_string_lossy().to_string();
        assert_eq!(stem.len(), 14);
        assert!(stem.chars().all(|c| c.is_ascii_digit()));

        writer.write_chunk(&SinkChunk { id: "a".into(), data: Bytes::from_static(b"head") });
        writer.write_chunk(&SinkChunk { id: "b".into(), data: Bytes::from_static(b"tail") });
        assert_eq!(std::fs::read(&path).expect("output"), b"headtail");
    }

    #[test]
    fn failed_write_is_reported_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = FileWriter::init(true, dir.path()).expect("init");
        // A chunk id pointing into a missing subdirectory fails cleanly.
        let ok = writer.write_chunk(&SinkChunk {
            id: "missing/sub/dir.webm".into(),
            data: Bytes::from_static(b"x"),
        });
        assert!(!ok);
    }
}
