//! Encoder app configuration.
//!
//! Supports loading from a YAML file; command-line flags override file
//! values.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use webmcast_core::EncoderConfig;

/// App configuration loaded from YAML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Upload target URL.
    pub url: Option<String>,

    /// Stream id appended to the URL query string.
    pub stream_id: Option<String>,

    /// Stream name appended to the URL query string.
    pub stream_name: Option<String>,

    /// Use multipart form uploads instead of raw-body POSTs.
    pub form_post: bool,

    /// Extra `NAME:VALUE` headers added to every request.
    pub headers: Vec<String>,

    /// `NAME:VALUE` form fields for form-post mode.
    pub form_variables: Vec<String>,

    /// Local file name reported inside form uploads.
    pub local_file: Option<String>,

    /// Directory for local single-file recording; disabled when unset.
    pub record_dir: Option<String>,

    /// Capture, codec, and muxing configuration.
    pub encoder: EncoderConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file, or returns defaults when no
    /// path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file: {}", path.display()))?;
                serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config file: {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }
}

/// Parses repeatable `NAME:VALUE` arguments into pairs. Entries without a
/// separator are a configuration error.
pub fn parse_name_value_pairs(entries: &[String]) -> Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|entry| {
            let (name, value) = entry
                .split_once(':')
                .with_context(|| format!("cannot parse entry, should be NAME:VALUE: {entry}"))?;
            Ok((name.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_value_parsing() {
        let pairs = parse_name_value_pairs(&[
            "X-Auth:secret".to_string(),
            "Host:example.com:8080".to_string(),
        ])
        .expect("parse");
        assert_eq!(pairs[0], ("X-Auth".to_string(), "secret".to_string()));
        // Only the first colon separates.
        assert_eq!(pairs[1], ("Host".to_string(), "example.com:8080".to_string()));
    }

    #[test]
    fn malformed_pair_rejected() {
        assert!(parse_name_value_pairs(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn defaults_without_file() {
        let config = AppConfig::load(None).expect("defaults");
        assert!(config.url.is_none());
        assert!(!config.form_post);
        assert!(!config.encoder.disable_audio);
    }
}
