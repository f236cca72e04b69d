//! # Printer Profile Module
//!
//! Supplies the print volume used to bound the drawing head.
//!
//! Profiles follow the OctoPrint layout; only the volume is read:
//!
//! ```json
//! { "volume": { "width": 200, "depth": 200, "origin": "lowerleft" } }
//! ```

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::config::PrinterConfig;
use crate::error::Result;

/// Printer profile as far as the bridge cares.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PrinterProfile {
    #[serde(default)]
    pub volume: Option<Volume>,
}

/// Print volume in millimetres.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Volume {
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub depth: Option<f64>,
    #[serde(default)]
    pub origin: Option<String>,
}

/// Printer-profile collaborator.
#[cfg_attr(test, mockall::automock)]
pub trait ProfileSource: Send + Sync {
    /// The active profile, or the default one.
    fn current_or_default(&self) -> Result<PrinterProfile>;
}

/// Profile fixed at startup.
#[derive(Debug, Clone)]
pub struct StaticProfile {
    profile: PrinterProfile,
}

impl StaticProfile {
    #[must_use]
    pub fn new(profile: PrinterProfile) -> Self {
        Self { profile }
    }
}

impl ProfileSource for StaticProfile {
    fn current_or_default(&self) -> Result<PrinterProfile> {
        Ok(self.profile.clone())
    }
}

/// JSON profile re-read on every lookup so edits are picked up on refresh.
#[derive(Debug, Clone)]
pub struct JsonProfileFile {
    path: PathBuf,
}

impl JsonProfileFile {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl ProfileSource for JsonProfileFile {
    fn current_or_default(&self) -> Result<PrinterProfile> {
        debug!("Reading printer profile from {}", self.path.display());
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Builds the profile source named by the configuration.
pub fn from_config(config: &PrinterConfig) -> Box<dyn ProfileSource> {
    match &config.profile_path {
        Some(path) => Box::new(JsonProfileFile::new(path)),
        None => Box::new(StaticProfile::new(PrinterProfile {
            volume: Some(Volume {
                width: Some(config.width),
                depth: Some(config.depth),
                origin: Some(config.origin.clone()),
            }),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_profile() {
        let profile: PrinterProfile = serde_json::from_str(
            r#"{"name": "Plotter", "volume": {"width": 300, "depth": 180.5, "origin": "center", "height": 10}}"#,
        )
        .unwrap();
        let volume = profile.volume.unwrap();
        assert_eq!(volume.width, Some(300.0));
        assert_eq!(volume.depth, Some(180.5));
        assert_eq!(volume.origin.as_deref(), Some("center"));
    }

    #[test]
    fn test_parse_profile_without_volume() {
        let profile: PrinterProfile = serde_json::from_str(r#"{"name": "Bare"}"#).unwrap();
        assert_eq!(profile, PrinterProfile::default());
    }

    #[test]
    fn test_json_file_source() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"volume": {{"width": 120, "depth": 90}}}}"#).unwrap();
        file.flush().unwrap();

        let source = JsonProfileFile::new(file.path());
        let volume = source.current_or_default().unwrap().volume.unwrap();
        assert_eq!(volume.width, Some(120.0));
        assert_eq!(volume.depth, Some(90.0));
        assert_eq!(volume.origin, None);
    }

    #[test]
    fn test_json_file_source_missing_file() {
        let source = JsonProfileFile::new("/nonexistent/profile.json");
        assert!(matches!(source.current_or_default(), Err(BridgeError::Io(_))));
    }

    #[test]
    fn test_json_file_source_malformed() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "volume: width").unwrap();
        file.flush().unwrap();

        let source = JsonProfileFile::new(file.path());
        assert!(matches!(source.current_or_default(), Err(BridgeError::Json(_))));
    }

    #[test]
    fn test_from_config_static() {
        let config = PrinterConfig {
            width: 150.0,
            depth: 100.0,
            origin: "center".to_string(),
            ..PrinterConfig::default()
        };
        let volume = from_config(&config).current_or_default().unwrap().volume.unwrap();
        assert_eq!(volume.width, Some(150.0));
        assert_eq!(volume.depth, Some(100.0));
        assert_eq!(volume.origin.as_deref(), Some("center"));
    }

    #[test]
    fn test_from_config_file_path() {
        let config = PrinterConfig {
            profile_path: Some("/nonexistent/profile.json".to_string()),
            ..PrinterConfig::default()
        };
        assert!(from_config(&config).current_or_default().is_err());
    }
}
