//! Bridge configuration, loaded from TOML

use crate::error::ConfigError;
use crate::logging::{LogConfig, LogFormat, LogOutput};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Editor-authored host classes may get their own proxy class
    #[serde(default = "default_true")]
    pub support_blueprint_binding: bool,

    /// Request a full (rather than young generation) collection after each sweep
    #[serde(default = "default_true")]
    pub full_collection_after_sweep: bool,

    #[serde(default)]
    pub engine: EngineBindingConfig,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// Location of the fixed boundary methods in the foreign runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineBindingConfig {
    #[serde(default = "default_assembly")]
    pub assembly: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_object_class")]
    pub object_class: String,

    #[serde(default = "default_factory_class")]
    pub factory_class: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormatSetting,

    /// Directory for rolling log files; console output when unset
    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default = "default_false")]
    pub show_spans: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    Pretty,
    Compact,
    Json,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            support_blueprint_binding: true,
            full_collection_after_sweep: true,
            engine: EngineBindingConfig::default(),
            logging: LoggingSection::default(),
        }
    }
}

impl Default for EngineBindingConfig {
    fn default() -> Self {
        Self {
            assembly: default_assembly(),
            namespace: default_namespace(),
            object_class: default_object_class(),
            factory_class: default_factory_class(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormatSetting::default(),
            file: None,
            show_spans: false,
        }
    }
}

impl Default for LogFormatSetting {
    fn default() -> Self {
        LogFormatSetting::Compact
    }
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_assembly() -> String { "Interop.Engine".to_string() }
fn default_namespace() -> String { "Interop.Engine".to_string() }
fn default_object_class() -> String { "Object".to_string() }
fn default_factory_class() -> String { "ObjectFactory".to_string() }
fn default_level() -> String { "info".to_string() }

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Logging settings in the form `logging::init_with_config` takes
    pub fn log_config(&self) -> LogConfig {
        let section = &self.logging;
        let level = match section.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };

        let format = match section.format {
            LogFormatSetting::Pretty => LogFormat::Pretty,
            LogFormatSetting::Compact => LogFormat::Compact,
            LogFormatSetting::Json => LogFormat::Json,
        };

        let output = match &section.file {
            Some(directory) => LogOutput::File {
                directory: directory.clone(),
                prefix: "gcbridge.log".to_string(),
            },
            None => LogOutput::Stdout,
        };

        LogConfig {
            level,
            format,
            output,
            show_spans: section.show_spans,
            track_performance: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert!(config.support_blueprint_binding);
        assert_eq!(config.engine.object_class, "Object");
    }

    #[test]
    fn test_partial_sections() {
        let config = BridgeConfig::from_toml_str(
            r#"
            support_blueprint_binding = false

            [engine]
            assembly = "Game.Bindings"

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert!(!config.support_blueprint_binding);
        assert!(config.full_collection_after_sweep);
        assert_eq!(config.engine.assembly, "Game.Bindings");
        assert_eq!(config.engine.namespace, "Interop.Engine");

        let log = config.log_config();
        assert_eq!(log.level, Level::DEBUG);
        assert_eq!(log.format, LogFormat::Json);
        assert!(matches!(log.output, LogOutput::Stdout));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "full_collection_after_sweep = false").unwrap();
        writeln!(file, "[logging]").unwrap();
        writeln!(file, "file = \"logs\"").unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert!(!config.full_collection_after_sweep);
        assert!(matches!(config.log_config().output, LogOutput::File { .. }));
    }

    #[test]
    fn test_load_errors() {
        let missing = BridgeConfig::load(Path::new("/nonexistent/gcbridge.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let malformed = BridgeConfig::from_toml_str("support_blueprint_binding = 3");
        assert!(matches!(malformed, Err(ConfigError::Parse(_))));
    }
}
