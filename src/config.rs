//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `LINEGATE_`, nested keys separated
//!    by a double underscore (`LINEGATE_CONTROLLER__CONSUMER=alarmd`)
//!
//! # Example
//! ```no_run
//! use linegate::config::LinegateConfig;
//!
//! let config = LinegateConfig::load_from("linegate.toml")?;
//! config.validate()?;
//! println!("Consumer: {}", config.controller.consumer);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A complete file:
//!
//! ```toml
//! [controller]
//! consumer = "alarmd"
//! watcher_capacity = 128
//! max_owners = 8
//!
//! [logging]
//! level = "debug"
//! format = "json"
//!
//! [[lines]]
//! chip = "gpiochip0"
//! offset = 17
//! mode = "output"
//! initial = "inactive"
//!
//! [[lines]]
//! chip = "gpiochip0"
//! offset = 4
//! mode = "input"
//! pull = "up"
//! ```

use crate::controller::ControllerOptions;
use crate::logging::{parse_log_level, OutputFormat};
use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use linegate_core::error::{LineError, LineResult};
use linegate_core::types::{LineConfig, LineKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "linegate.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinegateConfig {
    /// Controller settings
    #[serde(default)]
    pub controller: ControllerOptions,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSection,
    /// Lines requested at startup
    #[serde(default)]
    pub lines: Vec<LineDeclaration>,
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: OutputFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: OutputFormat::default(),
        }
    }
}

/// One `[[lines]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDeclaration {
    /// Chip name
    pub chip: String,
    /// Line offset on the chip
    pub offset: u32,
    /// `input` or `output`
    pub mode: String,
    /// `disabled`, `down` or `up` (inputs only)
    #[serde(default)]
    pub pull: Option<String>,
    /// `active` or `inactive` (outputs only)
    #[serde(default)]
    pub initial: Option<String>,
}

impl LineDeclaration {
    /// Parse the string fields into a line configuration.
    pub fn line_config(&self) -> LineResult<LineConfig> {
        LineConfig::parse(&self.mode, self.pull.as_deref(), self.initial.as_deref())
    }

    /// Chip name and offset.
    pub fn key(&self) -> LineKey {
        LineKey::new(self.chip.clone(), self.offset)
    }
}

impl LinegateConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(Toml::file(path.as_ref())).extract()
    }

    /// Parse configuration from a TOML string, still honouring the environment
    pub fn from_toml_str(toml: &str) -> Result<Self, figment::Error> {
        Self::figment(Toml::string(toml)).extract()
    }

    fn figment(base: figment::providers::Data<Toml>) -> Figment {
        Figment::new()
            .merge(base)
            .merge(Env::prefixed("LINEGATE_").split("__"))
    }

    /// Render the effective configuration, e.g. for a `--print-config` flag
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load and validate in one step, for application entry points
    pub fn load_validated<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = Self::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> LineResult<()> {
        parse_log_level(&self.logging.level).map_err(LineError::InvalidConfiguration)?;

        if self.controller.watcher_capacity == 0 {
            return Err(LineError::InvalidConfiguration(
                "watcher_capacity must be at least 1".into(),
            ));
        }
        if self.controller.max_owners == Some(0) {
            return Err(LineError::InvalidConfiguration(
                "max_owners must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for declaration in &self.lines {
            declaration.line_config()?;
            if !seen.insert(declaration.key()) {
                return Err(LineError::InvalidConfiguration(format!(
                    "line {} is declared twice",
                    declaration.key()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linegate_core::types::{Pull, State};

    #[test]
    fn test_defaults() {
        let config = LinegateConfig::default();
        assert_eq!(config.controller.consumer, "linegate");
        assert_eq!(config.controller.watcher_capacity, 64);
        assert_eq!(config.logging.level, "info");
        assert!(config.lines.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_declaration_parsing() {
        let declaration = LineDeclaration {
            chip: "gpiochip0".into(),
            offset: 4,
            mode: "input".into(),
            pull: Some("up".into()),
            initial: None,
        };
        assert_eq!(declaration.line_config().unwrap(), LineConfig::input(Pull::Up));

        let declaration = LineDeclaration {
            mode: "output".into(),
            pull: None,
            initial: Some("active".into()),
            ..declaration
        };
        assert_eq!(declaration.line_config().unwrap(), LineConfig::output(State::Active));
    }

    #[test]
    fn test_toml_rendering_parses_back() {
        let mut config = LinegateConfig::default();
        config.controller.max_owners = Some(4);
        config.lines.push(LineDeclaration {
            chip: "gpiochip0".into(),
            offset: 17,
            mode: "output".into(),
            pull: None,
            initial: Some("inactive".into()),
        });
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("max_owners = 4"));
        let parsed: LinegateConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_toml_str() {
        let config = LinegateConfig::from_toml_str(
            r#"
            [controller]
            consumer = "alarmd"

            [[lines]]
            chip = "gpiochip1"
            offset = 2
            mode = "input"
            pull = "down"
            "#,
        )
        .unwrap();
        assert_eq!(config.controller.consumer, "alarmd");
        assert_eq!(config.controller.watcher_capacity, 64);
        assert_eq!(config.lines[0].key(), LineKey::new("gpiochip1", 2));
        assert_eq!(config.lines[0].line_config().unwrap(), LineConfig::input(Pull::Down));
        assert!(LinegateConfig::from_toml_str("[controller]\nwatcher_capacity = -1\n").is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = LinegateConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = LinegateConfig::default();
        config.controller.watcher_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = LinegateConfig::default();
        let declaration = LineDeclaration {
            chip: "gpiochip0".into(),
            offset: 1,
            mode: "output".into(),
            pull: None,
            initial: None,
        };
        config.lines = vec![declaration.clone(), declaration];
        assert!(matches!(
            config.validate(),
            Err(LineError::InvalidConfiguration(msg)) if msg.contains("gpiochip0:1")
        ));
    }
}
