// Stepper - Thread-plan execution engine
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine configuration and debugger settings.
//!
//! Settings are a small typed key/value store mirroring `settings set`
//! commands. Only keys in [`KNOWN_SETTINGS`] are accepted. The whole
//! [`EngineConfig`] can be loaded from a TOML file:
//!
//! ```toml
//! architecture = "x86-64"
//! max_stops = 10000
//!
//! [settings]
//! "process.run-all-threads" = true
//! ```

use std::{collections::BTreeMap, fs, path::Path};

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use stepper_common::Architecture;
use tracing::debug;

use crate::{SettingsProvider, StepError};

/// Setting that forces every step to let all threads run.
pub const RUN_ALL_THREADS: &str = "process.run-all-threads";

/// Settings the engine understands; every one of them is a boolean.
pub const KNOWN_SETTINGS: &[&str] = &[RUN_ALL_THREADS];

fn check_known(key: &str) -> Result<(), StepError> {
    if KNOWN_SETTINGS.contains(&key) {
        Ok(())
    } else {
        Err(StepError::Setting(format!("unknown setting '{key}'")))
    }
}

/// Debugger settings store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: BTreeMap<String, bool>,
}

impl Settings {
    /// Empty settings; every known setting reads as its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` from its textual form, e.g. `set(RUN_ALL_THREADS, "true")`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), StepError> {
        check_known(key)?;
        let parsed = parse_bool(value).ok_or_else(|| {
            StepError::Setting(format!("'{value}' is not a boolean value for '{key}'"))
        })?;
        debug!(key, value = parsed, "setting updated");
        self.values.insert(key.to_string(), parsed);
        Ok(())
    }

    /// Apply a `key=value` assignment.
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<(), StepError> {
        let (key, value) = assignment.split_once('=').ok_or_else(|| {
            StepError::Setting(format!("expected <key>=<value>, got '{assignment}'"))
        })?;
        self.set(key.trim(), value.trim())
    }

    /// Builder-style boolean setter.
    pub fn with_bool(mut self, key: &str, value: bool) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    /// Remove an explicit value so the default applies again.
    pub fn clear(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// Value of `key`, if explicitly set.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).copied()
    }

    /// Check every stored key against [`KNOWN_SETTINGS`].
    pub fn validate(&self) -> Result<(), StepError> {
        self.values.keys().try_for_each(|key| check_known(key))
    }
}

impl SettingsProvider for Settings {
    fn get_bool_setting(&self, key: &str) -> bool {
        self.get_bool(key).unwrap_or(false)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Configuration for the step engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Instruction set used to classify instructions under the pc
    #[serde(default)]
    pub architecture: Architecture,
    /// Give up on a step after this many stop events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stops: Option<usize>,
    /// Debugger settings consulted when resolving each step
    #[serde(default)]
    pub settings: Settings,
}

impl EngineConfig {
    /// Set the architecture used for instruction classification
    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    /// Replace the settings store
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Abandon steps that take more than `max_stops` stop events
    pub fn with_max_stops(mut self, max_stops: usize) -> Self {
        self.max_stops = Some(max_stops);
        self
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).wrap_err_with(|| "Failed to parse engine config as TOML")?;
        config.settings.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&content)?;
        debug!("Loaded engine configuration from {:?}", path);
        Ok(config)
    }

    /// Serialize the configuration back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).wrap_err_with(|| "Failed to serialize engine config to TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_all_threads_defaults_to_false() {
        let settings = Settings::new();
        assert!(!settings.get_bool_setting(RUN_ALL_THREADS));
        assert_eq!(settings.get_bool(RUN_ALL_THREADS), None);
    }

    #[test]
    fn test_set_parses_booleans() {
        let mut settings = Settings::new();
        settings.set(RUN_ALL_THREADS, "true").unwrap();
        assert!(settings.get_bool_setting(RUN_ALL_THREADS));

        settings.apply_assignment("process.run-all-threads = off").unwrap();
        assert!(!settings.get_bool_setting(RUN_ALL_THREADS));

        assert!(settings.set(RUN_ALL_THREADS, "maybe").is_err());
        assert!(settings.set("target.unknown", "true").is_err());
        assert!(settings.apply_assignment("no-equals-sign").is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            architecture = "aarch64"
            max_stops = 500

            [settings]
            "process.run-all-threads" = true
            "#,
        )
        .unwrap();
        assert_eq!(config.architecture, Architecture::AArch64);
        assert_eq!(config.max_stops, Some(500));
        assert!(config.settings.get_bool_setting(RUN_ALL_THREADS));

        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_config_rejects_mistyped_settings() {
        let err = EngineConfig::from_toml_str(
            r#"
            [settings]
            "process.run-all-threads" = "sometimes"
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse engine config"));

        let err = EngineConfig::from_toml_str("[settings]\n\"bogus\" = true\n").unwrap_err();
        assert!(format!("{err:#}").contains("unknown setting 'bogus'"));
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.architecture, Architecture::Sim);
        assert_eq!(config.settings, Settings::new());
        assert_eq!(config.max_stops, None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stepper.toml");
        fs::write(&path, "architecture = \"x86-64\"\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.architecture, Architecture::X86_64);
    }
}
