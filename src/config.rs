//! Controller configuration (qswitch.json).
//!
//! JSON shape, every field optional:
//! {
//!   "address": "192.168.8.16:5025",   // host:port of the switch
//!   "line_ending": "\n",
//!   "timeout_ms": 2000,
//!   "flush_timeout_ms": 1,
//!   "reset_delay_ms": 1000,
//!   "lines": 24,
//!   "taps": 9,
//!   "arrangement": {
//!     "lines": { "plunger": 14, "sensor": 3 },
//!     "breakouts": { "DMM": 2, "VNA": 1 }
//!   }
//! }

use crate::Result;
use crate::arrangement::Arrangement;
use crate::switch::SwitchSettings;
use anyhow::{Context, bail};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default = "default_line_ending")]
    pub line_ending: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Silence that ends a drain of unread responses.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,

    #[serde(default = "default_lines")]
    pub lines: u32,

    #[serde(default = "default_taps")]
    pub taps: u32,

    #[serde(default)]
    pub arrangement: Arrangement,
}

fn default_line_ending() -> String {
    "\n".to_string()
}
fn default_timeout_ms() -> u64 {
    2000
}
fn default_flush_timeout_ms() -> u64 {
    1
}
fn default_reset_delay_ms() -> u64 {
    1000
}
fn default_lines() -> u32 {
    24
}
fn default_taps() -> u32 {
    9
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: None,
            line_ending: default_line_ending(),
            timeout_ms: default_timeout_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
            reset_delay_ms: default_reset_delay_ms(),
            lines: default_lines(),
            taps: default_taps(),
            arrangement: Arrangement::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&str>) -> Result<Config> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let text = fs::read_to_string(path).with_context(|| format!("read config file {}", path))?;
        let config: Config =
            serde_json::from_str(&text).with_context(|| format!("parse config file {}", path))?;
        config.validate().with_context(|| format!("invalid config file {}", path))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.lines == 0 {
            bail!("lines must be at least 1");
        }
        // Zero is not a valid socket timeout.
        if self.timeout_ms == 0 || self.flush_timeout_ms == 0 {
            bail!("timeout_ms and flush_timeout_ms must be at least 1");
        }
        if self.line_ending.is_empty() {
            bail!("line_ending must not be empty");
        }
        for (name, line) in &self.arrangement.lines {
            if *line < 1 || *line > self.lines {
                bail!("arrangement line {} = {} is outside 1..={}", name, line, self.lines);
            }
        }
        for (name, tap) in &self.arrangement.breakouts {
            if *tap > self.taps {
                bail!("arrangement breakout {} = {} is outside 0..={}", name, tap, self.taps);
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn switch_settings(&self) -> SwitchSettings {
        SwitchSettings {
            lines: self.lines,
            taps: self.taps,
            reset_delay: Duration::from_millis(self.reset_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_is_all_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.switch_settings(), SwitchSettings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_every_field() {
        let config: Config = serde_json::from_str(
            r#"{
                "address": "10.0.0.7:5025",
                "line_ending": "\r\n",
                "timeout_ms": 500,
                "flush_timeout_ms": 20,
                "reset_delay_ms": 0,
                "lines": 12,
                "taps": 9,
                "arrangement": { "lines": { "plunger": 12 }, "breakouts": { "VNA": 1 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.address.as_deref(), Some("10.0.0.7:5025"));
        assert_eq!(config.line_ending, "\r\n");
        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert_eq!(config.flush_timeout(), Duration::from_millis(20));
        assert_eq!(config.switch_settings().lines, 12);
        assert_eq!(config.switch_settings().reset_delay, Duration::ZERO);
        assert_eq!(config.arrangement, Arrangement::new(&[("plunger", 12)], &[("VNA", 1)]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_fields_and_out_of_range_aliases() {
        assert!(serde_json::from_str::<Config>(r#"{ "adress": "x" }"#).is_err());

        let config: Config =
            serde_json::from_str(r#"{ "arrangement": { "lines": { "gate": 30 } } }"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gate"));

        let config: Config = serde_json::from_str(r#"{ "flush_timeout_ms": 0 }"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn no_path_means_defaults_and_missing_file_is_an_error() {
        assert_eq!(Config::load(None).unwrap(), Config::default());
        assert!(Config::load(Some("/nonexistent/qswitch.json")).is_err());
    }
}
