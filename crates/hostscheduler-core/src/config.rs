//! hostscheduler.toml configuration parser.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::FlagValues;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Backend to build (`gke`).
    pub backend: Option<String>,
    /// Overall per-call timeout (e.g., "20m").
    pub timeout: Option<String>,
    /// Backend flag values, keyed by flag name.
    #[serde(default)]
    pub flags: HashMap<String, String>,
    pub wait: Option<WaitConfig>,
}

/// Operation polling and retry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitConfig {
    pub initial_interval: Option<String>,
    pub max_interval: Option<String>,
    pub multiplier: Option<f64>,
    pub max_attempts: Option<u32>,
}

impl WaitConfig {
    pub const INITIAL_INTERVAL: &'static str = "wait-initial-interval";
    pub const MAX_INTERVAL: &'static str = "wait-max-interval";
    pub const MULTIPLIER: &'static str = "wait-multiplier";
    pub const MAX_ATTEMPTS: &'static str = "wait-max-attempts";

    /// Longest accepted poll interval.
    pub const INTERVAL_LIMIT: Duration = Duration::from_secs(24 * 3600);

    pub fn flag_values(&self) -> FlagValues {
        let mut values = FlagValues::new();
        if let Some(v) = &self.initial_interval {
            values.set(Self::INITIAL_INTERVAL, v.clone());
        }
        if let Some(v) = &self.max_interval {
            values.set(Self::MAX_INTERVAL, v.clone());
        }
        if let Some(v) = self.multiplier {
            values.set(Self::MULTIPLIER, v.to_string());
        }
        if let Some(v) = self.max_attempts {
            values.set(Self::MAX_ATTEMPTS, v.to_string());
        }
        values
    }

    /// Read `wait-*` flags back, rejecting values that do not parse.
    pub fn from_flags(values: &FlagValues) -> Result<Self, String> {
        let duration = |name: &str| -> Result<Option<String>, String> {
            let Some(v) = values.get(name) else {
                return Ok(None);
            };
            match parse_duration(v) {
                Some(d) if d <= Self::INTERVAL_LIMIT => Ok(Some(v.to_string())),
                Some(_) => Err(format!("{name} {v:?} exceeds {}s", Self::INTERVAL_LIMIT.as_secs())),
                None => Err(format!("invalid {name}: {v:?}")),
            }
        };
        let multiplier = match values.get(Self::MULTIPLIER) {
            Some(v) => Some(
                v.parse::<f64>()
                    .ok()
                    .filter(|m| m.is_finite())
                    .ok_or_else(|| format!("invalid {}: {v:?}", Self::MULTIPLIER))?,
            ),
            None => None,
        };
        let max_attempts = match values.get(Self::MAX_ATTEMPTS) {
            Some(v) => Some(
                v.parse::<u32>()
                    .map_err(|_| format!("invalid {}: {v:?}", Self::MAX_ATTEMPTS))?,
            ),
            None => None,
        };
        Ok(Self {
            initial_interval: duration(Self::INITIAL_INTERVAL)?,
            max_interval: duration(Self::MAX_INTERVAL)?,
            multiplier,
            max_attempts,
        })
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: SchedulerConfig = toml::from_str(content)?;
        if let Some(timeout) = &config.timeout {
            if parse_duration(timeout).is_none() {
                anyhow::bail!("invalid timeout: {timeout:?}");
            }
        }
        Ok(config)
    }

    /// Backend flag values from the file. The `[wait]` table is folded in
    /// as `wait-*` flags so the command line can override it.
    pub fn flag_values(&self) -> FlagValues {
        let mut values: FlagValues = self.flags.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if let Some(wait) = &self.wait {
            values.merge(&wait.flag_values());
        }
        values
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.as_deref().and_then(parse_duration)
    }
}

/// Parse a human duration: `"500ms"`, `"30s"`, `"5m"`, `"1h"`, or bare seconds.
/// Values whose seconds overflow `u64` are rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
backend = "gke"
timeout = "20m"

[flags]
key = "/etc/hostscheduler/key.json"
project = "test-infra"
zone = "europe-west1-b"

[wait]
initial_interval = "2s"
max_interval = "1m"
multiplier = 1.5
max_attempts = 3
"#;
        let config = SchedulerConfig::parse(toml_str).unwrap();
        assert_eq!(config.backend.as_deref(), Some("gke"));
        assert_eq!(config.timeout(), Some(Duration::from_secs(1200)));

        let values = config.flag_values();
        assert_eq!(values.get("project"), Some("test-infra"));
        assert_eq!(values.get("zone"), Some("europe-west1-b"));

        assert_eq!(values.get("wait-max-interval"), Some("1m"));

        let wait = config.wait.unwrap();
        assert_eq!(wait.max_attempts, Some(3));
        assert_eq!(wait.multiplier, Some(1.5));
    }

    #[test]
    fn wait_settings_survive_flag_values() {
        let wait = WaitConfig {
            initial_interval: Some("2s".into()),
            max_interval: None,
            multiplier: Some(1.5),
            max_attempts: Some(4),
        };
        let back = WaitConfig::from_flags(&wait.flag_values()).unwrap();
        assert_eq!(back.initial_interval.as_deref(), Some("2s"));
        assert_eq!(back.max_interval, None);
        assert_eq!(back.multiplier, Some(1.5));
        assert_eq!(back.max_attempts, Some(4));

        let bad = FlagValues::new().with(WaitConfig::MAX_ATTEMPTS, "lots");
        assert!(WaitConfig::from_flags(&bad).is_err());
        let bad = FlagValues::new().with(WaitConfig::INITIAL_INTERVAL, "soon");
        assert!(WaitConfig::from_flags(&bad).is_err());
    }

    #[test]
    fn parse_minimal() {
        let config = SchedulerConfig::parse("backend = \"gke\"\n").unwrap();
        assert!(config.flags.is_empty());
        assert!(config.wait.is_none());
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn rejects_bad_timeout() {
        assert!(SchedulerConfig::parse("timeout = \"soon\"\n").is_err());
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostscheduler.toml");
        std::fs::write(&path, "backend = \"gke\"\n[flags]\nzone = \"us-central1-a\"\n").unwrap();

        let config = SchedulerConfig::from_file(&path).unwrap();
        assert_eq!(config.flag_values().get("zone"), Some("us-central1-a"));
        assert!(SchedulerConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("invalid"), None);
    }

    #[test]
    fn overflowing_durations_are_rejected() {
        assert_eq!(parse_duration("307445734561825862m"), None);
        assert_eq!(parse_duration("18446744073709551615h"), None);
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Some(Duration::from_secs(u64::MAX))
        );
        assert!(SchedulerConfig::parse("timeout = \"307445734561825862m\"\n").is_err());
    }

    #[test]
    fn wait_flags_are_range_checked() {
        for (name, value) in [
            (WaitConfig::INITIAL_INTERVAL, "18446744073709551615s"),
            (WaitConfig::MAX_INTERVAL, "25h"),
            (WaitConfig::MULTIPLIER, "inf"),
            (WaitConfig::MULTIPLIER, "NaN"),
        ] {
            let values = FlagValues::new().with(name, value);
            assert!(WaitConfig::from_flags(&values).is_err(), "{name}={value}");
        }
        let values = FlagValues::new().with(WaitConfig::MAX_INTERVAL, "24h");
        assert_eq!(
            WaitConfig::from_flags(&values).unwrap().max_interval.as_deref(),
            Some("24h")
        );
    }
}
