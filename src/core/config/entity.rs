use super::constant::*;
use crate::utils;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// `ConfigError` covers startup-time configuration failures only; nothing
/// at runtime produces it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("defender configuration file does not exist: {0}")]
    FileNotFound(String),
    #[error("invalid defender configuration: {0}")]
    Invalid(String),
    #[error("cannot read defender configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse defender configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// A duration literal. Accepts either a bare number of milliseconds or a
/// `<number> <unit>` literal such as `200 millis`, `1 s` or `2 minutes`.
/// Zero disables the timeout it configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationLit(pub Duration);

impl DurationLit {
    pub fn millis(ms: u64) -> Self {
        DurationLit(Duration::from_millis(ms))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for DurationLit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration literal".into());
        }
        if let Ok(ms) = s.parse::<u64>() {
            return Ok(DurationLit::millis(ms));
        }
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("malformed duration literal `{}`", s))?;
        let (number, unit) = s.split_at(split);
        let number = number
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("malformed duration literal `{}`", s))?;
        let duration = match unit.trim() {
            "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => {
                Duration::from_millis(number)
            }
            "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs(number),
            "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs(number * 60),
            "h" | "hour" | "hours" => Duration::from_secs(number * 3600),
            other => return Err(format!("unknown duration unit `{}`", other)),
        };
        Ok(DurationLit(duration))
    }
}

impl Serialize for DurationLit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{} millis", self.0.as_millis()))
    }
}

impl<'de> Deserialize<'de> for DurationLit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LitVisitor;

        impl serde::de::Visitor<'_> for LitVisitor {
            type Value = DurationLit;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration literal such as `200 millis` or a number of milliseconds")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(DurationLit::millis(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                if v < 0 {
                    return Err(E::custom("negative duration"));
                }
                Ok(DurationLit::millis(v as u64))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(LitVisitor)
    }
}

/// The circuit-breaker block of one `command.<key>` entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub call_timeout: DurationLit,
    pub reset_timeout: DurationLit,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            max_failures: DEFAULT_MAX_FAILURES,
            call_timeout: DurationLit::millis(DEFAULT_CALL_TIMEOUT_MS),
            reset_timeout: DurationLit::millis(DEFAULT_RESET_TIMEOUT_MS),
        }
    }
}

/// One `command.<key>` entry.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CommandConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    /// Names a dedicated worker for sync commands; absent means the shared
    /// blocking pool.
    pub dispatcher: Option<String>,
}

// DefenderConfig represents the general configuration of Defender.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DefenderConfig {
    pub command: HashMap<String, CommandConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConfigEntity {
    pub version: String,
    pub config: DefenderConfig,
}

impl Default for ConfigEntity {
    fn default() -> Self {
        ConfigEntity {
            version: DEFENDER_VERSION.into(),
            config: DefenderConfig::default(),
        }
    }
}

impl ConfigEntity {
    pub fn new() -> Self {
        ConfigEntity::default()
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.version.is_empty() {
            return Err(ConfigError::Invalid("empty version".into()));
        }
        for (key, cmd) in &self.config.command {
            if utils::is_blank(key) {
                return Err(ConfigError::Invalid("blank command key".into()));
            }
            if cmd.circuit_breaker.max_failures == 0 {
                return Err(ConfigError::Invalid(format!(
                    "command `{}`: max-failures must be at least 1",
                    key
                )));
            }
            if cmd.circuit_breaker.reset_timeout.as_duration().is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "command `{}`: reset-timeout must be positive",
                    key
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConfigEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmtted = serde_json::to_string_pretty(self).unwrap();
        write!(f, "{}", fmtted)
    }
}

/// Which worker runs a *sync* command's blocking body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherKind {
    /// The shared blocking pool. Acceptable, but long sleeps compete with
    /// every other tenant of the pool; the executor warns once per key.
    Default,
    /// A dedicated worker thread with the configured name.
    Pinned(String),
}

impl Default for DispatcherKind {
    fn default() -> Self {
        DispatcherKind::Default
    }
}

/// Resolved, immutable per-key settings handed to an executor at start.
/// Reconfiguration after executor creation is deliberately unsupported.
#[derive(Debug, Clone)]
pub struct MsgConfig {
    pub max_failures: u32,
    /// Zero disables the call timeout.
    pub call_timeout: Duration,
    pub reset_timeout: Duration,
    pub dispatcher: DispatcherKind,
    /// Length of the sliding stats window; also the snapshot tick period.
    pub stat_interval_ms: u32,
    /// Bucket count of the sliding stats window.
    pub stat_sample_count: u32,
}

impl Default for MsgConfig {
    fn default() -> Self {
        MsgConfig {
            max_failures: DEFAULT_MAX_FAILURES,
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            reset_timeout: Duration::from_millis(DEFAULT_RESET_TIMEOUT_MS),
            dispatcher: DispatcherKind::Default,
            stat_interval_ms: DEFAULT_STAT_INTERVAL_MS,
            stat_sample_count: DEFAULT_STAT_SAMPLE_COUNT,
        }
    }
}

impl From<&CommandConfig> for MsgConfig {
    fn from(cmd: &CommandConfig) -> Self {
        let dispatcher = match &cmd.dispatcher {
            Some(name) if !utils::is_blank(name) => DispatcherKind::Pinned(name.clone()),
            _ => DispatcherKind::Default,
        };
        MsgConfig {
            max_failures: cmd.circuit_breaker.max_failures,
            call_timeout: cmd.circuit_breaker.call_timeout.as_duration(),
            reset_timeout: cmd.circuit_breaker.reset_timeout.as_duration(),
            dispatcher,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duration_literals() {
        let cases = vec![
            ("200 millis", 200),
            ("200ms", 200),
            ("0", 0),
            ("1500", 1500),
            ("1 s", 1000),
            ("2 seconds", 2000),
            ("2 minutes", 120_000),
            ("1 hour", 3_600_000),
        ];
        for (lit, expected_ms) in cases {
            let parsed: DurationLit = lit.parse().unwrap();
            assert_eq!(parsed.as_duration().as_millis() as u64, expected_ms, "{}", lit);
        }
        assert!("".parse::<DurationLit>().is_err());
        assert!("ten seconds".parse::<DurationLit>().is_err());
        assert!("10 fortnights".parse::<DurationLit>().is_err());
    }

    #[test]
    fn yaml_roundtrip() {
        let yaml = r#"
version: v1
config:
  command:
    ticker:
      circuit-breaker:
        max-failures: 2
        call-timeout: 200 millis
        reset-timeout: 2 minutes
      dispatcher: ticker-worker
"#;
        let entity: ConfigEntity = serde_yaml::from_str(yaml).unwrap();
        entity.check().unwrap();
        let cmd = &entity.config.command["ticker"];
        assert_eq!(cmd.circuit_breaker.max_failures, 2);
        assert_eq!(cmd.circuit_breaker.call_timeout, DurationLit::millis(200));
        assert_eq!(
            cmd.circuit_breaker.reset_timeout,
            DurationLit::millis(120_000)
        );
        let msg: MsgConfig = cmd.into();
        assert_eq!(msg.dispatcher, DispatcherKind::Pinned("ticker-worker".into()));
        assert_eq!(msg.stat_interval_ms, DEFAULT_STAT_INTERVAL_MS);
    }

    #[test]
    fn unknown_keys_ignored() {
        let yaml = r#"
version: v1
config:
  command:
    quote:
      circuit-breaker:
        max-failures: 3
        not-a-real-knob: true
"#;
        let entity: ConfigEntity = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            entity.config.command["quote"].circuit_breaker.max_failures,
            3
        );
    }

    #[test]
    fn defaults() {
        let cfg = MsgConfig::default();
        assert_eq!(cfg.max_failures, 5);
        assert_eq!(cfg.call_timeout, Duration::from_secs(1));
        assert_eq!(cfg.reset_timeout, Duration::from_secs(5));
        assert_eq!(cfg.dispatcher, DispatcherKind::Default);
    }

    #[test]
    fn check_rejects_zero_max_failures() {
        let yaml = r#"
version: v1
config:
  command:
    broken:
      circuit-breaker:
        max-failures: 0
"#;
        let entity: ConfigEntity = serde_yaml::from_str(yaml).unwrap();
        assert!(entity.check().is_err());
    }
}
