//! Engine configuration: file (JSON or YAML) plus `ACCESS_CONTROL__*` overlays.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use ac_access_store::StorageConfig;
use ac_service_tree::TreeSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{AccessError, AccessResult};

pub const ENV_PREFIX: &str = "ACCESS_CONTROL__";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccessControlConfig {
    pub storage: StorageConfig,
    pub sweeper: SweeperConfig,
    pub services: TreeSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    #[serde(with = "human_duration")]
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(600),
        }
    }
}

impl AccessControlConfig {
    /// Parses a document, trying JSON first and falling back to YAML.
    pub fn parse(content: &str) -> AccessResult<Self> {
        let value = parse_document(content)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> AccessResult<Self> {
        serde_json::from_value(value)
            .map_err(|err| AccessError::Config(format!("invalid configuration: {err}")))
    }

    /// Reads `path` (when given and present) and applies environment overlays.
    pub fn load(path: Option<&Path>) -> AccessResult<Self> {
        Self::load_with_env(path, env::vars())
    }

    pub fn load_with_env<I>(path: Option<&Path>, vars: I) -> AccessResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value = match path {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(path).map_err(|err| {
                    AccessError::Config(format!("failed to read {}: {err}", path.display()))
                })?;
                debug!(path = %path.display(), "loading access control configuration");
                parse_document(&content)?
            }
            _ => Value::Object(Map::new()),
        };
        apply_env_overlays(&mut value, vars)?;
        Self::from_value(value)
    }
}

fn parse_document(content: &str) -> AccessResult<Value> {
    if content.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    if let Ok(value) = serde_json::from_str::<Value>(content) {
        return Ok(value);
    }
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|err| AccessError::Config(format!("unparseable configuration: {err}")))?;
    serde_json::to_value(yaml).map_err(|err| AccessError::Config(err.to_string()))
}

/// Applies `ACCESS_CONTROL__SECTION__KEY=value` pairs onto `value`.
fn apply_env_overlays<I>(value: &mut Value, vars: I) -> AccessResult<()>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, raw) in vars {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_ascii_lowercase())
            .collect();
        if path.is_empty() {
            continue;
        }
        debug!(key = %key, "applying configuration overlay");
        set_path(value, &path, parse_env_value(&raw))
            .map_err(|reason| AccessError::Config(format!("{key}: {reason}")))?;
    }
    Ok(())
}

fn set_path(target: &mut Value, path: &[String], value: Value) -> Result<(), String> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(());
    };
    let mut cursor = target;
    for segment in parents {
        let Value::Object(map) = cursor else {
            return Err(format!("`{segment}` is not inside a section"));
        };
        cursor = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    match cursor {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        _ => Err(format!("`{last}` is not inside a section")),
    }
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    Value::String(raw.to_string())
}

/// Durations as humantime strings (`"10m"`); bare numbers are seconds.
mod human_duration {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_access_store::StorageBackend;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = AccessControlConfig::parse("").unwrap();
        assert_eq!(config, AccessControlConfig::default());
        assert_eq!(config.sweeper.interval, Duration::from_secs(600));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    }

    #[test]
    fn json_and_yaml_are_both_accepted() {
        let json = r#"{"sweeper": {"interval": "30s"}, "services": {"name": "bot"}}"#;
        let config = AccessControlConfig::parse(json).unwrap();
        assert_eq!(config.sweeper.interval, Duration::from_secs(30));
        assert_eq!(config.services.name, "bot");

        let yaml = "storage:\n  backend: memory\nsweeper:\n  interval: 120\n";
        let config = AccessControlConfig::parse(yaml).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.sweeper.interval, Duration::from_secs(120));
    }

    #[test]
    fn env_overlays_override_sections() {
        let mut value = serde_json::json!({"storage": {"path": "a.db"}});
        apply_env_overlays(
            &mut value,
            vars(&[
                ("ACCESS_CONTROL__STORAGE__PATH", "b.db"),
                ("ACCESS_CONTROL__STORAGE__WAL_MODE", "false"),
                ("ACCESS_CONTROL__SWEEPER__INTERVAL", "1h"),
                ("UNRELATED", "x"),
            ]),
        )
        .unwrap();
        let config = AccessControlConfig::from_value(value).unwrap();
        assert_eq!(config.storage.path, Path::new("b.db"));
        assert!(!config.storage.wal_mode);
        assert_eq!(config.sweeper.interval, Duration::from_secs(3600));
    }

    #[test]
    fn overlay_into_scalar_is_rejected() {
        let mut value = serde_json::json!({"storage": "oops"});
        let err = apply_env_overlays(
            &mut value,
            vars(&[("ACCESS_CONTROL__STORAGE__PATH", "b.db")]),
        )
        .unwrap_err();
        assert!(matches!(err, AccessError::Config(_)));
    }

    #[test]
    fn bad_interval_is_a_config_error() {
        let err = AccessControlConfig::parse("sweeper:\n  interval: whenever\n").unwrap_err();
        assert!(matches!(err, AccessError::Config(_)));
    }
}
