use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cluster::NodeId;
use crate::utils::retry::millis;
use crate::utils::RestartPolicy;

// ============================================================================
// Directory Configuration
// ============================================================================
//
// Everything an EntityDirectory needs to know about its surroundings:
// - which node it runs on (compared against the placement service)
// - how long callers wait for a reply
// - when idle entities are passivated
// - how entities restart after persist failures
//
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Identity of this node, as known by the placement service
    pub node_id: NodeId,
    /// How long `send` waits for a reply
    #[serde(with = "millis")]
    pub ask_timeout: Duration,
    /// Inactivity after which an entity is passivated; `None` keeps entities forever
    #[serde(with = "optional_millis")]
    pub idle_timeout: Option<Duration>,
    /// How often the background sweeper looks for idle entities
    #[serde(with = "millis")]
    pub passivation_interval: Duration,
    /// Restart schedule applied to entities whose events fail to persist
    pub restart: RestartPolicy,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::local(),
            ask_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(300)),
            passivation_interval: Duration::from_secs(30),
            restart: RestartPolicy::default(),
        }
    }
}

impl DirectoryConfig {
    /// Defaults overridden by `ENTITY_*` environment variables.
    ///
    /// Recognised: `ENTITY_NODE_ID`, `ENTITY_ASK_TIMEOUT_MS`,
    /// `ENTITY_IDLE_TIMEOUT_MS` (0 disables passivation), `ENTITY_MAX_RESTARTS`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(node) = lookup("ENTITY_NODE_ID") {
            config.node_id = NodeId::new(node);
        }
        if let Some(ms) = lookup("ENTITY_ASK_TIMEOUT_MS") {
            config.ask_timeout = Duration::from_millis(ms.parse()?);
        }
        if let Some(ms) = lookup("ENTITY_IDLE_TIMEOUT_MS") {
            config.idle_timeout = match ms.parse::<u64>()? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            };
        }
        if let Some(max) = lookup("ENTITY_MAX_RESTARTS") {
            config.restart.max_restarts = max.parse()?;
        }

        Ok(config)
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ENTITY_NODE_ID", "node-b"),
            ("ENTITY_ASK_TIMEOUT_MS", "250"),
            ("ENTITY_IDLE_TIMEOUT_MS", "0"),
            ("ENTITY_MAX_RESTARTS", "7"),
        ]
        .into_iter()
        .collect();

        let config = DirectoryConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.node_id, NodeId::new("node-b"));
        assert_eq!(config.ask_timeout, Duration::from_millis(250));
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.restart.max_restarts, 7);
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let result = DirectoryConfig::from_lookup(|k| {
            (k == "ENTITY_ASK_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_json_config_with_partial_fields() {
        let config: DirectoryConfig =
            serde_json::from_str(r#"{"ask_timeout": 1000, "idle_timeout": null}"#).unwrap();
        assert_eq!(config.ask_timeout, Duration::from_secs(1));
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.restart, RestartPolicy::default());
    }
}
