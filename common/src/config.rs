use serde::{Deserialize, Serialize};

pub const KEY_BROKER_HOST: &str = "mqttServer";
pub const KEY_BROKER_PORT: &str = "mqttPort";
pub const KEY_NODE_NAME: &str = "mqttNodeName";
pub const KEY_TOPIC_PREFIX: &str = "mqttPrefix";

pub const DEFAULT_BROKER_HOST: &str = "192.168.1.100";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_NODE_NAME: &str = "doorbell";
pub const DEFAULT_TOPIC_PREFIX: &str = "home/frontdoor/doorbell";

/// Broker settings as applied to the running device. The port is kept
/// numeric here; the persisted form stores it as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(rename = "mqttServer")]
    pub broker_host: String,
    #[serde(rename = "mqttPort")]
    pub broker_port: u16,
    #[serde(rename = "mqttNodeName")]
    pub node_name: String,
    #[serde(rename = "mqttPrefix")]
    pub topic_prefix: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            broker_host: DEFAULT_BROKER_HOST.to_string(),
            broker_port: DEFAULT_BROKER_PORT,
            node_name: DEFAULT_NODE_NAME.to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

impl DeviceConfig {
    /// Topic the ring notification is published to: `<prefix>/<node>`.
    pub fn ring_topic(&self) -> String {
        format!("{}/{}", self.topic_prefix, self.node_name)
    }

    pub fn broker_endpoint(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }

    pub fn sanitize(&mut self) {
        if self.broker_host.trim().is_empty() {
            self.broker_host = DEFAULT_BROKER_HOST.to_string();
        }
        if self.broker_port == 0 {
            self.broker_port = DEFAULT_BROKER_PORT;
        }
        if self.node_name.trim().is_empty() {
            self.node_name = DEFAULT_NODE_NAME.to_string();
        }
        if self.topic_prefix.trim().is_empty() {
            self.topic_prefix = DEFAULT_TOPIC_PREFIX.to_string();
        }
    }
}

/// Parses a stored port string, falling back to the default for anything
/// that is not a usable port number.
pub fn parse_port(raw: &str) -> u16 {
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => DEFAULT_BROKER_PORT,
    }
}

/// Raw form fields captured by the settings portal. Values are held
/// untouched until the control loop applies them in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDraft {
    pub server: String,
    pub port: String,
    pub node: String,
    pub prefix: String,
}

impl ConfigDraft {
    pub fn apply(self) -> DeviceConfig {
        let mut config = DeviceConfig {
            broker_host: self.server,
            broker_port: parse_port(&self.port),
            node_name: self.node,
            topic_prefix: self.prefix,
        };
        config.sanitize();
        config
    }
}

/// One-shot slot for a draft waiting to be persisted by the control loop.
/// Staging twice before the loop gets around to it keeps only the newer
/// draft.
#[derive(Debug, Default)]
pub struct PendingConfigSave {
    staged: Option<ConfigDraft>,
}

impl PendingConfigSave {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, draft: ConfigDraft) {
        self.staged = Some(draft);
    }

    pub fn take(&mut self) -> Option<ConfigDraft> {
        self.staged.take()
    }

    pub fn is_pending(&self) -> bool {
        self.staged.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stored_key_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.broker_host, "192.168.1.100");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.node_name, "doorbell");
        assert_eq!(config.topic_prefix, "home/frontdoor/doorbell");
    }

    #[test]
    fn ring_topic_joins_prefix_and_node() {
        let draft = ConfigDraft {
            server: "10.0.0.5".to_string(),
            port: "1883".to_string(),
            node: "front".to_string(),
            prefix: "home/door".to_string(),
        };
        let config = draft.apply();

        assert_eq!(config.broker_host, "10.0.0.5");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.ring_topic(), "home/door/front");
    }

    #[test]
    fn apply_sanitizes_blank_fields() {
        let draft = ConfigDraft {
            server: "   ".to_string(),
            port: "1883".to_string(),
            node: String::new(),
            prefix: String::new(),
        };
        let config = draft.apply();

        assert_eq!(config.broker_host, DEFAULT_BROKER_HOST);
        assert_eq!(config.node_name, DEFAULT_NODE_NAME);
        assert_eq!(config.topic_prefix, DEFAULT_TOPIC_PREFIX);
    }

    #[test]
    fn parse_port_falls_back_on_garbage() {
        assert_eq!(parse_port("1883"), 1883);
        assert_eq!(parse_port(" 8883 "), 8883);
        assert_eq!(parse_port(""), DEFAULT_BROKER_PORT);
        assert_eq!(parse_port("abc"), DEFAULT_BROKER_PORT);
        assert_eq!(parse_port("0"), DEFAULT_BROKER_PORT);
        assert_eq!(parse_port("70000"), DEFAULT_BROKER_PORT);
    }

    #[test]
    fn pending_save_keeps_latest_draft() {
        let mut pending = PendingConfigSave::new();
        assert!(!pending.is_pending());

        pending.stage(ConfigDraft {
            server: "first".to_string(),
            port: "1883".to_string(),
            node: "a".to_string(),
            prefix: "p".to_string(),
        });
        pending.stage(ConfigDraft {
            server: "second".to_string(),
            port: "1883".to_string(),
            node: "b".to_string(),
            prefix: "p".to_string(),
        });

        let draft = pending.take().unwrap();
        assert_eq!(draft.server, "second");
        assert!(pending.take().is_none());
        assert!(!pending.is_pending());
    }

    #[test]
    fn device_config_json_uses_stored_key_names() {
        let config = DeviceConfig::default();
        let json = serde_json::to_value(&config).unwrap();

        assert!(json.get("mqttServer").is_some());
        assert!(json.get("mqttPort").is_some());
        assert!(json.get("mqttNodeName").is_some());
        assert!(json.get("mqttPrefix").is_some());
    }
}
