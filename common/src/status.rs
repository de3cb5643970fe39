use serde::Serialize;

use crate::config::DeviceConfig;

/// Body returned by every unmatched route.
pub const NOT_FOUND_BODY: &str = r#"{"message":"Not found"}"#;

/// `GET /status` response body.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub uptime: u64,
    pub heap_free: u32,
    pub mqtt_config: MqttConfigView,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttConfigView {
    pub server: String,
    pub port: u16,
    pub node: String,
    pub prefix: String,
}

impl StatusReport {
    pub fn new(config: &DeviceConfig, uptime_ms: u64, heap_free: u32) -> Self {
        Self {
            uptime: uptime_ms,
            heap_free,
            mqtt_config: MqttConfigView {
                server: config.broker_host.clone(),
                port: config.broker_port,
                node: config.node_name.clone(),
                prefix: config.topic_prefix.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn status_report_serializes_to_the_documented_shape() {
        let config = DeviceConfig {
            broker_host: "10.0.0.5".to_string(),
            broker_port: 1883,
            node_name: "front".to_string(),
            topic_prefix: "home/door".to_string(),
        };
        let report = StatusReport::new(&config, 123_456, 98_304);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "uptime": 123_456,
                "heap_free": 98_304,
                "mqtt_config": {
                    "server": "10.0.0.5",
                    "port": 1883,
                    "node": "front",
                    "prefix": "home/door",
                }
            })
        );
    }

    #[test]
    fn port_serializes_as_a_number() {
        let report = StatusReport::new(&DeviceConfig::default(), 0, 0);
        let body = serde_json::to_string(&report).unwrap();
        assert!(body.contains("\"port\":1883"));
        assert!(!body.contains("\"port\":\""));
    }

    #[test]
    fn not_found_body_is_well_formed_json() {
        let value: serde_json::Value = serde_json::from_str(NOT_FOUND_BODY).unwrap();
        assert_eq!(value["message"], "Not found");
    }
}
