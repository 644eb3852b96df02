//! 桥接服务运行配置加载。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 桥接服务运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_ca_cert: Option<String>,
    pub mqtt_tls_cert: Option<String>,
    pub mqtt_tls_key: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_report_topic: String,
    pub mqtt_qos: u8,
    pub mqtt_keep_alive_seconds: u64,
    pub mqtt_retry_interval_ms: u64,
    pub ingress_capacity: usize,
    pub device_id: String,
    pub camera_addr: String,
    pub camera_username: String,
    pub camera_password: String,
    pub device_call_timeout_ms: u64,
    pub snapshot_dir: String,
    pub file_server_url: Option<String>,
    pub rpc_addr: String,
    pub rpc_timeout_ms: u64,
    pub es_url: Option<String>,
    pub es_username: Option<String>,
    pub es_password: Option<String>,
    pub event_bus_capacity: usize,
    pub health_interval_seconds: u64,
    pub time_zone: String,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let device_id = read_required("BRIDGE_DEVICE_ID")?;
        let camera_addr = read_required("BRIDGE_CAMERA_ADDR")?;
        let rpc_addr = read_required("BRIDGE_RPC_ADDR")?;

        let mqtt_host = env::var("BRIDGE_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("BRIDGE_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("BRIDGE_MQTT_USERNAME");
        let mqtt_password = read_optional("BRIDGE_MQTT_PASSWORD");
        let mqtt_client_id = read_optional("BRIDGE_MQTT_CLIENT_ID")
            .unwrap_or_else(|| format!("camera-bridge-{}", uuid::Uuid::new_v4()));
        let mqtt_ca_cert = read_optional("BRIDGE_MQTT_CA_CERT");
        let mqtt_tls_cert = read_optional("BRIDGE_MQTT_TLS_CERT");
        let mqtt_tls_key = read_optional("BRIDGE_MQTT_TLS_KEY");
        let mqtt_topic_prefix = normalize_prefix(
            &env::var("BRIDGE_MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "/camera".to_string()),
        );
        if mqtt_topic_prefix.trim_matches('/').contains('/') {
            // 下行 topic 必须恰好 4 段：`/{prefix}/{device_id}/get`
            return Err(ConfigError::Invalid(
                "BRIDGE_MQTT_TOPIC_PREFIX".to_string(),
                mqtt_topic_prefix,
            ));
        }
        let mqtt_report_topic = read_optional("BRIDGE_MQTT_REPORT_TOPIC")
            .unwrap_or_else(|| format!("{}/{}/update", mqtt_topic_prefix, device_id));
        let mqtt_qos = read_u8_with_default("BRIDGE_MQTT_QOS", 2)?;
        if mqtt_qos > 2 {
            return Err(ConfigError::Invalid(
                "BRIDGE_MQTT_QOS".to_string(),
                mqtt_qos.to_string(),
            ));
        }
        let mqtt_keep_alive_seconds = read_u64_with_default("BRIDGE_MQTT_KEEP_ALIVE_SECONDS", 60)?;
        let mqtt_retry_interval_ms = read_u64_with_default("BRIDGE_MQTT_RETRY_INTERVAL_MS", 2000)?;
        let ingress_capacity = read_usize_with_default("BRIDGE_INGRESS_CAPACITY", 1024)?;
        let camera_username = env::var("BRIDGE_CAMERA_USERNAME").unwrap_or_default();
        let camera_password = env::var("BRIDGE_CAMERA_PASSWORD").unwrap_or_default();
        let device_call_timeout_ms =
            read_u64_with_default("BRIDGE_DEVICE_CALL_TIMEOUT_MS", 10_000)?;
        let snapshot_dir =
            env::var("BRIDGE_SNAPSHOT_DIR").unwrap_or_else(|_| "./snapshots".to_string());
        let file_server_url = read_optional("BRIDGE_FILE_SERVER_URL");
        let rpc_timeout_ms = read_u64_with_default("BRIDGE_RPC_TIMEOUT_MS", 2000)?;
        let es_url = read_optional("BRIDGE_ES_URL");
        let es_username = read_optional("BRIDGE_ES_USERNAME");
        let es_password = read_optional("BRIDGE_ES_PASSWORD");
        let event_bus_capacity = read_usize_with_default("BRIDGE_EVENT_BUS_CAPACITY", 1000 * 1024)?;
        let health_interval_seconds = read_u64_with_default("BRIDGE_HEALTH_INTERVAL_SECONDS", 60)?;
        let time_zone = env::var("BRIDGE_TIME_ZONE").unwrap_or_else(|_| "CST-0".to_string());

        if ingress_capacity == 0 {
            return Err(ConfigError::Invalid(
                "BRIDGE_INGRESS_CAPACITY".to_string(),
                "0".to_string(),
            ));
        }
        if health_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "BRIDGE_HEALTH_INTERVAL_SECONDS".to_string(),
                "0".to_string(),
            ));
        }
        if event_bus_capacity == 0 {
            return Err(ConfigError::Invalid(
                "BRIDGE_EVENT_BUS_CAPACITY".to_string(),
                "0".to_string(),
            ));
        }

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_ca_cert,
            mqtt_tls_cert,
            mqtt_tls_key,
            mqtt_topic_prefix,
            mqtt_report_topic,
            mqtt_qos,
            mqtt_keep_alive_seconds,
            mqtt_retry_interval_ms,
            ingress_capacity,
            device_id,
            camera_addr,
            camera_username,
            camera_password,
            device_call_timeout_ms,
            snapshot_dir,
            file_server_url,
            rpc_addr,
            rpc_timeout_ms,
            es_url,
            es_username,
            es_password,
            event_bus_capacity,
            health_interval_seconds,
            time_zone,
        })
    }

    /// 下行命令订阅 topic：`{prefix}/+/get`。
    pub fn ingest_topic(&self) -> String {
        format!("{}/+/get", self.mqtt_topic_prefix)
    }

    pub fn mqtt_retry_interval(&self) -> Duration {
        Duration::from_millis(self.mqtt_retry_interval_ms)
    }

    pub fn device_call_timeout(&self) -> Duration {
        Duration::from_millis(self.device_call_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_seconds)
    }
}

/// 前缀统一为 `/segment` 形式。
fn normalize_prefix(prefix: &str) -> String {
    format!("/{}", prefix.trim_matches('/'))
}

fn read_required(key: &str) -> Result<String, ConfigError> {
    read_optional(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
