use bridge_config::{AppConfig, ConfigError};

// 环境变量是进程级共享状态，所有断言放在同一个测试里顺序执行。
#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::remove_var("BRIDGE_DEVICE_ID");
        std::env::set_var("BRIDGE_CAMERA_ADDR", "192.168.1.64:80");
        std::env::set_var("BRIDGE_RPC_ADDR", "http://127.0.0.1:9000");
    }
    let err = AppConfig::from_env().expect_err("device id required");
    assert!(matches!(err, ConfigError::Missing(ref key) if key == "BRIDGE_DEVICE_ID"));

    unsafe {
        std::env::set_var("BRIDGE_DEVICE_ID", "7923463163321710");
        std::env::set_var("BRIDGE_MQTT_TOPIC_PREFIX", "x55P94801qK");
        std::env::set_var("BRIDGE_MQTT_PORT", "8883");
    }
    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.mqtt_port, 8883);
    assert_eq!(config.mqtt_qos, 2);
    assert_eq!(config.ingest_topic(), "/x55P94801qK/+/get");
    assert_eq!(config.mqtt_report_topic, "/x55P94801qK/7923463163321710/update");
    assert_eq!(config.ingress_capacity, 1024);
    assert_eq!(config.event_bus_capacity, 1024000);
    assert_eq!(config.mqtt_retry_interval().as_millis(), 2000);
    assert_eq!(config.rpc_timeout().as_millis(), 2000);
    assert!(config.mqtt_client_id.starts_with("camera-bridge-"));
    assert!(config.es_url.is_none());

    unsafe {
        std::env::set_var("BRIDGE_MQTT_PORT", "not-a-port");
    }
    let err = AppConfig::from_env().expect_err("invalid port");
    assert!(matches!(err, ConfigError::Invalid(ref key, _) if key == "BRIDGE_MQTT_PORT"));

    unsafe {
        std::env::remove_var("BRIDGE_MQTT_PORT");
        std::env::set_var("BRIDGE_MQTT_TOPIC_PREFIX", "a/b");
    }
    let err = AppConfig::from_env().expect_err("multi-segment prefix");
    assert!(matches!(err, ConfigError::Invalid(ref key, _) if key == "BRIDGE_MQTT_TOPIC_PREFIX"));

    unsafe {
        std::env::set_var("BRIDGE_MQTT_TOPIC_PREFIX", "x55P94801qK");
        std::env::set_var("BRIDGE_HEALTH_INTERVAL_SECONDS", "0");
    }
    let err = AppConfig::from_env().expect_err("zero health interval");
    assert!(
        matches!(err, ConfigError::Invalid(ref key, _) if key == "BRIDGE_HEALTH_INTERVAL_SECONDS")
    );

    unsafe {
        std::env::set_var("BRIDGE_HEALTH_INTERVAL_SECONDS", "30");
    }
    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.health_interval().as_secs(), 30);
}
