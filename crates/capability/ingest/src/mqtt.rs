use crate::{InboundMessage, Session, SessionInbound, SessionPublisher, Transport, TransportError};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 等待 CONNACK 的上限。
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// rumqttc 请求通道容量。
const REQUEST_CAPACITY: usize = 64;

/// MQTT 传输配置。
#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive: Duration,
    /// CA 证书路径（PEM），设置后启用 TLS
    pub ca_cert: Option<String>,
    /// 客户端证书与私钥路径（PEM），同时设置时启用双向认证
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

#[derive(Debug, Clone)]
struct TlsMaterial {
    ca: Vec<u8>,
    client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

/// 基于 rumqttc 的传输实现。关闭自动重连（clean session），重连由连接管理器负责。
#[derive(Debug, Clone)]
pub struct RumqttTransport {
    config: MqttTransportConfig,
    tls: Option<TlsMaterial>,
}

impl RumqttTransport {
    /// 创建传输；证书文件在此一次性读取。
    pub fn new(config: MqttTransportConfig) -> Result<Self, TransportError> {
        let tls = match config.ca_cert.as_deref() {
            Some(ca_path) => {
                let ca = read_pem(ca_path)?;
                let client_auth = match (config.tls_cert.as_deref(), config.tls_key.as_deref()) {
                    (Some(cert), Some(key)) => Some((read_pem(cert)?, read_pem(key)?)),
                    _ => None,
                };
                Some(TlsMaterial { ca, client_auth })
            }
            None => None,
        };
        Ok(Self { config, tls })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }
        if let Some(tls) = self.tls.clone() {
            options.set_transport(rumqttc::Transport::tls_with_config(
                TlsConfiguration::Simple {
                    ca: tls.ca,
                    alpn: None,
                    client_auth: tls.client_auth,
                },
            ));
        }
        options
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn connect(&self) -> Result<Session, TransportError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        tokio::time::timeout(CONNECT_TIMEOUT, wait_conn_ack(&mut eventloop))
            .await
            .map_err(|_| TransportError::Connect("connack timeout".to_string()))??;
        debug!(
            target: "bridge.ingest",
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            "mqtt_connack_received"
        );
        Ok(Session {
            publisher: Arc::new(RumqttPublisher { client }),
            inbound: Box::new(RumqttInbound { eventloop }),
        })
    }
}

async fn wait_conn_ack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(TransportError::Connect(format!("{:?}", ack.code)));
                }
                return Ok(());
            }
            Ok(_) => {}
            Err(err) => return Err(TransportError::Connect(err.to_string())),
        }
    }
}

struct RumqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl SessionPublisher for RumqttPublisher {
    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, qos_from_u8(qos))
            .await
            .map_err(|err| TransportError::Subscribe(err.to_string()))
    }

    async fn publish(&self, topic: &str, qos: u8, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, qos_from_u8(qos), false, payload)
            .await
            .map_err(|err| TransportError::Publish(err.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|err| TransportError::Publish(err.to_string()))
    }
}

struct RumqttInbound {
    eventloop: EventLoop,
}

#[async_trait]
impl SessionInbound for RumqttInbound {
    async fn recv(&mut self) -> Result<InboundMessage, TransportError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Event::Incoming(Packet::Disconnect))
                | Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    return Err(TransportError::Closed);
                }
                Ok(_) => {}
                Err(err) => return Err(TransportError::Connect(err.to_string())),
            }
        }
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|err| TransportError::Tls(format!("{}: {}", path, err)))
}

fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ca_file_is_tls_error() {
        let config = MqttTransportConfig {
            host: "127.0.0.1".to_string(),
            port: 8883,
            username: None,
            password: None,
            client_id: "camera-bridge-test".to_string(),
            keep_alive: Duration::from_secs(60),
            ca_cert: Some("/nonexistent/ca.pem".to_string()),
            tls_cert: None,
            tls_key: None,
        };
        assert!(matches!(
            RumqttTransport::new(config),
            Err(TransportError::Tls(_))
        ));
    }

    #[test]
    fn qos_maps_to_levels() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
    }
}
