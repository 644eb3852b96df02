//! MQTT 接入：连接管理、入站队列与 rumqttc 传输实现。

mod manager;
mod mqtt;
mod queue;
mod topic;

pub use manager::{ConnectionManager, ConnectionState, ManagerSettings};
pub use mqtt::{MqttTransportConfig, RumqttTransport};
pub use queue::{IngressReceiver, IngressSender, QueueError, ingress_queue};
pub use topic::{TopicError, parse_device_topic};

use async_trait::async_trait;
use std::sync::Arc;

/// 传输层错误。
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect error: {0}")]
    Connect(String),
    #[error("not connected")]
    NotConnected,
    #[error("subscribe error: {0}")]
    Subscribe(String),
    #[error("publish error: {0}")]
    Publish(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("connection closed")]
    Closed,
}

/// 传输层收到的原始消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// 一次成功建立的连接：发布端可共享，接收端由投递循环独占。
pub struct Session {
    pub publisher: Arc<dyn SessionPublisher>,
    pub inbound: Box<dyn SessionInbound>,
}

/// 传输抽象：每次调用建立一条新连接。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Session, TransportError>;
}

/// 连接上的发布/订阅句柄。
#[async_trait]
pub trait SessionPublisher: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), TransportError>;
    async fn publish(&self, topic: &str, qos: u8, payload: Vec<u8>) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// 连接上的消息接收端。返回错误即视为连接丢失。
#[async_trait]
pub trait SessionInbound: Send {
    async fn recv(&mut self) -> Result<InboundMessage, TransportError>;
}

/// 面向业务侧的发布接口。
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}
