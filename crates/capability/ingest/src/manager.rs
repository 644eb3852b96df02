//! 连接管理：唯一的 broker 连接、固定间隔重连、连接后重新订阅。

use crate::queue::{IngressSender, QueueError};
use crate::topic::parse_device_topic;
use crate::{InboundMessage, Publisher, Session, SessionInbound, SessionPublisher, Transport, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use bridge_telemetry::{
    BRIDGE_EVENT_INDEX, EventBus, record_inbound_message, record_ingress_dropped,
    record_reconnect, record_rejected_topic,
};
use domain::DevicePayload;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// 连接管理参数。
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// 下行订阅 topic（如 `/camera/+/get`）
    pub ingest_topic: String,
    pub qos: u8,
    pub retry_interval: Duration,
}

/// 连接管理器。显式构造后注入到发布方，不使用进程级全局句柄。
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    settings: ManagerSettings,
    publisher: Mutex<Option<Arc<dyn SessionPublisher>>>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    ingress: StdMutex<Option<IngressSender>>,
    run_loop: StdMutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    bus: EventBus,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: ManagerSettings,
        ingress: IngressSender,
        bus: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                transport,
                settings,
                publisher: Mutex::new(None),
                state,
                shutdown,
                ingress: StdMutex::new(Some(ingress)),
                run_loop: StdMutex::new(None),
                started: AtomicBool::new(false),
                bus,
            }),
        }
    }

    /// 阻塞直到首次连接成功（失败按固定间隔无限重试），随后启动投递循环。
    ///
    /// 重复调用直接返回。
    pub async fn start(&self) -> Result<(), TransportError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let session = self
            .inner
            .connect_loop()
            .await
            .ok_or(TransportError::Closed)?;
        let inbound = self
            .inner
            .install(session)
            .await
            .ok_or(TransportError::Closed)?;
        let handle = tokio::spawn(self.inner.clone().run(inbound));
        *lock(&self.inner.run_loop) = Some(handle);
        Ok(())
    }

    /// 断开连接，等待投递循环退出，然后关闭入站队列。
    ///
    /// 返回时不再持有任何会话，即使停止时正有重连在进行。
    pub async fn stop(&self) -> Result<(), TransportError> {
        self.inner.shutdown.send_replace(true);
        self.inner.teardown().await;

        let handle = lock(&self.inner.run_loop).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(target: "bridge.ingest", error = %err, "mqtt_run_loop_join_failed");
            }
        }
        self.inner.teardown().await;
        lock(&self.inner.ingress).take();
        info!(target: "bridge.ingest", "connection_manager_stopped");
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

}

#[async_trait]
impl Publisher for ConnectionManager {
    /// 使用调用时刻的当前连接发布；无连接时返回 `NotConnected`，不自动重试。
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let publisher = self.inner.publisher.lock().await.clone();
        match publisher {
            Some(publisher) => {
                publisher
                    .publish(topic, self.inner.settings.qos, payload)
                    .await
            }
            None => Err(TransportError::NotConnected),
        }
    }
}

impl Inner {
    fn stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// 连接失败时按固定间隔重试；只有停止信号能中断。
    async fn connect_loop(&self) -> Option<Session> {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if self.stopped() {
                return None;
            }
            self.state.send_replace(ConnectionState::Connecting);
            let attempt = tokio::select! {
                attempt = self.transport.connect() => attempt,
                _ = stop_signal(&mut shutdown) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    return None;
                }
            };
            match attempt {
                Ok(session) => return Some(session),
                Err(err) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    warn!(
                        target: "bridge.ingest",
                        error = %err,
                        retry_ms = self.settings.retry_interval.as_millis() as u64,
                        "mqtt_connect_failed"
                    );
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.retry_interval) => {}
                _ = stop_signal(&mut shutdown) => return None,
            }
        }
    }

    /// 订阅下行 topic 并登记发布句柄。订阅失败只记日志，不断开连接。
    ///
    /// 已收到停止信号时断开新会话并返回 `None`。
    async fn install(&self, session: Session) -> Option<Box<dyn SessionInbound>> {
        let Session { publisher, inbound } = session;
        if let Err(err) = publisher
            .subscribe(&self.settings.ingest_topic, self.settings.qos)
            .await
        {
            warn!(
                target: "bridge.ingest",
                topic = %self.settings.ingest_topic,
                error = %err,
                "mqtt_subscribe_failed"
            );
        }
        // stop() 先置停止标志再取锁，持锁检查即可避免漏断
        let mut slot = self.publisher.lock().await;
        if self.stopped() {
            drop(slot);
            self.disconnect(publisher.as_ref()).await;
            self.state.send_replace(ConnectionState::Disconnected);
            return None;
        }
        *slot = Some(publisher);
        self.state.send_replace(ConnectionState::Connected);
        drop(slot);
        info!(
            target: "bridge.ingest",
            topic = %self.settings.ingest_topic,
            qos = self.settings.qos,
            "mqtt_connected"
        );
        Some(inbound)
    }

    async fn teardown(&self) {
        let publisher = self.publisher.lock().await.take();
        if let Some(publisher) = publisher {
            self.disconnect(publisher.as_ref()).await;
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn disconnect(&self, publisher: &dyn SessionPublisher) {
        if let Err(err) = publisher.disconnect().await {
            warn!(target: "bridge.ingest", error = %err, "mqtt_disconnect_failed");
        }
    }

    async fn run(self: Arc<Self>, mut inbound: Box<dyn SessionInbound>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let lost = tokio::select! {
                _ = stop_signal(&mut shutdown) => break,
                message = inbound.recv() => match message {
                    Ok(message) => {
                        self.deliver(message);
                        continue;
                    }
                    Err(err) => err,
                },
            };
            if self.stopped() {
                break;
            }
            warn!(target: "bridge.ingest", error = %lost, "mqtt_connection_lost");
            self.teardown().await;
            record_reconnect();
            match self.connect_loop().await {
                Some(session) => match self.install(session).await {
                    Some(next) => inbound = next,
                    None => break,
                },
                None => break,
            }
        }
        debug!(target: "bridge.ingest", "mqtt_run_loop_exited");
    }

    /// 投递到入站队列；队列满时丢弃，不阻塞接收循环。
    fn deliver(&self, message: InboundMessage) {
        record_inbound_message();
        let device_id = match parse_device_topic(&message.topic) {
            Ok(device_id) => device_id,
            Err(err) => {
                record_rejected_topic();
                warn!(target: "bridge.ingest", topic = %message.topic, error = %err, "mqtt_topic_rejected");
                return;
            }
        };
        debug!(
            target: "bridge.ingest",
            topic = %message.topic,
            payload_size = message.payload.len(),
            "mqtt_message_received"
        );

        let payload = DevicePayload::new(
            device_id.clone(),
            message.payload,
            Utc::now().timestamp_millis(),
        );
        let guard = lock(&self.ingress);
        let Some(sender) = guard.as_ref() else {
            return;
        };
        match sender.try_send(payload) {
            Ok(()) => {}
            Err(QueueError::Full) => {
                record_ingress_dropped();
                warn!(
                    target: "bridge.ingest",
                    topic = %message.topic,
                    device_id = %device_id,
                    "ingress_queue_full"
                );
                let mut fields = Map::new();
                fields.insert("event".to_string(), Value::from("ingress_queue_full"));
                fields.insert("did".to_string(), Value::from(device_id));
                fields.insert("topic".to_string(), Value::from(message.topic));
                self.bus.emit_or_log(fields, BRIDGE_EVENT_INDEX);
            }
            Err(QueueError::Closed) => {
                debug!(target: "bridge.ingest", topic = %message.topic, "ingress_queue_closed");
            }
        }
    }
}

async fn stop_signal(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}
