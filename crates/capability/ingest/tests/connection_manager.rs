use async_trait::async_trait;
use bridge_ingest::{
    ConnectionManager, ConnectionState, InboundMessage, IngressReceiver, ManagerSettings,
    Publisher, Session, SessionInbound, SessionPublisher, Transport, TransportError,
    ingress_queue,
};
use bridge_telemetry::{EventBus, EventBusWorker, NoopSink};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

const RETRY: Duration = Duration::from_millis(2000);

type Feed = mpsc::UnboundedSender<Result<InboundMessage, TransportError>>;

/// 按脚本决定每次连接成败的传输。
#[derive(Default)]
struct ScriptedTransport {
    attempts: AtomicUsize,
    failing_attempts: Mutex<HashSet<usize>>,
    subscribes: Arc<AtomicUsize>,
    fail_subscribe: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    feeds: Mutex<Vec<Feed>>,
    held_attempt: Mutex<Option<(usize, Arc<Notify>)>>,
}

impl ScriptedTransport {
    /// 第 `attempt` 次连接挂起，直到返回的 `Notify` 被唤醒。
    fn hold_attempt(&self, attempt: usize) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.held_attempt.lock().unwrap() = Some((attempt, release.clone()));
        release
    }

    fn fail_attempt(&self, attempt: usize) {
        self.failing_attempts.lock().unwrap().insert(attempt);
    }

    fn feed(&self, session: usize) -> Feed {
        self.feeds.lock().unwrap()[session].clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> Result<Session, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let held = self.held_attempt.lock().unwrap().clone();
        if let Some((held, release)) = held {
            if held == attempt {
                release.notified().await;
            }
        }
        if self.failing_attempts.lock().unwrap().contains(&attempt) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().push(tx);
        Ok(Session {
            publisher: Arc::new(FakePublisher {
                subscribes: self.subscribes.clone(),
                fail_subscribe: self.fail_subscribe.clone(),
                published: self.published.clone(),
            }),
            inbound: Box::new(FakeInbound { rx }),
        })
    }
}

struct FakePublisher {
    subscribes: Arc<AtomicUsize>,
    fail_subscribe: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

#[async_trait]
impl SessionPublisher for FakePublisher {
    async fn subscribe(&self, _topic: &str, _qos: u8) -> Result<(), TransportError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Subscribe("not authorized".to_string()));
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, _qos: u8, payload: Vec<u8>) -> Result<(), TransportError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct FakeInbound {
    rx: mpsc::UnboundedReceiver<Result<InboundMessage, TransportError>>,
}

#[async_trait]
impl SessionInbound for FakeInbound {
    async fn recv(&mut self) -> Result<InboundMessage, TransportError> {
        match self.rx.recv().await {
            Some(result) => result,
            None => Err(TransportError::Closed),
        }
    }
}

fn message(topic: &str) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        payload: br#"{"command_id":"c1"}"#.to_vec(),
    }
}

fn build_manager(
    transport: Arc<ScriptedTransport>,
    capacity: usize,
) -> (ConnectionManager, IngressReceiver, EventBusWorker) {
    let (sender, receiver) = ingress_queue(capacity);
    let (bus, worker) = EventBus::spawn(64, Arc::new(NoopSink));
    let settings = ManagerSettings {
        ingest_topic: "/camera/+/get".to_string(),
        qos: 2,
        retry_interval: RETRY,
    };
    (
        ConnectionManager::new(transport, settings, sender, bus),
        receiver,
        worker,
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn start_retries_until_connected() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.fail_attempt(1);
    transport.fail_attempt(2);
    let (manager, _receiver, _worker) = build_manager(transport.clone(), 8);

    let started = tokio::time::Instant::now();
    manager.start().await.expect("start");
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= RETRY * 2 && elapsed < RETRY * 2 + Duration::from_millis(50));
    assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent() {
    let transport = Arc::new(ScriptedTransport::default());
    let (manager, _receiver, _worker) = build_manager(transport.clone(), 8);
    manager.start().await.expect("start");
    manager.start().await.expect("start again");
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnects_within_retry_interval_and_resubscribes_once() {
    let transport = Arc::new(ScriptedTransport::default());
    let (manager, mut receiver, _worker) = build_manager(transport.clone(), 8);
    manager.start().await.expect("start");

    transport
        .feed(0)
        .send(Ok(message("/camera/7923463163321710/get")))
        .unwrap();
    let payload = receiver.recv().await.expect("delivered");
    assert_eq!(payload.device_id, "7923463163321710");

    // 第一次重连失败，第二次成功
    transport.fail_attempt(2);
    let lost_at = tokio::time::Instant::now();
    transport
        .feed(0)
        .send(Err(TransportError::Connect("connection reset".to_string())))
        .unwrap();

    let subscribes = transport.subscribes.clone();
    wait_until(|| subscribes.load(Ordering::SeqCst) == 2).await;
    assert!(lost_at.elapsed() <= RETRY + Duration::from_millis(20));
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);

    // 新连接上的消息与发布都走新会话
    transport
        .feed(1)
        .send(Ok(message("/camera/7923463163321710/get")))
        .unwrap();
    assert!(receiver.recv().await.is_some());
    manager
        .publish("/camera/7923463163321710/update", b"{}".to_vec())
        .await
        .expect("publish");
    assert_eq!(transport.published.lock().unwrap().len(), 1);

    tokio::time::sleep(RETRY * 3).await;
    assert_eq!(transport.subscribes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn publish_without_connection_fails() {
    let transport = Arc::new(ScriptedTransport::default());
    let (manager, _receiver, _worker) = build_manager(transport, 8);
    let err = manager
        .publish("/camera/d/update", b"{}".to_vec())
        .await
        .expect_err("not connected");
    assert!(matches!(err, TransportError::NotConnected));
}

#[tokio::test]
async fn subscribe_failure_keeps_connection() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.fail_subscribe.store(true, Ordering::SeqCst);
    let (manager, _receiver, _worker) = build_manager(transport.clone(), 8);
    manager.start().await.expect("start");
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_topics_are_not_enqueued() {
    let transport = Arc::new(ScriptedTransport::default());
    let (manager, mut receiver, _worker) = build_manager(transport.clone(), 8);
    manager.start().await.expect("start");

    let feed = transport.feed(0);
    feed.send(Ok(message("/camera/a/b/get"))).unwrap();
    feed.send(Ok(message("camera/get"))).unwrap();
    feed.send(Ok(message("/camera/good/get"))).unwrap();

    let payload = receiver.recv().await.expect("delivered");
    assert_eq!(payload.device_id, "good");
}

#[tokio::test]
async fn full_queue_drops_and_keeps_receiving() {
    let transport = Arc::new(ScriptedTransport::default());
    let (manager, mut receiver, _worker) = build_manager(transport.clone(), 2);
    manager.start().await.expect("start");

    let feed = transport.feed(0);
    for n in 0..3 {
        feed.send(Ok(message(&format!("/camera/d{}/get", n)))).unwrap();
    }
    // 队列满后的消息被丢弃，接收循环继续工作
    wait_until(|| receiver.len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(receiver.recv().await.expect("first").device_id, "d0");
    assert_eq!(receiver.recv().await.expect("second").device_id, "d1");

    feed.send(Ok(message("/camera/d3/get"))).unwrap();
    assert_eq!(receiver.recv().await.expect("after drop").device_id, "d3");
}

#[tokio::test]
async fn stop_disconnects_and_closes_queue() {
    let transport = Arc::new(ScriptedTransport::default());
    let (manager, mut receiver, _worker) = build_manager(transport.clone(), 8);
    manager.start().await.expect("start");

    transport
        .feed(0)
        .send(Ok(message("/camera/d1/get")))
        .unwrap();
    wait_until(|| receiver.len() == 1).await;

    manager.stop().await.expect("stop");
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(receiver.recv().await.is_some());
    assert!(receiver.recv().await.is_none());
    assert!(matches!(
        manager.publish("/camera/d1/update", Vec::new()).await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn stop_during_reconnect_leaves_no_live_session() {
    let transport = Arc::new(ScriptedTransport::default());
    let (manager, _receiver, _worker) = build_manager(transport.clone(), 8);
    manager.start().await.expect("start");

    let release = transport.hold_attempt(2);
    transport
        .feed(0)
        .send(Err(TransportError::Connect("connection reset".to_string())))
        .unwrap();
    let attempts = &transport.attempts;
    wait_until(|| attempts.load(Ordering::SeqCst) == 2).await;

    // 重连挂起期间停止，不需要等连接结束
    tokio::time::timeout(Duration::from_secs(1), manager.stop())
        .await
        .expect("stop returns while connect is pending")
        .expect("stop");
    release.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(matches!(
        manager.publish("/camera/d1/update", Vec::new()).await,
        Err(TransportError::NotConnected)
    ));
    assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
}
