use async_trait::async_trait;
use bridge_telemetry::{BusError, DeviceLog, Event, EventBus, EventSink, NoopSink, SinkError};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// 永远阻塞的 sink（模拟不可用的下游）。
struct StalledSink {
    release: Notify,
}

#[async_trait]
impl EventSink for StalledSink {
    async fn write(&self, _event: &Event) -> Result<(), SinkError> {
        self.release.notified().await;
        Ok(())
    }
}

#[derive(Default)]
struct FailingSink {
    attempts: AtomicUsize,
}

#[async_trait]
impl EventSink for FailingSink {
    async fn write(&self, _event: &Event) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Unavailable("connection refused".to_string()))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn write(&self, event: &Event) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

fn fields(n: usize) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("n".to_string(), Value::from(n));
    fields
}

#[tokio::test]
async fn emit_never_blocks_on_stalled_sink() {
    let sink = Arc::new(StalledSink {
        release: Notify::new(),
    });
    let (bus, worker) = EventBus::spawn(4, sink.clone());

    // 单线程运行时：消费者在本测试让出前不会运行，缓冲区恰好被填满
    for n in 0..4 {
        assert_eq!(bus.emit(fields(n), "test"), Ok(()));
    }
    assert_eq!(bus.emit(fields(4), "test"), Err(BusError::Full));
    assert_eq!(bus.emit(fields(5), "test"), Err(BusError::Full));

    assert!(!worker.shutdown(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn failing_sink_drops_events_and_bus_keeps_accepting() {
    let sink = Arc::new(FailingSink::default());
    let (bus, worker) = EventBus::spawn(8, sink.clone());

    for n in 0..3 {
        bus.emit(fields(n), "test").expect("emit");
    }
    for _ in 0..100 {
        if sink.attempts.load(Ordering::SeqCst) == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);

    for n in 3..11 {
        bus.emit(fields(n), "test").expect("bus still accepting");
    }
    assert!(worker.shutdown(Duration::from_secs(1)).await);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 11);
}

#[tokio::test]
async fn emit_after_shutdown_is_rejected() {
    let (bus, worker) = EventBus::spawn(8, Arc::new(NoopSink));
    assert!(worker.shutdown(Duration::from_secs(1)).await);
    assert_eq!(bus.emit(fields(0), "test"), Err(BusError::Closed));
}

#[tokio::test]
async fn shutdown_drains_buffered_events_in_order() {
    let sink = Arc::new(RecordingSink::default());
    let (bus, worker) = EventBus::spawn(16, sink.clone());
    for n in 0..5 {
        bus.emit(fields(n), "test").expect("emit");
    }
    assert!(worker.shutdown(Duration::from_secs(1)).await);

    let events = sink.events.lock().unwrap();
    let order: Vec<u64> = events
        .iter()
        .map(|event| event.fields["n"].as_u64().unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn device_log_entry_lands_in_device_index() {
    let sink = Arc::new(RecordingSink::default());
    let (bus, worker) = EventBus::spawn(16, sink.clone());

    let log = DeviceLog::new(bus.clone(), 12, 34, "7923463163321710");
    log.online("摄像头上线");
    log.clone().with_field("operation", "goto_preset").error("调用失败");
    assert!(worker.shutdown(Duration::from_secs(1)).await);

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].index, "device");
    assert_eq!(events[0].fields["tid"], 12);
    assert_eq!(events[0].fields["pid"], 34);
    assert_eq!(events[0].fields["did"], "7923463163321710");
    assert_eq!(events[0].fields["type"], "online");
    assert_eq!(events[0].fields["message"], "摄像头上线");

    assert_eq!(events[1].fields["type"], "error");
    let message = events[1].fields["message"].as_str().unwrap();
    assert!(message.contains("调用失败"));
    assert!(message.contains(r#""operation":"goto_preset""#));
}
