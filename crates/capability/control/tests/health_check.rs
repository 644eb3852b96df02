use async_trait::async_trait;
use bridge_control::{CAMERA_OFFLINE, CAMERA_ONLINE, CompletionReporter, HealthCheck};
use bridge_device::{
    DateTimeSetting, DeviceControl, DeviceError, Preset, Profile,
};
use bridge_ingest::{Publisher, TransportError};
use bridge_rpc::{RpcClient, RpcError, StaticRpcClient};
use bridge_telemetry::{Event, EventBus, EventSink, SinkError};
use domain::{CommandState, DeviceIdentity, MoveVector, PresetToken};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 只实现探测的摄像头，其余操作不应被调用。
#[derive(Default)]
struct ProbeOnly {
    reachable: AtomicBool,
}

fn unused() -> DeviceError {
    DeviceError::Unsupported("not used by health check".to_string())
}

#[async_trait]
impl DeviceControl for ProbeOnly {
    async fn get_profiles(&self) -> Result<Profile, DeviceError> {
        Err(unused())
    }

    async fn relative_move(&self, _: MoveVector, _: f64, _: &str) -> Result<(), DeviceError> {
        Err(unused())
    }

    async fn get_snapshot_uri(&self, _: &str) -> Result<String, DeviceError> {
        Err(unused())
    }

    async fn fetch_snapshot(&self, _: &str) -> Result<Vec<u8>, DeviceError> {
        Err(unused())
    }

    async fn set_preset(&self, _: &str, _: &PresetToken) -> Result<String, DeviceError> {
        Err(unused())
    }

    async fn get_presets(&self, _: &str) -> Result<Vec<Preset>, DeviceError> {
        Err(unused())
    }

    async fn goto_preset(&self, _: &str, _: &PresetToken) -> Result<(), DeviceError> {
        Err(unused())
    }

    async fn remove_preset(&self, _: &str, _: &PresetToken) -> Result<(), DeviceError> {
        Err(unused())
    }

    async fn set_home_position(&self, _: &str) -> Result<(), DeviceError> {
        Err(unused())
    }

    async fn goto_home_position(&self, _: &str) -> Result<(), DeviceError> {
        Err(unused())
    }

    async fn set_system_date_and_time(&self, _: &DateTimeSetting) -> Result<(), DeviceError> {
        Err(unused())
    }

    async fn probe(&self) -> Result<(), DeviceError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::Transport("connection refused".to_string()))
        }
    }
}

#[derive(Default)]
struct RecordingPublisher {
    reported: Mutex<Vec<Value>>,
    offline: AtomicBool,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, _topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let body: Value = serde_json::from_slice(&payload).unwrap();
        self.reported
            .lock()
            .unwrap()
            .push(body["state"]["reported"].clone());
        Ok(())
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

#[tokio::test]
async fn status_is_reported_every_check_and_logged_on_change() {
    let device = Arc::new(ProbeOnly::default());
    device.reachable.store(true, Ordering::SeqCst);
    let rpc = Arc::new(StaticRpcClient::new().with_device(DeviceIdentity::new(1, 2, "cam-1")));
    let publisher = Arc::new(RecordingPublisher::default());
    let sink = Arc::new(RecordingSink::default());
    let (bus, worker) = EventBus::spawn(64, sink.clone());
    let reporter = CompletionReporter::new(publisher.clone(), "/camera/cam-1/update", bus.clone());
    let mut check = HealthCheck::new(
        "cam-1",
        device.clone(),
        rpc,
        reporter,
        bus,
        Duration::from_secs(1),
        Duration::from_secs(2),
    );

    assert!(check.check_once().await);
    assert!(check.check_once().await);
    device.reachable.store(false, Ordering::SeqCst);
    assert!(!check.check_once().await);

    assert_eq!(
        *publisher.reported.lock().unwrap(),
        vec![
            serde_json::json!({"CameraStatus": CAMERA_ONLINE}),
            serde_json::json!({"CameraStatus": CAMERA_ONLINE}),
            serde_json::json!({"CameraStatus": CAMERA_OFFLINE}),
        ]
    );

    assert!(worker.shutdown(Duration::from_secs(1)).await);
    let kinds: Vec<Value> = sink
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| event.index == "device")
        .map(|event| event.fields["type"].clone())
        .collect();
    assert_eq!(kinds, vec![Value::from("online"), Value::from("offline")]);
}

/// 身份解析永不返回的 RPC。
struct StalledRpc;

#[async_trait]
impl RpcClient for StalledRpc {
    async fn resolve_device(&self, _: &str, _: bool) -> Result<DeviceIdentity, RpcError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(RpcError::Unavailable("stalled".to_string()))
    }

    async fn update_command_state(&self, _: &str, _: CommandState) -> Result<(), RpcError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_resolve_is_bounded() {
    let device = Arc::new(ProbeOnly::default());
    device.reachable.store(true, Ordering::SeqCst);
    let publisher = Arc::new(RecordingPublisher::default());
    let (bus, _worker) = EventBus::spawn(64, Arc::new(RecordingSink::default()));
    let reporter = CompletionReporter::new(publisher.clone(), "/camera/cam-1/update", bus.clone());
    let mut check = HealthCheck::new(
        "cam-1",
        device,
        Arc::new(StalledRpc),
        reporter,
        bus,
        Duration::from_secs(1),
        Duration::from_secs(2),
    );

    let started = tokio::time::Instant::now();
    assert!(check.check_once().await);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    assert_eq!(
        *publisher.reported.lock().unwrap(),
        vec![serde_json::json!({"CameraStatus": CAMERA_ONLINE})]
    );
}

#[tokio::test]
async fn failed_report_is_emitted_to_bus() {
    let publisher = Arc::new(RecordingPublisher::default());
    publisher.offline.store(true, Ordering::SeqCst);
    let sink = Arc::new(RecordingSink::default());
    let (bus, worker) = EventBus::spawn(64, sink.clone());
    let reporter = CompletionReporter::new(publisher.clone(), "/camera/cam-1/update", bus);

    assert!(reporter.report("SnapshotURL", Value::from("fid")).await.is_err());
    reporter
        .spawn("SnapshotURL", "fid")
        .await
        .unwrap();

    assert!(worker.shutdown(Duration::from_secs(1)).await);
    let events = sink.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].index, "bridge");
    assert_eq!(events[0].fields["event"], "report_failed");
    assert_eq!(events[0].fields["key"], "SnapshotURL");
}
