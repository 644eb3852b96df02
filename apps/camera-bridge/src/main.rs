//! 摄像头影子桥接进程：MQTT 影子命令 → ONVIF 摄像头操作 → 命令状态与 reported 回报。

use bridge_config::AppConfig;
use bridge_control::{
    CommandDispatcher, CompletionReporter, DispatcherSettings, HealthCheck, spawn_dispatch_worker,
};
use bridge_device::{HttpFileUploader, OnvifCamera, OnvifConfig, SnapshotArchive};
use bridge_ingest::{
    ConnectionManager, ManagerSettings, MqttTransportConfig, RumqttTransport, ingress_queue,
};
use bridge_rpc::GrpcRpcClient;
use bridge_telemetry::{ElasticsearchSink, EventBus, EventSink, NoopSink, init_tracing, metrics};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 退出时等待遥测事件写完的上限。
const EVENT_DRAIN_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();
    info!(
        target: "bridge.app",
        device_id = %config.device_id,
        ingest_topic = %config.ingest_topic(),
        report_topic = %config.mqtt_report_topic,
        "bridge_starting"
    );

    // 遥测事件总线：未配置 ES 时使用空 sink
    let sink: Arc<dyn EventSink> = match config.es_url.as_deref() {
        Some(url) => Arc::new(ElasticsearchSink::new(
            url,
            config.es_username.clone(),
            config.es_password.clone(),
        )?),
        None => Arc::new(NoopSink),
    };
    let (bus, bus_worker) = EventBus::spawn(config.event_bus_capacity, sink);

    // 协作方：资产/命令服务、摄像头、文件服务
    let rpc = Arc::new(GrpcRpcClient::connect_lazy(
        &config.rpc_addr,
        config.rpc_timeout(),
    )?);
    let camera = Arc::new(OnvifCamera::new(OnvifConfig {
        addr: config.camera_addr.clone(),
        username: config.camera_username.clone(),
        password: config.camera_password.clone(),
    })?);
    let uploader = Arc::new(HttpFileUploader::new(config.file_server_url.clone())?);

    // MQTT 连接管理与入站队列
    let (ingress, receiver) = ingress_queue(config.ingress_capacity);
    let transport = Arc::new(RumqttTransport::new(MqttTransportConfig {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        client_id: config.mqtt_client_id.clone(),
        keep_alive: Duration::from_secs(config.mqtt_keep_alive_seconds),
        ca_cert: config.mqtt_ca_cert.clone(),
        tls_cert: config.mqtt_tls_cert.clone(),
        tls_key: config.mqtt_tls_key.clone(),
    })?);
    let manager = ConnectionManager::new(
        transport,
        ManagerSettings {
            ingest_topic: config.ingest_topic(),
            qos: config.mqtt_qos,
            retry_interval: config.mqtt_retry_interval(),
        },
        ingress,
        bus.clone(),
    );

    // 连接建立前收到退出信号时直接退出
    tokio::select! {
        started = manager.start() => started?,
        _ = shutdown_signal() => {
            info!(target: "bridge.app", "shutdown_before_connected");
            manager.stop().await?;
            bus_worker.shutdown(EVENT_DRAIN_WAIT).await;
            return Ok(());
        }
    }

    let reporter = CompletionReporter::new(
        Arc::new(manager.clone()),
        config.mqtt_report_topic.clone(),
        bus.clone(),
    );
    let dispatcher = Arc::new(CommandDispatcher::new(
        rpc.clone(),
        camera.clone(),
        SnapshotArchive::new(&config.snapshot_dir),
        uploader,
        reporter.clone(),
        bus.clone(),
        DispatcherSettings {
            rpc_timeout: config.rpc_timeout(),
            device_call_timeout: config.device_call_timeout(),
            time_zone: config.time_zone.clone(),
        },
    ));
    let worker = spawn_dispatch_worker(receiver, dispatcher);
    let health = HealthCheck::new(
        config.device_id.clone(),
        camera,
        rpc,
        reporter,
        bus,
        config.device_call_timeout(),
        config.rpc_timeout(),
    )
    .spawn(config.health_interval());
    info!(target: "bridge.app", "bridge_started");

    shutdown_signal().await;
    info!(target: "bridge.app", "shutdown_requested");

    // 停止顺序：健康检查 → 断开 MQTT 并关闭入站队列 → 排空分发 → 排空遥测
    health.abort();
    if let Err(err) = manager.stop().await {
        warn!(target: "bridge.app", error = %err, "connection_manager_stop_failed");
    }
    if let Err(err) = worker.await {
        warn!(target: "bridge.app", error = %err, "dispatch_worker_join_failed");
    }
    let drained = bus_worker.shutdown(EVENT_DRAIN_WAIT).await;
    let snapshot = metrics().snapshot();
    info!(
        target: "bridge.app",
        drained = drained,
        inbound_messages = snapshot.inbound_messages,
        commands_succeeded = snapshot.commands_succeeded,
        commands_failed = snapshot.commands_failed,
        "bridge_stopped"
    );
    Ok(())
}

/// 等待 Ctrl-C 或 SIGTERM。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "bridge.app", error = %err, "ctrl_c_listen_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target: "bridge.app", error = %err, "sigterm_listen_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
