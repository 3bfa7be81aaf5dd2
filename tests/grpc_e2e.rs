use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UnixListener;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status as RpcStatus};

use plugin_proxy::transport::proto::external_monitor_server::{ExternalMonitor, ExternalMonitorServer};
use plugin_proxy::transport::proto::{self, HealthCheckRequest, HealthStatus, MonitorMetadata};
use plugin_proxy::transport::GrpcConnector;
use plugin_proxy::{
    ConditionDefinition, ConditionStatus, MonitorConfig, MonitorProxy, PluginConnector, ProxyError, Severity,
};

struct GpuPlugin {
    reason: &'static str,
    last_sequence: Arc<AtomicI64>,
    stops: Arc<AtomicUsize>,
}

#[tonic::async_trait]
impl ExternalMonitor for GpuPlugin {
    async fn check_health(&self, request: Request<HealthCheckRequest>) -> Result<Response<HealthStatus>, RpcStatus> {
        let request = request.into_inner();
        self.last_sequence.store(request.sequence, Ordering::Release);
        let threshold = request
            .parameters
            .get("temperature_threshold")
            .cloned()
            .unwrap_or_else(|| "85".to_string());

        Ok(Response::new(HealthStatus {
            source: "gpu-monitor".to_string(),
            events: vec![proto::Event {
                severity: proto::Severity::Warn as i32,
                timestamp: Some(prost_types::Timestamp {
                    seconds: 1_700_000_000,
                    nanos: 0,
                }),
                reason: "GPUOverheating".to_string(),
                message: format!("GPU temperature 92C exceeds {threshold}C"),
            }],
            conditions: vec![proto::Condition {
                r#type: "GPUHealthy".to_string(),
                status: proto::ConditionStatus::True as i32,
                transition: None,
                reason: self.reason.to_string(),
                message: "GPU is too hot".to_string(),
            }],
        }))
    }

    async fn get_metadata(&self, _request: Request<()>) -> Result<Response<MonitorMetadata>, RpcStatus> {
        Ok(Response::new(MonitorMetadata {
            name: "gpu-monitor".to_string(),
            version: "1.2.0".to_string(),
            description: "GPU health".to_string(),
            supported_conditions: vec!["GPUHealthy".to_string()],
            api_version: "v1".to_string(),
            ..MonitorMetadata::default()
        }))
    }

    async fn stop(&self, _request: Request<()>) -> Result<Response<()>, RpcStatus> {
        self.stops.fetch_add(1, Ordering::AcqRel);
        Ok(Response::new(()))
    }
}

struct TestServer {
    runtime: Option<Runtime>,
    shutdown: Option<oneshot::Sender<()>>,
    last_sequence: Arc<AtomicI64>,
    stops: Arc<AtomicUsize>,
}

impl TestServer {
    fn spawn(socket: &Path, reason: &'static str) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime.block_on(async { UnixListener::bind(socket) }).unwrap();

        let last_sequence = Arc::new(AtomicI64::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let plugin = GpuPlugin {
            reason,
            last_sequence: Arc::clone(&last_sequence),
            stops: Arc::clone(&stops),
        };

        let (tx, rx) = oneshot::channel::<()>();
        runtime.spawn(async move {
            Server::builder()
                .add_service(ExternalMonitorServer::new(plugin))
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            runtime: Some(runtime),
            shutdown: Some(tx),
            last_sequence,
            stops,
        }
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(2));
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn config_for(socket: &Path) -> MonitorConfig {
    let mut config = MonitorConfig::new("gpu-monitor", socket.display().to_string());
    config.plugin_config.invoke_interval = Duration::from_secs(2);
    config.plugin_config.timeout = Duration::from_secs(1);
    config.plugin_config.health_check.interval = Duration::from_millis(200);
    config.plugin_config.retry_policy.initial_backoff = Duration::from_millis(10);
    config.plugin_config.retry_policy.max_backoff = Duration::from_millis(100);
    config.plugin_config.retry_policy.max_attempts = 50;
    config
        .plugin_config
        .plugin_parameters
        .insert("temperature_threshold".to_string(), "80".to_string());
    config.conditions.push(ConditionDefinition::new("GPUHealthy", "GPUIsHealthy", "GPU is healthy"));
    config.apply_defaults();
    config
}

fn grpc_proxy(socket: &Path) -> MonitorProxy {
    let connector = GrpcConnector::new().unwrap().with_connect_timeout(Duration::from_secs(1));
    MonitorProxy::new(config_for(socket), Arc::new(connector) as Arc<dyn PluginConnector>).unwrap()
}

fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("gpu-monitor.sock")
}

#[test]
fn polls_real_grpc_plugin_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = socket_in(&dir);
    let server = TestServer::spawn(&socket, "GPUOverheating");

    let proxy = grpc_proxy(&socket);
    let stream = proxy.start().unwrap();
    assert!(proxy.is_connected());

    let identity = proxy.identity().unwrap();
    assert_eq!(identity.name, "gpu-monitor");
    assert_eq!(identity.version, "1.2.0");
    assert_eq!(identity.supported_conditions, vec!["GPUHealthy".to_string()]);

    let initial = stream.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(initial.conditions[0].reason, "GPUIsHealthy");

    let polled = stream.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(polled.source, "gpu-monitor");
    assert_eq!(polled.events[0].severity, Severity::Warn);
    assert!(polled.events[0].message.contains("80C"));
    assert_eq!(polled.conditions[0].status, ConditionStatus::True);
    assert_eq!(polled.conditions[0].reason, "GPUOverheating");
    assert_eq!(server.last_sequence.load(Ordering::Acquire), 1);

    proxy.stop();
    assert_eq!(server.stops.load(Ordering::Acquire), 1);
    assert!(matches!(stream.recv(), Err(ProxyError::StreamClosed)));
}

#[test]
fn starts_before_plugin_and_connects_once_it_appears() {
    let dir = tempfile::tempdir().unwrap();
    let socket = socket_in(&dir);

    let proxy = grpc_proxy(&socket);
    let stream = proxy.start().unwrap();
    assert!(!proxy.is_connected());
    // Missing socket: the initial status still goes out.
    assert_eq!(stream.recv_timeout(Duration::from_secs(1)).unwrap().conditions.len(), 1);

    let _server = TestServer::spawn(&socket, "GPUOverheating");
    let deadline = Instant::now() + Duration::from_secs(10);
    while !proxy.is_connected() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(proxy.is_connected());

    let polled = stream.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(polled.conditions[0].reason, "GPUOverheating");
    proxy.stop();
}

#[test]
fn recovers_after_plugin_restart() {
    let dir = tempfile::tempdir().unwrap();
    let socket = socket_in(&dir);
    let mut first = TestServer::spawn(&socket, "GPUOverheating");

    let proxy = grpc_proxy(&socket);
    let stream = proxy.start().unwrap();
    stream.recv_timeout(Duration::from_secs(1)).unwrap();
    let polled = stream.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(polled.conditions[0].reason, "GPUOverheating");

    first.shutdown();
    std::fs::remove_file(&socket).unwrap();
    let _second = TestServer::spawn(&socket, "GPUThrottled");

    let deadline = Instant::now() + Duration::from_secs(15);
    let mut recovered = false;
    while Instant::now() < deadline {
        match stream.recv_timeout(Duration::from_millis(500)) {
            Ok(status) if status.conditions[0].reason == "GPUThrottled" => {
                recovered = true;
                break;
            }
            Ok(_) | Err(ProxyError::StreamTimeout { .. }) => {}
            Err(err) => panic!("stream ended: {err}"),
        }
    }
    assert!(recovered);
    assert!(proxy.is_connected());
    proxy.stop();
}
