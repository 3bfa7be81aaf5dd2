//! gRPC backend: tonic over a Unix domain socket.
//!
//! The proxy's loops are plain threads, so the connector owns a small tokio
//! runtime that drives the HTTP/2 connection and blocks callers on each call
//! up to its deadline.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tokio::runtime::Runtime;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use super::proto::external_monitor_client::ExternalMonitorClient;
use super::proto::{HealthCheckRequest, HealthStatus, MonitorMetadata};
use super::{ops, ChannelState, PluginConnector, PluginSession};
use crate::error::{CallError, ConnectError};

/// HTTP/2 keepalive ping interval.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a keepalive ping ack.
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on establishing the socket connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// The authority is ignored: the connector below always dials the socket.
const PLACEHOLDER_URI: &str = "http://[::]:50051";

/// Runtime wrapper that never blocks when dropped, even from async context.
struct RpcRuntime(Option<Runtime>);

impl RpcRuntime {
    fn get(&self) -> &Runtime {
        // Only taken in Drop.
        self.0.as_ref().unwrap_or_else(|| unreachable!("rpc runtime used after drop"))
    }
}

impl Drop for RpcRuntime {
    fn drop(&mut self) {
        if let Some(rt) = self.0.take() {
            rt.shutdown_background();
        }
    }
}

/// Opens tonic channels to a plugin's Unix socket.
pub struct GrpcConnector {
    runtime: Arc<RpcRuntime>,
    connect_timeout: Duration,
}

impl GrpcConnector {
    /// Creates a connector with its own single-worker runtime.
    pub fn new() -> Result<Self, ConnectError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("plugin-proxy-rpc")
            .enable_all()
            .build()
            .map_err(|e| ConnectError::Runtime { message: e.to_string() })?;
        Ok(Self {
            runtime: Arc::new(RpcRuntime(Some(runtime))),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Overrides the bound on establishing the socket connection.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for GrpcConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcConnector")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl PluginConnector for GrpcConnector {
    fn open(&self, endpoint: &Path) -> Result<Arc<dyn PluginSession>, ConnectError> {
        let endpoint_str = endpoint.display().to_string();
        if !endpoint.exists() {
            return Err(ConnectError::EndpointMissing { endpoint: endpoint_str });
        }

        let socket: PathBuf = endpoint.to_path_buf();
        let unreachable = |message: String| ConnectError::Unreachable {
            endpoint: endpoint_str.clone(),
            message,
        };

        let builder = Endpoint::from_static(PLACEHOLDER_URI)
            .connect_timeout(self.connect_timeout)
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_timeout(KEEPALIVE_TIMEOUT)
            .keep_alive_while_idle(true);

        let connect_timeout = self.connect_timeout;
        let channel = self
            .runtime
            .get()
            .block_on(async move {
                let connector = service_fn(move |_: Uri| {
                    let socket = socket.clone();
                    async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket).await?)) }
                });
                tokio::time::timeout(connect_timeout, builder.connect_with_connector(connector)).await
            })
            .map_err(|_| unreachable(format!("connect timed out after {}ms", connect_timeout.as_millis())))?
            .map_err(|e| unreachable(e.to_string()))?;

        Ok(Arc::new(GrpcSession {
            runtime: Arc::clone(&self.runtime),
            client: ExternalMonitorClient::new(channel),
            state: AtomicU8::new(ChannelState::Idle.as_u8()),
        }))
    }
}

/// One tonic channel to a plugin.
pub struct GrpcSession {
    runtime: Arc<RpcRuntime>,
    client: ExternalMonitorClient<Channel>,
    state: AtomicU8,
}

impl GrpcSession {
    /// Current local channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: ChannelState) {
        // Shutdown is terminal.
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            (ChannelState::from_u8(cur) != ChannelState::Shutdown).then_some(next.as_u8())
        });
    }

    /// Runs one unary call with a caller-side deadline and records the
    /// outcome in the channel state.
    fn call<T, F, Fut>(&self, operation: &'static str, timeout: Duration, f: F) -> Result<T, CallError>
    where
        F: FnOnce(ExternalMonitorClient<Channel>) -> Fut,
        Fut: std::future::Future<Output = Result<tonic::Response<T>, tonic::Status>>,
    {
        if self.state() == ChannelState::Shutdown {
            return Err(CallError::new(operation, tonic::Code::Unavailable, "session closed"));
        }

        let fut = f(self.client.clone());
        let outcome = self
            .runtime
            .get()
            .block_on(async { tokio::time::timeout(timeout, fut).await });

        match outcome {
            Err(_) => Err(CallError::deadline_exceeded(operation, timeout)),
            Ok(Ok(response)) => {
                self.set_state(ChannelState::Ready);
                Ok(response.into_inner())
            }
            Ok(Err(status)) => {
                if status.code() == tonic::Code::Unavailable {
                    self.set_state(ChannelState::TransientFailure);
                } else {
                    // The plugin answered, so the channel itself works.
                    self.set_state(ChannelState::Ready);
                }
                Err(CallError::from_status(operation, &status))
            }
        }
    }
}

fn with_deadline<T>(message: T, timeout: Duration) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    request.set_timeout(timeout);
    request
}

impl PluginSession for GrpcSession {
    fn is_live(&self) -> bool {
        self.state().is_live()
    }

    fn check_health(&self, request: HealthCheckRequest, timeout: Duration) -> Result<HealthStatus, CallError> {
        self.call(ops::CHECK_HEALTH, timeout, |mut client| async move {
            client.check_health(with_deadline(request, timeout)).await
        })
    }

    fn get_metadata(&self, timeout: Duration) -> Result<MonitorMetadata, CallError> {
        self.call(ops::GET_METADATA, timeout, |mut client| async move {
            client.get_metadata(with_deadline((), timeout)).await
        })
    }

    fn stop(&self, timeout: Duration) -> Result<(), CallError> {
        self.call(ops::STOP, timeout, |mut client| async move {
            client.stop(with_deadline((), timeout)).await
        })
    }

    fn close(&self) {
        // Dropping the last client clone tears the connection down; marking
        // the state is enough to refuse further calls.
        self.state.store(ChannelState::Shutdown.as_u8(), Ordering::Release);
    }
}
