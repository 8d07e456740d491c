//! The server orchestrator: accept loop, per-connection frame extraction,
//! worker-pool dispatch, and registry integration.
//!
//! One tokio task accepts connections; each connection gets a task that
//! accumulates socket reads in a [`ByteBuffer`] and extracts complete frames.
//! Every frame is handed to the worker pool as an independent job (decode
//! envelope, dispatch, produce a response) and a small async task frames and
//! writes the result back under the connection's write lock. Responses may
//! therefore leave in any order; a stub keeps one call in flight, so ordering
//! between frames of one connection is never load-bearing.
//!
//! With the registry enabled, `start` publishes every registered service as
//! an instance at the advertised address and a heartbeat thread keeps the
//! registration's session alive; `stop` unwinds in reverse order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use lodestar_common::buffer::ByteBuffer;
use lodestar_common::codec::WireCodec;
use lodestar_common::config::ServerConfig;
use lodestar_common::protocol::{ErrorCode, Result, RpcError, RpcResponse};
use lodestar_common::transport::framing;
use lodestar_registry::{Registry, RegistryFactory, ServiceInstance};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::dispatcher::ServiceDispatcher;
use crate::service::ServiceDescriptor;
use crate::worker::WorkerPool;

/// How long `start` waits for the registry session to connect.
const REGISTRY_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// The RPC server.
///
/// Construct, register services, `start`, and eventually `stop`. `start`
/// resolves the listener, worker pool, and (optionally) registry from the
/// [`ServerConfig`]; `stop` reverses everything and joins all threads it
/// spawned.
pub struct RpcServer {
    config: ServerConfig,
    codec: WireCodec,
    dispatcher: Arc<ServiceDispatcher>,
    running: Mutex<Option<Running>>,
}

struct Running {
    local_addr: SocketAddr,
    pool: Arc<WorkerPool>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: tokio::task::JoinHandle<()>,
    registry: Option<RegistryState>,
}

struct RegistryState {
    registry: Arc<dyn Registry>,
    /// The instances this server published, one per registered service.
    instances: Vec<ServiceInstance>,
    heartbeat_stop: Arc<AtomicBool>,
    heartbeat_thread: thread::JoinHandle<()>,
}

/// Everything a connection task needs, shared once per server.
struct ConnectionContext {
    codec: WireCodec,
    dispatcher: Arc<ServiceDispatcher>,
    pool: Arc<WorkerPool>,
    request_timeout: Duration,
    active: Arc<AtomicUsize>,
}

impl RpcServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let codec = WireCodec::by_name(&config.serializer)?;
        Ok(RpcServer {
            config,
            codec,
            dispatcher: Arc::new(ServiceDispatcher::new()),
            running: Mutex::new(None),
        })
    }

    /// Registers a service with the dispatcher. Services registered before
    /// `start` are also published to the registry.
    pub fn register_service(&self, service: Arc<ServiceDescriptor>) -> Result<()> {
        self.dispatcher.register(service)
    }

    pub fn unregister_service(&self, service_name: &str) -> Result<()> {
        self.dispatcher.unregister(service_name)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    /// The bound listener address while running. With port 0 in the config
    /// this is where the kernel actually put us.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().unwrap().as_ref().map(|r| r.local_addr)
    }

    /// Binds the listener, starts the worker pool and accept loop, then (if
    /// enabled) connects the registry, publishes every registered service,
    /// and starts the heartbeat thread.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(RpcError::Protocol("server is already running".into()));
        }

        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| RpcError::Connection(format!("failed to bind {}: {}", bind_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RpcError::Connection(format!("local_addr: {}", e)))?;

        let pool = Arc::new(WorkerPool::new(self.config.effective_worker_threads()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let context = Arc::new(ConnectionContext {
            codec: self.codec,
            dispatcher: Arc::clone(&self.dispatcher),
            pool: Arc::clone(&pool),
            request_timeout: Duration::from_millis(self.config.request_timeout_ms),
            active: Arc::new(AtomicUsize::new(0)),
        });

        let max_connections = self.config.max_connections;
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&context),
            max_connections,
            shutdown_rx,
        ));

        let registry = if self.config.enable_registry {
            match self.start_registry(local_addr).await {
                Ok(state) => Some(state),
                Err(e) => {
                    // Unwind the half-started server before surfacing.
                    let _ = shutdown_tx.send(true);
                    let _ = accept_task.await;
                    let pool = Arc::clone(&pool);
                    let _ = tokio::task::spawn_blocking(move || pool.shutdown()).await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(
            addr = %local_addr,
            workers = pool.size(),
            codec = self.codec.name(),
            registry = self.config.enable_registry,
            "rpc server started"
        );

        *self.running.lock().unwrap() = Some(Running {
            local_addr,
            pool,
            shutdown_tx,
            accept_task,
            registry,
        });
        Ok(local_addr)
    }

    async fn start_registry(&self, local_addr: SocketAddr) -> Result<RegistryState> {
        let registry = RegistryFactory::create(
            &self.config.registry_type,
            &self.config.registry_address,
            self.config.session_timeout_ms,
        )?;
        registry.wait_for_connection(REGISTRY_CONNECT_TIMEOUT_MS)?;

        let host = self.config.advertised_address();
        let mut instances = Vec::new();
        for service_name in self.dispatcher.service_names() {
            let instance = ServiceInstance::new(&service_name, &host, local_addr.port())
                .with_weight(self.config.service_weight);
            registry.register(&instance)?;
            instances.push(instance);
        }

        let heartbeat_stop = Arc::new(AtomicBool::new(false));
        let heartbeat_thread = spawn_heartbeat(
            Arc::clone(&registry),
            instances.clone(),
            Duration::from_millis(self.config.heartbeat_interval_ms),
            Arc::clone(&heartbeat_stop),
        )?;

        Ok(RegistryState {
            registry,
            instances,
            heartbeat_stop,
            heartbeat_thread,
        })
    }

    /// Stops the server: heartbeats first, then registry deregistration,
    /// then the listener (which ends all connection tasks), then the worker
    /// pool. Idempotent; a second call is a no-op.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap().take();
        let Some(running) = running else {
            return;
        };

        if let Some(state) = running.registry {
            state.heartbeat_stop.store(true, Ordering::Relaxed);
            let _ = tokio::task::spawn_blocking(move || {
                let _ = state.heartbeat_thread.join();
                for instance in &state.instances {
                    if let Err(e) = state
                        .registry
                        .unregister(&instance.service_name, &instance.id())
                    {
                        warn!(
                            service = %instance.service_name,
                            error = %e,
                            "failed to unregister on shutdown"
                        );
                    }
                }
            })
            .await;
        }

        let _ = running.shutdown_tx.send(true);
        let _ = running.accept_task.await;

        let pool = running.pool;
        let _ = tokio::task::spawn_blocking(move || pool.shutdown()).await;

        info!("rpc server stopped");
    }
}

fn spawn_heartbeat(
    registry: Arc<dyn Registry>,
    instances: Vec<ServiceInstance>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("rpc-heartbeat".into())
        .spawn(move || {
            let step = Duration::from_millis(100);
            'beat: loop {
                // Sleep in small steps so shutdown is seen promptly.
                let mut waited = Duration::ZERO;
                while waited < interval {
                    if stop.load(Ordering::Relaxed) {
                        break 'beat;
                    }
                    let nap = step.min(interval - waited);
                    thread::sleep(nap);
                    waited += nap;
                }
                for instance in &instances {
                    match registry.heartbeat(&instance.service_name, &instance.id()) {
                        Ok(()) => debug!(
                            service = %instance.service_name,
                            instance = %instance.id(),
                            "heartbeat sent"
                        ),
                        // Degrade: the server keeps serving without the
                        // registry.
                        Err(e) => warn!(
                            service = %instance.service_name,
                            error = %e,
                            "heartbeat failed"
                        ),
                    }
                }
            }
        })
        .map_err(|e| RpcError::Connection(format!("failed to spawn heartbeat thread: {}", e)))
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ConnectionContext>,
    max_connections: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if context.active.load(Ordering::Relaxed) >= max_connections {
                        warn!(%peer, max_connections, "connection limit reached, rejecting");
                        drop(stream);
                        continue;
                    }
                    context.active.fetch_add(1, Ordering::Relaxed);
                    debug!(%peer, "connection accepted");
                    let context = Arc::clone(&context);
                    let shutdown_rx = shutdown_rx.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, Arc::clone(&context), shutdown_rx).await;
                        context.active.fetch_sub(1, Ordering::Relaxed);
                        debug!(%peer, "connection closed");
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ConnectionContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    stream.set_nodelay(true).ok();
    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(tokio::sync::Mutex::new(writer));
    // Signalled by response tasks that decide the connection must die
    // (malformed envelope, failed write).
    let close = Arc::new(Notify::new());

    let mut buf = ByteBuffer::new();
    let mut chunk = [0u8; 16 * 1024];

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = close.notified() => break,
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = buf.append(&chunk[..n]) {
                        warn!(%peer, error = %e, "input buffer ceiling hit, closing connection");
                        break;
                    }
                    if let Err(e) = drain_frames(&mut buf, peer, &context, &writer, &close) {
                        warn!(%peer, error = %e, "corrupt frame stream, closing connection");
                        break;
                    }
                }
                Err(e) => {
                    debug!(%peer, error = %e, "read failed");
                    break;
                }
            }
        }
    }
}

/// Extracts every complete frame from `buf` and hands each to the worker
/// pool. A framing error propagates so the caller tears the connection down.
fn drain_frames(
    buf: &mut ByteBuffer,
    peer: SocketAddr,
    context: &Arc<ConnectionContext>,
    writer: &Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    close: &Arc<Notify>,
) -> Result<()> {
    let mut body = Vec::new();
    while framing::decode(buf, &mut body)? {
        dispatch_frame(std::mem::take(&mut body), peer, context, writer, close);
    }
    Ok(())
}

/// One frame becomes one worker job (decode envelope + dispatch) plus one
/// async follow-up that frames and writes the response.
fn dispatch_frame(
    body: Vec<u8>,
    peer: SocketAddr,
    context: &Arc<ConnectionContext>,
    writer: &Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    close: &Arc<Notify>,
) {
    let codec = context.codec;
    let dispatcher = Arc::clone(&context.dispatcher);
    let receiver = match context.pool.submit(move || match codec.decode_request(&body) {
        Ok(request) => Ok(dispatcher.dispatch(&request)),
        Err(e) => Err(e),
    }) {
        Ok(receiver) => receiver,
        Err(e) => {
            warn!(%peer, error = %e, "dropping request, worker pool unavailable");
            return;
        }
    };

    let writer = Arc::clone(writer);
    let close = Arc::clone(close);
    let timeout = context.request_timeout;
    tokio::spawn(async move {
        let outcome = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return, // worker died before sending; nothing to write
            Err(_) => {
                warn!(%peer, "request timed out in the worker pool, dropping response");
                return;
            }
        };

        // A malformed envelope still gets a framed failure answer, then the
        // connection is closed.
        let (response, close_after) = match outcome {
            Ok(response) => (response, false),
            Err(e) => (
                RpcResponse::failure(
                    0,
                    ErrorCode::Protocol,
                    format!("malformed request envelope: {}", e),
                ),
                true,
            ),
        };

        let bytes = match codec.encode_response(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(%peer, error = %e, "response failed to serialize");
                // Second attempt with a bare error envelope.
                let fallback = RpcResponse::failure(
                    response.request_id,
                    ErrorCode::SerializeFailed,
                    "response serialization failed",
                );
                match codec.encode_response(&fallback) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!(%peer, error = %e, "error envelope failed to serialize too");
                        return;
                    }
                }
            }
        };

        let frame = framing::encode(&bytes);
        let mut writer = writer.lock().await;
        if let Err(e) = writer.write_all(&frame).await {
            warn!(%peer, error = %e, "failed to write response");
            close.notify_one();
            return;
        }
        if close_after {
            close.notify_one();
        }
    });
}
