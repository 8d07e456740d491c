//! The client stub.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lodestar_common::codec::WireCodec;
use lodestar_common::protocol::{Result, RpcError, RpcRequest};
use lodestar_common::transport::{tcp, ClientConnection};
use lodestar_registry::{LoadBalancer, Registry, ServiceInstance};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

enum Mode {
    /// Fixed target address.
    Direct { address: String },
    /// Resolve instances through the registry, pick one per call.
    Discovery {
        registry: Arc<dyn Registry>,
        balancer: Arc<dyn LoadBalancer>,
    },
}

struct ClientInner {
    conn: Option<ClientConnection>,
    /// Last good discovery snapshot; used when the registry degrades.
    cached_instances: Vec<ServiceInstance>,
}

/// RPC client stub.
///
/// A stub is not a pipelined multiplexer: an internal mutex serializes the
/// whole request/response round trip, so at most one call is in flight per
/// stub. Clone-free sharing across threads works (`&self` methods), callers
/// just queue on the mutex; for real concurrency use one stub per worker and
/// share the balancer.
///
/// In discovery mode every call re-resolves the service: discover healthy
/// instances, let the balancer pick one, and reconnect only when the pick
/// differs from the current connection's target. The balancer is informed of
/// connection start/end around the call so least-connection counters reflect
/// in-flight work.
pub struct RpcClient {
    codec: WireCodec,
    connect_timeout: Duration,
    mode: Mode,
    inner: Mutex<ClientInner>,
}

impl RpcClient {
    /// A stub with a fixed target.
    pub fn direct(address: impl Into<String>) -> Self {
        RpcClient {
            codec: WireCodec::default(),
            connect_timeout: tcp::DEFAULT_TIMEOUT,
            mode: Mode::Direct {
                address: address.into(),
            },
            inner: Mutex::new(ClientInner {
                conn: None,
                cached_instances: Vec::new(),
            }),
        }
    }

    /// A stub resolving targets through `registry` and `balancer`.
    pub fn with_discovery(registry: Arc<dyn Registry>, balancer: Arc<dyn LoadBalancer>) -> Self {
        RpcClient {
            codec: WireCodec::default(),
            connect_timeout: tcp::DEFAULT_TIMEOUT,
            mode: Mode::Discovery { registry, balancer },
            inner: Mutex::new(ClientInner {
                conn: None,
                cached_instances: Vec::new(),
            }),
        }
    }

    /// Overrides the wire codec (both peers must agree).
    pub fn with_codec(mut self, codec: WireCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn codec(&self) -> WireCodec {
        self.codec
    }

    /// Calls `service.method` with an already-serialized payload and returns
    /// the raw response payload. Remote failures surface as
    /// [`RpcError::Call`] with the envelope's code and message.
    pub fn call(&self, service: &str, method: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();

        let (target, pairing) = self.resolve_target(&mut inner, service)?;

        let reconnect = match inner.conn.as_ref() {
            Some(conn) => conn.peer() != target,
            None => true,
        };
        if reconnect {
            debug!(%target, "connecting");
            inner.conn = Some(ClientConnection::connect_timeout(
                &target,
                self.connect_timeout,
            )?);
        }

        if let Some((balancer, id)) = &pairing {
            balancer.update_stats(id, true);
        }
        let result = self.round_trip(inner.conn.as_mut().unwrap(), service, method, payload);
        if let Some((balancer, id)) = &pairing {
            balancer.update_stats(id, false);
        }

        match result {
            // The peer answered; the connection is fine even on failure.
            Err(e @ RpcError::Call { .. }) => Err(e),
            Err(e) => {
                // Wire-level trouble: force a fresh connection next call.
                inner.conn = None;
                Err(e)
            }
            ok => ok,
        }
    }

    /// Typed convenience over [`RpcClient::call`]: serializes the request
    /// message and parses the response message with the stub's codec.
    pub fn call_typed<Req, Resp>(&self, service: &str, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = self
            .codec
            .encode_payload(request)
            .map_err(|e| RpcError::SerializeFailed(format!("request message: {}", e)))?;
        let reply = self.call(service, method, payload)?;
        self.codec
            .decode_payload(&reply)
            .map_err(|e| RpcError::ParseFailed(format!("response message: {}", e)))
    }

    /// Picks the target address for this call, plus the balancer pairing to
    /// notify around it.
    #[allow(clippy::type_complexity)]
    fn resolve_target(
        &self,
        inner: &mut ClientInner,
        service: &str,
    ) -> Result<(String, Option<(Arc<dyn LoadBalancer>, String)>)> {
        match &self.mode {
            Mode::Direct { address } => Ok((address.clone(), None)),
            Mode::Discovery { registry, balancer } => {
                let instances = match registry.discover(service) {
                    Ok(instances) => {
                        inner.cached_instances = instances.clone();
                        instances
                    }
                    Err(e) => {
                        // Degrade: a lost registry is survivable while the
                        // last snapshot still has instances.
                        if inner.cached_instances.is_empty() {
                            return Err(e);
                        }
                        warn!(error = %e, "discovery failed, using cached instances");
                        inner.cached_instances.clone()
                    }
                };
                let selected = balancer.select(&instances)?;
                Ok((selected.address(), Some((Arc::clone(balancer), selected.id()))))
            }
        }
    }

    fn round_trip(
        &self,
        conn: &mut ClientConnection,
        service: &str,
        method: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let request = RpcRequest::new(service, method, payload);
        let request_id = request.request_id;
        let bytes = self.codec.encode_request(&request)?;

        conn.send(&bytes)?;
        let reply = conn.receive()?;
        let response = self.codec.decode_response(&reply)?;

        if response.request_id != request_id {
            // Single in-flight per stub, so this is a protocol violation,
            // not reordering.
            return Err(RpcError::Protocol(format!(
                "response id {} does not match request id {}",
                response.request_id, request_id
            )));
        }
        if !response.success {
            return Err(RpcError::Call {
                code: response.error_code,
                message: response.error,
            });
        }
        Ok(response.payload)
    }
}
