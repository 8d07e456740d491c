//! Server configuration.

use std::thread;

/// Configuration for an RPC server.
///
/// # Example
///
/// ```
/// use lodestar_common::config::ServerConfig;
///
/// let config = ServerConfig::default()
///     .with_bind("127.0.0.1", 9000)
///     .with_registry("memory", "lodestar-local");
/// assert!(config.enable_registry);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub host: String,
    pub port: u16,
    /// Address published to the registry. `None` falls back to the bind host,
    /// with `0.0.0.0`/`::` rewritten to `127.0.0.1`; a wildcard bind is a
    /// placeholder, never a routable advertisement.
    pub advertised_host: Option<String>,
    /// Dispatch worker threads; 0 means hardware parallelism
    pub worker_threads: usize,
    /// Accepted connections beyond this are closed immediately
    pub max_connections: usize,
    pub connection_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Wire codec name: "binary" or "json"
    pub serializer: String,
    pub enable_registry: bool,
    /// Registry backend name resolved by the registry factory
    pub registry_type: String,
    pub registry_address: String,
    /// Weight advertised for this instance (used by weighted balancing)
    pub service_weight: i32,
    pub heartbeat_interval_ms: u64,
    pub session_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            advertised_host: None,
            worker_threads: 0,
            max_connections: 1000,
            connection_timeout_ms: 30_000,
            request_timeout_ms: 5_000,
            serializer: "binary".to_string(),
            enable_registry: false,
            registry_type: "memory".to_string(),
            registry_address: "localhost:2181".to_string(),
            service_weight: 1,
            heartbeat_interval_ms: 10_000,
            session_timeout_ms: 30_000,
        }
    }
}

impl ServerConfig {
    pub fn with_bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_advertised_host(mut self, host: impl Into<String>) -> Self {
        self.advertised_host = Some(host.into());
        self
    }

    pub fn with_serializer(mut self, name: impl Into<String>) -> Self {
        self.serializer = name.into();
        self
    }

    pub fn with_registry(
        mut self,
        registry_type: impl Into<String>,
        registry_address: impl Into<String>,
    ) -> Self {
        self.enable_registry = true;
        self.registry_type = registry_type.into();
        self.registry_address = registry_address.into();
        self
    }

    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    pub fn with_max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    pub fn with_service_weight(mut self, weight: i32) -> Self {
        self.service_weight = weight;
        self
    }

    /// The `host:port` the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The host published to the registry, never a wildcard address.
    pub fn advertised_address(&self) -> String {
        if let Some(host) = &self.advertised_host {
            return host.clone();
        }
        match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => "127.0.0.1".to_string(),
            other => other.to_string(),
        }
    }

    /// Worker thread count, defaulting to hardware parallelism.
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        }
    }
}
