//! Service instance descriptor and its registry wire form.

use std::collections::HashMap;

use lodestar_common::protocol::{Result, RpcError};
use serde::{Deserialize, Serialize};

/// One replica of a service, as published to and discovered from the
/// registry.
///
/// The canonical identity of an instance within its service is `host:port`
/// (see [`ServiceInstance::id`]). Two instances with the same id are the same
/// replica, whatever else differs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    /// Relative capacity for weighted balancing; values ≤ 0 read as 1
    pub weight: i32,
    pub healthy: bool,
    /// Unix milliseconds of the last heartbeat
    pub last_heartbeat: u64,
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        ServiceInstance {
            service_name: service_name.into(),
            host: host.into(),
            port,
            weight: 1,
            healthy: true,
            last_heartbeat: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Canonical instance id: `host:port`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The address a client connects to. Same string as [`Self::id`].
    pub fn address(&self) -> String {
        self.id()
    }

    /// Weight as balancers consume it: never below 1.
    pub fn effective_weight(&self) -> i32 {
        if self.weight <= 0 {
            1
        } else {
            self.weight
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(RpcError::Protocol("instance has empty service name".into()));
        }
        if self.port == 0 {
            return Err(RpcError::Protocol(format!(
                "instance {} has port 0",
                self.service_name
            )));
        }
        Ok(())
    }

    /// Serializes to the registry node value: newline-separated fields in
    /// order `service_name`, `host`, `port`, `weight`, `healthy` ("1"/"0"),
    /// `last_heartbeat`, followed by `key=value` metadata lines.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.service_name,
            self.host,
            self.port,
            self.weight,
            if self.healthy { "1" } else { "0" },
            self.last_heartbeat,
        );
        // Sorted so the wire form is deterministic.
        let mut keys: Vec<_> = self.metadata.keys().collect();
        keys.sort();
        for key in keys {
            out.push('\n');
            out.push_str(key);
            out.push('=');
            out.push_str(&self.metadata[key]);
        }
        out.into_bytes()
    }

    /// Parses the wire form. Missing trailing fields fall back to defaults;
    /// metadata parsing stops at the first line without a `=`. Only a missing
    /// service name is fatal.
    pub fn from_wire(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| RpcError::Protocol("instance value is not UTF-8".into()))?;
        let mut lines = text.lines();

        let service_name = match lines.next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(RpcError::Protocol(
                    "instance value has no service name".into(),
                ))
            }
        };

        let host = lines.next().unwrap_or("").to_string();
        let port = lines.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let weight = lines.next().and_then(|s| s.parse().ok()).unwrap_or(1);
        let healthy = lines.next().map(|s| s == "1").unwrap_or(false);
        let last_heartbeat = lines.next().and_then(|s| s.parse().ok()).unwrap_or(0);

        let mut metadata = HashMap::new();
        for line in lines {
            match line.split_once('=') {
                Some((key, value)) => {
                    metadata.insert(key.to_string(), value.to_string());
                }
                None => break,
            }
        }

        Ok(ServiceInstance {
            service_name,
            host,
            port,
            weight,
            healthy,
            last_heartbeat,
            metadata,
        })
    }
}
