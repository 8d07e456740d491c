//! The registry contract and the backend factory.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use lodestar_common::protocol::{Result, RpcError};

use crate::ephemeral::EphemeralRegistry;
use crate::instance::ServiceInstance;

/// Root of the registry namespace.
pub const ROOT_PATH: &str = "/rpc";
/// Parent of all service nodes.
pub const SERVICES_PATH: &str = "/rpc/services";

/// Invoked with the service name and a fresh snapshot whenever the membership
/// of a subscribed service changes.
pub type InstanceCallback = Box<dyn Fn(&str, &[ServiceInstance]) + Send + 'static>;

/// Service registry contract.
///
/// Implementations publish *ephemeral* instance nodes: an instance stays
/// registered only while its owner's session stays alive, so crashed servers
/// disappear without explicit cleanup.
pub trait Registry: Send + Sync {
    /// Publishes an instance node. Fails when the session is not connected
    /// or the instance does not validate.
    fn register(&self, instance: &ServiceInstance) -> Result<()>;

    /// Removes the instance node whose canonical id (`host:port`) matches.
    fn unregister(&self, service: &str, instance_id: &str) -> Result<()>;

    /// A snapshot of the currently registered instances; may be empty.
    fn discover(&self, service: &str) -> Result<Vec<ServiceInstance>>;

    /// Subscribes to membership changes. The callback runs on the registry's
    /// watcher thread, serialized per service; it must not block that
    /// thread for long, and must not call back into the registry.
    fn subscribe(&self, service: &str, callback: InstanceCallback) -> Result<()>;

    fn unsubscribe(&self, service: &str) -> Result<()>;

    /// Keeps ownership of this instance's ephemeral node alive and refreshes
    /// its `last_heartbeat`. On backends where the session itself carries
    /// liveness this only touches the session.
    fn heartbeat(&self, service: &str, instance_id: &str) -> Result<()>;

    /// Every service name currently present under the namespace root.
    fn list_services(&self) -> Result<Vec<String>>;

    /// Blocks until the backend session reaches the connected state.
    /// In-process backends connect immediately; the default accepts.
    fn wait_for_connection(&self, _timeout_ms: u64) -> Result<()> {
        Ok(())
    }
}

/// Constructor signature backends register with the factory:
/// `(registry_address, session_timeout_ms)`.
pub type RegistryCreator = Arc<dyn Fn(&str, u64) -> Result<Arc<dyn Registry>> + Send + Sync>;

/// Resolves registry backends by configuration name.
///
/// The built-in backend is `"memory"`, the in-process ephemeral-node store.
/// Additional backends self-register with [`RegistryFactory::register`].
pub struct RegistryFactory;

static CREATORS: OnceLock<RwLock<HashMap<String, RegistryCreator>>> = OnceLock::new();

fn creators() -> &'static RwLock<HashMap<String, RegistryCreator>> {
    CREATORS.get_or_init(|| {
        let mut map: HashMap<String, RegistryCreator> = HashMap::new();
        map.insert(
            "memory".to_string(),
            Arc::new(|address, session_timeout_ms| {
                let registry = EphemeralRegistry::connect(address, session_timeout_ms)?;
                Ok(registry as Arc<dyn Registry>)
            }),
        );
        RwLock::new(map)
    })
}

impl RegistryFactory {
    /// Creates a backend by name. Unknown names are an error, never a silent
    /// fallback.
    pub fn create(
        registry_type: &str,
        address: &str,
        session_timeout_ms: u64,
    ) -> Result<Arc<dyn Registry>> {
        let creators = creators().read().unwrap();
        let creator = creators
            .get(&registry_type.to_ascii_lowercase())
            .ok_or_else(|| {
                RpcError::RegistryUnavailable(format!(
                    "unknown registry backend '{}' (supported: {})",
                    registry_type,
                    Self::supported().join(", ")
                ))
            })?
            .clone();
        drop(creators);
        creator(address, session_timeout_ms)
    }

    /// Registers a backend constructor. Re-registering a name replaces it.
    pub fn register(name: impl Into<String>, creator: RegistryCreator) {
        creators()
            .write()
            .unwrap()
            .insert(name.into().to_ascii_lowercase(), creator);
    }

    pub fn supported() -> Vec<String> {
        let mut names: Vec<String> = creators().read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_supported(name: &str) -> bool {
        creators()
            .read()
            .unwrap()
            .contains_key(&name.to_ascii_lowercase())
    }
}

/// Path of a service's parent node.
pub(crate) fn service_path(service: &str) -> String {
    format!("{}/{}", SERVICES_PATH, service)
}
