//! Load-balancing policies and their factory.
//!
//! Every policy sees the same inputs: the candidate list a discovery snapshot
//! produced. Candidates are filtered to healthy instances before selection;
//! an empty list or an all-unhealthy list is an error, never a panic.
//!
//! Policies are resolved by configuration name through [`BalancerFactory`],
//! which accepts both `snake_case` and `PascalCase` spellings and lets new
//! policies register themselves at runtime.

mod consistent_hash;
mod least_connection;
mod round_robin;
mod weighted;

pub use consistent_hash::ConsistentHashBalancer;
pub use least_connection::LeastConnectionBalancer;
pub use round_robin::RoundRobinBalancer;
pub use weighted::WeightedRoundRobinBalancer;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use lodestar_common::protocol::{Result, RpcError};

use crate::instance::ServiceInstance;

/// Selection policy over a candidate list.
///
/// `select` and any paired `update_stats` calls must look atomic to other
/// callers; the client stub guarantees that by holding its own call lock
/// across the pair.
pub trait LoadBalancer: Send + Sync {
    /// Picks one healthy instance from `instances`.
    fn select(&self, instances: &[ServiceInstance]) -> Result<ServiceInstance>;

    /// Key-directed selection; policies without key affinity ignore the key.
    fn select_by_key(&self, instances: &[ServiceInstance], key: &str) -> Result<ServiceInstance> {
        let _ = key;
        self.select(instances)
    }

    /// Connection accounting hook: `started = true` before a call is issued
    /// to the instance, `false` when it completes. Default no-op.
    fn update_stats(&self, instance_id: &str, connection_started: bool) {
        let _ = (instance_id, connection_started);
    }

    fn name(&self) -> &'static str;

    /// Clears internal state (counters, rings). Default no-op.
    fn reset(&self) {}
}

/// Filters to healthy candidates, with the contract's two error cases.
pub(crate) fn healthy_candidates(instances: &[ServiceInstance]) -> Result<Vec<&ServiceInstance>> {
    if instances.is_empty() {
        return Err(RpcError::NoInstances("no available instances".into()));
    }
    let healthy: Vec<&ServiceInstance> = instances.iter().filter(|i| i.healthy).collect();
    if healthy.is_empty() {
        return Err(RpcError::NoInstances("no healthy instances".into()));
    }
    Ok(healthy)
}

/// Constructor signature policies register with the factory. The config map
/// carries policy-specific settings (consistent hash reads `virtual_nodes`).
pub type BalancerCreator =
    Arc<dyn Fn(&HashMap<String, String>) -> Arc<dyn LoadBalancer> + Send + Sync>;

/// Resolves balancer policies by configuration name.
pub struct BalancerFactory;

static CREATORS: OnceLock<RwLock<HashMap<String, BalancerCreator>>> = OnceLock::new();

/// Canonical lookup key: lowercase with separators stripped, so
/// "round_robin", "RoundRobin", and "roundrobin" all match.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn creators() -> &'static RwLock<HashMap<String, BalancerCreator>> {
    CREATORS.get_or_init(|| {
        let mut map: HashMap<String, BalancerCreator> = HashMap::new();
        map.insert(
            normalize("round_robin"),
            Arc::new(|_| Arc::new(RoundRobinBalancer::new()) as Arc<dyn LoadBalancer>),
        );
        map.insert(
            normalize("weighted_round_robin"),
            Arc::new(|_| Arc::new(WeightedRoundRobinBalancer::new()) as Arc<dyn LoadBalancer>),
        );
        map.insert(
            normalize("least_connection"),
            Arc::new(|_| Arc::new(LeastConnectionBalancer::new()) as Arc<dyn LoadBalancer>),
        );
        map.insert(
            normalize("consistent_hash"),
            Arc::new(|config| {
                let virtual_nodes = config
                    .get("virtual_nodes")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(consistent_hash::DEFAULT_VIRTUAL_NODES);
                Arc::new(ConsistentHashBalancer::new(virtual_nodes)) as Arc<dyn LoadBalancer>
            }),
        );
        RwLock::new(map)
    })
}

impl BalancerFactory {
    /// Creates a balancer by name with an empty configuration.
    pub fn create(name: &str) -> Result<Arc<dyn LoadBalancer>> {
        Self::create_with_config(name, &HashMap::new())
    }

    /// Creates a balancer by name, passing `config` to its constructor.
    pub fn create_with_config(
        name: &str,
        config: &HashMap<String, String>,
    ) -> Result<Arc<dyn LoadBalancer>> {
        let creators = creators().read().unwrap();
        let creator = creators.get(&normalize(name)).ok_or_else(|| {
            RpcError::NoInstances(format!(
                "unknown load balancer '{}' (supported: {})",
                name,
                Self::supported().join(", ")
            ))
        })?;
        Ok(creator(config))
    }

    /// Registers a policy constructor. Re-registering a name replaces it.
    pub fn register(name: impl AsRef<str>, creator: BalancerCreator) {
        creators()
            .write()
            .unwrap()
            .insert(normalize(name.as_ref()), creator);
    }

    pub fn supported() -> Vec<String> {
        let mut names: Vec<String> = creators().read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_supported(name: &str) -> bool {
        creators().read().unwrap().contains_key(&normalize(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances(n: u16) -> Vec<ServiceInstance> {
        (0..n)
            .map(|i| ServiceInstance::new("Calc", "127.0.0.1", 9000 + i))
            .collect()
    }

    #[test]
    fn test_empty_candidates_fail() {
        let balancer = RoundRobinBalancer::new();
        let err = balancer.select(&[]).unwrap_err();
        assert!(err.to_string().contains("no available instances"));
    }

    #[test]
    fn test_all_unhealthy_candidates_fail() {
        let mut list = instances(3);
        for instance in &mut list {
            instance.healthy = false;
        }
        let balancer = RoundRobinBalancer::new();
        let err = balancer.select(&list).unwrap_err();
        assert!(err.to_string().contains("no healthy instances"));
    }

    #[test]
    fn test_factory_resolves_all_builtins() {
        for name in [
            "round_robin",
            "weighted_round_robin",
            "least_connection",
            "consistent_hash",
        ] {
            let balancer = BalancerFactory::create(name).unwrap();
            assert!(balancer.select(&instances(2)).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_factory_accepts_pascal_case() {
        for name in [
            "RoundRobin",
            "WeightedRoundRobin",
            "LeastConnection",
            "ConsistentHash",
        ] {
            assert!(BalancerFactory::is_supported(name), "{}", name);
        }
    }

    #[test]
    fn test_factory_rejects_unknown_names() {
        assert!(!BalancerFactory::is_supported("random"));
        assert!(BalancerFactory::create("random").is_err());
    }

    #[test]
    fn test_factory_applies_virtual_nodes_config() {
        let mut config = HashMap::new();
        config.insert("virtual_nodes".to_string(), "10".to_string());
        let balancer = BalancerFactory::create_with_config("consistent_hash", &config).unwrap();
        assert_eq!(balancer.name(), "ConsistentHash");
        assert!(balancer.select(&instances(2)).is_ok());
    }

    #[test]
    fn test_factory_runtime_registration() {
        struct FirstBalancer;
        impl LoadBalancer for FirstBalancer {
            fn select(&self, instances: &[ServiceInstance]) -> Result<ServiceInstance> {
                healthy_candidates(instances).map(|h| h[0].clone())
            }
            fn name(&self) -> &'static str {
                "First"
            }
        }

        BalancerFactory::register(
            "first",
            Arc::new(|_| Arc::new(FirstBalancer) as Arc<dyn LoadBalancer>),
        );
        assert!(BalancerFactory::is_supported("First"));
        let balancer = BalancerFactory::create("first").unwrap();
        assert_eq!(balancer.select(&instances(3)).unwrap().port, 9000);
    }
}
