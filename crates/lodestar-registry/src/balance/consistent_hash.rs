use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use lodestar_common::protocol::Result;

use super::{healthy_candidates, LoadBalancer};
use crate::instance::ServiceInstance;

/// Virtual nodes per instance when the configuration does not say otherwise.
pub const DEFAULT_VIRTUAL_NODES: usize = 100;

/// 32-bit FNV-1a.
fn fnv1a_32(key: &str) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

struct HashRing {
    /// hash point to instance id
    ring: BTreeMap<u32, String>,
    /// Key reused by plain `select` calls.
    last_key: String,
}

/// Consistent-hash selection over a ring of virtual nodes.
///
/// Each healthy instance occupies `virtual_nodes` points on a 32-bit ring,
/// hashed from `"<id>#<i>"`. A key maps to the first point at or after its
/// hash, wrapping at the top. Removing an instance therefore only remaps the
/// keys that were mapped to it.
pub struct ConsistentHashBalancer {
    virtual_nodes: usize,
    inner: Mutex<HashRing>,
}

impl ConsistentHashBalancer {
    pub fn new(virtual_nodes: usize) -> Self {
        ConsistentHashBalancer {
            virtual_nodes: virtual_nodes.max(1),
            inner: Mutex::new(HashRing {
                ring: BTreeMap::new(),
                last_key: String::new(),
            }),
        }
    }

    fn rebuild_ring(&self, ring: &mut BTreeMap<u32, String>, healthy: &[&ServiceInstance]) {
        ring.clear();
        for instance in healthy {
            let id = instance.id();
            for i in 0..self.virtual_nodes {
                ring.insert(fnv1a_32(&format!("{}#{}", id, i)), id.clone());
            }
        }
    }

    fn lookup(ring: &BTreeMap<u32, String>, hash: u32) -> Option<String> {
        ring.range(hash..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, id)| id.clone())
    }
}

impl Default for ConsistentHashBalancer {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

impl LoadBalancer for ConsistentHashBalancer {
    fn select(&self, instances: &[ServiceInstance]) -> Result<ServiceInstance> {
        let key = {
            let inner = self.inner.lock().unwrap();
            if inner.last_key.is_empty() {
                "default".to_string()
            } else {
                inner.last_key.clone()
            }
        };
        self.select_by_key(instances, &key)
    }

    fn select_by_key(&self, instances: &[ServiceInstance], key: &str) -> Result<ServiceInstance> {
        let healthy = healthy_candidates(instances)?;
        let healthy_ids: HashSet<String> = healthy.iter().map(|i| i.id()).collect();

        let mut inner = self.inner.lock().unwrap();
        inner.last_key = key.to_string();

        let hash = fnv1a_32(key);
        let mut selected = Self::lookup(&inner.ring, hash);

        // Rebuild when the ring is empty or stale (the selected point belongs
        // to an instance that is gone or unhealthy).
        let stale = match &selected {
            Some(id) => !healthy_ids.contains(id),
            None => true,
        };
        if stale {
            self.rebuild_ring(&mut inner.ring, &healthy);
            selected = Self::lookup(&inner.ring, hash);
        }

        // The ring was just rebuilt from a non-empty healthy list.
        let id = selected.unwrap();
        Ok(healthy
            .iter()
            .find(|i| i.id() == id)
            .map(|i| (*i).clone())
            .unwrap())
    }

    fn name(&self) -> &'static str {
        "ConsistentHash"
    }

    fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.ring.clear();
        inner.last_key.clear();
    }
}
