use std::sync::atomic::{AtomicU64, Ordering};

use lodestar_common::protocol::Result;

use super::{healthy_candidates, LoadBalancer};
use crate::instance::ServiceInstance;

/// Round-robin selection: a monotonically increasing counter indexes the
/// healthy candidate list modulo its length.
pub struct RoundRobinBalancer {
    counter: AtomicU64,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        RoundRobinBalancer {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, instances: &[ServiceInstance]) -> Result<ServiceInstance> {
        let healthy = healthy_candidates(instances)?;
        let index = self.counter.fetch_add(1, Ordering::Relaxed) as usize % healthy.len();
        Ok(healthy[index].clone())
    }

    fn name(&self) -> &'static str {
        "RoundRobin"
    }

    fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }
}
