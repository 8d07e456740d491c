use std::collections::HashMap;
use std::sync::Mutex;

use lodestar_common::protocol::Result;

use super::{healthy_candidates, LoadBalancer};
use crate::instance::ServiceInstance;

/// Least-connection selection: pick the healthy candidate with the fewest
/// in-flight calls, ties broken by earliest list position.
///
/// Callers must pair `update_stats(id, true)` before issuing a call with
/// `update_stats(id, false)` when it completes, or the counters drift.
pub struct LeastConnectionBalancer {
    in_flight: Mutex<HashMap<String, u64>>,
}

impl LeastConnectionBalancer {
    pub fn new() -> Self {
        LeastConnectionBalancer {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Current in-flight count for an instance; unseen instances are 0.
    pub fn in_flight(&self, instance_id: &str) -> u64 {
        self.in_flight
            .lock()
            .unwrap()
            .get(instance_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for LeastConnectionBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for LeastConnectionBalancer {
    fn select(&self, instances: &[ServiceInstance]) -> Result<ServiceInstance> {
        let healthy = healthy_candidates(instances)?;
        let counts = self.in_flight.lock().unwrap();

        let mut best_index = 0;
        let mut best_count = u64::MAX;
        for (index, instance) in healthy.iter().enumerate() {
            let count = counts.get(&instance.id()).copied().unwrap_or(0);
            // Strict comparison keeps the earliest candidate on ties.
            if count < best_count {
                best_index = index;
                best_count = count;
            }
        }
        Ok(healthy[best_index].clone())
    }

    fn update_stats(&self, instance_id: &str, connection_started: bool) {
        let mut counts = self.in_flight.lock().unwrap();
        let entry = counts.entry(instance_id.to_string()).or_insert(0);
        if connection_started {
            *entry += 1;
        } else {
            // Clamped: an unpaired end never goes negative.
            *entry = entry.saturating_sub(1);
        }
    }

    fn name(&self) -> &'static str {
        "LeastConnection"
    }

    fn reset(&self) {
        self.in_flight.lock().unwrap().clear();
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
    fn test_selects_minimum_in_flight() {
        let list = instances(3);
        let balancer = LeastConnectionBalancer::new();

        balancer.update_stats("127.0.0.1:9000", true);
        balancer.update_stats("127.0.0.1:9000", true);
        balancer.update_stats("127.0.0.1:9001", true);

        assert_eq!(balancer.select(&list).unwrap().port, 9002);
    }

    #[test]
    fn test_ties_break_by_position() {
        let list = instances(3);
        let balancer = LeastConnectionBalancer::new();
        assert_eq!(balancer.select(&list).unwrap().port, 9000);

        balancer.update_stats("127.0.0.1:9000", true);
        // 9001 and 9002 tie at zero; position wins.
        assert_eq!(balancer.select(&list).unwrap().port, 9001);
    }

    #[test]
    fn test_paired_updates_restore_counter() {
        let balancer = LeastConnectionBalancer::new();
        balancer.update_stats("a", true);
        balancer.update_stats("a", true);
        assert_eq!(balancer.in_flight("a"), 2);

        balancer.update_stats("a", false);
        assert_eq!(balancer.in_flight("a"), 1);
        balancer.update_stats("a", false);
        assert_eq!(balancer.in_flight("a"), 0);
    }

    #[test]
    fn test_decrement_clamps_at_zero() {
        let balancer = LeastConnectionBalancer::new();
        balancer.update_stats("a", false);
        balancer.update_stats("a", false);
        assert_eq!(balancer.in_flight("a"), 0);
    }

    #[test]
    fn test_skips_unhealthy_even_when_idle() {
        let mut list = instances(2);
        list[0].healthy = false;
        let balancer = LeastConnectionBalancer::new();
        balancer.update_stats("127.0.0.1:9001", true);
        balancer.update_stats("127.0.0.1:9001", true);
        // 9000 is idle but unhealthy.
        assert_eq!(balancer.select(&list).unwrap().port, 9001);
    }

    #[test]
    fn test_reset_clears_counters() {
        let balancer = LeastConnectionBalancer::new();
        balancer.update_stats("a", true);
        balancer.reset();
        assert_eq!(balancer.in_flight("a"), 0);
    }

    #[test]
    fn test_skewed_load_prefers_idle_instance() {
        let list = instances(2);
        let balancer = LeastConnectionBalancer::new();

        // Simulate a slow replica holding calls open on 9000.
        for _ in 0..5 {
            balancer.update_stats("127.0.0.1:9000", true);
        }

        let mut fast = 0;
        for _ in 0..20 {
            let picked = balancer.select(&list).unwrap();
            balancer.update_stats(&picked.id(), true);
            if picked.port == 9001 {
                fast += 1;
            }
            balancer.update_stats(&picked.id(), false);
        }
        assert!(fast > 15, "idle replica should absorb most calls: {}", fast);
    }
}
