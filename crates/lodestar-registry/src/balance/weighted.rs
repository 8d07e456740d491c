use std::collections::HashMap;
use std::sync::Mutex;

use lodestar_common::protocol::Result;

use super::{healthy_candidates, LoadBalancer};
use crate::instance::ServiceInstance;

/// Smooth Weighted Round-Robin.
///
/// Per candidate the balancer keeps a running `current_weight`. Each
/// selection adds every healthy candidate's static weight to its current
/// weight, picks the candidate with the largest current weight, and subtracts
/// the total static weight from the winner. Over `Σw` consecutive calls each
/// candidate wins exactly `w` times, interleaved rather than in runs.
pub struct WeightedRoundRobinBalancer {
    current_weights: Mutex<HashMap<String, i64>>,
}

impl WeightedRoundRobinBalancer {
    pub fn new() -> Self {
        WeightedRoundRobinBalancer {
            current_weights: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for WeightedRoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for WeightedRoundRobinBalancer {
    fn select(&self, instances: &[ServiceInstance]) -> Result<ServiceInstance> {
        let healthy = healthy_candidates(instances)?;
        let mut current = self.current_weights.lock().unwrap();

        let mut total_weight: i64 = 0;
        let mut best: Option<(usize, i64)> = None;

        for (index, instance) in healthy.iter().enumerate() {
            let weight = i64::from(instance.effective_weight());
            total_weight += weight;

            let entry = current.entry(instance.id()).or_insert(0);
            *entry += weight;

            match best {
                Some((_, best_weight)) if *entry <= best_weight => {}
                _ => best = Some((index, *entry)),
            }
        }

        // healthy is non-empty, so a winner always exists.
        let (index, _) = best.unwrap();
        let selected = healthy[index];
        *current.get_mut(&selected.id()).unwrap() -= total_weight;
        Ok(selected.clone())
    }

    fn name(&self) -> &'static str {
        "WeightedRoundRobin"
    }

    fn reset(&self) {
        self.current_weights.lock().unwrap().clear();
    }
}
