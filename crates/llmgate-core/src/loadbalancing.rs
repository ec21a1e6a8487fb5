//! Instance selection for deployments that list more than one upstream.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Picks one position out of `len` candidates for a grouping `key`.
pub trait Selector: Send + Sync + fmt::Debug {
    /// `None` only when `len == 0`.
    fn pick(&self, len: usize, key: &str) -> Option<usize>;
}

impl dyn Selector {
    pub fn select<'a, T>(&self, instances: &'a [T], key: &str) -> Option<&'a T> {
        self.pick(instances.len(), key).and_then(|i| instances.get(i))
    }
}

/// Per-key rotating counter. Keys never share a counter.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    counters: Mutex<HashMap<String, usize>>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobinSelector {
    fn pick(&self, len: usize, key: &str) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let mut counters = self.counters.lock();
        let counter = counters.entry(key.to_string()).or_insert(0);
        let index = *counter % len;
        *counter = counter.wrapping_add(1);
        Some(index)
    }
}

/// Uniform choice; the key is ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl Selector for RandomSelector {
    fn pick(&self, len: usize, _key: &str) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..len))
    }
}

/// Selector named by configuration (`round-robin` or `random`).
pub fn selector_by_name(name: &str) -> Option<Arc<dyn Selector>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "" | "round-robin" | "roundrobin" | "rr" => Some(Arc::new(RoundRobinSelector::new())),
        "random" => Some(Arc::new(RandomSelector)),
        _ => None,
    }
}
