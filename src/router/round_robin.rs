//! Round-Robin Counters
//!
//! Lock-free rotation over lists that may change length between calls.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter used to cycle through a list
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicU64,
}

impl RoundRobin {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return `previous % len`; `None` for an empty list.
    ///
    /// The modulus is taken against the length at call time, so a list that
    /// shrank since the last call wraps instead of going out of bounds.
    pub fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let previous = self.counter.fetch_add(1, Ordering::Relaxed);
        Some((previous % len as u64) as usize)
    }

    /// Advance and return `(previous + 1) % len`; `None` for an empty list
    pub fn next_index_after(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let current = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Some((current % len as u64) as usize)
    }

    /// Pick the next element of `items`
    pub fn pick<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        self.next_index(items.len()).map(|idx| &items[idx])
    }

    /// Number of picks made so far
    pub fn count(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

/// Independent key and model counters of one provider instance
#[derive(Debug, Default)]
pub struct InstanceCounters {
    /// Rotation over API keys
    pub keys: RoundRobin,

    /// Rotation over models
    pub models: RoundRobin,
}

impl InstanceCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_cycles_in_order() {
        let rr = RoundRobin::new();
        let keys = ["k1", "k2", "k3"];

        let picked: Vec<&str> = (0..7).map(|_| *rr.pick(&keys).unwrap()).collect();
        assert_eq!(picked, vec!["k1", "k2", "k3", "k1", "k2", "k3", "k1"]);
        assert_eq!(rr.count(), 7);
    }

    #[test]
    fn test_empty_list_returns_none() {
        let rr = RoundRobin::new();
        let empty: [&str; 0] = [];
        assert!(rr.pick(&empty).is_none());
        assert!(rr.next_index_after(0).is_none());
        assert_eq!(rr.count(), 0);
    }

    #[test]
    fn test_list_shrinks_between_calls() {
        let rr = RoundRobin::new();
        let keys = ["k1", "k2", "k3", "k4", "k5"];
        for _ in 0..10 {
            rr.pick(&keys).unwrap();
        }

        // Counter is at 10; new list of 3 continues at 10 % 3 = 1
        let replaced = ["new-k1", "new-k2", "new-k3"];
        assert_eq!(*rr.pick(&replaced).unwrap(), "new-k2");
        assert_eq!(*rr.pick(&replaced).unwrap(), "new-k3");
        assert_eq!(*rr.pick(&replaced).unwrap(), "new-k1");

        let single = ["only"];
        assert_eq!(*rr.pick(&single).unwrap(), "only");
    }

    #[test]
    fn test_next_index_after_starts_at_one() {
        let rr = RoundRobin::new();
        let picked: Vec<usize> = (0..4).map(|_| rr.next_index_after(3).unwrap()).collect();
        assert_eq!(picked, vec![1, 2, 0, 1]);
    }

    #[test]
    fn test_instance_counters_are_independent() {
        let counters = InstanceCounters::new();
        let keys = ["a", "b"];
        let models = ["m1", "m2", "m3"];

        assert_eq!(*counters.keys.pick(&keys).unwrap(), "a");
        assert_eq!(*counters.keys.pick(&keys).unwrap(), "b");
        assert_eq!(*counters.models.pick(&models).unwrap(), "m1");
        assert_eq!(counters.keys.count(), 2);
        assert_eq!(counters.models.count(), 1);
    }

    #[test]
    fn test_concurrent_picks_are_balanced() {
        let rr = Arc::new(RoundRobin::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rr = rr.clone();
                std::thread::spawn(move || {
                    let mut hits = [0usize; 4];
                    for _ in 0..1000 {
                        hits[rr.next_index(4).unwrap()] += 1;
                    }
                    hits
                })
            })
            .collect();

        let mut totals = [0usize; 4];
        for handle in handles {
            for (total, hits) in totals.iter_mut().zip(handle.join().unwrap()) {
                *total += hits;
            }
        }
        assert_eq!(totals, [2000; 4]);
        assert_eq!(rr.count(), 8000);
    }
}
