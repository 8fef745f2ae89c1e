//! Adaptive cache allocation.
//!
//! The allocator tracks per-key popularity and periodically assigns each key
//! an integer number of cached blocks in [0, k+m] under the global budget B.
//! The marginal utility of giving key K its (i+1)-th cached block is
//! `u(K, i) = w(K) · g(i)` for a fixed gain curve g; allocation picks the B
//! highest-utility (key, slot) pairs, respecting that slot i can only be
//! cached if slot i-1 is.

use std::collections::{BinaryHeap, HashMap};

use parking_lot::{Mutex, RwLock};

use crate::config::{Config, GainCurve};

/// Fixed allocator parameters, derived from configuration.
#[derive(Debug, Clone)]
pub struct AllocatorParams {
    /// Data blocks per object.
    pub k: usize,

    /// Parity blocks per object.
    pub m: usize,

    /// Total cached-block budget across all keys.
    pub budget: usize,

    /// Popularity decay factor in (0, 1]; each access applies
    /// `w ← decay · w + 1`, so 1.0 keeps plain counts.
    pub decay: f64,

    /// Marginal-utility gain curve.
    pub gain: GainCurve,
}

impl AllocatorParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.longhair.k,
            m: config.longhair.m,
            budget: config.cache.capacity,
            decay: config.allocator.decay,
            gain: config.allocator.gain,
        }
    }
}

/// Summary of one reallocation pass, for logs and the admin surface.
#[derive(Debug, Clone, Copy)]
pub struct AllocationSummary {
    /// Keys with a popularity record.
    pub keys_tracked: usize,

    /// Keys that received at least one cached block.
    pub keys_cached: usize,

    /// Total blocks assigned; never exceeds the budget.
    pub blocks_assigned: usize,
}

/// The proxy-side allocation engine. `on_access` and `recipe_of` are cheap
/// and run on the request path; `reallocate` snapshots the popularity table
/// and swaps in a fresh recipe map atomically.
pub struct Allocator {
    params: AllocatorParams,
    popularity: Mutex<HashMap<String, f64>>,
    recipes: RwLock<HashMap<String, usize>>,
}

impl Allocator {
    pub fn new(params: AllocatorParams) -> Self {
        Self {
            params,
            popularity: Mutex::new(HashMap::new()),
            recipes: RwLock::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &AllocatorParams {
        &self.params
    }

    /// Record one access to `key`, creating its popularity record on first
    /// sight. O(1) expected.
    pub fn on_access(&self, key: &str) {
        let mut popularity = self.popularity.lock();
        match popularity.get_mut(key) {
            Some(weight) => *weight = self.params.decay * *weight + 1.0,
            None => {
                popularity.insert(key.to_string(), 1.0);
            }
        }
    }

    /// Current cached-block count for `key`; 0 for keys never seen or not
    /// assigned any blocks. Non-blocking: serves the value computed by the
    /// last reallocation.
    pub fn recipe_of(&self, key: &str) -> usize {
        self.recipes.read().get(key).copied().unwrap_or(0)
    }

    /// Current popularity weight of `key`.
    pub fn weight_of(&self, key: &str) -> f64 {
        self.popularity.lock().get(key).copied().unwrap_or(0.0)
    }

    /// Number of keys with a popularity record.
    pub fn tracked_keys(&self) -> usize {
        self.popularity.lock().len()
    }

    /// Number of keys currently assigned at least one cached block.
    pub fn cached_keys(&self) -> usize {
        self.recipes.read().len()
    }

    /// Total blocks currently assigned across all keys.
    pub fn assigned_blocks(&self) -> usize {
        self.recipes.read().values().sum()
    }

    /// Recompute every key's recipe from current popularities and swap the
    /// recipe map atomically. Runs off the request path.
    pub fn reallocate(&self) -> AllocationSummary {
        let snapshot: Vec<(String, f64)> = {
            let popularity = self.popularity.lock();
            popularity
                .iter()
                .map(|(key, weight)| (key.clone(), *weight))
                .collect()
        };

        let assignments = compute_assignments(&snapshot, &self.params);
        let summary = AllocationSummary {
            keys_tracked: snapshot.len(),
            keys_cached: assignments.len(),
            blocks_assigned: assignments.values().sum(),
        };

        *self.recipes.write() = assignments;
        summary
    }
}

/// Marginal gain of caching block `slot` of a key.
fn gain(curve: GainCurve, slot: usize, k: usize, n: usize) -> f64 {
    match curve {
        GainCurve::Quorum => {
            if k == 0 || slot >= k {
                0.0
            } else {
                (k - slot) as f64 / k as f64
            }
        }
        GainCurve::Stripe => {
            if n == 0 {
                0.0
            } else {
                (n - slot) as f64 / n as f64
            }
        }
    }
}

/// One (key, slot) pair in the allocation queue. Max-heap order: highest
/// utility first, ties broken by lexicographically smaller key so the
/// allocation is deterministic.
struct SlotCandidate {
    utility: f64,
    weight: f64,
    key: String,
    slot: usize,
}

impl PartialEq for SlotCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for SlotCandidate {}

impl PartialOrd for SlotCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SlotCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.utility
            .total_cmp(&other.utility)
            .then_with(|| other.key.cmp(&self.key))
            .then_with(|| other.slot.cmp(&self.slot))
    }
}

/// Budgeted slot assignment: seed the queue with every key's first slot,
/// then pop up to `budget` times, pushing the popped key's next slot each
/// time. Keys that receive no blocks are absent from the result.
fn compute_assignments(
    popularity: &[(String, f64)],
    params: &AllocatorParams,
) -> HashMap<String, usize> {
    let n = params.k + params.m;
    let mut assignments = HashMap::new();
    if n == 0 || params.budget == 0 || popularity.is_empty() {
        return assignments;
    }

    let mut queue: BinaryHeap<SlotCandidate> = popularity
        .iter()
        .map(|(key, weight)| SlotCandidate {
            utility: weight * gain(params.gain, 0, params.k, n),
            weight: *weight,
            key: key.clone(),
            slot: 0,
        })
        .collect();

    let mut remaining = params.budget;
    while remaining > 0 {
        let Some(candidate) = queue.pop() else {
            break;
        };
        remaining -= 1;

        let next_slot = candidate.slot + 1;
        assignments.insert(candidate.key.clone(), next_slot);
        if next_slot < n {
            queue.push(SlotCandidate {
                utility: candidate.weight * gain(params.gain, next_slot, params.k, n),
                weight: candidate.weight,
                key: candidate.key,
                slot: next_slot,
            });
        }
    }

    assignments
}
