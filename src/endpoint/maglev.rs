//! Maglev lookup table for consistent-hash endpoint selection
//!
//! Each endpoint fills table slots following its own permutation of the
//! table, taking turns until the table is full. Every endpoint owns a near
//! equal share of slots, and membership changes move only the slots that
//! must move, so repeated calls for the same routing key keep landing on the
//! same endpoint while the set is stable.

use rustc_hash::FxHasher;
use std::hash::Hasher;

// Table size must be prime and comfortably larger than any realistic
// deployment's endpoint count.
const TABLE_SIZE: usize = 2053;

const SEED_OFFSET: u64 = 0x517c_c1e4_24a2_fe15;
const SEED_SKIP: u64 = 0x9ae1_6a3b_2f90_404f;
const SEED_LOOKUP: u64 = 0x27d4_eb2f_1656_67c5;

fn hash_with_seed(data: &str, seed: u64) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(seed);
    hasher.write(data.as_bytes());
    hasher.finish()
}

/// Immutable slot table mapping routing keys to backend indices.
#[derive(Debug, Clone)]
pub(crate) struct MaglevTable {
    slots: Vec<u32>,
}

impl MaglevTable {
    /// Build the table for the given backend names (endpoint base URLs).
    /// An empty backend list yields an empty table; lookups on it return
    /// `None` and the resolver reports the configuration error.
    pub fn build(backends: &[String]) -> Self {
        if backends.is_empty() {
            return Self { slots: Vec::new() };
        }

        let permutations: Vec<(usize, usize)> = backends
            .iter()
            .map(|name| {
                let offset = hash_with_seed(name, SEED_OFFSET) as usize % TABLE_SIZE;
                let skip = hash_with_seed(name, SEED_SKIP) as usize % (TABLE_SIZE - 1) + 1;
                (offset, skip)
            })
            .collect();

        let mut next = vec![0usize; backends.len()];
        let mut slots = vec![u32::MAX; TABLE_SIZE];
        let mut filled = 0usize;

        'fill: loop {
            for (i, &(offset, skip)) in permutations.iter().enumerate() {
                let mut candidate = (offset + next[i] * skip) % TABLE_SIZE;
                while slots[candidate] != u32::MAX {
                    next[i] += 1;
                    candidate = (offset + next[i] * skip) % TABLE_SIZE;
                }
                slots[candidate] = i as u32;
                next[i] += 1;
                filled += 1;
                if filled == TABLE_SIZE {
                    break 'fill;
                }
            }
        }

        Self { slots }
    }

    /// Backend index for a routing key, or `None` on an empty table.
    pub fn lookup(&self, key: &str) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let slot = hash_with_seed(key, SEED_LOOKUP) as usize % self.slots.len();
        Some(self.slots[slot] as usize)
    }
}
