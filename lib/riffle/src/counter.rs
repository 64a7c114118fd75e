//! Named job counters, merged across tasks with plain addition.

use std::collections::HashMap;

/// Tokens emitted by the map stage, one increment per emission.
pub const INPUT_WORDS: &str = "INPUT_WORDS";

/// Input records decoded and handed to the map stage.
pub const INPUT_RECORDS: &str = "INPUT_RECORDS";

/// Malformed input records dropped under [`MalformedPolicy::Skip`].
///
/// [`MalformedPolicy::Skip`]: crate::config::MalformedPolicy::Skip
pub const SKIPPED_RECORDS: &str = "SKIPPED_RECORDS";

/// A bag of named `u64` counters. Addition is associative and commutative,
/// so per-task sets can be merged in any order without changing totals.
#[derive(Debug, Default, Clone)]
pub struct CounterSet {
    counts: HashMap<&'static str, u64>,
}

impl CounterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&mut self, name: &'static str, by: u64) {
        *self.counts.entry(name).or_insert(0) += by;
    }

    /// Counters that were never incremented read as zero.
    pub fn get(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &CounterSet) {
        for (name, value) in &other.counts {
            *self.counts.entry(name).or_insert(0) += value;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counts.iter().map(|(name, value)| (*name, *value))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Per-attempt task state handed to the map stage.
///
/// Each attempt gets a fresh context; only the attempt that commits reports
/// its counters, so a failed attempt cannot double-count on retry.
#[derive(Debug, Default)]
pub struct TaskContext {
    pub counters: CounterSet,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }
}
