//! Dictionary resequencing.
//!
//! Abbreviation blockettes (030, 031, 033, 034) are looked up by code from
//! other blockettes. Source metadata carries arbitrary identifiers; inside
//! one volume they are renumbered 1, 2, 3, ... per dictionary type in order
//! of first use.

use std::collections::HashMap;

/// Per-volume map from original identifiers to assigned indices.
#[derive(Debug, Clone, Default)]
pub struct Resequencer {
    counters: HashMap<u16, i64>,
    resolved: HashMap<(u16, i64), i64>,
}

impl Resequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for `original` in dictionary `dictionary`, assigning the next
    /// free one on first sight.
    pub fn resolve(&mut self, dictionary: u16, original: i64) -> i64 {
        if let Some(&index) = self.resolved.get(&(dictionary, original)) {
            return index;
        }
        let counter = self.counters.entry(dictionary).or_insert(0);
        *counter += 1;
        self.resolved.insert((dictionary, original), *counter);
        *counter
    }

    /// Number of indices handed out in `dictionary`.
    pub fn assigned(&self, dictionary: u16) -> i64 {
        self.counters.get(&dictionary).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.counters.clear();
        self.resolved.clear();
    }
}
