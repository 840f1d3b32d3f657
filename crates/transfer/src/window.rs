use std::collections::{BTreeSet, HashMap};

use fshare_protocol::constants::{DEFAULT_REQUEST_MAX, DEFAULT_REQUEST_THRESHOLD};

use crate::store::ChunkStore;

/// Sizing of the receiver's request window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Upper bound on requested-but-unreceived chunks after a round.
    pub request_max: usize,
    /// Refill the window while fewer than this many chunks are outstanding.
    pub request_threshold: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            request_max: DEFAULT_REQUEST_MAX,
            request_threshold: DEFAULT_REQUEST_THRESHOLD,
        }
    }
}

/// Result of checking a request batch after its expiry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    /// Indices from the batch that were still absent and went back to the
    /// missing set.
    pub expired: usize,
    /// Whether another round should be issued right away.
    pub refill: bool,
}

/// Tracks which chunks the receiver still needs and which are in flight.
///
/// Indices move from the missing set into a request round, and leave the
/// window for good when their chunk arrives. A round that expires puts its
/// absent indices back into the missing set without releasing their slot in
/// the request count; the slot is released when the chunk finally arrives,
/// once per request that covered it.
#[derive(Debug, Clone, Default)]
pub struct RequestWindow {
    config: WindowConfig,
    missing: BTreeSet<u32>,
    outstanding: HashMap<u32, usize>,
    num_requested: usize,
}

impl RequestWindow {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> WindowConfig {
        self.config
    }

    /// Marks every index in `[0, expected)` as missing and clears accounting.
    pub fn reset(&mut self, expected: u32) {
        self.clear();
        self.missing.extend(0..expected);
    }

    /// Empties the window.
    pub fn clear(&mut self) {
        self.missing.clear();
        self.outstanding.clear();
        self.num_requested = 0;
    }

    /// Chunks currently requested but not yet received.
    pub fn num_requested(&self) -> usize {
        self.num_requested
    }

    pub fn missing_len(&self) -> usize {
        self.missing.len()
    }

    pub fn is_missing(&self, index: u32) -> bool {
        self.missing.contains(&index)
    }

    /// Returns the missing indices in ascending order.
    pub fn missing(&self) -> impl Iterator<Item = u32> + '_ {
        self.missing.iter().copied()
    }

    /// Returns `true` when no further index can be drawn until chunks arrive.
    pub fn is_saturated(&self) -> bool {
        self.num_requested >= self.config.request_max
    }

    /// Returns `true` while the outstanding count is below the threshold.
    pub fn should_refill(&self) -> bool {
        self.num_requested < self.config.request_threshold
    }

    /// Draws the next request round, lowest indices first.
    ///
    /// At most `request_max - num_requested` indices are drawn so the
    /// outstanding count never exceeds `request_max`. Returns `None` when
    /// nothing was drawn.
    pub fn next_round(&mut self) -> Option<Vec<u32>> {
        let room = self.config.request_max.saturating_sub(self.num_requested);
        let mut batch = Vec::with_capacity(room.min(self.missing.len()));
        while batch.len() < room {
            let Some(index) = self.missing.pop_first() else {
                break;
            };
            *self.outstanding.entry(index).or_default() += 1;
            batch.push(index);
        }
        if batch.is_empty() {
            return None;
        }
        self.num_requested += batch.len();
        Some(batch)
    }

    /// Records the arrival of chunk `index`.
    ///
    /// Every request still covering the index is released. Arrivals that no
    /// request covered leave the count untouched.
    pub fn on_chunk_received(&mut self, index: u32) {
        self.missing.remove(&index);
        if let Some(count) = self.outstanding.remove(&index) {
            self.num_requested = self.num_requested.saturating_sub(count);
        }
    }

    /// Returns indices of `batch` that are absent from `store` to the missing
    /// set.
    pub fn expire(&mut self, batch: &[u32], store: &ChunkStore) -> Expiry {
        let mut expired = 0;
        for &index in batch {
            if store.contains(index) {
                continue;
            }
            if self.missing.insert(index) {
                expired += 1;
            }
        }
        Expiry {
            expired,
            refill: expired > 0 && self.should_refill(),
        }
    }
}
