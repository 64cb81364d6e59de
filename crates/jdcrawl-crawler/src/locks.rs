//! Per-pair claim registry: at most one worker may crawl a pair at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use jdcrawl_core::Pair;

#[derive(Debug, Clone, Default)]
pub struct PairLocks {
    held: Arc<Mutex<HashSet<Pair>>>,
}

impl PairLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `pair`, or returns `None` if another worker holds it.
    #[must_use]
    pub fn try_claim(&self, pair: &Pair) -> Option<PairGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(pair.clone()) {
            return None;
        }
        Some(PairGuard {
            pair: pair.clone(),
            held: Arc::clone(&self.held),
        })
    }
}

/// Releases the claim on drop.
#[derive(Debug)]
pub struct PairGuard {
    pair: Pair,
    held: Arc<Mutex<HashSet<Pair>>>,
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.pair);
    }
}
