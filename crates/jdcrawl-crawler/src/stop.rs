use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop request shared between the orchestrator and whoever
/// wants it to stop (typically a Ctrl-C handler).
///
/// Once triggered, no new pair is started and running pairs stop after the
/// page they are working on has been written and checkpointed.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("stop requested; finishing in-flight pages");
        }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let signal = StopSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_triggered());

        handle.trigger();
        handle.trigger();
        assert!(signal.is_triggered());
    }
}
