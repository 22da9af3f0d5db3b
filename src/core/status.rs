use std::sync::atomic::{AtomicBool, Ordering};

/// Readiness flag indicating whether the orchestrator has completed startup.
///
/// Set by the lifecycle once dependencies are initialized and the first
/// health snapshot is taken; cleared again at shutdown.
#[derive(Debug, Default)]
pub struct Readiness {
    started: AtomicBool,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark startup as complete.
    pub fn mark_ready(&self) {
        self.started.store(true, Ordering::SeqCst);
        log::info!("Startup completed, orchestrator is ready");
    }

    /// Check whether startup has completed.
    pub fn is_ready(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Clear the flag, e.g. when shutting down
    pub fn reset(&self) {
        self.started.store(false, Ordering::SeqCst);
        log::debug!("Readiness status reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_not_ready() {
        let readiness = Readiness::new();
        assert!(!readiness.is_ready());
    }

    #[test]
    fn test_mark_ready_then_reset() {
        let readiness = Readiness::new();
        readiness.mark_ready();
        assert!(readiness.is_ready());
        readiness.reset();
        assert!(!readiness.is_ready());
    }

    #[test]
    fn test_multiple_marks_stay_ready() {
        let readiness = Readiness::new();
        readiness.mark_ready();
        readiness.mark_ready();
        assert!(readiness.is_ready());
    }
}
