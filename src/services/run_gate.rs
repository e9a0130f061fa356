use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admits a bounded number of harvest runs at a time. Callers over the
/// limit are turned away instead of queued.
///
/// A permit is owned so it can travel with a run that outlives its handler.
pub struct RunGate {
    permits: Arc<Semaphore>,
}

impl Default for RunGate {
    fn default() -> Self {
        RunGate::new(1)
    }
}

impl RunGate {
    pub fn new(max_runs: usize) -> Self {
        RunGate {
            permits: Arc::new(Semaphore::new(max_runs.max(1))),
        }
    }

    pub fn try_enter(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().try_acquire_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::RunGate;

    #[test]
    fn second_run_is_turned_away_until_first_ends() {
        let gate = RunGate::default();

        let first = gate.try_enter();
        assert!(first.is_some());
        assert!(gate.try_enter().is_none());

        drop(first);
        assert!(gate.try_enter().is_some());
    }
}
