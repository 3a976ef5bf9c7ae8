use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative stop signal for long phases. Checked only at chunk boundaries.
#[derive(Debug, Clone, Default)]
pub struct WorkBudget {
    pub deadline: Option<Instant>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl WorkBudget {
    /// No deadline, no cancel token.
    pub fn unlimited() -> Self {
        WorkBudget::default()
    }

    pub fn for_duration(duration: Duration) -> Self {
        WorkBudget {
            deadline: Some(Instant::now() + duration),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn should_stop(&self) -> bool {
        if let Some(cancel) = &self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return true;
            }
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

/// How a chunked phase ended. Fatal defects are reported as `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// No work left.
    Finished,
    /// Stopped early at a chunk boundary; calling again resumes.
    Interrupted,
}

impl WorkOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, WorkOutcome::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_budget_never_stops() {
        assert!(!WorkBudget::unlimited().should_stop());
    }

    #[test]
    fn test_expired_deadline_stops() {
        let budget = WorkBudget {
            deadline: Some(Instant::now()),
            cancel: None,
        };
        assert!(budget.should_stop());
        assert!(!WorkBudget::for_duration(Duration::from_secs(3600)).should_stop());
    }

    #[test]
    fn test_cancel_token_stops() {
        let cancel = Arc::new(AtomicBool::new(false));
        let budget = WorkBudget::unlimited().with_cancel(cancel.clone());
        assert!(!budget.should_stop());
        cancel.store(true, Ordering::Relaxed);
        assert!(budget.should_stop());
    }
}
