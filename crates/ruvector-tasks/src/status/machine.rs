//! Task lifecycle transitions

use crate::error::{Error, Result};
use crate::types::{TaskId, TaskStatus};

/// Whether `from -> to` is a legal lifecycle transition
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    matches!(
        (from, to),
        (Pending, Queued)
            | (Queued, Processing)
            | (Processing, Completed)
            | (Processing, Retrying)
            | (Processing, Failed)
            | (Processing, Cancelled)
            | (Pending, Cancelled)
            | (Queued, Cancelled)
            | (Retrying, Queued)
            | (Retrying, Cancelled)
            | (Retrying, Failed)
    )
}

/// Check a transition, producing the error callers see when it is illegal
pub fn check_transition(task_id: TaskId, from: TaskStatus, to: TaskStatus) -> Result<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { task_id, from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_accept_nothing() {
        for from in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            for to in TaskStatus::ALL {
                assert!(!can_transition(from, to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_happy_path() {
        assert!(can_transition(TaskStatus::Pending, TaskStatus::Queued));
        assert!(can_transition(TaskStatus::Queued, TaskStatus::Processing));
        assert!(can_transition(TaskStatus::Processing, TaskStatus::Completed));
    }

    #[test]
    fn test_retry_loop() {
        assert!(can_transition(TaskStatus::Processing, TaskStatus::Retrying));
        assert!(can_transition(TaskStatus::Retrying, TaskStatus::Queued));
        assert!(!can_transition(TaskStatus::Retrying, TaskStatus::Processing));
    }

    #[test]
    fn test_no_claim_without_queue() {
        assert!(!can_transition(TaskStatus::Pending, TaskStatus::Processing));
        let err = check_transition(TaskId::new(), TaskStatus::Pending, TaskStatus::Processing)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }
}
