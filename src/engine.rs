//! Pure transition rules for the department/task aggregate.
//!
//! The store executes these plans inside a single transaction; nothing in
//! here touches SQL. Assignment and priority-toggle field rules are single
//! overwrites and live with their statements in `db::ops`.

use crate::error::{CoreError, CoreResult};
use crate::types::{Priority, Task, WorkStatus};

/// Computed row effects of one status transition.
///
/// `started_at`/`completed_at` are the task's new values. `assigned_to`,
/// `priority`, and `last_cleaned_at` are the department's: `assigned_to` is
/// always written (None on completion), the other two only when Some.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub status: WorkStatus,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub assigned_to: Option<String>,
    pub priority: Option<Priority>,
    pub last_cleaned_at: Option<i64>,
}

/// Compute the effects of advancing a task to `target`.
///
/// A completed task is terminal: the only way to produce new activity for
/// its department is a fresh assignment.
pub fn plan_advance(task: &Task, target: WorkStatus, now: i64) -> CoreResult<Transition> {
    if task.status == WorkStatus::Completed {
        return Err(CoreError::TaskAlreadyCompleted(task.id.clone()));
    }

    Ok(match target {
        WorkStatus::Pending => Transition {
            status: target,
            started_at: None,
            completed_at: None,
            assigned_to: Some(task.employee_id.clone()),
            priority: None,
            last_cleaned_at: None,
        },
        WorkStatus::InProgress => Transition {
            status: target,
            // Sticky: re-entering in_progress keeps the original start.
            started_at: task.started_at.or(Some(now)),
            completed_at: None,
            assigned_to: Some(task.employee_id.clone()),
            priority: None,
            last_cleaned_at: None,
        },
        WorkStatus::Completed => Transition {
            status: target,
            started_at: task.started_at,
            completed_at: Some(now),
            assigned_to: None,
            priority: Some(Priority::Normal),
            last_cleaned_at: Some(now),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn task(status: WorkStatus, started_at: Option<i64>) -> Task {
        Task {
            id: "t1".to_string(),
            company_id: "c1".to_string(),
            department_id: "d1".to_string(),
            employee_id: "e1".to_string(),
            status,
            priority: Priority::Normal,
            assigned_at: 1_000,
            started_at,
            completed_at: None,
            created_at: 1_000,
            updated_at: 1_000,
        }
    }

    #[test]
    fn in_progress_sets_started_at_once() {
        let first = plan_advance(&task(WorkStatus::Pending, None), WorkStatus::InProgress, 2_000)
            .unwrap();
        assert_eq!(first.started_at, Some(2_000));

        let again = plan_advance(
            &task(WorkStatus::InProgress, Some(2_000)),
            WorkStatus::InProgress,
            3_000,
        )
        .unwrap();
        assert_eq!(again.started_at, Some(2_000));
    }

    #[test]
    fn in_progress_clears_completed_at() {
        let plan = plan_advance(
            &task(WorkStatus::Pending, Some(2_000)),
            WorkStatus::InProgress,
            3_000,
        )
        .unwrap();
        assert_eq!(plan.completed_at, None);
    }

    #[test]
    fn pending_resets_both_timestamps() {
        let plan =
            plan_advance(&task(WorkStatus::InProgress, Some(2_000)), WorkStatus::Pending, 3_000)
                .unwrap();
        assert_eq!(plan.started_at, None);
        assert_eq!(plan.completed_at, None);
        assert_eq!(plan.assigned_to.as_deref(), Some("e1"));
    }

    #[test]
    fn completion_clears_assignee_and_resets_priority() {
        let plan = plan_advance(
            &task(WorkStatus::InProgress, Some(2_000)),
            WorkStatus::Completed,
            5_000,
        )
        .unwrap();
        assert_eq!(plan.completed_at, Some(5_000));
        assert_eq!(plan.started_at, Some(2_000));
        assert_eq!(plan.assigned_to, None);
        assert_eq!(plan.priority, Some(Priority::Normal));
        assert_eq!(plan.last_cleaned_at, Some(5_000));
    }

    #[test]
    fn completed_tasks_cannot_advance() {
        let done = task(WorkStatus::Completed, Some(2_000));
        for target in [WorkStatus::Pending, WorkStatus::InProgress, WorkStatus::Completed] {
            let err = plan_advance(&done, target, 9_000).unwrap_err();
            assert_eq!(err.code(), ErrorCode::TaskAlreadyCompleted);
        }
    }

    #[test]
    fn non_completed_targets_keep_department_assignee() {
        let plan = plan_advance(&task(WorkStatus::Pending, None), WorkStatus::InProgress, 2_000)
            .unwrap();
        assert_eq!(plan.assigned_to.as_deref(), Some("e1"));
        assert_eq!(plan.priority, None);
        assert_eq!(plan.last_cleaned_at, None);
    }
}
