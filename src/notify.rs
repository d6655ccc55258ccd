//! Priority-change notifications.
//!
//! When an admin flips a department to high priority while someone is
//! assigned, that person gets a push notice. Delivery is fire-and-forget:
//! a failed dispatch is logged and dropped, it never fails the toggle and
//! is never retried.

use crate::types::Department;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// A push notice addressed to one employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityNotice {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub related_department_id: String,
}

/// Delivery backend for priority notices.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notice: PriorityNotice) -> anyhow::Result<()>;
}

/// Default backend: writes the notice to the log stream.
#[derive(Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, notice: PriorityNotice) -> anyhow::Result<()> {
        info!(
            user_id = %notice.user_id,
            department_id = %notice.related_department_id,
            "notification: {} - {}",
            notice.title,
            notice.message
        );
        Ok(())
    }
}

/// Build the notice for a department's current assignee.
///
/// Returns `None` when nobody is assigned; there is no one to notify.
pub fn priority_notice(department: &Department) -> Option<PriorityNotice> {
    let user_id = department.assigned_to.clone()?;
    Some(PriorityNotice {
        user_id,
        title: "Cleaning priority updated".to_string(),
        message: format!(
            "{} is now {} priority",
            department.name,
            department.priority.as_str()
        ),
        related_department_id: department.id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, WorkStatus};

    fn department(assigned_to: Option<&str>, priority: Priority) -> Department {
        Department {
            id: "d1".to_string(),
            company_id: "c1".to_string(),
            condominium_id: None,
            name: "Suite 4B".to_string(),
            address: None,
            access_code: None,
            rooms: 2,
            beds: 3,
            status: WorkStatus::Pending,
            assigned_to: assigned_to.map(|s| s.to_string()),
            priority,
            last_cleaned_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn notice_targets_the_assignee() {
        let notice = priority_notice(&department(Some("e1"), Priority::High)).unwrap();
        assert_eq!(notice.user_id, "e1");
        assert_eq!(notice.related_department_id, "d1");
        assert_eq!(notice.title, "Cleaning priority updated");
        assert_eq!(notice.message, "Suite 4B is now high priority");
    }

    #[test]
    fn unassigned_department_produces_no_notice() {
        assert!(priority_notice(&department(None, Priority::High)).is_none());
    }

    #[tokio::test]
    async fn log_dispatcher_accepts_notices() {
        let dispatcher = LogDispatcher;
        let notice = priority_notice(&department(Some("e1"), Priority::Normal)).unwrap();
        assert!(dispatcher.dispatch(notice).await.is_ok());
    }
}
