//! Core types for the cleaning operations sync engine.

use serde::{Deserialize, Serialize};

/// Work status shared by a department and its active task.
///
/// The two rows are written together and must agree after every
/// transition ("twin consistency").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    InProgress,
    Completed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::InProgress => "in_progress",
            WorkStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WorkStatus::Pending),
            "in_progress" => Some(WorkStatus::InProgress),
            "completed" => Some(WorkStatus::Completed),
            _ => None,
        }
    }

    /// Active means pending or in_progress; completed tasks are inert.
    pub fn is_active(&self) -> bool {
        !matches!(self, WorkStatus::Completed)
    }
}

/// Cleaning priority. Toggled by admins, reset to normal on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            _ => None,
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Priority::Normal => Priority::High,
            Priority::High => Priority::Normal,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A company: the tenant unit. Every query and channel is scoped to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

/// Optional grouping of departments within a company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condominium {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub created_at: i64,
}

/// An employee who can be assigned cleaning work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub role: String,
    pub created_at: i64,
}

/// A rentable/cleanable unit. The subject of cleaning work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    pub id: String,
    pub company_id: String,
    pub condominium_id: Option<String>,

    // Descriptive fields, never touched by transitions.
    pub name: String,
    pub address: Option<String>,
    pub access_code: Option<String>,
    pub rooms: i64,
    pub beds: i64,

    // Operational fields, written only by the transition operations.
    pub status: WorkStatus,
    pub assigned_to: Option<String>,
    pub priority: Priority,
    pub last_cleaned_at: Option<i64>,

    pub created_at: i64,
    pub updated_at: i64,
}

/// The record of one cleaning assignment against a department.
///
/// Reused (fields overwritten) when the department is reassigned while
/// this task is still active; a new row is created only once no active
/// task exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub company_id: String,
    pub department_id: String,
    pub employee_id: String,
    pub status: WorkStatus,
    pub priority: Priority,
    pub assigned_at: i64,
    /// Set on the first transition to in_progress, sticky across re-entry.
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Both halves of the aggregate, as written by one transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub task: Task,
    pub department: Department,
}

/// Result of a priority toggle: the department plus the mirrored active
/// task, when one existed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleOutcome {
    pub department: Department,
    pub task: Option<Task>,
}

/// Table a change journal row refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Departments,
    Tasks,
}

impl ChangeTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeTable::Departments => "departments",
            ChangeTable::Tasks => "tasks",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "departments" => Some(ChangeTable::Departments),
            "tasks" => Some(ChangeTable::Tasks),
            _ => None,
        }
    }
}

/// Kind of row mutation a change journal row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "insert",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(ChangeOp::Insert),
            "update" => Some(ChangeOp::Update),
            "delete" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

/// One durable feed event: a row-level change with its full post-write
/// snapshot (`row` is None for deletes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub seq: i64,
    pub company_id: String,
    pub tbl: ChangeTable,
    pub op: ChangeOp,
    pub row_id: String,
    pub row: Option<serde_json::Value>,
    pub created_at: i64,
}

/// Full per-tenant state, used to prime or re-prime a client cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub departments: Vec<Department>,
    pub tasks: Vec<Task>,
    /// Journal position the snapshot is consistent with; tail from here.
    pub seq: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_status_round_trips_through_strings() {
        for s in [
            WorkStatus::Pending,
            WorkStatus::InProgress,
            WorkStatus::Completed,
        ] {
            assert_eq!(WorkStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(WorkStatus::from_str("paused"), None);
    }

    #[test]
    fn priority_toggle_is_symmetric() {
        assert_eq!(Priority::Normal.toggled(), Priority::High);
        assert_eq!(Priority::High.toggled(), Priority::Normal);
        assert_eq!(Priority::Normal.toggled().toggled(), Priority::Normal);
    }

    #[test]
    fn only_completed_is_inactive() {
        assert!(WorkStatus::Pending.is_active());
        assert!(WorkStatus::InProgress.is_active());
        assert!(!WorkStatus::Completed.is_active());
    }
}
