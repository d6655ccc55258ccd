//! Transition operations over the department/task aggregate.
//!
//! Every operation writes the task row, the department row, and their
//! journal entries in one transaction; a client can never observe the twins
//! diverged across a durable read.

use super::departments::{get_department_internal, list_departments_internal};
use super::directory::get_employee_internal;
use super::{changes, now_ms, Database};
use crate::engine;
use crate::error::CoreError;
use crate::types::{
    Assignment, ChangeOp, Department, Priority, Snapshot, Task, ToggleOutcome, WorkStatus,
};
use anyhow::Result;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

pub(crate) fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;

    Ok(Task {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        department_id: row.get("department_id")?,
        employee_id: row.get("employee_id")?,
        status: WorkStatus::from_str(&status).unwrap_or(WorkStatus::Pending),
        priority: Priority::from_str(&priority).unwrap_or_default(),
        assigned_at: row.get("assigned_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const TASK_COLUMNS: &str = "id, company_id, department_id, employee_id, status, priority, \
     assigned_at, started_at, completed_at, created_at, updated_at";

pub(crate) fn get_task_internal(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![id], parse_task_row)?;

    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// The department's active task, if any. At most one exists; the partial
/// unique index on tasks enforces it.
pub(crate) fn active_task_internal(conn: &Connection, department_id: &str) -> Result<Option<Task>> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE department_id = ?1 AND status != 'completed'"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![department_id], parse_task_row)?;

    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

impl Database {
    /// Assign a department to an employee.
    ///
    /// Reuses the active task row when one exists (a reassignment resets
    /// its engagement fields); otherwise inserts a fresh task. The
    /// department mirror is updated unconditionally.
    pub fn assign(
        &self,
        department_id: &str,
        employee_id: &str,
        priority: Priority,
    ) -> Result<Assignment> {
        let now = now_ms();

        let (assignment, seq) = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let department = get_department_internal(&tx, department_id)?
                .ok_or_else(|| CoreError::DepartmentNotFound(department_id.to_string()))?;
            let employee = get_employee_internal(&tx, employee_id)?
                .filter(|e| e.company_id == department.company_id)
                .ok_or_else(|| CoreError::EmployeeNotFound(employee_id.to_string()))?;

            let (task, task_op) = match active_task_internal(&tx, department_id)? {
                Some(task) => {
                    tx.execute(
                        "UPDATE tasks SET employee_id = ?1, status = 'pending', priority = ?2,
                         assigned_at = ?3, started_at = NULL, completed_at = NULL, updated_at = ?3
                         WHERE id = ?4",
                        params![employee.id, priority.as_str(), now, task.id],
                    )?;

                    (
                        Task {
                            employee_id: employee.id.clone(),
                            status: WorkStatus::Pending,
                            priority,
                            assigned_at: now,
                            started_at: None,
                            completed_at: None,
                            updated_at: now,
                            ..task
                        },
                        ChangeOp::Update,
                    )
                }
                None => {
                    let task = Task {
                        id: Uuid::now_v7().to_string(),
                        company_id: department.company_id.clone(),
                        department_id: department.id.clone(),
                        employee_id: employee.id.clone(),
                        status: WorkStatus::Pending,
                        priority,
                        assigned_at: now,
                        started_at: None,
                        completed_at: None,
                        created_at: now,
                        updated_at: now,
                    };

                    tx.execute(
                        "INSERT INTO tasks (id, company_id, department_id, employee_id, status,
                         priority, assigned_at, started_at, completed_at, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, ?8, ?8)",
                        params![
                            task.id,
                            task.company_id,
                            task.department_id,
                            task.employee_id,
                            task.status.as_str(),
                            task.priority.as_str(),
                            task.assigned_at,
                            task.created_at,
                        ],
                    )?;

                    (task, ChangeOp::Insert)
                }
            };

            tx.execute(
                "UPDATE departments SET status = 'pending', assigned_to = ?1, priority = ?2,
                 updated_at = ?3 WHERE id = ?4",
                params![employee.id, priority.as_str(), now, department.id],
            )?;

            let department = Department {
                status: WorkStatus::Pending,
                assigned_to: Some(employee.id.clone()),
                priority,
                updated_at: now,
                ..department
            };

            changes::journal_task(&tx, task_op, &task)?;
            let seq = changes::journal_department(&tx, ChangeOp::Update, &department)?;
            tx.commit()?;

            Ok((Assignment { task, department }, seq))
        })?;

        self.signal_changes(seq);
        Ok(assignment)
    }

    /// Advance a task to a new status, mirroring the department.
    pub fn advance_status(&self, task_id: &str, new_status: WorkStatus) -> Result<Assignment> {
        let now = now_ms();

        let (assignment, seq) = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let task = get_task_internal(&tx, task_id)?
                .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
            let department = get_department_internal(&tx, &task.department_id)?
                .ok_or_else(|| CoreError::DepartmentNotFound(task.department_id.clone()))?;

            let plan = engine::plan_advance(&task, new_status, now)?;

            tx.execute(
                "UPDATE tasks SET status = ?1, started_at = ?2, completed_at = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    plan.status.as_str(),
                    plan.started_at,
                    plan.completed_at,
                    now,
                    task.id,
                ],
            )?;

            let task = Task {
                status: plan.status,
                started_at: plan.started_at,
                completed_at: plan.completed_at,
                updated_at: now,
                ..task
            };

            let department = Department {
                status: plan.status,
                assigned_to: plan.assigned_to,
                priority: plan.priority.unwrap_or(department.priority),
                last_cleaned_at: plan.last_cleaned_at.or(department.last_cleaned_at),
                updated_at: now,
                ..department
            };

            tx.execute(
                "UPDATE departments SET status = ?1, assigned_to = ?2, priority = ?3,
                 last_cleaned_at = ?4, updated_at = ?5 WHERE id = ?6",
                params![
                    department.status.as_str(),
                    department.assigned_to,
                    department.priority.as_str(),
                    department.last_cleaned_at,
                    now,
                    department.id,
                ],
            )?;

            changes::journal_task(&tx, ChangeOp::Update, &task)?;
            let seq = changes::journal_department(&tx, ChangeOp::Update, &department)?;
            tx.commit()?;

            Ok((Assignment { task, department }, seq))
        })?;

        self.signal_changes(seq);
        Ok(assignment)
    }

    /// Flip a department's priority, mirroring onto its active task.
    ///
    /// `current_priority` is the value the caller last observed; two stale
    /// callers flipping the same value converge instead of double-toggling.
    pub fn toggle_priority(
        &self,
        department_id: &str,
        current_priority: Priority,
    ) -> Result<ToggleOutcome> {
        let now = now_ms();
        let new_priority = current_priority.toggled();

        let (outcome, seq) = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let department = get_department_internal(&tx, department_id)?
                .ok_or_else(|| CoreError::DepartmentNotFound(department_id.to_string()))?;

            tx.execute(
                "UPDATE departments SET priority = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_priority.as_str(), now, department.id],
            )?;

            let department = Department {
                priority: new_priority,
                updated_at: now,
                ..department
            };

            let task = match active_task_internal(&tx, department_id)? {
                Some(task) => {
                    tx.execute(
                        "UPDATE tasks SET priority = ?1, updated_at = ?2 WHERE id = ?3",
                        params![new_priority.as_str(), now, task.id],
                    )?;

                    let task = Task {
                        priority: new_priority,
                        updated_at: now,
                        ..task
                    };
                    changes::journal_task(&tx, ChangeOp::Update, &task)?;
                    Some(task)
                }
                None => None,
            };

            let seq = changes::journal_department(&tx, ChangeOp::Update, &department)?;
            tx.commit()?;

            Ok((ToggleOutcome { department, task }, seq))
        })?;

        self.signal_changes(seq);
        Ok(outcome)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, id))
    }

    pub fn active_task_for_department(&self, department_id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| active_task_internal(conn, department_id))
    }

    /// Tasks assigned to an employee, most recent first.
    pub fn tasks_for_employee(&self, employee_id: &str) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE employee_id = ?1 ORDER BY assigned_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;

            let tasks = stmt
                .query_map(params![employee_id], parse_task_row)?
                .filter_map(|r| r.ok())
                .collect();

            Ok(tasks)
        })
    }

    pub fn list_tasks(&self, company_id: &str) -> Result<Vec<Task>> {
        self.with_conn(|conn| list_tasks_internal(conn, company_id))
    }

    /// Full tenant state plus the journal position it is consistent with.
    ///
    /// The position is read first, so anything committed while the rows are
    /// collected is re-delivered by the feed; the cache merge is idempotent.
    pub fn snapshot(&self, company_id: &str) -> Result<Snapshot> {
        self.with_conn(|conn| {
            let seq = changes::latest_seq_internal(conn)?;
            let departments = list_departments_internal(conn, company_id)?;
            let tasks = list_tasks_internal(conn, company_id)?;

            Ok(Snapshot {
                departments,
                tasks,
                seq,
            })
        })
    }
}

fn list_tasks_internal(conn: &Connection, company_id: &str) -> Result<Vec<Task>> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE company_id = ?1 ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let tasks = stmt
        .query_map(params![company_id], parse_task_row)?
        .filter_map(|r| r.ok())
        .collect();

    Ok(tasks)
}
