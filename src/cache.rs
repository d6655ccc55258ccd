//! Client-side materialized cache of one tenant's departments and tasks.
//!
//! Fed from three sources: an initial snapshot, the durable change feed,
//! and best-effort broadcast signals. Every apply path is an idempotent
//! upsert keyed by row id, so duplicated or reordered deliveries converge
//! to the same state. Feed records carry full rows and always win; signals
//! carry partial fields and only patch rows the cache already holds.

use crate::relay::Signal;
use crate::types::{ChangeOp, ChangeRecord, ChangeTable, Department, Snapshot, Task, WorkStatus};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ClientCache {
    departments: HashMap<String, Department>,
    tasks: HashMap<String, Task>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole cache with a snapshot.
    pub fn prime(&mut self, snapshot: Snapshot) {
        self.departments = snapshot
            .departments
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        self.tasks = snapshot
            .tasks
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
    }

    /// Apply one durable feed record.
    ///
    /// Inserts and updates are handled identically: the record carries the
    /// full post-write row, so an update arriving for an id the cache has
    /// never seen is stored as a new row. A record that cannot be decoded
    /// is skipped with a warning rather than poisoning the stream.
    pub fn apply_change(&mut self, record: &ChangeRecord) {
        match record.op {
            ChangeOp::Insert | ChangeOp::Update => {
                let Some(row) = record.row.as_ref() else {
                    warn!(
                        seq = record.seq,
                        row_id = %record.row_id,
                        "change record missing row payload, skipping"
                    );
                    return;
                };
                match record.tbl {
                    ChangeTable::Departments => {
                        match serde_json::from_value::<Department>(row.clone()) {
                            Ok(department) => self.upsert_department(department),
                            Err(e) => warn!(
                                seq = record.seq,
                                row_id = %record.row_id,
                                "undecodable department change, skipping: {e}"
                            ),
                        }
                    }
                    ChangeTable::Tasks => match serde_json::from_value::<Task>(row.clone()) {
                        Ok(task) => self.upsert_task(task),
                        Err(e) => warn!(
                            seq = record.seq,
                            row_id = %record.row_id,
                            "undecodable task change, skipping: {e}"
                        ),
                    },
                }
            }
            ChangeOp::Delete => match record.tbl {
                ChangeTable::Departments => {
                    self.departments.remove(&record.row_id);
                }
                ChangeTable::Tasks => {
                    self.tasks.remove(&record.row_id);
                }
            },
        }
    }

    /// Apply one broadcast signal.
    ///
    /// Signals are partial: only the fields they carry are patched. A
    /// signal naming a row this cache has never seen is dropped, the
    /// durable feed delivers the full row shortly after.
    pub fn apply_signal(&mut self, signal: &Signal) {
        match signal {
            Signal::PriorityChanged {
                department_id,
                priority,
            } => {
                if let Some(department) = self.departments.get_mut(department_id) {
                    department.priority = *priority;
                } else {
                    debug!(department_id = %department_id, "priority signal for uncached department, dropped");
                }
                // Mirror onto the active task the same way the store does.
                if let Some(task) = self
                    .tasks
                    .values_mut()
                    .find(|t| t.department_id == *department_id && t.status.is_active())
                {
                    task.priority = *priority;
                }
            }
            Signal::TaskStatusChanged {
                task_id,
                department_id,
                status,
                department_priority,
            } => {
                if let Some(task) = self.tasks.get_mut(task_id) {
                    task.status = *status;
                    // An active task mirrors its department's priority; a
                    // completed one keeps the priority it ran at.
                    if status.is_active() {
                        if let Some(p) = department_priority {
                            task.priority = *p;
                        }
                    }
                } else {
                    debug!(task_id = %task_id, "status signal for uncached task, dropped");
                }
                if let Some(department) = self.departments.get_mut(department_id) {
                    department.status = *status;
                    if let Some(p) = department_priority {
                        department.priority = *p;
                    }
                    // Completion always leaves the department unassigned;
                    // the feed record supplies last_cleaned_at.
                    if *status == WorkStatus::Completed {
                        department.assigned_to = None;
                    }
                }
            }
        }
    }

    pub fn upsert_department(&mut self, department: Department) {
        self.departments.insert(department.id.clone(), department);
    }

    pub fn upsert_task(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn department(&self, id: &str) -> Option<Department> {
        self.departments.get(id).cloned()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).cloned()
    }

    /// All cached departments, oldest first.
    pub fn departments(&self) -> Vec<Department> {
        let mut rows: Vec<Department> = self.departments.values().cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows
    }

    /// Tasks for one employee, most recently assigned first.
    pub fn tasks_for_employee(&self, employee_id: &str) -> Vec<Task> {
        let mut rows: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.employee_id == employee_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at).then(a.id.cmp(&b.id)));
        rows
    }

    /// Active task for a department, if any.
    pub fn active_task_for_department(&self, department_id: &str) -> Option<Task> {
        self.tasks
            .values()
            .find(|t| t.department_id == department_id && t.status.is_active())
            .cloned()
    }

    pub fn department_count(&self) -> usize {
        self.departments.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn department(id: &str) -> Department {
        Department {
            id: id.to_string(),
            company_id: "c1".to_string(),
            condominium_id: None,
            name: format!("Dept {id}"),
            address: None,
            access_code: None,
            rooms: 2,
            beds: 3,
            status: WorkStatus::Completed,
            assigned_to: None,
            priority: Priority::Normal,
            last_cleaned_at: None,
            created_at: 1_000,
            updated_at: 1_000,
        }
    }

    fn task(id: &str, department_id: &str, employee_id: &str) -> Task {
        Task {
            id: id.to_string(),
            company_id: "c1".to_string(),
            department_id: department_id.to_string(),
            employee_id: employee_id.to_string(),
            status: WorkStatus::Pending,
            priority: Priority::Normal,
            assigned_at: 1_000,
            started_at: None,
            completed_at: None,
            created_at: 1_000,
            updated_at: 1_000,
        }
    }

    fn change(seq: i64, tbl: ChangeTable, op: ChangeOp, row_id: &str, row: Option<serde_json::Value>) -> ChangeRecord {
        ChangeRecord {
            seq,
            company_id: "c1".to_string(),
            tbl,
            op,
            row_id: row_id.to_string(),
            row,
            created_at: 1_000,
        }
    }

    #[test]
    fn feed_update_for_unknown_id_is_an_insert() {
        let mut cache = ClientCache::new();
        let d = department("d1");
        let record = change(
            1,
            ChangeTable::Departments,
            ChangeOp::Update,
            "d1",
            Some(serde_json::to_value(&d).unwrap()),
        );

        cache.apply_change(&record);
        assert_eq!(cache.department("d1").unwrap().name, "Dept d1");
    }

    #[test]
    fn feed_apply_is_idempotent() {
        let mut cache = ClientCache::new();
        let mut d = department("d1");
        d.priority = Priority::High;
        let record = change(
            2,
            ChangeTable::Departments,
            ChangeOp::Insert,
            "d1",
            Some(serde_json::to_value(&d).unwrap()),
        );

        cache.apply_change(&record);
        cache.apply_change(&record);
        assert_eq!(cache.department_count(), 1);
        assert_eq!(cache.department("d1").unwrap().priority, Priority::High);
    }

    #[test]
    fn delete_removes_the_row() {
        let mut cache = ClientCache::new();
        cache.upsert_task(task("t1", "d1", "e1"));

        cache.apply_change(&change(3, ChangeTable::Tasks, ChangeOp::Delete, "t1", None));
        assert!(cache.task("t1").is_none());
    }

    #[test]
    fn malformed_row_is_skipped() {
        let mut cache = ClientCache::new();
        let record = change(
            4,
            ChangeTable::Tasks,
            ChangeOp::Insert,
            "t1",
            Some(serde_json::json!({"id": "t1", "status": "bogus"})),
        );

        cache.apply_change(&record);
        assert_eq!(cache.task_count(), 0);
    }

    #[test]
    fn priority_signal_patches_department_and_active_task() {
        let mut cache = ClientCache::new();
        cache.upsert_department(department("d1"));
        cache.upsert_task(task("t1", "d1", "e1"));

        cache.apply_signal(&Signal::PriorityChanged {
            department_id: "d1".to_string(),
            priority: Priority::High,
        });

        assert_eq!(cache.department("d1").unwrap().priority, Priority::High);
        assert_eq!(cache.task("t1").unwrap().priority, Priority::High);
    }

    #[test]
    fn priority_signal_for_unknown_department_is_dropped() {
        let mut cache = ClientCache::new();
        cache.apply_signal(&Signal::PriorityChanged {
            department_id: "ghost".to_string(),
            priority: Priority::High,
        });
        assert_eq!(cache.department_count(), 0);
    }

    #[test]
    fn completion_signal_clears_the_assignee() {
        let mut cache = ClientCache::new();
        let mut d = department("d1");
        d.status = WorkStatus::InProgress;
        d.assigned_to = Some("e1".to_string());
        d.priority = Priority::High;
        cache.upsert_department(d);
        let mut t = task("t1", "d1", "e1");
        t.status = WorkStatus::InProgress;
        t.priority = Priority::High;
        cache.upsert_task(t);

        cache.apply_signal(&Signal::TaskStatusChanged {
            task_id: "t1".to_string(),
            department_id: "d1".to_string(),
            status: WorkStatus::Completed,
            department_priority: Some(Priority::Normal),
        });

        let d = cache.department("d1").unwrap();
        assert_eq!(d.status, WorkStatus::Completed);
        assert_eq!(d.assigned_to, None);
        assert_eq!(d.priority, Priority::Normal);
        let t = cache.task("t1").unwrap();
        assert_eq!(t.status, WorkStatus::Completed);
        assert_eq!(t.priority, Priority::High); // frozen at completion
    }

    #[test]
    fn signal_then_feed_record_converges() {
        let mut cache = ClientCache::new();
        cache.upsert_department(department("d1"));

        cache.apply_signal(&Signal::PriorityChanged {
            department_id: "d1".to_string(),
            priority: Priority::High,
        });
        let mut full = department("d1");
        full.priority = Priority::High;
        full.updated_at = 2_000;
        cache.apply_change(&change(
            5,
            ChangeTable::Departments,
            ChangeOp::Update,
            "d1",
            Some(serde_json::to_value(&full).unwrap()),
        ));

        let d = cache.department("d1").unwrap();
        assert_eq!(d.priority, Priority::High);
        assert_eq!(d.updated_at, 2_000);
    }

    #[test]
    fn employee_tasks_sorted_newest_first() {
        let mut cache = ClientCache::new();
        let mut t1 = task("t1", "d1", "e1");
        t1.assigned_at = 1_000;
        let mut t2 = task("t2", "d2", "e1");
        t2.assigned_at = 2_000;
        let t3 = task("t3", "d3", "other");
        cache.upsert_task(t1);
        cache.upsert_task(t2);
        cache.upsert_task(t3);

        let rows = cache.tasks_for_employee("e1");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "t2");
        assert_eq!(rows[1].id, "t1");
    }
}
