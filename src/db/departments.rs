//! Department CRUD.
//!
//! Administrative writes; each journals into the change feed so connected
//! caches see back-office edits the same way they see transitions.

use super::{changes, now_ms, Database};
use crate::error::CoreError;
use crate::types::{ChangeOp, ChangeTable, Department, Priority, WorkStatus};
use anyhow::Result;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input for creating a department.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDepartment {
    pub company_id: String,
    #[serde(default)]
    pub condominium_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub access_code: Option<String>,
    #[serde(default)]
    pub rooms: i64,
    #[serde(default)]
    pub beds: i64,
}

/// Descriptive-field patch; None leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepartmentPatch {
    pub name: Option<String>,
    pub address: Option<String>,
    pub access_code: Option<String>,
    pub condominium_id: Option<String>,
    pub rooms: Option<i64>,
    pub beds: Option<i64>,
}

pub(crate) fn parse_department_row(row: &Row) -> rusqlite::Result<Department> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;

    Ok(Department {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        condominium_id: row.get("condominium_id")?,
        name: row.get("name")?,
        address: row.get("address")?,
        access_code: row.get("access_code")?,
        rooms: row.get("rooms")?,
        beds: row.get("beds")?,
        status: WorkStatus::from_str(&status).unwrap_or(WorkStatus::Completed),
        assigned_to: row.get("assigned_to")?,
        priority: Priority::from_str(&priority).unwrap_or_default(),
        last_cleaned_at: row.get("last_cleaned_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const DEPARTMENT_COLUMNS: &str = "id, company_id, condominium_id, name, address, access_code, \
     rooms, beds, status, assigned_to, priority, last_cleaned_at, created_at, updated_at";

pub(crate) fn get_department_internal(conn: &Connection, id: &str) -> Result<Option<Department>> {
    let sql = format!("SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![id], parse_department_row)?;

    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub(crate) fn list_departments_internal(
    conn: &Connection,
    company_id: &str,
) -> Result<Vec<Department>> {
    let sql = format!(
        "SELECT {DEPARTMENT_COLUMNS} FROM departments
         WHERE company_id = ?1 ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let departments = stmt
        .query_map(params![company_id], parse_department_row)?
        .filter_map(|r| r.ok())
        .collect();

    Ok(departments)
}

impl Database {
    /// Create a department. New departments start unassigned with no
    /// cleaning history, ready for their first assignment.
    pub fn create_department(&self, input: NewDepartment) -> Result<Department> {
        let now = now_ms();
        let department = Department {
            id: Uuid::now_v7().to_string(),
            company_id: input.company_id,
            condominium_id: input.condominium_id,
            name: input.name,
            address: input.address,
            access_code: input.access_code,
            rooms: input.rooms,
            beds: input.beds,
            status: WorkStatus::Completed,
            assigned_to: None,
            priority: Priority::Normal,
            last_cleaned_at: None,
            created_at: now,
            updated_at: now,
        };

        let (department, seq) = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            super::directory::get_company_internal(&tx, &department.company_id)?
                .ok_or_else(|| CoreError::CompanyNotFound(department.company_id.clone()))?;

            tx.execute(
                "INSERT INTO departments (id, company_id, condominium_id, name, address,
                 access_code, rooms, beds, status, assigned_to, priority, last_cleaned_at,
                 created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    department.id,
                    department.company_id,
                    department.condominium_id,
                    department.name,
                    department.address,
                    department.access_code,
                    department.rooms,
                    department.beds,
                    department.status.as_str(),
                    department.assigned_to,
                    department.priority.as_str(),
                    department.last_cleaned_at,
                    department.created_at,
                    department.updated_at,
                ],
            )?;

            let seq = changes::journal_department(&tx, ChangeOp::Insert, &department)?;
            tx.commit()?;

            Ok((department, seq))
        })?;

        self.signal_changes(seq);
        Ok(department)
    }

    pub fn get_department(&self, id: &str) -> Result<Option<Department>> {
        self.with_conn(|conn| get_department_internal(conn, id))
    }

    /// List a company's departments, optionally narrowed to one condominium.
    pub fn list_departments(
        &self,
        company_id: &str,
        condominium_id: Option<&str>,
    ) -> Result<Vec<Department>> {
        self.with_conn(|conn| {
            let departments = list_departments_internal(conn, company_id)?;

            Ok(match condominium_id {
                Some(condo) => departments
                    .into_iter()
                    .filter(|d| d.condominium_id.as_deref() == Some(condo))
                    .collect(),
                None => departments,
            })
        })
    }

    /// Update descriptive fields. Operational fields (status, assignee,
    /// priority) are only ever written by the transition operations.
    pub fn update_department_details(
        &self,
        id: &str,
        patch: DepartmentPatch,
    ) -> Result<Department> {
        let now = now_ms();

        let (department, seq) = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let current = get_department_internal(&tx, id)?
                .ok_or_else(|| CoreError::DepartmentNotFound(id.to_string()))?;

            let department = Department {
                name: patch.name.unwrap_or(current.name),
                address: patch.address.or(current.address),
                access_code: patch.access_code.or(current.access_code),
                condominium_id: patch.condominium_id.or(current.condominium_id),
                rooms: patch.rooms.unwrap_or(current.rooms),
                beds: patch.beds.unwrap_or(current.beds),
                updated_at: now,
                ..current
            };

            tx.execute(
                "UPDATE departments SET name = ?1, address = ?2, access_code = ?3,
                 condominium_id = ?4, rooms = ?5, beds = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    department.name,
                    department.address,
                    department.access_code,
                    department.condominium_id,
                    department.rooms,
                    department.beds,
                    department.updated_at,
                    department.id,
                ],
            )?;

            let seq = changes::journal_department(&tx, ChangeOp::Update, &department)?;
            tx.commit()?;

            Ok((department, seq))
        })?;

        self.signal_changes(seq);
        Ok(department)
    }

    /// Delete a department and its task history. Refused while an active
    /// task references it.
    pub fn delete_department(&self, id: &str) -> Result<()> {
        let seq = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let department = get_department_internal(&tx, id)?
                .ok_or_else(|| CoreError::DepartmentNotFound(id.to_string()))?;

            if super::ops::active_task_internal(&tx, id)?.is_some() {
                return Err(CoreError::DepartmentHasActiveTask(id.to_string()).into());
            }

            let task_ids: Vec<String> = {
                let mut stmt = tx.prepare("SELECT id FROM tasks WHERE department_id = ?1")?;
                let ids = stmt
                    .query_map(params![id], |row| row.get::<_, String>(0))?
                    .filter_map(|r| r.ok())
                    .collect();
                ids
            };

            // FK cascade removes the task rows with the department.
            tx.execute("DELETE FROM departments WHERE id = ?1", params![id])?;

            for task_id in &task_ids {
                changes::journal_delete(&tx, &department.company_id, ChangeTable::Tasks, task_id)?;
            }
            let seq = changes::journal_delete(
                &tx,
                &department.company_id,
                ChangeTable::Departments,
                id,
            )?;
            tx.commit()?;

            Ok(seq)
        })?;

        self.signal_changes(seq);
        Ok(())
    }
}
