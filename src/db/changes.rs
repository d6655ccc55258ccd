//! Row-level change journal backing the durable feed.
//!
//! Appends happen inside the same transaction as the entity write they
//! describe; a rolled-back operation journals nothing. Subscribers tail by
//! `(company_id, seq)` cursor, which gives at-least-once delivery.

use super::{now_ms, Database};
use crate::types::{ChangeOp, ChangeRecord, ChangeTable, Department, Task};
use anyhow::Result;
use rusqlite::{params, Connection, Row};

pub(crate) fn journal_department(
    conn: &Connection,
    op: ChangeOp,
    department: &Department,
) -> Result<i64> {
    append(
        conn,
        &department.company_id,
        ChangeTable::Departments,
        op,
        &department.id,
        Some(serde_json::to_string(department)?),
    )
}

pub(crate) fn journal_task(conn: &Connection, op: ChangeOp, task: &Task) -> Result<i64> {
    append(
        conn,
        &task.company_id,
        ChangeTable::Tasks,
        op,
        &task.id,
        Some(serde_json::to_string(task)?),
    )
}

pub(crate) fn journal_delete(
    conn: &Connection,
    company_id: &str,
    tbl: ChangeTable,
    row_id: &str,
) -> Result<i64> {
    append(conn, company_id, tbl, ChangeOp::Delete, row_id, None)
}

fn append(
    conn: &Connection,
    company_id: &str,
    tbl: ChangeTable,
    op: ChangeOp,
    row_id: &str,
    row: Option<String>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO changes (company_id, tbl, op, row_id, row, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![company_id, tbl.as_str(), op.as_str(), row_id, row, now_ms()],
    )?;

    Ok(conn.last_insert_rowid())
}

pub(crate) fn latest_seq_internal(conn: &Connection) -> Result<i64> {
    let seq: i64 = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM changes", [], |row| {
        row.get(0)
    })?;

    Ok(seq)
}

fn parse_change_row(row: &Row) -> rusqlite::Result<ChangeRecord> {
    let seq: i64 = row.get("seq")?;
    let company_id: String = row.get("company_id")?;
    let tbl: String = row.get("tbl")?;
    let op: String = row.get("op")?;
    let row_id: String = row.get("row_id")?;
    let row_json: Option<String> = row.get("row")?;
    let created_at: i64 = row.get("created_at")?;

    Ok(ChangeRecord {
        seq,
        company_id,
        tbl: ChangeTable::from_str(&tbl).unwrap_or(ChangeTable::Departments),
        op: ChangeOp::from_str(&op).unwrap_or(ChangeOp::Update),
        row_id,
        row: row_json.and_then(|s| serde_json::from_str(&s).ok()),
        created_at,
    })
}

impl Database {
    /// Read journal rows for a tenant past the given cursor, oldest first.
    pub fn changes_since(
        &self,
        company_id: &str,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<ChangeRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, company_id, tbl, op, row_id, row, created_at
                 FROM changes
                 WHERE company_id = ?1 AND seq > ?2
                 ORDER BY seq ASC
                 LIMIT ?3",
            )?;

            let records = stmt
                .query_map(params![company_id, after_seq, limit], parse_change_row)?
                .filter_map(|r| r.ok())
                .collect();

            Ok(records)
        })
    }

    /// Highest journal sequence across all tenants.
    pub fn latest_seq(&self) -> Result<i64> {
        self.with_conn(latest_seq_internal)
    }

    /// Delete journal rows older than the cutoff. Subscribers whose cursor
    /// predates retention re-bootstrap from a snapshot. The newest row is
    /// always retained so snapshot positions never move backwards.
    pub fn prune_changes(&self, cutoff_ms: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM changes
                 WHERE created_at < ?1
                   AND seq < (SELECT COALESCE(MAX(seq), 0) FROM changes)",
                params![cutoff_ms],
            )?;

            Ok(deleted)
        })
    }
}
