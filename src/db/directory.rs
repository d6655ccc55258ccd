//! Tenant directory: companies, condominiums, and employees.
//!
//! Reference entities only; these rows are looked up to validate
//! assignments but are not part of the synced projection.

use super::{now_ms, Database};
use crate::error::CoreError;
use crate::types::{Company, Condominium, Employee};
use anyhow::Result;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

fn parse_company_row(row: &Row) -> rusqlite::Result<Company> {
    Ok(Company {
        id: row.get("id")?,
        name: row.get("name")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_condominium_row(row: &Row) -> rusqlite::Result<Condominium> {
    Ok(Condominium {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        name: row.get("name")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_employee_row(row: &Row) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        name: row.get("name")?,
        role: row.get("role")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn get_company_internal(conn: &Connection, id: &str) -> Result<Option<Company>> {
    let mut stmt = conn.prepare("SELECT id, name, created_at FROM companies WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], parse_company_row)?;

    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub(crate) fn get_employee_internal(conn: &Connection, id: &str) -> Result<Option<Employee>> {
    let mut stmt = conn
        .prepare("SELECT id, company_id, name, role, created_at FROM employees WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], parse_employee_row)?;

    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

impl Database {
    /// Create a company (tenant).
    pub fn create_company(&self, name: &str) -> Result<Company> {
        let company = Company {
            id: Uuid::now_v7().to_string(),
            name: name.to_string(),
            created_at: now_ms(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO companies (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![company.id, company.name, company.created_at],
            )?;

            Ok(())
        })?;

        Ok(company)
    }

    pub fn get_company(&self, id: &str) -> Result<Option<Company>> {
        self.with_conn(|conn| get_company_internal(conn, id))
    }

    /// Create a condominium inside a company.
    pub fn create_condominium(&self, company_id: &str, name: &str) -> Result<Condominium> {
        let condominium = Condominium {
            id: Uuid::now_v7().to_string(),
            company_id: company_id.to_string(),
            name: name.to_string(),
            created_at: now_ms(),
        };

        self.with_conn(|conn| {
            get_company_internal(conn, company_id)?
                .ok_or_else(|| CoreError::CompanyNotFound(company_id.to_string()))?;

            conn.execute(
                "INSERT INTO condominiums (id, company_id, name, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    condominium.id,
                    condominium.company_id,
                    condominium.name,
                    condominium.created_at,
                ],
            )?;

            Ok(())
        })?;

        Ok(condominium)
    }

    /// Create an employee inside a company.
    pub fn create_employee(&self, company_id: &str, name: &str, role: &str) -> Result<Employee> {
        let employee = Employee {
            id: Uuid::now_v7().to_string(),
            company_id: company_id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            created_at: now_ms(),
        };

        self.with_conn(|conn| {
            get_company_internal(conn, company_id)?
                .ok_or_else(|| CoreError::CompanyNotFound(company_id.to_string()))?;

            conn.execute(
                "INSERT INTO employees (id, company_id, name, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    employee.id,
                    employee.company_id,
                    employee.name,
                    employee.role,
                    employee.created_at,
                ],
            )?;

            Ok(())
        })?;

        Ok(employee)
    }

    pub fn get_employee(&self, id: &str) -> Result<Option<Employee>> {
        self.with_conn(|conn| get_employee_internal(conn, id))
    }

    pub fn list_employees(&self, company_id: &str) -> Result<Vec<Employee>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, company_id, name, role, created_at
                 FROM employees WHERE company_id = ?1
                 ORDER BY created_at ASC",
            )?;

            let employees = stmt
                .query_map(params![company_id], parse_employee_row)?
                .filter_map(|r| r.ok())
                .collect();

            Ok(employees)
        })
    }
}
