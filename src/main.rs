//! Cleaning Operations Sync CLI
//!
//! Thin operational shell over the library: seed demo data, run the
//! transition operations, and inspect or tail the change journal.

use anyhow::Result;
use clap::{Parser, Subcommand};
use cleanops::config::Config;
use cleanops::db::departments::NewDepartment;
use cleanops::db::{Database, now_ms};
use cleanops::error::CoreError;
use cleanops::feed::start_feed;
use cleanops::types::{Priority, WorkStatus};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Cleaning operations store and sync tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    log: String,

    #[command(subcommand)]
    command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Command {
    /// Create a demo company with employees and departments
    Seed {
        /// Company name
        #[arg(default_value = "Demo Cleaning Co")]
        name: String,
    },

    /// Assign an employee to a department
    Assign {
        department: String,
        employee: String,

        /// Assign at high priority
        #[arg(long)]
        high: bool,
    },

    /// Move a task (and its department) to a new status
    Advance {
        task: String,

        /// Target status: pending, in_progress, completed
        status: String,
    },

    /// Flip a department's cleaning priority
    Toggle { department: String },

    /// Print a company's departments, tasks, and journal position
    List { company: String },

    /// Follow a company's change journal, printing records as they commit
    Tail {
        company: String,

        /// Journal position to resume after (default: current end)
        #[arg(long)]
        from: Option<i64>,
    },

    /// Delete journal records older than the retention window
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let mut config = Config::discover(cli.config.as_deref())?;
    if let Some(db_path) = &cli.database {
        config.db_path = db_path.clone();
    }
    config.ensure_db_dir()?;

    let db = Database::open(&config.db_path)?;

    match cli.command {
        Command::Seed { name } => run_seed(&db, &name)?,
        Command::Assign {
            department,
            employee,
            high,
        } => {
            let priority = if high { Priority::High } else { Priority::Normal };
            let assignment = db
                .assign(&department, &employee, priority)
                .map_err(CoreError::from)?;
            print_json(&assignment)?;
        }
        Command::Advance { task, status } => {
            let status = WorkStatus::from_str(&status).ok_or_else(|| {
                CoreError::invalid_value("status", format!("unknown status: {status}"))
            })?;
            let assignment = db.advance_status(&task, status).map_err(CoreError::from)?;
            print_json(&assignment)?;
        }
        Command::Toggle { department } => {
            let current = db
                .get_department(&department)
                .map_err(CoreError::from)?
                .ok_or_else(|| CoreError::DepartmentNotFound(department.clone()))?
                .priority;
            let outcome = db
                .toggle_priority(&department, current)
                .map_err(CoreError::from)?;
            print_json(&outcome)?;
        }
        Command::List { company } => {
            let snapshot = db.snapshot(&company).map_err(CoreError::from)?;
            print_json(&snapshot)?;
        }
        Command::Tail { company, from } => run_tail(db, &company, from, &config).await?,
        Command::Prune => {
            let cutoff = now_ms() - config.feed.retention_ms;
            let removed = db.prune_changes(cutoff).map_err(CoreError::from)?;
            println!("Pruned {removed} journal records");
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_seed(db: &Database, name: &str) -> Result<()> {
    let company = db.create_company(name)?;
    let north = db.create_condominium(&company.id, "North Tower")?;
    let south = db.create_condominium(&company.id, "South Tower")?;

    let mut employees = Vec::new();
    for (name, role) in [
        ("Alice", "cleaner"),
        ("Bruno", "cleaner"),
        ("Carla", "supervisor"),
    ] {
        employees.push(db.create_employee(&company.id, name, role)?);
    }

    let mut departments = Vec::new();
    for (name, condominium, rooms, beds) in [
        ("Suite 101", &north, 2_i64, 3_i64),
        ("Suite 102", &north, 1, 2),
        ("Penthouse A", &south, 4, 5),
        ("Studio B", &south, 1, 1),
    ] {
        departments.push(db.create_department(NewDepartment {
            company_id: company.id.clone(),
            condominium_id: Some(condominium.id.clone()),
            name: name.to_string(),
            rooms,
            beds,
            ..NewDepartment::default()
        })?);
    }

    print_json(&serde_json::json!({
        "company": company,
        "condominiums": [north, south],
        "employees": employees,
        "departments": departments,
    }))
}

async fn run_tail(db: Database, company_id: &str, from: Option<i64>, config: &Config) -> Result<()> {
    let from_seq = match from {
        Some(seq) => seq,
        None => db.latest_seq()?,
    };

    let (handle, mut rx) = start_feed(db, company_id.to_string(), from_seq, config.feed.clone());
    info!(company_id, from_seq, "tailing change journal, ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            record = rx.recv() => match record {
                Some(record) => println!("{}", serde_json::to_string(&record)?),
                None => break,
            },
        }
    }

    handle.shutdown();
    Ok(())
}
