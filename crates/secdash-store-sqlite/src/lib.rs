use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use secdash_core::{Dataset, Incident, OpOutcome, Table, Ticket, User};

pub mod ingest;

const CREATE_TABLES_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  username TEXT NOT NULL UNIQUE,
  password_hash TEXT NOT NULL,
  role TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cyber_incidents (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  incident_id TEXT NOT NULL UNIQUE,
  incident_type TEXT,
  severity TEXT,
  status TEXT,
  reported_at TEXT,
  resolved_at TEXT,
  assigned_to TEXT,
  description TEXT
);

CREATE TABLE IF NOT EXISTS datasets_metadata (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  dataset_name TEXT NOT NULL UNIQUE,
  owner TEXT,
  source_system TEXT,
  size_mb REAL,
  row_count INTEGER,
  created_at TEXT
);

CREATE TABLE IF NOT EXISTS it_tickets (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ticket_id TEXT NOT NULL UNIQUE,
  category TEXT,
  priority TEXT,
  status TEXT,
  opened_at TEXT,
  closed_at TEXT,
  assigned_to TEXT
);
";

/// SQLite-backed record store for the four dashboard tables.
///
/// Owns the one connection the process uses; every helper that needs a
/// cursor or a commit goes through this type.
pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    /// Open the dashboard database and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Create the four dashboard tables if absent. Idempotent; safe to call
    /// on every startup. Never drops or alters existing tables.
    ///
    /// # Errors
    /// Returns an error when the DDL batch fails.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_TABLES_SQL).context("failed to create dashboard tables")
    }

    // ---------------------------------------------------------------
    // users
    // ---------------------------------------------------------------

    /// Insert one user row; a taken username comes back as a rejected
    /// outcome, not an error.
    ///
    /// # Errors
    /// Returns an error on any SQLite failure other than the uniqueness
    /// violation.
    pub fn create_user(&self, user: &User) -> Result<OpOutcome> {
        let result = self.conn.execute(
            "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
            params![user.username, user.password_hash, user.role],
        );

        match result {
            Ok(_) => Ok(OpOutcome::done(format!("User '{}' created.", user.username))),
            Err(err) if is_unique_violation(&err) => Ok(OpOutcome::rejected(format!(
                "Username '{}' already exists.",
                user.username
            ))),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT username, password_hash, role FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        username: row.get(0)?,
                        password_hash: row.get(1)?,
                        role: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // ---------------------------------------------------------------
    // cyber_incidents
    // ---------------------------------------------------------------

    /// # Errors
    /// Returns an error when the existence query fails.
    pub fn incident_exists(&self, incident_id: &str) -> Result<bool> {
        self.key_exists(Table::CyberIncidents, incident_id)
    }

    /// Insert one incident row; a duplicate `incident_id` comes back as a
    /// rejected outcome.
    ///
    /// # Errors
    /// Returns an error on any SQLite failure other than the uniqueness
    /// violation.
    pub fn create_incident(&self, incident: &Incident) -> Result<OpOutcome> {
        let result = self.conn.execute(
            "INSERT INTO cyber_incidents
             (incident_id, incident_type, severity, status, reported_at, resolved_at, assigned_to, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                incident.incident_id,
                incident.incident_type,
                incident.severity,
                incident.status,
                incident.reported_at,
                incident.resolved_at,
                incident.assigned_to,
                incident.description,
            ],
        );

        match result {
            Ok(_) => {
                Ok(OpOutcome::done(format!("Incident '{}' created.", incident.incident_id)))
            }
            Err(err) if is_unique_violation(&err) => Ok(OpOutcome::rejected(format!(
                "Incident ID '{}' already exists.",
                incident.incident_id
            ))),
            Err(err) => Err(err).context("failed to insert incident"),
        }
    }

    /// Full scan of `cyber_incidents` in storage order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn all_incidents(&self) -> Result<Vec<Incident>> {
        let mut stmt = self.conn.prepare(
            "SELECT incident_id, incident_type, severity, status, reported_at, resolved_at,
                    assigned_to, description
             FROM cyber_incidents
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Incident {
                incident_id: row.get(0)?,
                incident_type: row.get(1)?,
                severity: row.get(2)?,
                status: row.get(3)?,
                reported_at: row.get(4)?,
                resolved_at: row.get(5)?,
                assigned_to: row.get(6)?,
                description: row.get(7)?,
            })
        })?;

        let mut incidents = Vec::new();
        for row in rows {
            incidents.push(row?);
        }
        Ok(incidents)
    }

    /// Update the status of one incident by natural key.
    ///
    /// # Errors
    /// Returns an error when the update statement fails.
    pub fn update_incident_status(&self, incident_id: &str, new_status: &str) -> Result<OpOutcome> {
        let changed = self
            .conn
            .execute(
                "UPDATE cyber_incidents SET status = ?1 WHERE incident_id = ?2",
                params![new_status, incident_id],
            )
            .context("failed to update incident status")?;

        if changed == 0 {
            Ok(OpOutcome::rejected(format!("No incident found with ID '{incident_id}'.")))
        } else {
            Ok(OpOutcome::done(format!("Incident '{incident_id}' updated.")))
        }
    }

    /// # Errors
    /// Returns an error when the delete statement fails.
    pub fn delete_incident(&self, incident_id: &str) -> Result<OpOutcome> {
        let changed = self
            .conn
            .execute("DELETE FROM cyber_incidents WHERE incident_id = ?1", params![incident_id])
            .context("failed to delete incident")?;

        if changed == 0 {
            Ok(OpOutcome::rejected(format!("No incident found with ID '{incident_id}'.")))
        } else {
            Ok(OpOutcome::done(format!("Incident '{incident_id}' deleted.")))
        }
    }

    // ---------------------------------------------------------------
    // datasets_metadata
    // ---------------------------------------------------------------

    /// # Errors
    /// Returns an error when the existence query fails.
    pub fn dataset_exists(&self, dataset_name: &str) -> Result<bool> {
        self.key_exists(Table::DatasetsMetadata, dataset_name)
    }

    /// Insert one dataset row; a duplicate `dataset_name` comes back as a
    /// rejected outcome.
    ///
    /// # Errors
    /// Returns an error on any SQLite failure other than the uniqueness
    /// violation.
    pub fn create_dataset(&self, dataset: &Dataset) -> Result<OpOutcome> {
        let result = self.conn.execute(
            "INSERT INTO datasets_metadata
             (dataset_name, owner, source_system, size_mb, row_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                dataset.dataset_name,
                dataset.owner,
                dataset.source_system,
                dataset.size_mb,
                dataset.row_count,
                dataset.created_at,
            ],
        );

        match result {
            Ok(_) => {
                Ok(OpOutcome::done(format!("Dataset '{}' created.", dataset.dataset_name)))
            }
            Err(err) if is_unique_violation(&err) => Ok(OpOutcome::rejected(format!(
                "Dataset name '{}' already exists.",
                dataset.dataset_name
            ))),
            Err(err) => Err(err).context("failed to insert dataset"),
        }
    }

    /// Full scan of `datasets_metadata` in storage order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn all_datasets(&self) -> Result<Vec<Dataset>> {
        let mut stmt = self.conn.prepare(
            "SELECT dataset_name, owner, source_system, size_mb, row_count, created_at
             FROM datasets_metadata
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Dataset {
                dataset_name: row.get(0)?,
                owner: row.get(1)?,
                source_system: row.get(2)?,
                size_mb: row.get(3)?,
                row_count: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;

        let mut datasets = Vec::new();
        for row in rows {
            datasets.push(row?);
        }
        Ok(datasets)
    }

    /// Reassign one dataset to a new owner by natural key.
    ///
    /// # Errors
    /// Returns an error when the update statement fails.
    pub fn update_dataset_owner(&self, dataset_name: &str, new_owner: &str) -> Result<OpOutcome> {
        let changed = self
            .conn
            .execute(
                "UPDATE datasets_metadata SET owner = ?1 WHERE dataset_name = ?2",
                params![new_owner, dataset_name],
            )
            .context("failed to update dataset owner")?;

        if changed == 0 {
            Ok(OpOutcome::rejected(format!("No dataset found with name '{dataset_name}'.")))
        } else {
            Ok(OpOutcome::done(format!("Dataset '{dataset_name}' updated.")))
        }
    }

    /// # Errors
    /// Returns an error when the delete statement fails.
    pub fn delete_dataset(&self, dataset_name: &str) -> Result<OpOutcome> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM datasets_metadata WHERE dataset_name = ?1",
                params![dataset_name],
            )
            .context("failed to delete dataset")?;

        if changed == 0 {
            Ok(OpOutcome::rejected(format!("No dataset found with name '{dataset_name}'.")))
        } else {
            Ok(OpOutcome::done(format!("Dataset '{dataset_name}' deleted.")))
        }
    }

    // ---------------------------------------------------------------
    // it_tickets
    // ---------------------------------------------------------------

    /// # Errors
    /// Returns an error when the existence query fails.
    pub fn ticket_exists(&self, ticket_id: &str) -> Result<bool> {
        self.key_exists(Table::ItTickets, ticket_id)
    }

    /// Insert one ticket row; a duplicate `ticket_id` comes back as a
    /// rejected outcome.
    ///
    /// # Errors
    /// Returns an error on any SQLite failure other than the uniqueness
    /// violation.
    pub fn create_ticket(&self, ticket: &Ticket) -> Result<OpOutcome> {
        let result = self.conn.execute(
            "INSERT INTO it_tickets
             (ticket_id, category, priority, status, opened_at, closed_at, assigned_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ticket.ticket_id,
                ticket.category,
                ticket.priority,
                ticket.status,
                ticket.opened_at,
                ticket.closed_at,
                ticket.assigned_to,
            ],
        );

        match result {
            Ok(_) => Ok(OpOutcome::done(format!("Ticket '{}' created.", ticket.ticket_id))),
            Err(err) if is_unique_violation(&err) => Ok(OpOutcome::rejected(format!(
                "Ticket ID '{}' already exists.",
                ticket.ticket_id
            ))),
            Err(err) => Err(err).context("failed to insert ticket"),
        }
    }

    /// Full scan of `it_tickets` in storage order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn all_tickets(&self) -> Result<Vec<Ticket>> {
        let mut stmt = self.conn.prepare(
            "SELECT ticket_id, category, priority, status, opened_at, closed_at, assigned_to
             FROM it_tickets
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Ticket {
                ticket_id: row.get(0)?,
                category: row.get(1)?,
                priority: row.get(2)?,
                status: row.get(3)?,
                opened_at: row.get(4)?,
                closed_at: row.get(5)?,
                assigned_to: row.get(6)?,
            })
        })?;

        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(row?);
        }
        Ok(tickets)
    }

    /// Update the status of one ticket by natural key.
    ///
    /// # Errors
    /// Returns an error when the update statement fails.
    pub fn update_ticket_status(&self, ticket_id: &str, new_status: &str) -> Result<OpOutcome> {
        let changed = self
            .conn
            .execute(
                "UPDATE it_tickets SET status = ?1 WHERE ticket_id = ?2",
                params![new_status, ticket_id],
            )
            .context("failed to update ticket status")?;

        if changed == 0 {
            Ok(OpOutcome::rejected(format!("No ticket found with ID '{ticket_id}'.")))
        } else {
            Ok(OpOutcome::done(format!("Ticket '{ticket_id}' updated.")))
        }
    }

    /// # Errors
    /// Returns an error when the delete statement fails.
    pub fn delete_ticket(&self, ticket_id: &str) -> Result<OpOutcome> {
        let changed = self
            .conn
            .execute("DELETE FROM it_tickets WHERE ticket_id = ?1", params![ticket_id])
            .context("failed to delete ticket")?;

        if changed == 0 {
            Ok(OpOutcome::rejected(format!("No ticket found with ID '{ticket_id}'.")))
        } else {
            Ok(OpOutcome::done(format!("Ticket '{ticket_id}' deleted.")))
        }
    }

    fn key_exists(&self, table: Table, key: &str) -> Result<bool> {
        let query = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
            table.as_str(),
            table.natural_key()
        );
        let exists = self
            .conn
            .query_row(&query, params![key], |row| row.get::<_, i64>(0))
            .with_context(|| format!("failed to check key in {}", table.as_str()))?;
        Ok(exists == 1)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
