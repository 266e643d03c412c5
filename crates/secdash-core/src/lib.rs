use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("unknown table: {0}")]
    UnknownTable(String),
}

/// Descriptor for one dashboard table: its name, business columns, unique
/// natural key, and batch-load configuration.
///
/// The batch key is configuration, not an intrinsic property of the table:
/// a table without one (`users`) is loaded in degraded append-everything
/// mode and never takes the reconciliation path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    CyberIncidents,
    DatasetsMetadata,
    ItTickets,
}

impl Table {
    /// Tables populated by the batch loader, in loading order.
    pub const BATCH_TABLES: [Self; 3] = [Self::CyberIncidents, Self::DatasetsMetadata, Self::ItTickets];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::CyberIncidents => "cyber_incidents",
            Self::DatasetsMetadata => "datasets_metadata",
            Self::ItTickets => "it_tickets",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "users" => Some(Self::Users),
            "cyber_incidents" => Some(Self::CyberIncidents),
            "datasets_metadata" => Some(Self::DatasetsMetadata),
            "it_tickets" => Some(Self::ItTickets),
            _ => None,
        }
    }

    /// Business columns in declared order. The surrogate `id` column is not
    /// part of the business schema and is never listed here.
    #[must_use]
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Users => &["username", "password_hash", "role"],
            Self::CyberIncidents => &[
                "incident_id",
                "incident_type",
                "severity",
                "status",
                "reported_at",
                "resolved_at",
                "assigned_to",
                "description",
            ],
            Self::DatasetsMetadata => {
                &["dataset_name", "owner", "source_system", "size_mb", "row_count", "created_at"]
            }
            Self::ItTickets => &[
                "ticket_id",
                "category",
                "priority",
                "status",
                "opened_at",
                "closed_at",
                "assigned_to",
            ],
        }
    }

    /// The column enforced `NOT NULL UNIQUE` in the schema.
    #[must_use]
    pub fn natural_key(self) -> &'static str {
        match self {
            Self::Users => "username",
            Self::CyberIncidents => "incident_id",
            Self::DatasetsMetadata => "dataset_name",
            Self::ItTickets => "ticket_id",
        }
    }

    /// Key column the batch reconciler pivots on. `None` routes the table to
    /// the degraded append-everything path.
    #[must_use]
    pub fn batch_key(self) -> Option<&'static str> {
        match self {
            Self::Users => None,
            Self::CyberIncidents => Some("incident_id"),
            Self::DatasetsMetadata => Some("dataset_name"),
            Self::ItTickets => Some("ticket_id"),
        }
    }

    /// File name the batch loader expects under the data directory.
    #[must_use]
    pub fn batch_file(self) -> String {
        format!("{}.csv", self.as_str())
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Table {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| CoreError::UnknownTable(value.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Incident {
    pub incident_id: String,
    pub incident_type: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    pub reported_at: Option<String>,
    pub resolved_at: Option<String>,
    pub assigned_to: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub dataset_name: String,
    pub owner: Option<String>,
    pub source_system: Option<String>,
    pub size_mb: Option<f64>,
    pub row_count: Option<i64>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub ticket_id: String,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub opened_at: Option<String>,
    pub closed_at: Option<String>,
    pub assigned_to: Option<String>,
}

/// Structured result of a single-row store operation. Expected conflicts
/// (duplicate key, nothing matched) come back through this type, never as
/// errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpOutcome {
    pub ok: bool,
    pub message: String,
}

impl OpOutcome {
    #[must_use]
    pub fn done(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

/// Per-table outcome of one batch reconciliation.
///
/// `inserted` and `skipped_existing` are the contract counts; the dropped
/// counts are diagnostics and excluded from aggregate totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableLoadReport {
    pub table: Table,
    pub inserted: usize,
    pub skipped_existing: usize,
    pub dropped_missing_key: usize,
    pub dropped_duplicate_key: usize,
    pub unkeyed_append: bool,
}

impl TableLoadReport {
    #[must_use]
    pub fn empty(table: Table) -> Self {
        Self {
            table,
            inserted: 0,
            skipped_existing: 0,
            dropped_missing_key: 0,
            dropped_duplicate_key: 0,
            unkeyed_append: false,
        }
    }
}

/// Aggregate of one `load_all` run across the batch tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadSummary {
    pub tables: Vec<TableLoadReport>,
    pub total_inserted: usize,
    pub total_skipped: usize,
}

impl LoadSummary {
    pub fn push(&mut self, report: TableLoadReport) {
        self.total_inserted += report.inserted;
        self.total_skipped += report.skipped_existing;
        self.tables.push(report);
    }
}
