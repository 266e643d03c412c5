//! CSV batch reconciliation for the dashboard tables.
//!
//! Merges an external batch of rows into one table without duplicating or
//! corrupting existing data. Malformed rows (missing key, in-batch duplicate,
//! key already stored) are excluded, counted, and logged, never fatal.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::params_from_iter;
use secdash_core::{LoadSummary, Table, TableLoadReport};

use crate::Database;

/// One parsed CSV row, aligned to the table's declared business columns.
/// Absent columns and empty fields are `None`.
type BatchRow = Vec<Option<String>>;

impl Database {
    /// Reconcile one CSV file into `table`.
    ///
    /// Rows with a missing batch key are dropped, in-batch duplicate keys
    /// keep the first occurrence in original order, and keys already present
    /// in the store are skipped by exact string comparison. Surviving rows
    /// are appended in order inside a single transaction. A table without a
    /// configured batch key degrades to appending every parsed row, loudly.
    ///
    /// A missing file is a no-op reported through the returned counts.
    ///
    /// # Errors
    /// Returns an error when the file cannot be parsed or the append
    /// transaction fails; per-row exclusions are never errors.
    pub fn load_csv(&mut self, path: &Path, table: Table) -> Result<TableLoadReport> {
        let mut report = TableLoadReport::empty(table);

        if !path.exists() {
            tracing::warn!("skipping {}: file not found", path.display());
            return Ok(report);
        }

        let mut rows = read_batch(path, table)?;

        let Some(pk) = table.batch_key() else {
            tracing::warn!(
                "{} has no batch key configured; appending all {} rows without de-duplication",
                table.as_str(),
                rows.len()
            );
            report.unkeyed_append = true;
            report.inserted = self.append_rows(table, &rows)?;
            return Ok(report);
        };
        let key_idx = column_index(table, pk);

        let before = rows.len();
        rows.retain(|row| row[key_idx].is_some());
        report.dropped_missing_key = before - rows.len();
        if report.dropped_missing_key > 0 {
            tracing::warn!(
                "{}: dropped {} rows with missing {pk}",
                table.as_str(),
                report.dropped_missing_key
            );
        }

        let mut seen = HashSet::new();
        let before = rows.len();
        rows.retain(|row| row[key_idx].as_deref().is_some_and(|key| seen.insert(key.to_string())));
        report.dropped_duplicate_key = before - rows.len();
        if report.dropped_duplicate_key > 0 {
            tracing::warn!(
                "{}: {} duplicate {pk} values inside the file were ignored",
                table.as_str(),
                report.dropped_duplicate_key
            );
        }

        let existing = self.existing_keys(table, pk)?;
        let before = rows.len();
        rows.retain(|row| row[key_idx].as_deref().is_some_and(|key| !existing.contains(key)));
        report.skipped_existing = before - rows.len();
        if report.skipped_existing > 0 {
            tracing::warn!(
                "{}: skipped {} rows because {pk} already exists in the store",
                table.as_str(),
                report.skipped_existing
            );
        }

        report.inserted = self.append_rows(table, &rows)?;
        if report.inserted > 0 {
            tracing::info!("loaded {} new rows into {}", report.inserted, table.as_str());
        } else {
            tracing::info!("no new rows to load into {}", table.as_str());
        }

        Ok(report)
    }

    /// Run the fixed batch-file mapping against `data_dir` and accumulate
    /// one aggregate summary across the batch tables.
    ///
    /// # Errors
    /// Returns an error when any individual table load fails hard; missing
    /// files and excluded rows do not.
    pub fn load_all(&mut self, data_dir: &Path) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();

        for table in Table::BATCH_TABLES {
            let path = data_dir.join(table.batch_file());
            let report = self.load_csv(&path, table)?;
            summary.push(report);
        }

        tracing::info!(
            "CSV load summary: inserted={}, skipped(existing)={}",
            summary.total_inserted,
            summary.total_skipped
        );
        Ok(summary)
    }

    /// Batch-key strings currently stored in `table`, NULLs ignored.
    fn existing_keys(&self, table: Table, pk: &str) -> Result<HashSet<String>> {
        let query = format!("SELECT {pk} FROM {}", table.as_str());
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([], |row| row.get::<_, Option<String>>(0))?;

        let mut keys = HashSet::new();
        for row in rows {
            if let Some(key) = row? {
                keys.insert(key);
            }
        }
        Ok(keys)
    }

    /// Append rows in order inside one transaction. Existing rows are never
    /// touched; there is no upsert.
    fn append_rows(&mut self, table: Table, rows: &[BatchRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let columns = table.columns();
        let placeholders =
            (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            table.as_str(),
            columns.join(", ")
        );

        let tx = self.conn.transaction().context("failed to start batch append transaction")?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter()))
                    .with_context(|| format!("failed to append row into {}", table.as_str()))?;
            }
        }
        tx.commit().context("failed to commit batch append")?;

        Ok(rows.len())
    }
}

/// Parse the file into rows aligned to the table's declared columns,
/// name-matched against the header in any order. Empty fields and columns
/// the file does not carry become `None`.
fn read_batch(path: &Path, table: Table) -> Result<Vec<BatchRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open batch file {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header row of {}", path.display()))?
        .clone();
    let positions: Vec<Option<usize>> = table
        .columns()
        .iter()
        .map(|column| headers.iter().position(|header| header == *column))
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.with_context(|| format!("failed to read row from {}", path.display()))?;
        let row = positions
            .iter()
            .map(|position| {
                position
                    .and_then(|index| record.get(index))
                    .filter(|value| !value.is_empty())
                    .map(ToString::to_string)
            })
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

fn column_index(table: Table, column: &str) -> usize {
    // Descriptor invariant: a configured batch key is always a declared column.
    table.columns().iter().position(|candidate| *candidate == column).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use secdash_core::Incident;
    use tempfile::TempDir;

    use super::*;

    fn open_store() -> Result<Database> {
        let db = Database::open(Path::new(":memory:"))?;
        db.ensure_schema()?;
        Ok(db)
    }

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> Result<PathBuf> {
        let path = dir.path().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    const INCIDENTS_CSV: &str = "\
incident_id,incident_type,severity,status,reported_at,resolved_at,assigned_to,description
INC-001,Phishing Email,High,Open,2025-01-06 09:15:00,,amir,Credential harvesting mail
INC-002,Malware,Critical,In Progress,2025-01-06 11:40:00,,lena,Endpoint beaconing detected
INC-003,Policy Violation,Low,Open,2025-01-07 08:05:00,,,USB device on guest laptop
";

    #[test]
    fn load_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_file(&dir, "cyber_incidents.csv", INCIDENTS_CSV)?;
        let mut db = open_store()?;

        let first = db.load_csv(&path, Table::CyberIncidents)?;
        assert_eq!(first.inserted, 3);
        assert_eq!(first.skipped_existing, 0);

        let second = db.load_csv(&path, Table::CyberIncidents)?;
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped_existing, 3);
        assert_eq!(db.all_incidents()?.len(), 3);
        Ok(())
    }

    #[test]
    fn intra_batch_duplicates_keep_first_occurrence() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_file(
            &dir,
            "cyber_incidents.csv",
            "incident_id,severity\nINC-001,High\nINC-001,Low\n",
        )?;
        let mut db = open_store()?;

        let report = db.load_csv(&path, Table::CyberIncidents)?;
        assert_eq!(report.inserted, 1);
        assert_eq!(report.dropped_duplicate_key, 1);
        assert_eq!(report.skipped_existing, 0);

        let incidents = db.all_incidents()?;
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].severity.as_deref(), Some("High"));
        Ok(())
    }

    #[test]
    fn null_key_rows_never_reach_the_store() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_file(
            &dir,
            "cyber_incidents.csv",
            "incident_id,severity\n,Critical\nINC-001,High\n",
        )?;
        let mut db = open_store()?;

        let report = db.load_csv(&path, Table::CyberIncidents)?;
        assert_eq!(report.inserted, 1);
        assert_eq!(report.dropped_missing_key, 1);

        let incidents = db.all_incidents()?;
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].incident_id, "INC-001");
        Ok(())
    }

    #[test]
    fn cross_store_comparison_is_exact_string() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_file(&dir, "cyber_incidents.csv", "incident_id,severity\n7.0,Low\n")?;
        let mut db = open_store()?;
        db.create_incident(&Incident { incident_id: "7".to_string(), ..Incident::default() })?;

        let report = db.load_csv(&path, Table::CyberIncidents)?;
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped_existing, 0);
        assert_eq!(db.all_incidents()?.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_file_is_a_counted_no_op() -> Result<()> {
        let dir = TempDir::new()?;
        let mut db = open_store()?;

        let report = db.load_csv(&dir.path().join("cyber_incidents.csv"), Table::CyberIncidents)?;
        assert_eq!(report, TableLoadReport::empty(Table::CyberIncidents));
        Ok(())
    }

    #[test]
    fn header_order_does_not_matter_and_unknown_columns_are_ignored() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_file(
            &dir,
            "cyber_incidents.csv",
            "severity,notes,incident_id\nHigh,scratch,INC-009\n",
        )?;
        let mut db = open_store()?;

        let report = db.load_csv(&path, Table::CyberIncidents)?;
        assert_eq!(report.inserted, 1);

        let incidents = db.all_incidents()?;
        assert_eq!(incidents[0].incident_id, "INC-009");
        assert_eq!(incidents[0].severity.as_deref(), Some("High"));
        assert_eq!(incidents[0].status, None);
        Ok(())
    }

    #[test]
    fn dataset_numeric_columns_round_trip_through_csv() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_file(
            &dir,
            "datasets_metadata.csv",
            "dataset_name,owner,source_system,size_mb,row_count,created_at\n\
             netflow_q1,ops,zeek,412.5,1204000,2025-01-02\n",
        )?;
        let mut db = open_store()?;

        let report = db.load_csv(&path, Table::DatasetsMetadata)?;
        assert_eq!(report.inserted, 1);

        let datasets = db.all_datasets()?;
        assert_eq!(datasets[0].size_mb, Some(412.5));
        assert_eq!(datasets[0].row_count, Some(1_204_000));
        Ok(())
    }

    #[test]
    fn unkeyed_table_appends_everything_and_flags_it() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_file(
            &dir,
            "users.csv",
            "username,password_hash,role\nadmin,YWJjMTIz,admin\nviewer,ZGVmNDU2,viewer\n",
        )?;
        let mut db = open_store()?;

        let report = db.load_csv(&path, Table::Users)?;
        assert!(report.unkeyed_append);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.dropped_missing_key, 0);
        assert!(db.user_by_username("admin")?.is_some());
        Ok(())
    }

    #[test]
    fn load_all_accumulates_across_tables_and_tolerates_missing_files() -> Result<()> {
        let dir = TempDir::new()?;
        write_file(&dir, "cyber_incidents.csv", INCIDENTS_CSV)?;
        write_file(
            &dir,
            "it_tickets.csv",
            "ticket_id,category,priority,status,opened_at,closed_at,assigned_to\n\
             TCK-100,Access,P2,Open,2025-01-03 10:00:00,,lena\n",
        )?;
        // no datasets_metadata.csv on purpose
        let mut db = open_store()?;

        let summary = db.load_all(dir.path())?;
        assert_eq!(summary.total_inserted, 4);
        assert_eq!(summary.total_skipped, 0);
        assert_eq!(summary.tables.len(), 3);

        let summary = db.load_all(dir.path())?;
        assert_eq!(summary.total_inserted, 0);
        assert_eq!(summary.total_skipped, 4);
        Ok(())
    }

    #[test]
    fn drop_counts_stay_out_of_the_aggregate_totals() -> Result<()> {
        let dir = TempDir::new()?;
        write_file(
            &dir,
            "cyber_incidents.csv",
            "incident_id,severity\n,Critical\nINC-001,High\nINC-001,Low\n",
        )?;
        let mut db = open_store()?;

        let summary = db.load_all(dir.path())?;
        assert_eq!(summary.total_inserted, 1);
        assert_eq!(summary.total_skipped, 0);
        assert_eq!(summary.tables[0].dropped_missing_key, 1);
        assert_eq!(summary.tables[0].dropped_duplicate_key, 1);
        Ok(())
    }
}
