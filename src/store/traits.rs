//! Unified `Database` trait: records, the seen-ledger, and stored configuration.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::store::schema::Field;

/// State of one stage-owned field on a record.
///
/// `Pending` is the only state that makes a record eligible for the stage
/// that owns the field. Everything else counts as handled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Cell {
    /// Nothing written yet.
    #[default]
    Pending,
    /// A stage has claimed the record and not finished.
    InProgress,
    /// Completed with a value (text or an artifact reference).
    Done(String),
    /// Extraction ran and found nothing. Terminal.
    NotFound,
    /// The stage failed for this record.
    Failed(String),
}

impl Cell {
    pub fn is_pending(&self) -> bool {
        matches!(self, Cell::Pending)
    }

    /// The completed value, if any.
    pub fn done(&self) -> Option<&str> {
        match self {
            Cell::Done(v) => Some(v),
            _ => None,
        }
    }

    /// Storage state tag. `Pending` is never stored.
    pub fn state_str(&self) -> &'static str {
        match self {
            Cell::Pending => "pending",
            Cell::InProgress => "in_progress",
            Cell::Done(_) => "done",
            Cell::NotFound => "not_found",
            Cell::Failed(_) => "failed",
        }
    }

    /// Stored value text for this state.
    pub fn value_str(&self) -> &str {
        match self {
            Cell::Done(v) | Cell::Failed(v) => v,
            _ => "",
        }
    }

    /// Rebuild a cell from its stored state and value.
    pub fn from_parts(state: &str, value: String) -> Self {
        match state {
            "in_progress" => Cell::InProgress,
            "done" => Cell::Done(value),
            "not_found" => Cell::NotFound,
            "failed" => Cell::Failed(value),
            _ => Cell::Pending,
        }
    }
}

/// A record to be appended by ingestion.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub identifier: String,
    pub name: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub source_link: String,
    pub sender: Option<String>,
}

/// A stored resume record with its stage-owned cells.
#[derive(Debug, Clone)]
pub struct Record {
    /// Position in append order. Stable for the life of the record.
    pub row: i64,
    pub identifier: String,
    pub name: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub source_link: String,
    pub sender: Option<String>,
    pub cells: HashMap<Field, Cell>,
}

impl Record {
    /// The current cell for `field` (`Pending` if never written).
    pub fn cell(&self, field: Field) -> &Cell {
        static PENDING: Cell = Cell::Pending;
        self.cells.get(&field).unwrap_or(&PENDING)
    }
}

/// Backend-agnostic persistence for the pipeline.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Records ─────────────────────────────────────────────────────

    /// All records in append order.
    async fn read_records(&self) -> Result<Vec<Record>, DatabaseError>;

    /// Append records, skipping identifiers that already exist.
    /// Returns the number actually appended.
    async fn append_records(&self, records: &[NewRecord]) -> Result<usize, DatabaseError>;

    /// Write one cell. Writing `Cell::Pending` clears it.
    async fn set_cell(&self, row: i64, field: Field, cell: &Cell) -> Result<(), DatabaseError>;

    /// Make sure `field` is registered, returning its position.
    async fn ensure_field(&self, field: Field) -> Result<usize, DatabaseError>;

    // ── Seen-ledger ─────────────────────────────────────────────────

    /// Every identifier ever ingested (minus operator removals).
    async fn seen_identifiers(&self) -> Result<HashSet<String>, DatabaseError>;

    /// Merge identifiers into the ledger in a single transaction.
    async fn merge_seen(&self, identifiers: &[String]) -> Result<(), DatabaseError>;

    /// Remove one identifier. Returns whether it was present.
    async fn remove_seen(&self, identifier: &str) -> Result<bool, DatabaseError>;

    /// Drop every ledger entry. Returns the number removed.
    async fn clear_seen(&self) -> Result<usize, DatabaseError>;

    // ── Config and prompts ──────────────────────────────────────────

    async fn load_config(&self) -> Result<HashMap<String, String>, DatabaseError>;

    async fn put_config(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    async fn load_prompts(&self) -> Result<HashMap<String, String>, DatabaseError>;

    async fn put_prompt(&self, key: &str, value: &str) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_parts_round_trip() {
        let cells = [
            Cell::InProgress,
            Cell::Done("artifact://abc".into()),
            Cell::NotFound,
            Cell::Failed("boom".into()),
        ];
        for cell in cells {
            let rebuilt = Cell::from_parts(cell.state_str(), cell.value_str().to_string());
            assert_eq!(rebuilt, cell);
        }
    }

    #[test]
    fn unknown_state_reads_as_pending() {
        assert_eq!(Cell::from_parts("weird", "x".into()), Cell::Pending);
    }

    #[test]
    fn missing_cell_is_pending() {
        let record = Record {
            row: 1,
            identifier: "42".into(),
            name: "n".into(),
            subject: "s".into(),
            received_at: Utc::now(),
            source_link: String::new(),
            sender: None,
            cells: HashMap::new(),
        };
        assert!(record.cell(Field::SentAt).is_pending());
        assert_eq!(record.cell(Field::SentAt).done(), None);
    }
}
