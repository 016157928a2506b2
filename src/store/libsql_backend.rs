//! libSQL implementation of the `Database` trait.
//!
//! Supports local file and in-memory databases.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::schema::Field;
use crate::store::traits::{Cell, Database, NewRecord, Record};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self { conn };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self { conn };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn load_key_values(&self, table: &str) -> Result<HashMap<String, String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(&format!("SELECT key, value FROM {table}"), ())
            .await
            .map_err(|e| DatabaseError::Query(format!("load {table}: {e}")))?;

        let mut map = HashMap::new();
        while let Ok(Some(row)) = rows.next().await {
            let key: String = row.get(0).unwrap_or_default();
            let value: String = row.get(1).unwrap_or_default();
            map.insert(key, value);
        }
        Ok(map)
    }

    async fn put_key_value(&self, table: &str, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO {table} (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"
                ),
                params![key, value, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put {table}: {e}")))?;
        debug!(table, key, "Stored key");
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to a Record without cells.
///
/// Column order matches RECORD_COLUMNS:
/// 0:row_id, 1:identifier, 2:name, 3:subject, 4:received_at, 5:source_link, 6:sender
fn row_to_record(row: &libsql::Row) -> Result<Record, libsql::Error> {
    let received_str: String = row.get(4)?;
    Ok(Record {
        row: row.get(0)?,
        identifier: row.get(1)?,
        name: row.get(2)?,
        subject: row.get(3)?,
        received_at: parse_datetime(&received_str),
        source_link: row.get(5)?,
        sender: row.get::<String>(6).ok().filter(|s| !s.is_empty()),
        cells: HashMap::new(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const RECORD_COLUMNS: &str = "row_id, identifier, name, subject, received_at, source_link, sender";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Records ─────────────────────────────────────────────────────

    async fn read_records(&self) -> Result<Vec<Record>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY row_id ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("read_records: {e}")))?;

        let mut records = Vec::new();
        let mut by_row = HashMap::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_record(&row) {
                Ok(record) => {
                    by_row.insert(record.row, records.len());
                    records.push(record);
                }
                Err(e) => tracing::warn!("Skipping record row: {e}"),
            }
        }

        let mut rows = conn
            .query("SELECT row_id, field, state, value FROM cells", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("read_records cells: {e}")))?;

        while let Ok(Some(row)) = rows.next().await {
            let row_id: i64 = row.get(0).unwrap_or_default();
            let field_key: String = row.get(1).unwrap_or_default();
            let state: String = row.get(2).unwrap_or_default();
            let value: String = row.get(3).unwrap_or_default();

            let Ok(field) = field_key.parse::<Field>() else {
                tracing::warn!(field = %field_key, "Skipping cell for unknown field");
                continue;
            };
            if let Some(&idx) = by_row.get(&row_id) {
                records[idx].cells.insert(field, Cell::from_parts(&state, value));
            }
        }

        Ok(records)
    }

    async fn append_records(&self, records: &[NewRecord]) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let mut appended = 0;
        for record in records {
            let changed = conn
                .execute(
                    "INSERT OR IGNORE INTO records
                        (identifier, name, subject, received_at, source_link, sender)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        record.identifier.as_str(),
                        record.name.as_str(),
                        record.subject.as_str(),
                        record.received_at.to_rfc3339(),
                        record.source_link.as_str(),
                        record.sender.clone().unwrap_or_default(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("append_records: {e}")))?;

            if changed == 0 {
                tracing::warn!(identifier = %record.identifier, "Record already exists, not appended");
            } else {
                appended += 1;
            }
        }
        debug!(appended, "Records appended");
        Ok(appended)
    }

    async fn set_cell(&self, row: i64, field: Field, cell: &Cell) -> Result<(), DatabaseError> {
        let conn = self.conn();
        if cell.is_pending() {
            conn.execute(
                "DELETE FROM cells WHERE row_id = ?1 AND field = ?2",
                params![row, field.key()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_cell: {e}")))?;
            return Ok(());
        }

        let changed = conn
            .execute(
                "INSERT INTO cells (row_id, field, state, value, updated_at)
                 SELECT ?1, ?2, ?3, ?4, ?5 WHERE EXISTS (SELECT 1 FROM records WHERE row_id = ?1)
                 ON CONFLICT(row_id, field) DO UPDATE SET
                    state = excluded.state, value = excluded.value, updated_at = excluded.updated_at",
                params![
                    row,
                    field.key(),
                    cell.state_str(),
                    cell.value_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_cell: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "record".into(),
                id: row.to_string(),
            });
        }
        debug!(row, field = %field, state = cell.state_str(), "Cell written");
        Ok(())
    }

    async fn ensure_field(&self, field: Field) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO fields (key, header, position)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(position), 0) + 1 FROM fields))",
            params![field.key(), field.header()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("ensure_field: {e}")))?;

        let mut rows = conn
            .query(
                "SELECT position FROM fields WHERE key = ?1",
                params![field.key()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("ensure_field: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let position: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("ensure_field: {e}")))?;
                Ok(position as usize)
            }
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "field".into(),
                id: field.key().into(),
            }),
            Err(e) => Err(DatabaseError::Query(format!("ensure_field: {e}"))),
        }
    }

    // ── Seen-ledger ─────────────────────────────────────────────────

    async fn seen_identifiers(&self) -> Result<HashSet<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT identifier FROM seen_ledger", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("seen_identifiers: {e}")))?;

        let mut seen = HashSet::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(id) = row.get::<String>(0) {
                seen.insert(id);
            }
        }
        Ok(seen)
    }

    async fn merge_seen(&self, identifiers: &[String]) -> Result<(), DatabaseError> {
        if identifiers.is_empty() {
            return Ok(());
        }
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_seen begin: {e}")))?;

        for id in identifiers {
            tx.execute(
                "INSERT OR IGNORE INTO seen_ledger (identifier, added_at) VALUES (?1, ?2)",
                params![id.as_str(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_seen: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_seen commit: {e}")))?;
        debug!(count = identifiers.len(), "Seen-ledger merged");
        Ok(())
    }

    async fn remove_seen(&self, identifier: &str) -> Result<bool, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM seen_ledger WHERE identifier = ?1",
                params![identifier],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_seen: {e}")))?;
        Ok(removed > 0)
    }

    async fn clear_seen(&self) -> Result<usize, DatabaseError> {
        let removed = self
            .conn()
            .execute("DELETE FROM seen_ledger", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_seen: {e}")))?;
        Ok(removed as usize)
    }

    // ── Config and prompts ──────────────────────────────────────────

    async fn load_config(&self) -> Result<HashMap<String, String>, DatabaseError> {
        self.load_key_values("config").await
    }

    async fn put_config(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.put_key_value("config", key, value).await
    }

    async fn load_prompts(&self) -> Result<HashMap<String, String>, DatabaseError> {
        self.load_key_values("prompts").await
    }

    async fn put_prompt(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.put_key_value("prompts", key, value).await
    }
}
