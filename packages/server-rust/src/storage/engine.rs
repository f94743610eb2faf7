//! Per-store SQLite engine.
//!
//! One engine owns one `engram.db`: the append-only `change_log`, the
//! domain tables declared by the store's plugin, the push idempotency
//! index, the pending-embedding index, and the `sync_meta` key/value map.
//!
//! Concurrency contract: the connection sits behind a mutex, so writers
//! serialize and readers are safe; every mutating operation runs inside a
//! single transaction spanning the change-log insert and the domain-table
//! apply, so partial visibility is impossible. I/O errors are fatal for
//! the call and never retried here.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use engram_core::changelog::{ChangeLogEntry, ChangeOperation, NewChangeLogEntry};
use engram_core::plugin::{Plugin, RowSink, TableSchema};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{EngramError, Result};

/// Default page size for delta reads.
pub const DEFAULT_DELTA_LIMIT: usize = 500;

/// Rows deleted per statement during compaction, bounded by SQLite's
/// host-parameter limit.
const COMPACTION_DELETE_CHUNK: usize = 500;

const ENGINE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS change_log (
        sequence    INTEGER PRIMARY KEY,
        table_name  TEXT NOT NULL,
        entity_id   TEXT NOT NULL,
        operation   TEXT NOT NULL CHECK (operation IN ('upsert', 'delete')),
        payload     TEXT,
        source_id   TEXT NOT NULL,
        created_at  INTEGER NOT NULL,
        received_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_change_log_entity
        ON change_log(table_name, entity_id, sequence);
    CREATE INDEX IF NOT EXISTS idx_change_log_received
        ON change_log(received_at);
    CREATE TABLE IF NOT EXISTS sync_meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS push_idempotency (
        push_id       TEXT PRIMARY KEY,
        response_body TEXT NOT NULL,
        expires_at    INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS pending_embeddings (
        table_name TEXT NOT NULL,
        entity_id  TEXT NOT NULL,
        queued_at  INTEGER NOT NULL,
        failed     INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (table_name, entity_id)
    );
";

/// sync_meta keys used by the engine and coordinators.
pub mod meta_keys {
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const LAST_DECAY: &str = "last_decay";
    pub const LAST_COMPACTION_SEQUENCE: &str = "last_compaction_sequence";
    pub const LAST_COMPACTION_TIME: &str = "last_compaction_time";
}

/// A pending-embedding row joined with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEmbedding {
    pub table_name: String,
    pub entity_id: String,
    /// Text to embed; `None` when the source row is gone or textless.
    pub content: Option<String>,
}

/// Per-store persistence engine over a single SQLite database.
pub struct StoreEngine {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    snapshot_dir: PathBuf,
    closed: AtomicBool,
}

impl StoreEngine {
    /// Opens (or creates) the engine for a store directory and migrates it
    /// through the plugin's DDL scripts.
    ///
    /// # Errors
    ///
    /// Fails on I/O, SQL, or migration errors.
    pub fn open(store_dir: &Path, plugin: &dyn Plugin) -> Result<Self> {
        let db_path = store_dir.join("engram.db");
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(ENGINE_SCHEMA)?;

        let engine = Self {
            conn: Mutex::new(conn),
            db_path,
            snapshot_dir: store_dir.join("snapshots"),
            closed: AtomicBool::new(false),
        };
        engine.migrate(plugin)?;
        Ok(engine)
    }

    /// Applies all unapplied plugin migrations under the schema-version key.
    fn migrate(&self, plugin: &dyn Plugin) -> Result<()> {
        let mut conn = self.conn.lock();
        let current: i64 = read_sync_meta(&conn, meta_keys::SCHEMA_VERSION)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        for migration in plugin.migrations() {
            if migration.version <= current {
                continue;
            }
            let tx = conn.transaction()?;
            tx.execute_batch(migration.up)?;
            write_sync_meta(&tx, meta_keys::SCHEMA_VERSION, &migration.version.to_string())?;
            tx.commit()?;
            info!(
                version = migration.version,
                plugin = plugin.type_name(),
                "applied migration"
            );
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngramError::ShutdownInProgress);
        }
        Ok(())
    }

    /// Path of the primary database file.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// The store's domain schema version.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn.lock();
        Ok(read_sync_meta(&conn, meta_keys::SCHEMA_VERSION)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Appends a batch and replays it into domain tables in one
    /// transaction, server-stamping sequences and `received_at`.
    ///
    /// Returns the committed entries (with assigned sequences). An empty
    /// batch commits nothing and returns an empty vector.
    ///
    /// # Errors
    ///
    /// Fails on I/O or constraint errors; nothing is visible on failure.
    pub fn apply_push(
        &self,
        plugin: &dyn Plugin,
        source_id: &str,
        entries: Vec<NewChangeLogEntry>,
    ) -> Result<Vec<ChangeLogEntry>> {
        self.check_open()?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let received_at = Utc::now();
        let first = max_sequence(&tx)? + 1;

        let committed: Vec<ChangeLogEntry> = entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| entry.into_committed(first + i as i64, source_id, received_at))
            .collect();

        for entry in &committed {
            insert_change_log(&tx, entry)?;
        }

        let sink = TxSink {
            conn: &tx,
            now: received_at.timestamp_millis(),
        };
        plugin
            .on_replay(&sink, &committed)
            .map_err(EngramError::Internal)?;

        tx.commit()?;
        debug!(
            first_sequence = first,
            count = committed.len(),
            source_id,
            "appended change-log batch"
        );
        Ok(committed)
    }

    /// Appends entries to the change log without domain replay.
    ///
    /// Used by tests and recovery tooling; the sync protocol always goes
    /// through [`StoreEngine::apply_push`].
    ///
    /// # Errors
    ///
    /// Fails on I/O or constraint errors.
    pub fn append_change_log_batch(
        &self,
        source_id: &str,
        entries: Vec<NewChangeLogEntry>,
    ) -> Result<i64> {
        self.check_open()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let received_at = Utc::now();
        let first = max_sequence(&tx)? + 1;
        for (i, entry) in entries.into_iter().enumerate() {
            let committed = entry.into_committed(first + i as i64, source_id, received_at);
            insert_change_log(&tx, &committed)?;
        }
        tx.commit()?;
        Ok(first)
    }

    /// Change-log entries with `sequence > after`, ascending, capped at
    /// `limit`.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_change_log_after(&self, after: i64, limit: usize) -> Result<Vec<ChangeLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT sequence, table_name, entity_id, operation, payload, source_id,
                    created_at, received_at
             FROM change_log WHERE sequence > ?1 ORDER BY sequence LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![after, limit as i64], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Current maximum change-log sequence (0 for an empty log).
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn latest_sequence(&self) -> Result<i64> {
        let conn = self.conn.lock();
        max_sequence(&conn)
    }

    /// Looks up a stored push response, purging expired records first.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn check_push_idempotency(&self, push_id: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM push_idempotency WHERE expires_at <= ?1",
            params![now],
        )?;
        let body = conn
            .query_row(
                "SELECT response_body FROM push_idempotency WHERE push_id = ?1",
                params![push_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    /// Stores the canonical response body for a push id.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn record_push_idempotency(
        &self,
        push_id: &str,
        response_body: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.check_open()?;
        let expires_at = Utc::now().timestamp_millis() + (ttl_secs as i64) * 1000;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO push_idempotency (push_id, response_body, expires_at)
             VALUES (?1, ?2, ?3)",
            params![push_id, response_body, expires_at],
        )?;
        Ok(())
    }

    /// Reads one sync-meta value.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_sync_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        read_sync_meta(&conn, key)
    }

    /// Writes one sync-meta value.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn set_sync_meta(&self, key: &str, value: &str) -> Result<()> {
        self.check_open()?;
        let conn = self.conn.lock();
        write_sync_meta(&conn, key, value)
    }

    /// Produces `snapshots/current.db`, a point-in-time byte copy taken
    /// with the SQLite online backup API (WAL-safe, no torn pages), via a
    /// temp file and an atomic rename.
    ///
    /// # Errors
    ///
    /// Fails on I/O or backup errors.
    pub fn generate_snapshot(&self) -> Result<PathBuf> {
        self.check_open()?;
        std::fs::create_dir_all(&self.snapshot_dir)?;
        let tmp_path = self.snapshot_dir.join("current.db.tmp");
        if tmp_path.exists() {
            std::fs::remove_file(&tmp_path)?;
        }

        {
            let src = self.conn.lock();
            let mut dst = Connection::open(&tmp_path)?;
            let backup = rusqlite::backup::Backup::new(&src, &mut dst)?;
            backup.run_to_completion(512, std::time::Duration::from_millis(10), None)?;
        }

        let final_path = self.snapshot_dir.join("current.db");
        std::fs::rename(&tmp_path, &final_path)?;
        debug!(path = %final_path.display(), "snapshot generated");
        Ok(final_path)
    }

    /// Path of the current snapshot file.
    ///
    /// # Errors
    ///
    /// [`EngramError::SnapshotUnavailable`] when no snapshot exists yet.
    pub fn snapshot_path(&self) -> Result<PathBuf> {
        let path = self.snapshot_dir.join("current.db");
        if path.is_file() {
            Ok(path)
        } else {
            Err(EngramError::SnapshotUnavailable)
        }
    }

    /// Compacts the change log: every entry received at or before `cutoff`
    /// is removed except the latest per `(table, entity)`, with each
    /// removed entry first mirrored as a JSON line into
    /// `audit_dir/<yyyy-mm-dd>.jsonl` (UTC date) and fsynced.
    ///
    /// Returns `(exported, deleted)`; the two counts are always equal.
    ///
    /// # Errors
    ///
    /// Fails on I/O or database errors; on failure the log is unchanged
    /// (the audit file may carry a harmless duplicate tail).
    pub fn compact_change_log(
        &self,
        cutoff: DateTime<Utc>,
        audit_dir: &Path,
    ) -> Result<(u64, u64)> {
        self.check_open()?;
        let cutoff_millis = cutoff.timestamp_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let victims: Vec<ChangeLogEntry> = {
            let mut stmt = tx.prepare(
                "SELECT sequence, table_name, entity_id, operation, payload, source_id,
                        created_at, received_at
                 FROM change_log
                 WHERE received_at <= ?1
                   AND sequence NOT IN (
                       SELECT MAX(sequence) FROM change_log
                       WHERE received_at <= ?1
                       GROUP BY table_name, entity_id
                   )
                 ORDER BY sequence",
            )?;
            let rows = stmt.query_map(params![cutoff_millis], row_to_entry)?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            entries
        };

        if victims.is_empty() {
            return Ok((0, 0));
        }

        // The audit file is the only permanent record of removed entries:
        // it must be durable before the delete commits.
        std::fs::create_dir_all(audit_dir)?;
        let audit_path = audit_dir.join(format!("{}.jsonl", Utc::now().format("%Y-%m-%d")));
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&audit_path)?;
            for entry in &victims {
                let line = serde_json::to_string(entry)
                    .map_err(|e| EngramError::Internal(e.into()))?;
                writeln!(file, "{line}")?;
            }
            file.sync_all()?;
        }

        for chunk in victims.chunks(COMPACTION_DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("DELETE FROM change_log WHERE sequence IN ({placeholders})");
            let sequences: Vec<i64> = chunk.iter().map(|e| e.sequence).collect();
            tx.execute(&sql, rusqlite::params_from_iter(sequences))?;
        }
        tx.commit()?;

        let count = victims.len() as u64;
        info!(exported = count, deleted = count, "change log compacted");
        Ok((count, count))
    }

    /// Subtracts `amount` from the confidence of live lore entries not
    /// updated since `threshold`, clamped at zero. Returns rows affected;
    /// 0 when the store has no `lore_entries` table.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn decay_confidence(&self, threshold: DateTime<Utc>, amount: f64) -> Result<usize> {
        self.check_open()?;
        let conn = self.conn.lock();
        if !table_exists(&conn, "lore_entries")? {
            return Ok(0);
        }
        let affected = conn.execute(
            "UPDATE lore_entries
             SET confidence = MAX(0.0, confidence - ?1)
             WHERE deleted_at IS NULL
               AND confidence IS NOT NULL
               AND confidence > 0.0
               AND updated_at < ?2",
            params![amount, threshold.timestamp_millis()],
        )?;
        Ok(affected)
    }

    /// Records the instant of the last completed decay pass.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn set_last_decay(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_sync_meta(meta_keys::LAST_DECAY, &at.timestamp_millis().to_string())
    }

    /// The instant of the last completed decay pass, if any.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_last_decay(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_sync_meta(meta_keys::LAST_DECAY)?
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()))
    }

    /// Pending-embedding rows (oldest first) joined with their source text.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_pending_embeddings(&self, limit: usize) -> Result<Vec<PendingEmbedding>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT table_name, entity_id FROM pending_embeddings
             WHERE failed = 0 ORDER BY queued_at LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut pending = Vec::new();
        for row in rows {
            let (table_name, entity_id) = row?;
            let content = if table_name == "lore_entries" {
                conn.query_row(
                    "SELECT content FROM lore_entries WHERE id = ?1 AND deleted_at IS NULL",
                    params![entity_id],
                    |row| row.get(0),
                )
                .optional()?
            } else {
                None
            };
            pending.push(PendingEmbedding {
                table_name,
                entity_id,
                content,
            });
        }
        Ok(pending)
    }

    /// Writes a computed embedding and clears the pending row.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn update_embedding(&self, table: &str, entity_id: &str, vector: &[f32]) -> Result<()> {
        self.check_open()?;
        let blob = embedding_to_blob(vector);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if table_exists(&tx, table)? {
            let sql = format!("UPDATE {table} SET embedding = ?1 WHERE id = ?2");
            tx.execute(&sql, params![blob, entity_id])?;
        }
        tx.execute(
            "DELETE FROM pending_embeddings WHERE table_name = ?1 AND entity_id = ?2",
            params![table, entity_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Marks a pending embedding permanently failed; it is never retried.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn mark_embedding_failed(&self, table: &str, entity_id: &str) -> Result<()> {
        self.check_open()?;
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE pending_embeddings SET failed = 1
             WHERE table_name = ?1 AND entity_id = ?2",
            params![table, entity_id],
        )?;
        Ok(())
    }

    /// Flushes the WAL and rejects all subsequent operations.
    ///
    /// # Errors
    ///
    /// Fails on checkpoint errors; the engine is closed regardless.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

/// Row-application sink bound to an open transaction.
struct TxSink<'a> {
    conn: &'a Connection,
    now: i64,
}

impl RowSink for TxSink<'_> {
    fn upsert_row(
        &self,
        schema: &TableSchema,
        entity_id: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        upsert_row(self.conn, schema, entity_id, payload, self.now)?;
        Ok(())
    }

    fn delete_row(&self, schema: &TableSchema, entity_id: &str) -> anyhow::Result<()> {
        delete_row(self.conn, schema, entity_id, self.now)?;
        Ok(())
    }

    fn queue_embedding(&self, table: &str, entity_id: &str) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO pending_embeddings (table_name, entity_id, queued_at, failed)
             VALUES (?1, ?2, ?3, 0)",
            params![table, entity_id, self.now],
        )?;
        Ok(())
    }
}

fn max_sequence(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(sequence), 0) FROM change_log",
        [],
        |row| row.get(0),
    )?)
}

fn insert_change_log(conn: &Connection, entry: &ChangeLogEntry) -> Result<()> {
    let payload = entry
        .payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| EngramError::Internal(e.into()))?;
    conn.execute(
        "INSERT INTO change_log
             (sequence, table_name, entity_id, operation, payload, source_id,
              created_at, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.sequence,
            entry.table_name,
            entry.entity_id,
            entry.operation.as_str(),
            payload,
            entry.source_id,
            entry.created_at.timestamp_millis(),
            entry.received_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeLogEntry> {
    let operation: String = row.get(3)?;
    let payload: Option<String> = row.get(4)?;
    let created_at: i64 = row.get(6)?;
    let received_at: i64 = row.get(7)?;
    Ok(ChangeLogEntry {
        sequence: row.get(0)?,
        table_name: row.get(1)?,
        entity_id: row.get(2)?,
        operation: ChangeOperation::from_str_opt(&operation).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown operation {operation:?}").into(),
            )
        })?,
        payload: payload
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        source_id: row.get(5)?,
        created_at: millis_to_datetime(created_at),
        received_at: millis_to_datetime(received_at),
    })
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

fn read_sync_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM sync_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn write_sync_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Maps a JSON payload field onto a SQLite value. Arrays and objects are
/// stored as their JSON text.
fn json_to_sql(value: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        serde_json::Value::Null => Sql::Null,
        serde_json::Value::Bool(b) => Sql::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Sql::Integer)
            .or_else(|| n.as_f64().map(Sql::Real))
            .unwrap_or(Sql::Null),
        serde_json::Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn ensure_dynamic_table(conn: &Connection, table: &str) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id         TEXT PRIMARY KEY,
            payload    TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        )"
    );
    conn.execute_batch(&sql)?;
    Ok(())
}

fn upsert_row(
    conn: &Connection,
    schema: &TableSchema,
    entity_id: &str,
    payload: &serde_json::Value,
    now: i64,
) -> Result<()> {
    if schema.dynamic {
        ensure_dynamic_table(conn, &schema.name)?;
        let body = serde_json::to_string(payload)
            .map_err(|e| EngramError::Internal(e.into()))?;
        let sql = format!(
            "INSERT INTO {} (id, payload, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?3, NULL)
             ON CONFLICT(id) DO UPDATE SET
                 payload = excluded.payload,
                 updated_at = excluded.updated_at,
                 deleted_at = NULL",
            schema.name
        );
        conn.execute(&sql, params![entity_id, body, now])?;
        return Ok(());
    }

    let object = payload
        .as_object()
        .ok_or_else(|| EngramError::Meta("payload must be a JSON object".to_string()))?;

    let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(schema.columns.len());
    for column in &schema.columns {
        let value = match column.as_str() {
            "id" => rusqlite::types::Value::Text(entity_id.to_string()),
            "deleted_at" => rusqlite::types::Value::Null,
            "created_at" | "updated_at" => object
                .get(column)
                .and_then(serde_json::Value::as_i64)
                .map_or(
                    rusqlite::types::Value::Integer(now),
                    rusqlite::types::Value::Integer,
                ),
            _ => object.get(column).map_or(rusqlite::types::Value::Null, json_to_sql),
        };
        values.push(value);
    }

    let columns = schema.columns.join(", ");
    let placeholders: Vec<String> = (1..=schema.columns.len()).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = schema
        .columns
        .iter()
        .filter(|c| c.as_str() != "id" && c.as_str() != "created_at")
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    let sql = format!(
        "INSERT INTO {} ({columns}) VALUES ({})
         ON CONFLICT(id) DO UPDATE SET {}",
        schema.name,
        placeholders.join(", "),
        updates.join(", "),
    );
    conn.execute(&sql, rusqlite::params_from_iter(values))?;
    Ok(())
}

fn delete_row(conn: &Connection, schema: &TableSchema, entity_id: &str, now: i64) -> Result<()> {
    if schema.dynamic && !table_exists(conn, &schema.name)? {
        // Deleting from a never-written dynamic table is a no-op.
        return Ok(());
    }

    if schema.soft_delete {
        let nulls_embedding = schema.columns.iter().any(|c| c == "embedding");
        let sql = if nulls_embedding {
            format!(
                "UPDATE {} SET deleted_at = ?1, updated_at = ?1, embedding = NULL WHERE id = ?2",
                schema.name
            )
        } else {
            format!(
                "UPDATE {} SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
                schema.name
            )
        };
        conn.execute(&sql, params![now, entity_id])?;
    } else {
        let sql = format!("DELETE FROM {} WHERE id = ?1", schema.name);
        conn.execute(&sql, params![entity_id])?;
    }

    conn.execute(
        "DELETE FROM pending_embeddings WHERE table_name = ?1 AND entity_id = ?2",
        params![schema.name, entity_id],
    )?;
    Ok(())
}

fn embedding_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}
