//! # SQLite Envelope Store
//!
//! Durable [`EnvelopeStore`] over a single rusqlite connection.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ENVELOPE STORE OPERATIONS                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  store(envelope)                                                        │
//! │    encode ─► id = SHA-256(bytes) ─► INSERT OR IGNORE envelopes          │
//! │                                   ─► envelope_references (public refs)  │
//! │                                   ─► envelope_metadata                  │
//! │                                                                         │
//! │  search(query)                                                          │
//! │    WHERE sender / content_hash / EXISTS(reference) / EXISTS(metadata)   │
//! │    ORDER BY created_at DESC, insertion DESC LIMIT n                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::envelope_store::{created_at_millis, EnvelopeQuery, EnvelopeStore};
use super::schema;
use crate::envelope::{decode, encode, envelope_id, Envelope};
use crate::error::{Error, Result};
use crate::time::now_timestamp_millis;

/// Envelope store backed by SQLite
pub struct SqliteEnvelopeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEnvelopeStore {
    /// Open or create a store
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub async fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory()
                .map_err(|e| Error::DatabaseError(format!("Failed to create in-memory database: {}", e)))?,
        };

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| Error::DatabaseError(format!("Failed to enable foreign keys: {}", e)))?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("Envelope schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Database schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Envelope schema version: {}", v);
            }
        }

        Ok(())
    }

    /// Number of stored envelopes
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM envelopes", [], |row| row.get(0))
            .map_err(|e| Error::DatabaseError(format!("Failed to count envelopes: {}", e)))?;
        Ok(count as usize)
    }
}

fn decode_rows(rows: Vec<Vec<u8>>) -> Result<Vec<Envelope>> {
    rows.iter().map(|data| decode(data)).collect()
}

fn query_data(conn: &Connection, sql: &str, values: Vec<Value>) -> Result<Vec<Vec<u8>>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| row.get::<_, Vec<u8>>(0))
        .map_err(|e| Error::DatabaseError(format!("Failed to query envelopes: {}", e)))?;

    let mut data = Vec::new();
    for row in rows {
        data.push(row.map_err(|e| Error::DatabaseError(format!("Failed to read envelope row: {}", e)))?);
    }
    Ok(data)
}

#[async_trait]
impl EnvelopeStore for SqliteEnvelopeStore {
    async fn store(&self, envelope: &Envelope) -> Result<String> {
        let data = encode(envelope)?;
        let id = envelope_id(&data);
        let now = now_timestamp_millis();

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO envelopes
                 (id, content_hash, message_type, encryption, sender, reply_to, created_at, stored_at, data)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    envelope.content_hash_hex(),
                    envelope.message_type.as_i32(),
                    envelope.encryption.as_i32(),
                    envelope.sender(),
                    envelope.reply_to,
                    created_at_millis(envelope, now),
                    now,
                    data,
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to insert envelope: {}", e)))?;

        if inserted == 0 {
            tracing::debug!(id = id.as_str(), "Envelope already stored");
            return Ok(id);
        }

        for reference in &envelope.public_references {
            tx.execute(
                "INSERT OR IGNORE INTO envelope_references (envelope_id, content_hash, group_id)
                 VALUES (?, ?, ?)",
                params![id, reference.content_hash_hex(), reference.group_id],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to insert reference: {}", e)))?;
        }
        // First value wins, matching Metadata::get
        for (key, value) in envelope.metadata.iter() {
            tx.execute(
                "INSERT OR IGNORE INTO envelope_metadata (envelope_id, key, value) VALUES (?, ?, ?)",
                params![id, key, value],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to insert metadata: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit envelope: {}", e)))?;

        tracing::debug!(id = id.as_str(), size = data.len(), "Stored envelope");
        Ok(id)
    }

    async fn retrieve(&self, id: &str) -> Result<Option<Envelope>> {
        let conn = self.conn.lock();
        let data: Option<Vec<u8>> = conn
            .query_row("SELECT data FROM envelopes WHERE id = ?", params![id], |row| row.get(0))
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to get envelope: {}", e)))?;
        data.map(|bytes| decode(&bytes)).transpose()
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM envelopes WHERE id = ?", params![id], |row| row.get(0))
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to check envelope: {}", e)))?;
        Ok(found.is_some())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        tx.execute("DELETE FROM envelope_references WHERE envelope_id = ?", params![id])
            .map_err(|e| Error::DatabaseError(format!("Failed to delete references: {}", e)))?;
        tx.execute("DELETE FROM envelope_metadata WHERE envelope_id = ?", params![id])
            .map_err(|e| Error::DatabaseError(format!("Failed to delete metadata: {}", e)))?;
        let removed = tx
            .execute("DELETE FROM envelopes WHERE id = ?", params![id])
            .map_err(|e| Error::DatabaseError(format!("Failed to delete envelope: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit delete: {}", e)))?;
        Ok(removed > 0)
    }

    async fn find_by_content_hash(&self, content_hash: &[u8]) -> Result<Vec<Envelope>> {
        let rows = {
            let conn = self.conn.lock();
            query_data(
                &conn,
                "SELECT data FROM envelopes WHERE content_hash = ?
                 ORDER BY created_at DESC, rowid DESC",
                vec![Value::Text(hex::encode(content_hash))],
            )?
        };
        decode_rows(rows)
    }

    async fn find_by_context(&self, context_hash: &[u8]) -> Result<Vec<Envelope>> {
        let rows = {
            let conn = self.conn.lock();
            query_data(
                &conn,
                "SELECT e.data FROM envelopes e
                 WHERE EXISTS (SELECT 1 FROM envelope_references r
                               WHERE r.envelope_id = e.id AND r.content_hash = ?)
                 ORDER BY e.created_at DESC, e.rowid DESC",
                vec![Value::Text(hex::encode(context_hash))],
            )?
        };
        decode_rows(rows)
    }

    async fn list_by_sender(&self, sender: &str, limit: usize) -> Result<Vec<Envelope>> {
        let rows = {
            let conn = self.conn.lock();
            query_data(
                &conn,
                "SELECT data FROM envelopes WHERE sender = ?
                 ORDER BY created_at DESC, rowid DESC LIMIT ?",
                vec![Value::Text(sender.to_string()), Value::Integer(limit as i64)],
            )?
        };
        decode_rows(rows)
    }

    async fn search(&self, query: &EnvelopeQuery) -> Result<Vec<Envelope>> {
        let mut sql = String::from("SELECT e.data FROM envelopes e WHERE 1 = 1");
        let mut values = Vec::new();

        if let Some(sender) = &query.sender {
            sql.push_str(" AND e.sender = ?");
            values.push(Value::Text(sender.clone()));
        }
        if let Some(hash) = &query.content_hash {
            sql.push_str(" AND e.content_hash = ?");
            values.push(Value::Text(hash.to_ascii_lowercase()));
        }
        if let Some(context) = &query.context_hash {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM envelope_references r \
                 WHERE r.envelope_id = e.id AND r.content_hash = ?)",
            );
            values.push(Value::Text(context.to_ascii_lowercase()));
        }
        for (key, value) in &query.metadata {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM envelope_metadata m \
                 WHERE m.envelope_id = e.id AND m.key = ? AND m.value = ?)",
            );
            values.push(Value::Text(key.clone()));
            values.push(Value::Text(value.clone()));
        }
        sql.push_str(" ORDER BY e.created_at DESC, e.rowid DESC LIMIT ?");
        values.push(Value::Integer(query.effective_limit() as i64));

        let rows = {
            let conn = self.conn.lock();
            query_data(&conn, &sql, values)?
        };
        decode_rows(rows)
    }
}
