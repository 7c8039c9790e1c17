//! SQLite implementation of ILocalStore
//!
//! This module provides the concrete SQLite-based implementation of the
//! local store port defined in medsync-core. It handles all domain type
//! serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type     | SQL Type | Strategy                                      |
//! |-----------------|----------|-----------------------------------------------|
//! | RecordId        | TEXT     | String via `.as_str()` / `RecordId::new()`    |
//! | QueueItemId     | INTEGER  | AUTOINCREMENT row id                          |
//! | RecordData      | TEXT     | serde_json object                             |
//! | EntityKind      | TEXT     | `.name()` / `FromStr`                         |
//! | Operation       | TEXT     | `.as_str()` / `FromStr`                       |
//! | SyncStatus      | TEXT     | `.as_str()` / `FromStr`                       |
//! | DateTime<Utc>   | TEXT     | RFC 3339 with microseconds, `Z` suffix        |
//!
//! ## Write serialisation
//!
//! Every mutating method takes the store's write lock, then runs inside one
//! sqlx transaction. Reads go straight to the pool.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;

use medsync_core::domain::{
    record::merge_into, EntityKind, LocalRecord, Operation, PullStats, QueueItemId, RecordData,
    RecordId, SyncQueueItem, SyncStatus,
};
use medsync_core::ports::{
    DeleteOutcome, ILocalStore, RemoteChange, StoreError, SweepPolicy,
};

use crate::CacheError;

/// Metadata key holding the upper bound of the last successful pull
const LAST_SYNC_KEY: &str = "last_sync_timestamp";

/// SQLite-based implementation of the local store port
///
/// Record snapshots live in one table per entity kind; the outbox lives in
/// `sync_queue`; sync metadata in `sync_metadata`.
pub struct SqliteLocalStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteLocalStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Format a timestamp with fixed precision so stored values sort lexically
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Try parsing without timezone (SQLite default format)
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn parse_record_id(s: String) -> Result<RecordId, CacheError> {
    RecordId::new(s)
        .map_err(|e| CacheError::SerializationError(format!("Invalid record id: {}", e)))
}

fn encode_data(data: &RecordData) -> Result<String, CacheError> {
    Ok(serde_json::to_string(data)?)
}

fn decode_data(s: &str) -> Result<RecordData, CacheError> {
    Ok(serde_json::from_str(s)?)
}

fn encode_optional_data(data: Option<&RecordData>) -> Result<Option<String>, CacheError> {
    data.map(encode_data).transpose()
}

fn decode_optional_data(s: Option<String>) -> Result<Option<RecordData>, CacheError> {
    s.as_deref().map(decode_data).transpose()
}

/// Fields of `current` whose value differs from what was `sent`
///
/// Used to detect patches folded into a queue item while its request was
/// in flight.
fn diverged_fields(current: &RecordData, sent: &RecordData) -> RecordData {
    current
        .iter()
        .filter(|(key, value)| key.as_str() != "id" && sent.get(key.as_str()) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Values `source` holds for each key of `fields`, `null` where absent
fn values_for(fields: &RecordData, source: &RecordData) -> RecordData {
    fields
        .keys()
        .map(|key| (key.clone(), source.get(key).cloned().unwrap_or(Value::Null)))
        .collect()
}

// ============================================================================
// Row mapping functions
// ============================================================================

/// Reconstruct a LocalRecord from a row of an entity table
fn record_from_row(entity: EntityKind, row: &SqliteRow) -> Result<LocalRecord, CacheError> {
    let id: String = row.try_get("id")?;
    let temp_id: Option<String> = row.try_get("temp_id")?;
    let data: String = row.try_get("data")?;
    let sync_status: String = row.try_get("sync_status")?;
    let is_deleted: bool = row.try_get("is_deleted")?;
    let deleted_at: Option<String> = row.try_get("deleted_at")?;
    let last_modified: String = row.try_get("last_modified")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(LocalRecord {
        id: parse_record_id(id)?,
        temp_id: temp_id.map(parse_record_id).transpose()?,
        entity,
        data: decode_data(&data)?,
        sync_status: SyncStatus::from_str(&sync_status)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?,
        is_deleted,
        deleted_at: parse_optional_datetime(deleted_at)?,
        last_modified: parse_datetime(&last_modified)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

/// Reconstruct a SyncQueueItem from a row of `sync_queue`
fn queue_item_from_row(row: &SqliteRow) -> Result<SyncQueueItem, CacheError> {
    let id: i64 = row.try_get("id")?;
    let entity: String = row.try_get("entity")?;
    let operation: String = row.try_get("operation")?;
    let entity_id: String = row.try_get("entity_id")?;
    let data: Option<String> = row.try_get("data")?;
    let base: Option<String> = row.try_get("base")?;
    let created_at: String = row.try_get("created_at")?;
    let attempts: i64 = row.try_get("attempts")?;
    let last_error: Option<String> = row.try_get("last_error")?;
    let last_attempt_at: Option<String> = row.try_get("last_attempt_at")?;
    let rejected: bool = row.try_get("rejected")?;

    Ok(SyncQueueItem {
        id: QueueItemId::new(id),
        entity: EntityKind::from_str(&entity)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?,
        operation: Operation::from_str(&operation)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?,
        entity_id: parse_record_id(entity_id)?,
        data: decode_optional_data(data)?,
        base: decode_optional_data(base)?,
        created_at: parse_datetime(&created_at)?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error,
        last_attempt_at: parse_optional_datetime(last_attempt_at)?,
        rejected,
    })
}

// ============================================================================
// Connection-level statements
// ============================================================================

async fn load_record(
    conn: &mut SqliteConnection,
    entity: EntityKind,
    id: &RecordId,
) -> Result<Option<LocalRecord>, CacheError> {
    let sql = format!("SELECT * FROM {} WHERE id = ?", entity.table());
    let row = sqlx::query(&sql)
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(ref r) => Ok(Some(record_from_row(entity, r)?)),
        None => Ok(None),
    }
}

/// Loads a record that exists and is not soft-deleted
async fn load_live_record(
    conn: &mut SqliteConnection,
    entity: EntityKind,
    id: &RecordId,
) -> Result<LocalRecord, CacheError> {
    match load_record(conn, entity, id).await? {
        Some(record) if !record.is_deleted => Ok(record),
        _ => Err(CacheError::RecordNotFound {
            entity,
            id: id.clone(),
        }),
    }
}

async fn write_record(conn: &mut SqliteConnection, record: &LocalRecord) -> Result<(), CacheError> {
    let sql = format!(
        "INSERT INTO {} \
         (id, temp_id, data, sync_status, is_deleted, deleted_at, \
          last_modified, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
          temp_id = excluded.temp_id, data = excluded.data, \
          sync_status = excluded.sync_status, is_deleted = excluded.is_deleted, \
          deleted_at = excluded.deleted_at, last_modified = excluded.last_modified, \
          created_at = excluded.created_at, updated_at = excluded.updated_at",
        record.entity.table()
    );

    sqlx::query(&sql)
        .bind(record.id.as_str())
        .bind(record.temp_id.as_ref().map(RecordId::as_str))
        .bind(encode_data(&record.data)?)
        .bind(record.sync_status.as_str())
        .bind(record.is_deleted)
        .bind(record.deleted_at.as_ref().map(format_datetime))
        .bind(format_datetime(&record.last_modified))
        .bind(format_datetime(&record.created_at))
        .bind(format_datetime(&record.updated_at))
        .execute(&mut *conn)
        .await?;

    tracing::trace!(entity = %record.entity, id = %record.id, "Saved record");
    Ok(())
}

async fn delete_record(
    conn: &mut SqliteConnection,
    entity: EntityKind,
    id: &RecordId,
) -> Result<u64, CacheError> {
    let sql = format!("DELETE FROM {} WHERE id = ?", entity.table());
    let result = sqlx::query(&sql)
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

async fn load_queue_item(
    conn: &mut SqliteConnection,
    item: QueueItemId,
) -> Result<Option<SyncQueueItem>, CacheError> {
    let row = sqlx::query("SELECT * FROM sync_queue WHERE id = ?")
        .bind(item.as_i64())
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(ref r) => Ok(Some(queue_item_from_row(r)?)),
        None => Ok(None),
    }
}

/// Oldest item of `operation` targeting a record, rejected or not
async fn find_queue_item(
    conn: &mut SqliteConnection,
    entity: EntityKind,
    id: &RecordId,
    operation: Operation,
) -> Result<Option<SyncQueueItem>, CacheError> {
    let row = sqlx::query(
        "SELECT * FROM sync_queue \
         WHERE entity = ? AND entity_id = ? AND operation = ? \
         ORDER BY id ASC LIMIT 1",
    )
    .bind(entity.name())
    .bind(id.as_str())
    .bind(operation.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(ref r) => Ok(Some(queue_item_from_row(r)?)),
        None => Ok(None),
    }
}

async fn insert_queue_item(
    conn: &mut SqliteConnection,
    entity: EntityKind,
    operation: Operation,
    entity_id: &RecordId,
    data: Option<&RecordData>,
    base: Option<&RecordData>,
) -> Result<QueueItemId, CacheError> {
    let result = sqlx::query(
        "INSERT INTO sync_queue (entity, operation, entity_id, data, base, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(entity.name())
    .bind(operation.as_str())
    .bind(entity_id.as_str())
    .bind(encode_optional_data(data)?)
    .bind(encode_optional_data(base)?)
    .bind(format_datetime(&Utc::now()))
    .execute(&mut *conn)
    .await?;

    let id = QueueItemId::new(result.last_insert_rowid());
    tracing::debug!(
        queue_item = %id,
        entity = %entity,
        operation = %operation,
        entity_id = %entity_id,
        "Queued mutation"
    );
    Ok(id)
}

/// Replaces the payload of a queue item and clears its failure history,
/// rejection included
async fn reset_queue_payload(
    conn: &mut SqliteConnection,
    item: QueueItemId,
    data: Option<&RecordData>,
    base: Option<&RecordData>,
) -> Result<(), CacheError> {
    sqlx::query(
        "UPDATE sync_queue SET data = ?, base = ?, attempts = 0, \
         last_error = NULL, last_attempt_at = NULL, rejected = 0 WHERE id = ?",
    )
    .bind(encode_optional_data(data)?)
    .bind(encode_optional_data(base)?)
    .bind(item.as_i64())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Replaces the payload of a queue item, keeping its failure history
async fn set_queue_payload(
    conn: &mut SqliteConnection,
    item: QueueItemId,
    data: Option<&RecordData>,
    base: Option<&RecordData>,
) -> Result<(), CacheError> {
    sqlx::query("UPDATE sync_queue SET data = ?, base = ? WHERE id = ?")
        .bind(encode_optional_data(data)?)
        .bind(encode_optional_data(base)?)
        .bind(item.as_i64())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Writes an edit into an existing queue item
///
/// A rejected item carries the user's correction from now on, so it is
/// revived with a clean failure history.
async fn fold_queue_payload(
    conn: &mut SqliteConnection,
    item: &SyncQueueItem,
    data: Option<&RecordData>,
    base: Option<&RecordData>,
) -> Result<(), CacheError> {
    if item.rejected {
        tracing::debug!(queue_item = %item.id, "Reviving rejected queue item");
        reset_queue_payload(conn, item.id, data, base).await
    } else {
        set_queue_payload(conn, item.id, data, base).await
    }
}

async fn delete_queue_item(
    conn: &mut SqliteConnection,
    item: QueueItemId,
) -> Result<(), CacheError> {
    sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(item.as_i64())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Deletes every queue item targeting a record, optionally restricted to one operation
async fn delete_queue_items_for(
    conn: &mut SqliteConnection,
    entity: EntityKind,
    id: &RecordId,
    operation: Option<Operation>,
) -> Result<u64, CacheError> {
    let result = match operation {
        Some(op) => {
            sqlx::query(
                "DELETE FROM sync_queue WHERE entity = ? AND entity_id = ? AND operation = ?",
            )
            .bind(entity.name())
            .bind(id.as_str())
            .bind(op.as_str())
            .execute(&mut *conn)
            .await?
        }
        None => {
            sqlx::query("DELETE FROM sync_queue WHERE entity = ? AND entity_id = ?")
                .bind(entity.name())
                .bind(id.as_str())
                .execute(&mut *conn)
                .await?
        }
    };
    Ok(result.rows_affected())
}

async fn count_queue_items_for(
    conn: &mut SqliteConnection,
    entity: EntityKind,
    id: &RecordId,
) -> Result<i64, CacheError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE entity = ? AND entity_id = ?")
            .bind(entity.name())
            .bind(id.as_str())
            .fetch_one(&mut *conn)
            .await?;
    Ok(count)
}

/// Rewrites every reference to `from` (records and queued payloads) to `to`
///
/// Only the reference fields declared by the kinds pointing at `target`
/// are inspected.
async fn rewrite_references(
    conn: &mut SqliteConnection,
    target: EntityKind,
    from: &RecordId,
    to: &RecordId,
) -> Result<u64, CacheError> {
    let mut rewritten = 0;

    for (kind, field) in target.referenced_by() {
        let path = format!("$.{field}");

        let sql = format!(
            "UPDATE {} SET data = json_set(data, ?, ?) WHERE json_extract(data, ?) = ?",
            kind.table()
        );
        rewritten += sqlx::query(&sql)
            .bind(&path)
            .bind(to.as_str())
            .bind(&path)
            .bind(from.as_str())
            .execute(&mut *conn)
            .await?
            .rows_affected();

        for column in ["data", "base"] {
            let sql = format!(
                "UPDATE sync_queue SET {column} = json_set({column}, ?, ?) \
                 WHERE entity = ? AND {column} IS NOT NULL AND json_extract({column}, ?) = ?"
            );
            rewritten += sqlx::query(&sql)
                .bind(&path)
                .bind(to.as_str())
                .bind(kind.name())
                .bind(&path)
                .bind(from.as_str())
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
    }

    rewritten += sqlx::query("UPDATE sync_queue SET entity_id = ? WHERE entity = ? AND entity_id = ?")
        .bind(to.as_str())
        .bind(target.name())
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok(rewritten)
}

// ============================================================================
// Transactional operations
// ============================================================================

impl SqliteLocalStore {
    async fn stage_update_tx(
        &self,
        entity: EntityKind,
        id: &RecordId,
        patch: &RecordData,
    ) -> Result<LocalRecord, CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut record = load_live_record(&mut tx, entity, id).await?;
        let mut patch = patch.clone();
        patch.remove("id");
        let now = Utc::now();

        if record.is_unconfirmed() {
            match find_queue_item(&mut tx, entity, id, Operation::Create).await? {
                Some(create) => {
                    let mut data = create.data.clone().unwrap_or_default();
                    merge_into(&mut data, &patch);
                    fold_queue_payload(&mut tx, &create, Some(&data), None).await?;
                }
                None => {
                    // Create item was swept; queue the full payload again
                    let mut data = record.data.clone();
                    merge_into(&mut data, &patch);
                    insert_queue_item(&mut tx, entity, Operation::Create, id, Some(&data), None)
                        .await?;
                }
            }
        } else {
            match find_queue_item(&mut tx, entity, id, Operation::Update).await? {
                Some(update) => {
                    let mut data = update.data.clone().unwrap_or_default();
                    merge_into(&mut data, &patch);
                    let mut base = update.base.clone().unwrap_or_default();
                    for key in patch.keys() {
                        if !base.contains_key(key) {
                            base.insert(
                                key.clone(),
                                record.data.get(key).cloned().unwrap_or(Value::Null),
                            );
                        }
                    }
                    fold_queue_payload(&mut tx, &update, Some(&data), Some(&base)).await?;
                }
                None => {
                    let base = values_for(&patch, &record.data);
                    insert_queue_item(
                        &mut tx,
                        entity,
                        Operation::Update,
                        id,
                        Some(&patch),
                        Some(&base),
                    )
                    .await?;
                }
            }
        }

        record.apply_patch(&patch, now);
        write_record(&mut tx, &record).await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn stage_delete_tx(
        &self,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<DeleteOutcome, CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut record = match load_record(&mut tx, entity, id).await? {
            Some(record) => record,
            None => {
                return Err(CacheError::RecordNotFound {
                    entity,
                    id: id.clone(),
                })
            }
        };

        if record.is_deleted {
            return Ok(DeleteOutcome::SoftDeleted);
        }

        let outcome = if record.is_unconfirmed() {
            delete_record(&mut tx, entity, id).await?;
            let dropped = delete_queue_items_for(&mut tx, entity, id, None).await?;
            tracing::debug!(entity = %entity, id = %id, dropped, "Purged unconfirmed record");
            DeleteOutcome::Purged
        } else {
            delete_queue_items_for(&mut tx, entity, id, Some(Operation::Update)).await?;
            record.soft_delete(Utc::now());
            write_record(&mut tx, &record).await?;
            insert_queue_item(&mut tx, entity, Operation::Delete, id, None, None).await?;
            DeleteOutcome::SoftDeleted
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn confirm_create_tx(
        &self,
        item: QueueItemId,
        temp_id: &RecordId,
        sent: &RecordData,
        server: &LocalRecord,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let entity = server.entity;
        let current = load_queue_item(&mut tx, item).await?;
        let local = load_record(&mut tx, entity, temp_id).await?;
        delete_record(&mut tx, entity, temp_id).await?;

        let mut confirmed = server.clone();
        confirmed.temp_id = None;
        confirmed.sync_status = SyncStatus::Synced;

        match local {
            None => {
                // Deleted locally while the create was in flight
                confirmed.soft_delete(Utc::now());
                write_record(&mut tx, &confirmed).await?;
                insert_queue_item(
                    &mut tx,
                    entity,
                    Operation::Delete,
                    &confirmed.id,
                    None,
                    None,
                )
                .await?;
            }
            Some(_) => {
                let residual = current
                    .as_ref()
                    .and_then(|c| c.data.as_ref())
                    .map(|data| diverged_fields(data, sent))
                    .unwrap_or_default();

                if residual.is_empty() {
                    write_record(&mut tx, &confirmed).await?;
                } else {
                    let base = values_for(&residual, &server.data);
                    confirmed.apply_patch(&residual, Utc::now());
                    write_record(&mut tx, &confirmed).await?;
                    insert_queue_item(
                        &mut tx,
                        entity,
                        Operation::Update,
                        &confirmed.id,
                        Some(&residual),
                        Some(&base),
                    )
                    .await?;
                }
            }
        }

        if current.is_some() {
            delete_queue_item(&mut tx, item).await?;
        }
        let rewritten = rewrite_references(&mut tx, entity, temp_id, &confirmed.id).await?;
        tx.commit().await?;

        tracing::info!(
            entity = %entity,
            temp_id = %temp_id,
            id = %confirmed.id,
            rewritten,
            "Confirmed offline create"
        );
        Ok(())
    }

    async fn settle_update_tx(
        &self,
        item: QueueItemId,
        sent: Option<&RecordData>,
        server: &LocalRecord,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let current = load_queue_item(&mut tx, item).await?;
        let residual = match (sent, current.as_ref().and_then(|c| c.data.as_ref())) {
            (Some(sent), Some(data)) => diverged_fields(data, sent),
            _ => RecordData::new(),
        };

        let mut settled = server.clone();
        settled.temp_id = None;
        settled.sync_status = SyncStatus::Synced;

        if !residual.is_empty() {
            let base = values_for(&residual, &server.data);
            reset_queue_payload(&mut tx, item, Some(&residual), Some(&base)).await?;
            settled.apply_patch(&residual, Utc::now());
            write_record(&mut tx, &settled).await?;
        } else {
            if current.is_some() {
                delete_queue_item(&mut tx, item).await?;
            }
            let remaining = count_queue_items_for(&mut tx, settled.entity, &settled.id).await?;
            if remaining == 0 {
                write_record(&mut tx, &settled).await?;
            }
        }

        tx.commit().await?;
        tracing::debug!(entity = %server.entity, id = %server.id, "Settled update");
        Ok(())
    }

    async fn confirm_delete_tx(
        &self,
        item: QueueItemId,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        delete_queue_item(&mut tx, item).await?;
        delete_record(&mut tx, entity, id).await?;
        delete_queue_items_for(&mut tx, entity, id, None).await?;

        tx.commit().await?;
        tracing::debug!(entity = %entity, id = %id, "Confirmed delete");
        Ok(())
    }

    async fn requeue_update_tx(
        &self,
        item: QueueItemId,
        patch: &RecordData,
        base: &RecordData,
    ) -> Result<QueueItemId, CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let old = load_queue_item(&mut tx, item)
            .await?
            .ok_or(CacheError::QueueItemNotFound(item.as_i64()))?;
        delete_queue_item(&mut tx, item).await?;
        let fresh = insert_queue_item(
            &mut tx,
            old.entity,
            Operation::Update,
            &old.entity_id,
            Some(patch),
            Some(base),
        )
        .await?;

        let sql = format!(
            "UPDATE {} SET sync_status = 'pending' WHERE id = ?",
            old.entity.table()
        );
        sqlx::query(&sql)
            .bind(old.entity_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(fresh)
    }

    async fn merge_remote_tx(
        &self,
        changes: &[RemoteChange],
        synced_at: DateTime<Utc>,
    ) -> Result<PullStats, CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut stats = PullStats::default();

        for change in changes {
            match change {
                RemoteChange::Upsert(remote) => {
                    match load_record(&mut tx, remote.entity, &remote.id).await? {
                        Some(local) if local.is_pending() => stats.kept_pending += 1,
                        _ => {
                            let mut record = remote.clone();
                            record.sync_status = SyncStatus::Synced;
                            record.temp_id = None;
                            write_record(&mut tx, &record).await?;
                            stats.applied += 1;
                        }
                    }
                }
                RemoteChange::Tombstone { entity, id } => {
                    match load_record(&mut tx, *entity, id).await? {
                        Some(local) if local.is_pending() => stats.kept_pending += 1,
                        Some(_) => {
                            delete_record(&mut tx, *entity, id).await?;
                            stats.purged += 1;
                        }
                        None => {}
                    }
                }
            }
        }

        sqlx::query(
            "INSERT INTO sync_metadata (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(LAST_SYNC_KEY)
        .bind(format_datetime(&synced_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stats)
    }

    async fn sweep_queue_tx(&self, policy: SweepPolicy) -> Result<u64, CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query("SELECT * FROM sync_queue ORDER BY id ASC")
            .fetch_all(&mut *tx)
            .await?;

        let mut swept = 0;
        for row in &rows {
            let item = queue_item_from_row(row)?;
            let expired = item.rejected
                || item.attempts > policy.max_attempts
                || item.created_at < policy.created_before;
            if expired {
                tracing::debug!(
                    queue_item = %item.id,
                    entity = %item.entity,
                    entity_id = %item.entity_id,
                    attempts = item.attempts,
                    rejected = item.rejected,
                    "Sweeping queue item"
                );
                delete_queue_item(&mut tx, item.id).await?;
                swept += 1;
            }
        }

        tx.commit().await?;
        Ok(swept)
    }
}

// ============================================================================
// ILocalStore implementation
// ============================================================================

#[async_trait::async_trait]
impl ILocalStore for SqliteLocalStore {
    // --- Reads ---

    async fn get_record(
        &self,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<Option<LocalRecord>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(CacheError::from)?;
        Ok(load_record(&mut conn, entity, id).await?)
    }

    async fn list_records(
        &self,
        entity: EntityKind,
        include_deleted: bool,
    ) -> Result<Vec<LocalRecord>, StoreError> {
        let filter = if include_deleted {
            ""
        } else {
            " WHERE is_deleted = 0"
        };
        let sql = format!(
            "SELECT * FROM {}{} ORDER BY created_at ASC, id ASC",
            entity.table(),
            filter
        );

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(CacheError::from)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(record_from_row(entity, row)?);
        }
        Ok(records)
    }

    async fn queue_items(
        &self,
        entity: Option<EntityKind>,
    ) -> Result<Vec<SyncQueueItem>, StoreError> {
        let rows = match entity {
            Some(kind) => {
                sqlx::query("SELECT * FROM sync_queue WHERE entity = ? ORDER BY id ASC")
                    .bind(kind.name())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM sync_queue ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(CacheError::from)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(queue_item_from_row(row)?);
        }
        Ok(items)
    }

    async fn queue_len(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(CacheError::from)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn last_sync_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM sync_metadata WHERE key = ?")
                .bind(LAST_SYNC_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(CacheError::from)?;
        Ok(parse_optional_datetime(value)?)
    }

    // --- Mutation gateway ---

    async fn save_synced(&self, record: &LocalRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await.map_err(CacheError::from)?;

        let mut synced = record.clone();
        synced.sync_status = SyncStatus::Synced;
        synced.temp_id = None;
        synced.is_deleted = false;
        synced.deleted_at = None;
        write_record(&mut conn, &synced).await?;
        Ok(())
    }

    async fn stage_create(&self, record: &LocalRecord) -> Result<QueueItemId, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(CacheError::from)?;

        write_record(&mut tx, record).await?;
        let item = insert_queue_item(
            &mut tx,
            record.entity,
            Operation::Create,
            &record.id,
            Some(&record.data),
            None,
        )
        .await?;

        tx.commit().await.map_err(CacheError::from)?;
        Ok(item)
    }

    async fn stage_update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        patch: &RecordData,
    ) -> Result<LocalRecord, StoreError> {
        Ok(self.stage_update_tx(entity, id, patch).await?)
    }

    async fn stage_delete(
        &self,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<DeleteOutcome, StoreError> {
        Ok(self.stage_delete_tx(entity, id).await?)
    }

    async fn purge_record(&self, entity: EntityKind, id: &RecordId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await.map_err(CacheError::from)?;
        delete_record(&mut conn, entity, id).await?;
        Ok(())
    }

    // --- Push reconciler ---

    async fn confirm_create(
        &self,
        item: QueueItemId,
        temp_id: &RecordId,
        sent: &RecordData,
        server: &LocalRecord,
    ) -> Result<(), StoreError> {
        Ok(self.confirm_create_tx(item, temp_id, sent, server).await?)
    }

    async fn settle_update(
        &self,
        item: QueueItemId,
        sent: Option<&RecordData>,
        server: &LocalRecord,
    ) -> Result<(), StoreError> {
        Ok(self.settle_update_tx(item, sent, server).await?)
    }

    async fn confirm_delete(
        &self,
        item: QueueItemId,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<(), StoreError> {
        Ok(self.confirm_delete_tx(item, entity, id).await?)
    }

    async fn record_failure(
        &self,
        item: QueueItemId,
        error: &str,
        rejected: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "UPDATE sync_queue SET attempts = attempts + 1, last_error = ?, \
             last_attempt_at = ?, rejected = (rejected OR ?) WHERE id = ?",
        )
        .bind(error)
        .bind(format_datetime(&at))
        .bind(rejected)
        .bind(item.as_i64())
        .execute(&self.pool)
        .await
        .map_err(CacheError::from)?;
        Ok(())
    }

    async fn requeue_update(
        &self,
        item: QueueItemId,
        patch: &RecordData,
        base: &RecordData,
    ) -> Result<QueueItemId, StoreError> {
        Ok(self.requeue_update_tx(item, patch, base).await?)
    }

    // --- Pull reconciler ---

    async fn merge_remote(
        &self,
        changes: &[RemoteChange],
        synced_at: DateTime<Utc>,
    ) -> Result<PullStats, StoreError> {
        Ok(self.merge_remote_tx(changes, synced_at).await?)
    }

    // --- Retention ---

    async fn sweep_queue(&self, policy: SweepPolicy) -> Result<u64, StoreError> {
        Ok(self.sweep_queue_tx(policy).await?)
    }
}
