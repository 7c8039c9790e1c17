//! Shared fixtures: fake clinic server and a fully wired engine

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use medsync_cache::{DatabasePool, SqliteLocalStore};
use medsync_core::config::{Config, ConfigBuilder};
use medsync_core::domain::{is_temp_id, EntityKind, RecordData, RecordId};
use medsync_core::ports::{ILocalStore, IRemoteApi, RemoteError};
use medsync_sync::connectivity::ManualConnectivity;
use medsync_sync::gateway::MutationGateway;
use medsync_sync::ledger::ConflictLedger;
use medsync_sync::orchestrator::SyncOrchestrator;

// ============================================================================
// FakeServer
// ============================================================================

#[derive(Default)]
struct ServerState {
    records: BTreeMap<(EntityKind, String), RecordData>,
    tombstones: BTreeMap<(EntityKind, String), RecordData>,
    assigned_ids: VecDeque<String>,
    failure: Option<RemoteError>,
    entity_failures: BTreeMap<EntityKind, RemoteError>,
    calls: Vec<String>,
}

/// In-memory clinic backend
///
/// Refuses payloads that still reference temp ids, the way the real server
/// refuses unknown foreign keys.
#[derive(Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
    next_id: AtomicU64,
}

fn references_temp_id(data: &RecordData) -> bool {
    data.values().any(|v| v.as_str().is_some_and(is_temp_id))
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ids handed out by the next creates, in order
    pub fn assign_ids(&self, ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.assigned_ids.extend(ids.iter().map(|s| s.to_string()));
    }

    /// Makes every call fail with `err` until cleared with `None`
    pub fn fail_with(&self, err: Option<RemoteError>) {
        self.state.lock().unwrap().failure = err;
    }

    /// Makes mutating calls for one entity kind fail until cleared
    pub fn fail_entity(&self, entity: EntityKind, err: Option<RemoteError>) {
        let mut state = self.state.lock().unwrap();
        match err {
            Some(err) => state.entity_failures.insert(entity, err),
            None => state.entity_failures.remove(&entity),
        };
    }

    /// Inserts or replaces a record as if another client wrote it
    pub fn seed(&self, entity: EntityKind, value: Value) -> RecordData {
        let mut data = record(value);
        let stamp = now_string();
        data.entry("createdAt").or_insert_with(|| json!(stamp.clone()));
        data.insert("updatedAt".into(), json!(stamp));
        let id = data["id"].as_str().unwrap().to_string();
        let mut state = self.state.lock().unwrap();
        state.tombstones.remove(&(entity, id.clone()));
        state.records.insert((entity, id), data.clone());
        data
    }

    /// Changes one field server-side
    pub fn edit(&self, entity: EntityKind, id: &str, field: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        let data = state
            .records
            .get_mut(&(entity, id.to_string()))
            .expect("record on server");
        data.insert(field.to_string(), value);
        data.insert("updatedAt".into(), json!(now_string()));
    }

    /// Deletes a record server-side, leaving a tombstone for pulls
    pub fn remove(&self, entity: EntityKind, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.records.remove(&(entity, id.to_string()));
        state.tombstones.insert(
            (entity, id.to_string()),
            record(json!({"id": id, "isDeleted": true, "updatedAt": now_string()})),
        );
    }

    pub fn get(&self, entity: EntityKind, id: &str) -> Option<RecordData> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&(entity, id.to_string()))
            .cloned()
    }

    pub fn count(&self, entity: EntityKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .records
            .keys()
            .filter(|(e, _)| *e == entity)
            .count()
    }

    /// Mutating calls received so far, as `METHOD endpoint[/id]`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn begin(
        &self,
        entity: EntityKind,
        call: String,
    ) -> Result<std::sync::MutexGuard<'_, ServerState>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.failure.clone() {
            return Err(err);
        }
        if let Some(err) = state.entity_failures.get(&entity).cloned() {
            return Err(err);
        }
        state.calls.push(call);
        Ok(state)
    }
}

#[async_trait::async_trait]
impl IRemoteApi for FakeServer {
    async fn create(&self, entity: EntityKind, data: &RecordData) -> Result<RecordData, RemoteError> {
        let mut state = self.begin(entity, format!("POST {}", entity.endpoint()))?;
        if references_temp_id(data) {
            return Err(RemoteError::from_status(422, "unknown reference"));
        }
        let id = state.assigned_ids.pop_front().unwrap_or_else(|| {
            format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        });
        let stamp = now_string();
        let mut stored = data.clone();
        stored.insert("id".into(), json!(id));
        stored.insert("createdAt".into(), json!(stamp));
        stored.insert("updatedAt".into(), json!(stamp));
        state.records.insert((entity, id), stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        patch: &RecordData,
    ) -> Result<RecordData, RemoteError> {
        let mut state = self.begin(entity, format!("PATCH {}/{}", entity.endpoint(), id))?;
        if references_temp_id(patch) {
            return Err(RemoteError::from_status(422, "unknown reference"));
        }
        let stored = state
            .records
            .get_mut(&(entity, id.to_string()))
            .ok_or(RemoteError::NotFound)?;
        for (key, value) in patch {
            stored.insert(key.clone(), value.clone());
        }
        stored.insert("updatedAt".into(), json!(now_string()));
        Ok(stored.clone())
    }

    async fn delete(&self, entity: EntityKind, id: &RecordId) -> Result<(), RemoteError> {
        let mut state = self.begin(entity, format!("DELETE {}/{}", entity.endpoint(), id))?;
        let key = (entity, id.to_string());
        state.records.remove(&key).ok_or(RemoteError::NotFound)?;
        state.tombstones.insert(
            key,
            record(json!({"id": id.as_str(), "isDeleted": true, "updatedAt": now_string()})),
        );
        Ok(())
    }

    async fn fetch(&self, entity: EntityKind, id: &RecordId) -> Result<RecordData, RemoteError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = state.failure.clone() {
            return Err(err);
        }
        state
            .records
            .get(&(entity, id.to_string()))
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn list_changed(
        &self,
        entity: EntityKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecordData>, RemoteError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = state.failure.clone() {
            return Err(err);
        }
        let changed = |data: &&RecordData| match since {
            None => true,
            Some(since) => data["updatedAt"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .is_some_and(|t| t >= since),
        };
        Ok(state
            .records
            .iter()
            .chain(state.tombstones.iter())
            .filter(|((e, _), _)| *e == entity)
            .map(|(_, data)| data)
            .filter(changed)
            .cloned()
            .collect())
    }

    async fn health(&self) -> Result<(), RemoteError> {
        match self.state.lock().unwrap().failure.clone() {
            Some(RemoteError::Transport(msg)) => Err(RemoteError::Transport(msg)),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Engine harness
// ============================================================================

pub struct Engine {
    pub store: Arc<SqliteLocalStore>,
    pub server: Arc<FakeServer>,
    pub connectivity: Arc<ManualConnectivity>,
    pub ledger: Arc<ConflictLedger>,
    pub gateway: MutationGateway,
    pub orchestrator: Arc<SyncOrchestrator>,
}

/// Config with no retry backoff and no settle delay
pub fn test_config() -> Config {
    ConfigBuilder::new()
        .sync_backoff_base_secs(0)
        .connectivity_settle_delay_secs(0)
        .sync_pull_interval_secs(3600)
        .build()
}

pub async fn engine(online: bool) -> Engine {
    engine_with(online, test_config()).await
}

pub async fn engine_with(online: bool, config: Config) -> Engine {
    let pool = DatabasePool::in_memory().await.expect("in-memory db");
    let store = Arc::new(SqliteLocalStore::new(pool.pool().clone()));
    let server = FakeServer::new();
    let connectivity = Arc::new(ManualConnectivity::new(online));
    let ledger = Arc::new(ConflictLedger::new(store.clone()));

    let counter = Arc::new(AtomicU64::new(0));
    let gateway = MutationGateway::new(store.clone(), server.clone(), connectivity.clone())
        .with_temp_ids(Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            RecordId::new(format!("temp-{n}")).unwrap()
        }));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        store.clone(),
        server.clone(),
        connectivity.clone(),
        ledger.clone(),
        &config,
    ));

    Engine {
        store,
        server,
        connectivity,
        ledger,
        gateway,
        orchestrator,
    }
}

impl Engine {
    /// Seeds a record on the server and mirrors it locally as synced
    pub async fn seed_synced(&self, entity: EntityKind, value: Value) -> RecordData {
        let data = self.server.seed(entity, value);
        let record = medsync_core::domain::LocalRecord::from_server(entity, data.clone()).unwrap();
        self.store.save_synced(&record).await.unwrap();
        data
    }

    pub async fn queue_len(&self) -> u64 {
        self.store.queue_len().await.unwrap()
    }

    /// Every string stored locally, records and queue payloads alike
    pub async fn local_strings(&self) -> Vec<String> {
        let mut out = Vec::new();
        for entity in EntityKind::ALL {
            for record in self.store.list_records(entity, true).await.unwrap() {
                out.push(record.id.to_string());
                if let Some(temp) = record.temp_id {
                    out.push(temp.to_string());
                }
                collect_strings(&Value::Object(record.data), &mut out);
            }
        }
        for item in self.store.queue_items(None).await.unwrap() {
            out.push(item.entity_id.to_string());
            for payload in [item.data, item.base].into_iter().flatten() {
                collect_strings(&Value::Object(payload), &mut out);
            }
        }
        out
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

pub fn record(value: Value) -> RecordData {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

pub fn id(value: &str) -> RecordId {
    RecordId::new(value).unwrap()
}
