//! Merging server changes into the local store

use serde_json::json;

use medsync_core::domain::{EntityKind, SyncStatus};
use medsync_core::ports::{ILocalStore, RemoteError};
use medsync_sync::pull::PullReconciler;

use crate::common::{engine, id, record};

#[tokio::test]
async fn test_first_pull_fetches_everything() {
    let engine = engine(true).await;
    engine
        .server
        .seed(EntityKind::Patient, json!({"id": "p-1", "name": "Amina"}));
    engine
        .server
        .seed(EntityKind::Vaccination, json!({"id": "v-1", "patientId": "p-1"}));
    let pull = PullReconciler::new(engine.store.clone(), engine.server.clone());

    assert!(engine.store.last_sync_timestamp().await.unwrap().is_none());
    let stats = pull.pull().await.unwrap();

    assert_eq!(stats.applied, 2);
    assert!(engine.store.last_sync_timestamp().await.unwrap().is_some());
    let patients = engine.gateway.list(EntityKind::Patient).await.unwrap();
    assert_eq!(patients.len(), 1);
    assert_eq!(patients[0].sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_server_wins_over_synced_copy() {
    let engine = engine(true).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-1", "name": "Amina"}))
        .await;
    let pull = PullReconciler::new(engine.store.clone(), engine.server.clone());
    pull.pull().await.unwrap();

    engine
        .server
        .edit(EntityKind::Patient, "p-1", "name", json!("Amina K."));
    let stats = pull.pull().await.unwrap();

    assert_eq!(stats.applied, 1, "only the changed record comes back");
    let local = engine
        .gateway
        .get(EntityKind::Patient, &id("p-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.data["name"], json!("Amina K."));
}

#[tokio::test]
async fn test_pending_copy_is_left_untouched() {
    let engine = engine(false).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-1", "name": "Amina"}))
        .await;
    engine
        .gateway
        .update(EntityKind::Patient, &id("p-1"), record(json!({"name": "Mine"})))
        .await
        .unwrap();
    engine
        .server
        .edit(EntityKind::Patient, "p-1", "name", json!("Theirs"));

    let pull = PullReconciler::new(engine.store.clone(), engine.server.clone());
    let stats = pull.pull().await.unwrap();

    assert_eq!(stats.kept_pending, 1);
    let local = engine
        .gateway
        .get(EntityKind::Patient, &id("p-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.data["name"], json!("Mine"));
    assert!(local.is_pending());
    assert_eq!(engine.queue_len().await, 1);
}

#[tokio::test]
async fn test_server_tombstone_purges_synced_copy() {
    let engine = engine(true).await;
    engine
        .seed_synced(EntityKind::Consultation, json!({"id": "c-1", "patientId": "p-1"}))
        .await;
    engine
        .seed_synced(EntityKind::Consultation, json!({"id": "c-2", "patientId": "p-1"}))
        .await;
    engine.server.remove(EntityKind::Consultation, "c-1");

    let pull = PullReconciler::new(engine.store.clone(), engine.server.clone());
    let stats = pull.pull().await.unwrap();

    assert_eq!(stats.purged, 1);
    assert!(engine
        .gateway
        .get(EntityKind::Consultation, &id("c-1"))
        .await
        .unwrap()
        .is_none());
    assert!(engine
        .gateway
        .get(EntityKind::Consultation, &id("c-2"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_failed_pull_changes_nothing() {
    let engine = engine(true).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-1", "name": "Amina"}))
        .await;
    let pull = PullReconciler::new(engine.store.clone(), engine.server.clone());
    pull.pull().await.unwrap();
    let mark = engine.store.last_sync_timestamp().await.unwrap();

    engine
        .server
        .edit(EntityKind::Patient, "p-1", "name", json!("Amina K."));
    engine
        .server
        .fail_with(Some(RemoteError::from_status(502, "bad gateway")));
    assert!(pull.pull().await.is_err());

    assert_eq!(engine.store.last_sync_timestamp().await.unwrap(), mark);
    let local = engine
        .gateway
        .get(EntityKind::Patient, &id("p-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.data["name"], json!("Amina"));

    engine.server.fail_with(None);
    pull.pull().await.unwrap();
    let local = engine
        .gateway
        .get(EntityKind::Patient, &id("p-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.data["name"], json!("Amina K."));
}
