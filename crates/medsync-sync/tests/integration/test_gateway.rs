//! Online/offline routing of create, update and delete

use serde_json::json;

use medsync_core::domain::{EntityKind, Operation, SyncStatus};
use medsync_core::ports::{DeleteOutcome, ILocalStore, RemoteError};
use medsync_sync::SyncError;

use crate::common::{engine, id, record};

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_online_create_returns_server_record() {
    let engine = engine(true).await;

    let created = engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "Amina"})))
        .await
        .unwrap();

    assert!(!created.id.is_temp());
    assert_eq!(created.sync_status, SyncStatus::Synced);
    assert_eq!(engine.server.count(EntityKind::Patient), 1);
    assert_eq!(engine.queue_len().await, 0);
    let stored = engine
        .store
        .get_record(EntityKind::Patient, &created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.data["name"], json!("Amina"));
}

#[tokio::test]
async fn test_offline_create_is_optimistic_and_queued() {
    let engine = engine(false).await;

    let created = engine
        .gateway
        .create(EntityKind::Vaccination, record(json!({"vaccine": "BCG"})))
        .await
        .unwrap();

    assert_eq!(created.id.as_str(), "temp-1");
    assert_eq!(created.temp_id, Some(id("temp-1")));
    assert!(created.is_pending());

    let items = engine.store.queue_items(None).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].operation, Operation::Create);
    assert_eq!(items[0].entity_id, id("temp-1"));
    assert!(engine.server.calls().is_empty());
}

#[tokio::test]
async fn test_create_referencing_unconfirmed_parent_stays_offline() {
    let engine = engine(false).await;
    let patient = engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "Amina"})))
        .await
        .unwrap();

    engine.connectivity.set_online(true);
    let consultation = engine
        .gateway
        .create(
            EntityKind::Consultation,
            record(json!({"patientId": patient.id.as_str(), "reason": "fever"})),
        )
        .await
        .unwrap();

    assert!(consultation.id.is_temp());
    assert!(engine.server.calls().is_empty());
    assert_eq!(engine.queue_len().await, 2);
}

#[tokio::test]
async fn test_retryable_failure_falls_back_to_queue() {
    let engine = engine(true).await;
    engine
        .server
        .fail_with(Some(RemoteError::from_status(503, "maintenance")));

    let created = engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "Amina"})))
        .await
        .unwrap();

    assert!(created.is_unconfirmed());
    assert_eq!(engine.queue_len().await, 1);
}

#[tokio::test]
async fn test_client_error_is_surfaced() {
    let engine = engine(true).await;
    engine
        .server
        .fail_with(Some(RemoteError::from_status(422, "name is required")));

    let err = engine
        .gateway
        .create(EntityKind::Patient, record(json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Rejected { entity: EntityKind::Patient, .. }));
    assert_eq!(engine.queue_len().await, 0);
    assert!(engine
        .store
        .list_records(EntityKind::Patient, true)
        .await
        .unwrap()
        .is_empty());
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_offline_create_then_update_folds_into_one_item() {
    let engine = engine(false).await;
    let created = engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "Amina"})))
        .await
        .unwrap();

    engine
        .gateway
        .update(
            EntityKind::Patient,
            &created.id,
            record(json!({"phone": "0611223344"})),
        )
        .await
        .unwrap();

    let items = engine.store.queue_items(None).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].operation, Operation::Create);
    let data = items[0].data.as_ref().unwrap();
    assert_eq!(data["name"], json!("Amina"));
    assert_eq!(data["phone"], json!("0611223344"));
}

#[tokio::test]
async fn test_two_offline_updates_of_synced_record_share_one_item() {
    let engine = engine(false).await;
    engine
        .seed_synced(
            EntityKind::Patient,
            json!({"id": "p-7", "name": "Amina", "phone": "0600000000"}),
        )
        .await;

    let p7 = id("p-7");
    engine
        .gateway
        .update(EntityKind::Patient, &p7, record(json!({"name": "Amina B."})))
        .await
        .unwrap();
    let updated = engine
        .gateway
        .update(EntityKind::Patient, &p7, record(json!({"phone": "0611223344"})))
        .await
        .unwrap();

    assert!(updated.is_pending());
    assert_eq!(updated.data["name"], json!("Amina B."));

    let items = engine.store.queue_items(None).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].entity_id, p7);
    assert_eq!(items[0].operation, Operation::Update);
    let patch = items[0].data.as_ref().unwrap();
    assert_eq!(patch["name"], json!("Amina B."));
    assert_eq!(patch["phone"], json!("0611223344"));
    let base = items[0].base.as_ref().unwrap();
    assert_eq!(base["name"], json!("Amina"));
    assert_eq!(base["phone"], json!("0600000000"));
}

#[tokio::test]
async fn test_online_update_of_synced_record_is_direct() {
    let engine = engine(true).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-7", "name": "Amina"}))
        .await;

    let updated = engine
        .gateway
        .update(
            EntityKind::Patient,
            &id("p-7"),
            record(json!({"name": "Amina B."})),
        )
        .await
        .unwrap();

    assert_eq!(updated.sync_status, SyncStatus::Synced);
    assert_eq!(
        engine.server.get(EntityKind::Patient, "p-7").unwrap()["name"],
        json!("Amina B.")
    );
    assert_eq!(engine.queue_len().await, 0);
}

#[tokio::test]
async fn test_pending_record_keeps_offline_path_while_online() {
    let engine = engine(false).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-7", "name": "Amina"}))
        .await;
    engine
        .gateway
        .update(EntityKind::Patient, &id("p-7"), record(json!({"name": "A"})))
        .await
        .unwrap();

    engine.connectivity.set_online(true);
    engine
        .gateway
        .update(EntityKind::Patient, &id("p-7"), record(json!({"name": "B"})))
        .await
        .unwrap();

    assert!(engine.server.calls().is_empty());
    let items = engine.store.queue_items(None).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].data.as_ref().unwrap()["name"], json!("B"));
}

#[tokio::test]
async fn test_offline_update_of_missing_record_is_not_found() {
    let engine = engine(false).await;

    let err = engine
        .gateway
        .update(EntityKind::Patient, &id("nope"), record(json!({"name": "x"})))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NotFound { .. }));
    assert_eq!(engine.queue_len().await, 0);
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_offline_delete_of_unsent_record_purges_everything() {
    let engine = engine(false).await;
    let created = engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "Amina"})))
        .await
        .unwrap();

    let outcome = engine
        .gateway
        .delete(EntityKind::Patient, &created.id)
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::Purged);
    assert!(engine.gateway.get(EntityKind::Patient, &created.id).await.unwrap().is_none());
    assert_eq!(engine.queue_len().await, 0);

    engine.connectivity.set_online(true);
    engine.orchestrator.full_sync().await.unwrap();
    assert!(engine.server.calls().is_empty());
}

#[tokio::test]
async fn test_offline_delete_of_synced_record_soft_deletes() {
    let engine = engine(false).await;
    engine
        .seed_synced(EntityKind::RendezVous, json!({"id": "rv-1", "patientId": "p-1"}))
        .await;
    engine
        .gateway
        .update(
            EntityKind::RendezVous,
            &id("rv-1"),
            record(json!({"status": "moved"})),
        )
        .await
        .unwrap();

    let outcome = engine
        .gateway
        .delete(EntityKind::RendezVous, &id("rv-1"))
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::SoftDeleted);
    let record = engine
        .gateway
        .get(EntityKind::RendezVous, &id("rv-1"))
        .await
        .unwrap()
        .unwrap();
    assert!(record.is_deleted);
    assert!(record.deleted_at.is_some());
    assert!(record.is_pending());
    assert!(engine.gateway.list(EntityKind::RendezVous).await.unwrap().is_empty());

    let items = engine.store.queue_items(None).await.unwrap();
    assert_eq!(items.len(), 1, "queued update is superseded by the delete");
    assert_eq!(items[0].operation, Operation::Delete);
    assert!(items[0].data.is_none());
}

#[tokio::test]
async fn test_deleting_twice_offline_is_not_found() {
    let engine = engine(false).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-1", "name": "Amina"}))
        .await;

    engine.gateway.delete(EntityKind::Patient, &id("p-1")).await.unwrap();
    let err = engine
        .gateway
        .delete(EntityKind::Patient, &id("p-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
    assert_eq!(engine.queue_len().await, 1);
}

#[tokio::test]
async fn test_online_delete_tolerates_missing_server_record() {
    let engine = engine(true).await;
    engine
        .seed_synced(EntityKind::Medicament, json!({"id": "m-1", "consultationId": "c-1"}))
        .await;
    engine.server.remove(EntityKind::Medicament, "m-1");

    let outcome = engine
        .gateway
        .delete(EntityKind::Medicament, &id("m-1"))
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::Purged);
    assert!(engine
        .gateway
        .get(EntityKind::Medicament, &id("m-1"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(engine.queue_len().await, 0);
}
