//! Queue replay: confirmation, remapping, deferral, conflicts, failures

use serde_json::json;

use medsync_core::config::ConfigBuilder;
use medsync_core::domain::{EntityKind, SyncStats, SyncStatus};
use medsync_core::ports::{ILocalStore, RemoteError};
use medsync_sync::orchestrator::SyncOutcome;

use crate::common::{engine, engine_with, id, record, Engine};

async fn push_stats(engine: &Engine) -> SyncStats {
    match engine.orchestrator.full_sync().await.unwrap() {
        SyncOutcome::Completed(report) => report.push.expect("push ran"),
        other => panic!("expected a completed cycle, got {other:?}"),
    }
}

// ============================================================================
// Creates and temp-id remapping
// ============================================================================

#[tokio::test]
async fn test_offline_vaccination_is_confirmed_under_server_id() {
    let engine = engine(false).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-1", "name": "Amina"}))
        .await;
    let created = engine
        .gateway
        .create(
            EntityKind::Vaccination,
            record(json!({"patientId": "p-1", "vaccine": "BCG"})),
        )
        .await
        .unwrap();
    assert_eq!(created.id, id("temp-1"));

    engine.server.assign_ids(&["srv-42"]);
    engine.connectivity.set_online(true);
    let stats = push_stats(&engine).await;

    assert_eq!(stats.success, 1);
    let records = engine
        .store
        .list_records(EntityKind::Vaccination, true)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id("srv-42"));
    assert!(records[0].temp_id.is_none());
    assert_eq!(records[0].sync_status, SyncStatus::Synced);
    assert_eq!(records[0].data["vaccine"], json!("BCG"));
    assert_eq!(engine.queue_len().await, 0);
}

#[tokio::test]
async fn test_children_follow_their_parent_in_one_cycle() {
    let engine = engine(false).await;
    let patient = engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "Amina"})))
        .await
        .unwrap();
    let consultation = engine
        .gateway
        .create(
            EntityKind::Consultation,
            record(json!({"patientId": patient.id.as_str(), "reason": "fever"})),
        )
        .await
        .unwrap();
    engine
        .gateway
        .create(
            EntityKind::Medicament,
            record(json!({"consultationId": consultation.id.as_str(), "name": "Paracetamol"})),
        )
        .await
        .unwrap();

    engine.server.assign_ids(&["srv-p", "srv-c", "srv-m"]);
    engine.connectivity.set_online(true);
    let stats = push_stats(&engine).await;

    assert_eq!(stats.success, 3);
    assert_eq!(stats.deferred, 0);
    assert_eq!(
        engine.server.get(EntityKind::Consultation, "srv-c").unwrap()["patientId"],
        json!("srv-p")
    );
    assert_eq!(
        engine.server.get(EntityKind::Medicament, "srv-m").unwrap()["consultationId"],
        json!("srv-c")
    );

    let leftovers: Vec<_> = engine
        .local_strings()
        .await
        .into_iter()
        .filter(|s| s.starts_with("temp-"))
        .collect();
    assert!(leftovers.is_empty(), "temp ids left behind: {leftovers:?}");
}

#[tokio::test]
async fn test_child_is_deferred_while_parent_create_fails() {
    let engine = engine(false).await;
    let patient = engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "Amina"})))
        .await
        .unwrap();
    engine
        .gateway
        .create(
            EntityKind::RendezVous,
            record(json!({"patientId": patient.id.as_str(), "at": "2026-10-01T09:00:00Z"})),
        )
        .await
        .unwrap();

    engine.connectivity.set_online(true);
    engine
        .server
        .fail_entity(EntityKind::Patient, Some(RemoteError::Timeout));
    let stats = push_stats(&engine).await;

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.deferred, 1);
    assert!(engine
        .server
        .calls()
        .iter()
        .all(|call| !call.contains("rendez-vous")));
    let items = engine.store.queue_items(None).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].attempts, 1);
    assert_eq!(items[1].attempts, 0, "deferral is not a failed attempt");

    engine.server.fail_entity(EntityKind::Patient, None);
    let stats = push_stats(&engine).await;
    assert_eq!(stats.success, 2);
    assert_eq!(engine.queue_len().await, 0);
}

#[tokio::test]
async fn test_synced_record_is_never_pushed_again() {
    let engine = engine(true).await;
    let created = engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "Amina"})))
        .await
        .unwrap();

    for _ in 0..2 {
        let stats = push_stats(&engine).await;
        assert_eq!(stats, SyncStats::default());
    }

    assert_eq!(engine.server.count(EntityKind::Patient), 1);
    let posts = engine
        .server
        .calls()
        .iter()
        .filter(|call| call.starts_with("POST"))
        .count();
    assert_eq!(posts, 1);
    let stored = engine
        .store
        .get_record(EntityKind::Patient, &created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
}

// ============================================================================
// Updates and conflicts
// ============================================================================

#[tokio::test]
async fn test_diverged_server_value_is_not_overwritten() {
    let engine = engine(false).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-7", "name": "Amina"}))
        .await;
    engine
        .gateway
        .update(EntityKind::Patient, &id("p-7"), record(json!({"name": "Amina B."})))
        .await
        .unwrap();
    engine
        .server
        .edit(EntityKind::Patient, "p-7", "name", json!("Amina K."));

    engine.connectivity.set_online(true);
    let stats = push_stats(&engine).await;

    assert_eq!(stats.conflicts, 1);
    assert_eq!(stats.success, 0);
    assert_eq!(
        engine.server.get(EntityKind::Patient, "p-7").unwrap()["name"],
        json!("Amina K.")
    );
    let conflicts = engine.ledger.snapshot().await;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].fields().to_vec(), vec!["name".to_string()]);
    assert_eq!(conflicts[0].local()["name"], json!("Amina B."));
    assert_eq!(conflicts[0].remote()["name"], json!("Amina K."));
    assert_eq!(engine.queue_len().await, 1);

    let local = engine
        .store
        .get_record(EntityKind::Patient, &id("p-7"))
        .await
        .unwrap()
        .unwrap();
    assert!(local.is_pending(), "pull leaves the pending copy alone");
    assert_eq!(local.data["name"], json!("Amina B."));

    let stats = push_stats(&engine).await;
    assert_eq!(stats.skipped, 1, "held by the open conflict");
    assert!(engine.server.calls().iter().all(|c| !c.starts_with("PATCH")));
}

#[tokio::test]
async fn test_every_diverged_field_is_reported() {
    let engine = engine(false).await;
    engine
        .seed_synced(
            EntityKind::Patient,
            json!({"id": "p-7", "name": "Amina", "phone": "0600", "city": "Rabat"}),
        )
        .await;
    engine
        .gateway
        .update(
            EntityKind::Patient,
            &id("p-7"),
            record(json!({"name": "A", "phone": "0611", "city": "Fes"})),
        )
        .await
        .unwrap();
    engine.server.edit(EntityKind::Patient, "p-7", "name", json!("B"));
    engine.server.edit(EntityKind::Patient, "p-7", "phone", json!("0722"));

    engine.connectivity.set_online(true);
    push_stats(&engine).await;

    let conflicts = engine.ledger.snapshot().await;
    let mut fields = conflicts[0].fields().to_vec();
    fields.sort();
    assert_eq!(fields, vec!["name".to_string(), "phone".to_string()]);
}

#[tokio::test]
async fn test_unrelated_server_change_is_kept() {
    let engine = engine(false).await;
    engine
        .seed_synced(
            EntityKind::Patient,
            json!({"id": "p-7", "name": "Amina", "phone": "0600"}),
        )
        .await;
    engine
        .gateway
        .update(EntityKind::Patient, &id("p-7"), record(json!({"phone": "0611"})))
        .await
        .unwrap();
    engine
        .server
        .edit(EntityKind::Patient, "p-7", "name", json!("Amina K."));

    engine.connectivity.set_online(true);
    let stats = push_stats(&engine).await;

    assert_eq!(stats.success, 1);
    let server = engine.server.get(EntityKind::Patient, "p-7").unwrap();
    assert_eq!(server["name"], json!("Amina K."));
    assert_eq!(server["phone"], json!("0611"));
    let local = engine
        .store
        .get_record(EntityKind::Patient, &id("p-7"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.sync_status, SyncStatus::Synced);
    assert_eq!(local.data["name"], json!("Amina K."));
}

// ============================================================================
// Deletes
// ============================================================================

#[tokio::test]
async fn test_soft_deleted_record_is_purged_after_push() {
    let engine = engine(false).await;
    engine
        .seed_synced(EntityKind::Vaccination, json!({"id": "v-1", "patientId": "p-1"}))
        .await;
    engine
        .gateway
        .delete(EntityKind::Vaccination, &id("v-1"))
        .await
        .unwrap();
    assert!(engine
        .store
        .get_record(EntityKind::Vaccination, &id("v-1"))
        .await
        .unwrap()
        .is_some_and(|r| r.is_deleted));

    engine.connectivity.set_online(true);
    let stats = push_stats(&engine).await;

    assert_eq!(stats.success, 1);
    assert!(engine.server.get(EntityKind::Vaccination, "v-1").is_none());
    assert!(engine
        .store
        .get_record(EntityKind::Vaccination, &id("v-1"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_delete_of_record_already_gone_is_success() {
    let engine = engine(false).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-9", "name": "Gone"}))
        .await;
    engine.gateway.delete(EntityKind::Patient, &id("p-9")).await.unwrap();
    engine.server.remove(EntityKind::Patient, "p-9");

    engine.connectivity.set_online(true);
    let stats = push_stats(&engine).await;

    assert_eq!(stats.success, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(engine.queue_len().await, 0);
}

// ============================================================================
// Failures, backoff and retention
// ============================================================================

#[tokio::test]
async fn test_transport_failure_keeps_item_and_backs_off() {
    let engine = engine_with(false, ConfigBuilder::new().build()).await;
    engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "Amina"})))
        .await
        .unwrap();

    engine.connectivity.set_online(true);
    engine
        .server
        .fail_entity(EntityKind::Patient, Some(RemoteError::Transport("reset".into())));
    let stats = push_stats(&engine).await;
    assert_eq!(stats.errors, 1);

    let items = engine.store.queue_items(None).await.unwrap();
    assert_eq!(items[0].attempts, 1);
    assert!(!items[0].rejected);
    assert!(items[0].last_error.as_deref().unwrap().contains("reset"));

    engine.server.fail_entity(EntityKind::Patient, None);
    let stats = push_stats(&engine).await;
    assert_eq!(stats.skipped, 1, "still inside the backoff window");
    assert_eq!(engine.queue_len().await, 1);
}

#[tokio::test]
async fn test_client_error_rejects_item_until_swept() {
    let engine = engine(false).await;
    engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": ""})))
        .await
        .unwrap();

    engine.connectivity.set_online(true);
    engine.server.fail_entity(
        EntityKind::Patient,
        Some(RemoteError::from_status(422, "name is required")),
    );
    let stats = push_stats(&engine).await;
    assert_eq!(stats.errors, 1);
    assert!(engine.store.queue_items(None).await.unwrap()[0].rejected);

    engine.server.fail_entity(EntityKind::Patient, None);
    let stats = push_stats(&engine).await;
    assert_eq!(stats.skipped, 1, "rejected items are not retried");

    assert_eq!(engine.orchestrator.sweep().await.unwrap(), 1);
    assert_eq!(engine.queue_len().await, 0);
    let records = engine
        .store
        .list_records(EntityKind::Patient, true)
        .await
        .unwrap();
    assert_eq!(records.len(), 1, "the record stays visibly pending");
    assert!(records[0].is_pending());
}

#[tokio::test]
async fn test_correction_after_rejection_is_pushed() {
    let engine = engine(false).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-7", "name": "Amina"}))
        .await;
    engine
        .gateway
        .update(EntityKind::Patient, &id("p-7"), record(json!({"name": ""})))
        .await
        .unwrap();

    engine.connectivity.set_online(true);
    engine.server.fail_entity(
        EntityKind::Patient,
        Some(RemoteError::from_status(422, "name is required")),
    );
    let stats = push_stats(&engine).await;
    assert_eq!(stats.errors, 1);
    engine.server.fail_entity(EntityKind::Patient, None);

    engine
        .gateway
        .update(EntityKind::Patient, &id("p-7"), record(json!({"name": "good"})))
        .await
        .unwrap();
    let items = engine.store.queue_items(None).await.unwrap();
    assert_eq!(items.len(), 1, "the correction replaces the rejected payload");
    assert!(!items[0].rejected);
    assert_eq!(items[0].attempts, 0);

    engine.orchestrator.full_sync().await.unwrap();
    assert_eq!(
        engine.server.get(EntityKind::Patient, "p-7").unwrap()["name"],
        json!("good")
    );
    assert_eq!(engine.queue_len().await, 0);
}

#[tokio::test]
async fn test_sweep_drops_over_attempted_items_only() {
    let engine = engine(false).await;
    for name in ["a", "b"] {
        engine
            .gateway
            .create(EntityKind::Patient, record(json!({"name": name})))
            .await
            .unwrap();
    }
    let items = engine.store.queue_items(None).await.unwrap();
    let now = chrono::Utc::now();
    for _ in 0..11 {
        engine
            .store
            .record_failure(items[0].id, "timeout", false, now)
            .await
            .unwrap();
    }
    for _ in 0..9 {
        engine
            .store
            .record_failure(items[1].id, "timeout", false, now)
            .await
            .unwrap();
    }

    assert_eq!(engine.orchestrator.sweep().await.unwrap(), 1);
    let left = engine.store.queue_items(None).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, items[1].id);
}

#[tokio::test]
async fn test_sweep_drops_expired_items() {
    let config = ConfigBuilder::new().retention_max_age_hours(0).build();
    let engine = engine_with(false, config).await;
    engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "old"})))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    assert_eq!(engine.orchestrator.sweep().await.unwrap(), 1);
    assert_eq!(engine.queue_len().await, 0);
}

#[tokio::test]
async fn test_mixed_offline_session_ends_synced_or_conflicted() {
    let engine = engine(false).await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-1", "name": "One"}))
        .await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-2", "name": "Two"}))
        .await;
    engine
        .seed_synced(EntityKind::Patient, json!({"id": "p-3", "name": "Three"}))
        .await;

    let new_patient = engine
        .gateway
        .create(EntityKind::Patient, record(json!({"name": "Four"})))
        .await
        .unwrap();
    engine
        .gateway
        .update(EntityKind::Patient, &id("p-1"), record(json!({"name": "One!"})))
        .await
        .unwrap();
    engine
        .gateway
        .update(EntityKind::Patient, &id("p-2"), record(json!({"name": "Two!"})))
        .await
        .unwrap();
    engine.gateway.delete(EntityKind::Patient, &id("p-3")).await.unwrap();
    engine
        .gateway
        .create(
            EntityKind::Consultation,
            record(json!({"patientId": new_patient.id.as_str()})),
        )
        .await
        .unwrap();
    engine
        .server
        .edit(EntityKind::Patient, "p-2", "name", json!("Two?"));

    engine.connectivity.set_online(true);
    let stats = push_stats(&engine).await;
    assert_eq!(stats.success, 4);
    assert_eq!(stats.conflicts, 1);

    let conflicted: Vec<_> = engine
        .ledger
        .snapshot()
        .await
        .iter()
        .map(|c| c.record_id().clone())
        .collect();
    for entity in [EntityKind::Patient, EntityKind::Consultation] {
        for record in engine.store.list_records(entity, true).await.unwrap() {
            assert!(
                record.sync_status == SyncStatus::Synced || conflicted.contains(&record.id),
                "{entity} {} neither synced nor conflicted",
                record.id
            );
        }
    }
    assert_eq!(engine.store.list_records(EntityKind::Patient, true).await.unwrap().len(), 3);
}
