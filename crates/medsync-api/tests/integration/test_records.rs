//! Per-record calls: create, update, delete, fetch

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use medsync_api::{RestClient, RestRemoteApi};
use medsync_core::domain::{EntityKind, RecordId};
use medsync_core::ports::{IRemoteApi, RemoteError};

use crate::common::{patient_json, record, setup_clinic_mock, setup_remote_api, TEST_TOKEN};

// ============================================================================
// Success paths
// ============================================================================

#[tokio::test]
async fn test_create_posts_payload_and_returns_server_record() {
    let (server, api) = setup_remote_api().await;

    Mock::given(method("POST"))
        .and(path("/patients"))
        .and(header("authorization", format!("Bearer {TEST_TOKEN}").as_str()))
        .and(body_json(json!({"id": "temp-1", "name": "Amina"})))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(patient_json(
                "srv-1",
                "Amina",
                "2026-09-01T08:00:00.000Z",
            )),
        )
        .expect(1)
        .mount(&server)
        .await;

    let sent = record(json!({"id": "temp-1", "name": "Amina"}));
    let created = api.create(EntityKind::Patient, &sent).await.unwrap();
    assert_eq!(created["id"], json!("srv-1"));
    assert_eq!(created["name"], json!("Amina"));
}

#[tokio::test]
async fn test_create_accepts_data_envelope() {
    let (server, client) = setup_clinic_mock().await;

    Mock::given(method("POST"))
        .and(path("/consultations"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "data": {"id": "c-9", "patientId": "srv-1"}
        })))
        .mount(&server)
        .await;

    let created = client
        .create(EntityKind::Consultation, &record(json!({"patientId": "srv-1"})))
        .await
        .unwrap();
    assert_eq!(created["id"], json!("c-9"));
}

#[tokio::test]
async fn test_update_sends_patch_to_record_path() {
    let (server, api) = setup_remote_api().await;

    Mock::given(method("PATCH"))
        .and(path("/rendez-vous/rv-3"))
        .and(body_json(json!({"status": "confirmed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "rv-3",
            "status": "confirmed",
            "updatedAt": "2026-09-02T10:00:00.000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let id = RecordId::new("rv-3").unwrap();
    let updated = api
        .update(
            EntityKind::RendezVous,
            &id,
            &record(json!({"status": "confirmed"})),
        )
        .await
        .unwrap();
    assert_eq!(updated["status"], json!("confirmed"));
}

#[tokio::test]
async fn test_delete_accepts_empty_body() {
    let (server, api) = setup_remote_api().await;

    Mock::given(method("DELETE"))
        .and(path("/medicaments/m-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let id = RecordId::new("m-1").unwrap();
    api.delete(EntityKind::Medicament, &id).await.unwrap();
}

#[tokio::test]
async fn test_fetch_returns_current_server_state() {
    let (server, api) = setup_remote_api().await;

    Mock::given(method("GET"))
        .and(path("/patients/srv-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(patient_json(
            "srv-1",
            "Amina B.",
            "2026-09-03T12:00:00.000Z",
        )))
        .mount(&server)
        .await;

    let id = RecordId::new("srv-1").unwrap();
    let fetched = api.fetch(EntityKind::Patient, &id).await.unwrap();
    assert_eq!(fetched["name"], json!("Amina B."));
}

// ============================================================================
// Error classification
// ============================================================================

#[tokio::test]
async fn test_not_found_is_classified() {
    let (server, api) = setup_remote_api().await;

    Mock::given(method("DELETE"))
        .and(path("/patients/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;

    let id = RecordId::new("gone").unwrap();
    let err = api.delete(EntityKind::Patient, &id).await.unwrap_err();
    assert!(matches!(err, RemoteError::NotFound));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_validation_error_is_client_error() {
    let (server, api) = setup_remote_api().await;

    Mock::given(method("POST"))
        .and(path("/vaccinations"))
        .respond_with(ResponseTemplate::new(422).set_body_string("vaccine is required"))
        .mount(&server)
        .await;

    let err = api
        .create(EntityKind::Vaccination, &record(json!({"patientId": "p"})))
        .await
        .unwrap_err();
    match &err {
        RemoteError::Client { status, message } => {
            assert_eq!(*status, 422);
            assert!(message.contains("vaccine is required"));
        }
        other => panic!("expected client error, got {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let (server, api) = setup_remote_api().await;

    Mock::given(method("PATCH"))
        .and(path("/patients/srv-1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let id = RecordId::new("srv-1").unwrap();
    let err = api
        .update(EntityKind::Patient, &id, &record(json!({"name": "x"})))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let (server, api) = setup_remote_api().await;

    Mock::given(method("GET"))
        .and(path("/patients/srv-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let id = RecordId::new("srv-1").unwrap();
    let err = api.fetch(EntityKind::Patient, &id).await.unwrap_err();
    assert!(matches!(err, RemoteError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let client = RestClient::new("http://127.0.0.1:9").unwrap();
    let api = RestRemoteApi::new(client, "/health", Duration::from_millis(500));

    let err = api
        .create(EntityKind::Patient, &record(json!({"name": "x"})))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        RemoteError::Transport(_) | RemoteError::Timeout
    ));
}
