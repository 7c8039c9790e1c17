//! Shared test helpers for clinic API integration tests
//!
//! Each helper starts a wiremock server and returns a client or adapter
//! pointing at it.

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::MockServer;

use medsync_api::{RestClient, RestRemoteApi};

pub const TEST_TOKEN: &str = "test-access-token";

/// Starts a mock server and returns a (MockServer, RestClient) tuple
pub async fn setup_clinic_mock() -> (MockServer, RestClient) {
    let server = MockServer::start().await;
    let client = RestClient::new(server.uri())
        .expect("client")
        .with_access_token(TEST_TOKEN);
    (server, client)
}

/// Starts a mock server and returns the port adapter over it
pub async fn setup_remote_api() -> (MockServer, RestRemoteApi) {
    let (server, client) = setup_clinic_mock().await;
    let api = RestRemoteApi::new(client, "/health", Duration::from_millis(500));
    (server, api)
}

/// A patient record as the server returns it
pub fn patient_json(id: &str, name: &str, updated_at: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "phone": "0600000000",
        "createdAt": "2026-09-01T08:00:00.000Z",
        "updatedAt": updated_at
    })
}

/// Turns a JSON literal into a record payload
pub fn record(value: Value) -> medsync_core::domain::RecordData {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}
