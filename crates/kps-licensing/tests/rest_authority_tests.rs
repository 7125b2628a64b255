//! REST authority tests against a mock license store.

use kps_core::ports::RemoteAuthority;
use kps_core::{Error, LicenseRecord, RecordId, RecordStatus};
use kps_licensing::{
    LicenseValidator, RestAuthority, RestConfig, SignatureScheme, TrustPolicy, ValidationState,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "anon-key";
const MACHINE: &str = "SHOP-AB12-CD34";

fn authority(server: &MockServer) -> RestAuthority {
    RestAuthority::new(RestConfig::new(server.uri(), API_KEY)).unwrap()
}

fn row(id: &str, key: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "machine_id": MACHINE,
        "key": key,
        "plan": "PRO",
        "duration_days": 30,
        "status": status,
        "created_at": "2026-01-01T00:00:00Z",
        "shop_name": "Corner Shop",
        "owner_name": null,
        "phone": "555-0100",
        "address": "",
        "transferred_to": null,
        "price": 1500
    })
}

#[tokio::test]
async fn test_find_sends_filters_and_credentials() {
    let server = MockServer::start().await;
    let id = "0192b4a0-0000-7000-8000-000000000001";
    Mock::given(method("GET"))
        .and(path("/rest/v1/licenses"))
        .and(query_param("key", "eq.KPS-K"))
        .and(query_param("machine_id", format!("eq.{}", MACHINE)))
        .and(header("apikey", API_KEY))
        .and(header("authorization", format!("Bearer {}", API_KEY).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(id, "KPS-K", "ACTIVE")])))
        .expect(1)
        .mount(&server)
        .await;

    let record = authority(&server)
        .find("KPS-K", MACHINE)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record.id.as_uuid().to_string(), id);
    assert_eq!(record.status, RecordStatus::Active);
    assert_eq!(record.owner.shop_name, "Corner Shop");
    assert_eq!(record.duration_days, 30.0);
}

#[tokio::test]
async fn test_find_empty_result_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/licenses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    assert!(authority(&server).find("KPS-K", MACHINE).await.unwrap().is_none());
}

#[tokio::test]
async fn test_server_error_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/licenses"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = authority(&server).find("KPS-K", MACHINE).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
}

#[tokio::test]
async fn test_unrecognised_status_reads_as_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/licenses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(
            "0192b4a0-0000-7000-8000-000000000002",
            "KPS-K",
            "SUSPENDED"
        )])))
        .mount(&server)
        .await;

    let record = authority(&server)
        .find("KPS-K", MACHINE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RecordStatus::Unknown);
}

#[tokio::test]
async fn test_update_status_patches_by_id() {
    let server = MockServer::start().await;
    let id = RecordId::new();
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/licenses"))
        .and(query_param("id", format!("eq.{}", id.as_uuid())))
        .and(body_partial_json(json!({
            "status": "TRANSFERRED",
            "transferred_to": "NEWM-0000-1111"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    authority(&server)
        .update_status(id, RecordStatus::Transferred, Some("NEWM-0000-1111"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_restore_merges_duplicates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/licenses"))
        .and(query_param("on_conflict", "id"))
        .and(header_exists("prefer"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let records: Vec<LicenseRecord> = vec![serde_json::from_value(row(
        "0192b4a0-0000-7000-8000-000000000003",
        "KPS-K",
        "RENEWED",
    ))
    .unwrap()];
    assert_eq!(authority(&server).restore(&records).await.unwrap(), 1);
}

#[tokio::test]
async fn test_validator_distinguishes_denied_from_unreachable() {
    let scheme = SignatureScheme::default();
    let expiry = chrono::Utc::now().timestamp_millis() + 86_400_000;
    let key = scheme.seal(MACHINE, expiry, "PRO").encode();

    // Reachable store without the key: authoritative denial.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/licenses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    let validator = LicenseValidator::new(scheme.clone(), TrustPolicy::default())
        .with_authority(Arc::new(authority(&server)));
    let denied = validator.validate(&key, MACHINE).await;
    assert!(!denied.valid);
    assert_eq!(denied.state, ValidationState::RemoteDenied);

    // Store that answers too slowly: fallback to the local verdict.
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/licenses"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&slow)
        .await;
    let validator = LicenseValidator::new(
        scheme,
        TrustPolicy {
            offline_fallback: true,
            remote_timeout: Duration::from_millis(200),
        },
    )
    .with_authority(Arc::new(authority(&slow)));
    let fallback = validator.validate(&key, MACHINE).await;
    assert!(fallback.valid);
    assert_eq!(fallback.state, ValidationState::TrustFallback);
}
