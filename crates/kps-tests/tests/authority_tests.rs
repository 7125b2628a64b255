//! PostgreSQL authority integration tests.
//!
//! Run with: `cargo test -p kps-tests --test authority_tests --features integration`

#![cfg(feature = "integration")]

use chrono::{TimeDelta, Utc};
use kps_core::ports::RemoteAuthority;
use kps_core::{EffectiveStatus, Error, RecordStatus, Term};
use kps_licensing::{Backup, LicenseKey, ValidationState};
use kps_tests::{
    OTHER_MACHINE, OwnerFixture, RecordFixture, SHOP_MACHINE, TestContext, issue_request,
};

#[tokio::test]
async fn test_insert_and_find() {
    let ctx = TestContext::new().await.expect("Failed to create context");

    let record = RecordFixture::active(SHOP_MACHINE, 0.5, Utc::now());
    ctx.authority.insert(&record).await.expect("insert");

    let found = ctx
        .authority
        .find(&record.key, SHOP_MACHINE)
        .await
        .expect("find")
        .expect("record missing");
    assert_eq!(found.id, record.id);
    assert_eq!(found.duration_days, 0.5);
    assert_eq!(found.owner, record.owner);

    let other = ctx
        .authority
        .find(&record.key, OTHER_MACHINE)
        .await
        .expect("find");
    assert!(other.is_none());
}

#[tokio::test]
async fn test_generate_then_validate() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    ctx.authority
        .upsert_registration(&OwnerFixture::registration(SHOP_MACHINE))
        .await
        .expect("register");

    let issued = ctx
        .issuer()
        .generate(issue_request(SHOP_MACHINE, 30.0))
        .await
        .expect("generate");
    assert_eq!(issued.record.owner, OwnerFixture::shop());

    let decoded = LicenseKey::decode(issued.key_string()).expect("decode");
    assert_eq!(decoded.fingerprint, SHOP_MACHINE);
    let days_left = (decoded.expiry().expect("expiry") - Utc::now()).num_hours() as f64 / 24.0;
    assert!((days_left - 30.0).abs() < 0.1);

    let result = ctx.validator().validate(issued.key_string(), SHOP_MACHINE).await;
    assert!(result.valid);
    assert_eq!(result.state, ValidationState::RemoteConfirmed);
    assert_eq!(result.remote_status, Some(EffectiveStatus::Active));
}

#[tokio::test]
async fn test_transfer_is_atomic_and_preserves_expiry() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let t0 = Utc::now() - TimeDelta::days(3);
    let record = RecordFixture::active(SHOP_MACHINE, 10.0, t0);
    ctx.authority.insert(&record).await.expect("insert");

    let moved = ctx
        .issuer()
        .transfer(&record.key, OTHER_MACHINE)
        .await
        .expect("transfer");
    assert_eq!(
        moved.key.expiry_ms,
        (t0 + TimeDelta::days(10)).timestamp_millis()
    );

    let old = ctx
        .authority
        .find(&record.key, SHOP_MACHINE)
        .await
        .expect("find")
        .expect("old record");
    assert_eq!(old.status, RecordStatus::Transferred);
    assert_eq!(old.transferred_to.as_deref(), Some(OTHER_MACHINE));

    let revoked = ctx.validator().validate(&record.key, SHOP_MACHINE).await;
    assert_eq!(revoked.state, ValidationState::RemoteRevoked);
}

#[tokio::test]
async fn test_supersede_rejects_non_active() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let record = RecordFixture::with_status(RecordStatus::Renewed);
    ctx.authority.insert(&record).await.expect("insert");

    let replacement = RecordFixture::active(SHOP_MACHINE, 30.0, Utc::now());
    let err = ctx
        .authority
        .supersede(record.id, RecordStatus::Renewed, None, &replacement)
        .await
        .expect_err("supersede should fail");
    assert!(matches!(err, Error::Conflict(id) if id == record.id));

    // Replacement was rolled back with the status update.
    let missing = ctx
        .authority
        .find(&replacement.key, SHOP_MACHINE)
        .await
        .expect("find");
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_renew_replaces_term() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let issuer = ctx.issuer();
    let original = issuer
        .generate(issue_request(SHOP_MACHINE, 30.0))
        .await
        .expect("generate");

    let renewed = issuer
        .renew(original.key_string(), Term::from_days(365.0).expect("term"), Some("ENTERPRISE"))
        .await
        .expect("renew");
    assert_eq!(renewed.record.plan, "ENTERPRISE");

    let records = ctx.authority.list().await.expect("list");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, RecordStatus::Renewed);
    assert_eq!(records[1].status, RecordStatus::Active);
}

#[tokio::test]
async fn test_backup_roundtrip_between_databases() {
    let source = TestContext::new().await.expect("Failed to create context");
    source
        .issuer()
        .generate(issue_request(SHOP_MACHINE, 30.0))
        .await
        .expect("generate");
    source
        .authority
        .upsert_registration(&OwnerFixture::registration(SHOP_MACHINE))
        .await
        .expect("register");

    let backup = Backup::export(source.authority.as_ref())
        .await
        .expect("export");

    let target = TestContext::new().await.expect("Failed to create context");
    let restored = backup
        .import(target.authority.as_ref())
        .await
        .expect("import");
    assert_eq!(restored, 1);
    // Importing again replaces rather than duplicates.
    backup
        .import(target.authority.as_ref())
        .await
        .expect("import");

    assert_eq!(target.authority.list().await.expect("list").len(), 1);
    assert_eq!(
        target
            .authority
            .registration(SHOP_MACHINE)
            .await
            .expect("registration")
            .map(|r| r.owner),
        Some(OwnerFixture::shop())
    );
}
