// ABOUTME: Integration tests for the encrypted credential store
// ABOUTME: Covers round trips, expiry-driven refresh, invalidation, and removal
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::Row;

use huddlebot::errors::AppError;
use huddlebot::models::{Provider, TenantId};
use huddlebot::oauth::TokenRefresher;
use huddlebot::tokens::CredentialStore;

use common::{test_database, ScriptedRefresher};

#[tokio::test]
async fn store_and_get_round_trip() -> anyhow::Result<()> {
    let db = test_database().await;
    let store = CredentialStore::new(Arc::clone(&db), Arc::new(ScriptedRefresher::rejecting()));
    let tenant = TenantId::new();
    let expires_at = Utc::now() + Duration::hours(1);

    store
        .store(
            tenant,
            Provider::Calendar,
            "access-token-value",
            Some("refresh-token-value"),
            Some(expires_at),
            Some("calendar.read"),
        )
        .await?;

    let credential = store
        .get(tenant, Provider::Calendar)
        .await?
        .expect("Credential should exist");
    assert_eq!(credential.access_token, "access-token-value");
    assert_eq!(credential.refresh_token.as_deref(), Some("refresh-token-value"));
    assert_eq!(credential.scope, "calendar.read");
    assert!(credential.is_valid);
    // SQLite stores sub-second precision; compare at second resolution
    assert_eq!(
        credential.expires_at.unwrap().timestamp(),
        expires_at.timestamp()
    );
    Ok(())
}

#[tokio::test]
async fn tokens_are_encrypted_at_rest() {
    let db = test_database().await;
    let store = CredentialStore::new(Arc::clone(&db), Arc::new(ScriptedRefresher::rejecting()));
    let tenant_a = TenantId::new();
    let tenant_b = TenantId::new();

    for tenant in [tenant_a, tenant_b] {
        store
            .store(tenant, Provider::Mail, "shared-plaintext", None, None, None)
            .await
            .unwrap();
    }

    let rows = sqlx::query("SELECT access_token FROM credentials ORDER BY tenant_id")
        .fetch_all(db.pool())
        .await
        .unwrap();
    let stored: Vec<String> = rows.iter().map(|r| r.get("access_token")).collect();

    assert_eq!(stored.len(), 2);
    for ciphertext in &stored {
        assert_ne!(ciphertext, "shared-plaintext");
        assert!(!ciphertext.contains("shared-plaintext"));
    }
    // Same plaintext, different rows: fresh nonce per encryption
    assert_ne!(stored[0], stored[1]);
}

#[tokio::test]
async fn credentials_are_scoped_per_provider() {
    let db = test_database().await;
    let store = CredentialStore::new(Arc::clone(&db), Arc::new(ScriptedRefresher::rejecting()));
    let tenant = TenantId::new();

    store
        .store(tenant, Provider::Calendar, "calendar-token", None, None, None)
        .await
        .unwrap();
    store
        .store(tenant, Provider::Mail, "mail-token", None, None, None)
        .await
        .unwrap();

    let calendar = store.get(tenant, Provider::Calendar).await.unwrap().unwrap();
    let mail = store.get(tenant, Provider::Mail).await.unwrap().unwrap();
    assert_eq!(calendar.access_token, "calendar-token");
    assert_eq!(mail.access_token, "mail-token");
    assert!(store.get(tenant, Provider::Documents).await.unwrap().is_none());
}

#[tokio::test]
async fn get_fresh_skips_refresh_for_live_tokens() {
    let db = test_database().await;
    let refresher = Arc::new(ScriptedRefresher::succeeding("unused"));
    let store = CredentialStore::new(Arc::clone(&db), Arc::clone(&refresher) as Arc<dyn TokenRefresher>);
    let tenant = TenantId::new();

    store
        .store(
            tenant,
            Provider::Calendar,
            "live-token",
            Some("rt"),
            Some(Utc::now() + Duration::hours(2)),
            None,
        )
        .await
        .unwrap();

    let credential = store
        .get_fresh(tenant, Provider::Calendar)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credential.access_token, "live-token");
    assert_eq!(refresher.calls(), 0);
}

#[tokio::test]
async fn get_fresh_refreshes_within_expiry_buffer() {
    let db = test_database().await;
    let refresher = Arc::new(ScriptedRefresher::succeeding("refreshed-token"));
    let store = CredentialStore::new(Arc::clone(&db), Arc::clone(&refresher) as Arc<dyn TokenRefresher>);
    let tenant = TenantId::new();

    // Expires in two minutes: inside the five-minute safety buffer, so it
    // already counts as expired
    store
        .store(
            tenant,
            Provider::Calendar,
            "stale-token",
            Some("refresh-token-value"),
            Some(Utc::now() + Duration::minutes(2)),
            None,
        )
        .await
        .unwrap();

    let credential = store
        .get_fresh(tenant, Provider::Calendar)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credential.access_token, "refreshed-token");
    assert_eq!(refresher.calls(), 1);
    // Provider did not rotate the refresh token, so the stored one survives
    assert_eq!(
        credential.refresh_token.as_deref(),
        Some("refresh-token-value")
    );
    assert!(credential.last_refresh_at.is_some());
}

#[tokio::test]
async fn refresh_failure_invalidates_credential() {
    let db = test_database().await;
    let store = CredentialStore::new(Arc::clone(&db), Arc::new(ScriptedRefresher::rejecting()));
    let tenant = TenantId::new();

    store
        .store(
            tenant,
            Provider::Calendar,
            "dead-token",
            Some("revoked-refresh-token"),
            Some(Utc::now() - Duration::minutes(1)),
            None,
        )
        .await
        .unwrap();

    let err = store.refresh(tenant, Provider::Calendar).await.unwrap_err();
    assert!(matches!(err, AppError::TokenRefresh { .. }));

    // Invalidated credentials read as absent
    assert!(store.get(tenant, Provider::Calendar).await.unwrap().is_none());
}

#[tokio::test]
async fn refresh_without_refresh_token_invalidates() {
    let db = test_database().await;
    let refresher = Arc::new(ScriptedRefresher::succeeding("unused"));
    let store = CredentialStore::new(Arc::clone(&db), Arc::clone(&refresher) as Arc<dyn TokenRefresher>);
    let tenant = TenantId::new();

    store
        .store(tenant, Provider::Documents, "no-refresh", None, None, None)
        .await
        .unwrap();

    let err = store.refresh(tenant, Provider::Documents).await.unwrap_err();
    assert!(matches!(err, AppError::TokenRefresh { .. }));
    assert_eq!(refresher.calls(), 0, "Provider must not be called without a refresh token");
    assert!(store.get(tenant, Provider::Documents).await.unwrap().is_none());
}

#[tokio::test]
async fn restore_after_invalidation_revives_credential() {
    let db = test_database().await;
    let store = CredentialStore::new(Arc::clone(&db), Arc::new(ScriptedRefresher::rejecting()));
    let tenant = TenantId::new();

    store
        .store(tenant, Provider::Mail, "first-token", None, None, None)
        .await
        .unwrap();
    store.invalidate(tenant, Provider::Mail).await.unwrap();
    assert!(store.get(tenant, Provider::Mail).await.unwrap().is_none());

    // Re-authorization stores a new credential and resets validity
    store
        .store(tenant, Provider::Mail, "second-token", None, None, None)
        .await
        .unwrap();
    let credential = store.get(tenant, Provider::Mail).await.unwrap().unwrap();
    assert_eq!(credential.access_token, "second-token");
    assert!(credential.is_valid);
}

#[tokio::test]
async fn remove_deletes_credential() -> anyhow::Result<()> {
    let db = test_database().await;
    let store = CredentialStore::new(Arc::clone(&db), Arc::new(ScriptedRefresher::rejecting()));
    let tenant = TenantId::new();

    store
        .store(tenant, Provider::Calendar, "token", None, None, None)
        .await?;
    store.remove(tenant, Provider::Calendar).await?;

    assert!(store.get(tenant, Provider::Calendar).await?.is_none());
    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM credentials")
        .fetch_one(db.pool())
        .await?
        .get("n");
    assert_eq!(count, 0);
    Ok(())
}

#[tokio::test]
async fn refresh_of_missing_credential_is_typed() {
    let db = test_database().await;
    let store = CredentialStore::new(Arc::clone(&db), Arc::new(ScriptedRefresher::rejecting()));
    let tenant = TenantId::new();

    let err = store.refresh(tenant, Provider::Calendar).await.unwrap_err();
    assert!(matches!(err, AppError::NoValidCredential(t) if t == tenant));
}
