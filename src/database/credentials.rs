// ABOUTME: Credential row operations for per-tenant, per-provider OAuth token storage
// ABOUTME: Tokens are encrypted at rest with AAD binding to tenant and provider
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{Credential, Provider, TenantId};

/// Credential data for an upsert
pub struct CredentialData<'a> {
    /// Tenant the credential belongs to
    pub tenant_id: TenantId,
    /// Issuing provider
    pub provider: Provider,
    /// Plaintext access token; encrypted before persisting
    pub access_token: &'a str,
    /// Plaintext refresh token, when issued
    pub refresh_token: Option<&'a str>,
    /// Access token expiry; `None` means non-expiring
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted OAuth scope
    pub scope: &'a str,
}

/// AAD context binding a ciphertext to its row
fn aad_context(tenant_id: TenantId, provider: Provider) -> String {
    format!("{tenant_id}|{provider}|credentials")
}

impl Database {
    /// Upsert a credential, keyed by `(tenant_id, provider)`
    ///
    /// Both tokens are encrypted independently, each with its own fresh
    /// nonce. Re-storing after an invalidation resets `is_valid` to true:
    /// a successful re-authorization replaces the dead credential.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the database operation fails.
    pub async fn upsert_credential(&self, data: &CredentialData<'_>) -> AppResult<()> {
        let aad = aad_context(data.tenant_id, data.provider);

        let encrypted_access_token = self.encrypt_data_with_aad(data.access_token, &aad)?;
        let encrypted_refresh_token = data
            .refresh_token
            .map(|rt| self.encrypt_data_with_aad(rt, &aad))
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO credentials (
                tenant_id, provider, access_token, refresh_token,
                token_type, expires_at, scope, is_valid, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, 'Bearer', $5, $6, TRUE, $7, $7)
            ON CONFLICT (tenant_id, provider)
            DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                scope = EXCLUDED.scope,
                is_valid = TRUE,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(data.tenant_id.to_string())
        .bind(data.provider.as_str())
        .bind(&encrypted_access_token)
        .bind(encrypted_refresh_token.as_deref())
        .bind(data.expires_at)
        .bind(data.scope)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert credential: {e}")))?;

        Ok(())
    }

    /// Get a credential, treating invalidated rows as absent
    ///
    /// Decrypts token material on read.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or decryption fails (tampered
    /// data or AAD mismatch) - decryption failures are never silently
    /// mapped to `None`.
    pub async fn get_credential(
        &self,
        tenant_id: TenantId,
        provider: Provider,
    ) -> AppResult<Option<Credential>> {
        let row = sqlx::query(
            r"
            SELECT tenant_id, provider, access_token, refresh_token, token_type,
                   expires_at, scope, is_valid, last_refresh_at, created_at, updated_at
            FROM credentials
            WHERE tenant_id = $1 AND provider = $2 AND is_valid = TRUE
            ",
        )
        .bind(tenant_id.to_string())
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to query credential: {e}")))?;

        row.map_or_else(|| Ok(None), |row| Ok(Some(self.row_to_credential(&row)?)))
    }

    /// Replace token material after a successful refresh
    ///
    /// When the provider did not issue a new refresh token, the stored one
    /// is preserved. Bumps `last_refresh_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the database operation fails.
    pub async fn update_refreshed_credential(
        &self,
        tenant_id: TenantId,
        provider: Provider,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let aad = aad_context(tenant_id, provider);

        let encrypted_access_token = self.encrypt_data_with_aad(access_token, &aad)?;
        let encrypted_refresh_token = refresh_token
            .map(|rt| self.encrypt_data_with_aad(rt, &aad))
            .transpose()?;

        sqlx::query(
            r"
            UPDATE credentials
            SET access_token = $3,
                refresh_token = COALESCE($4, refresh_token),
                expires_at = $5,
                last_refresh_at = $6,
                updated_at = $6
            WHERE tenant_id = $1 AND provider = $2
            ",
        )
        .bind(tenant_id.to_string())
        .bind(provider.as_str())
        .bind(&encrypted_access_token)
        .bind(encrypted_refresh_token.as_deref())
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update refreshed credential: {e}")))?;

        Ok(())
    }

    /// Mark a credential invalid without deleting it
    ///
    /// The row is kept for audit purposes; readers treat it as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn invalidate_credential(
        &self,
        tenant_id: TenantId,
        provider: Provider,
    ) -> AppResult<()> {
        sqlx::query(
            r"
            UPDATE credentials
            SET is_valid = FALSE, updated_at = $3
            WHERE tenant_id = $1 AND provider = $2
            ",
        )
        .bind(tenant_id.to_string())
        .bind(provider.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to invalidate credential: {e}")))?;

        Ok(())
    }

    /// Hard-delete a credential, used on explicit revocation
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn delete_credential(
        &self,
        tenant_id: TenantId,
        provider: Provider,
    ) -> AppResult<()> {
        sqlx::query("DELETE FROM credentials WHERE tenant_id = $1 AND provider = $2")
            .bind(tenant_id.to_string())
            .bind(provider.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete credential: {e}")))?;

        Ok(())
    }

    /// List all valid credentials, for audit enumeration
    ///
    /// # Errors
    ///
    /// Returns an error if the query or any row's decryption fails.
    pub async fn list_valid_credentials(&self) -> AppResult<Vec<Credential>> {
        let rows = sqlx::query(
            r"
            SELECT tenant_id, provider, access_token, refresh_token, token_type,
                   expires_at, scope, is_valid, last_refresh_at, created_at, updated_at
            FROM credentials
            WHERE is_valid = TRUE
            ORDER BY tenant_id, provider
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list credentials: {e}")))?;

        let mut credentials = Vec::with_capacity(rows.len());
        for row in rows {
            credentials.push(self.row_to_credential(&row)?);
        }
        Ok(credentials)
    }

    /// Delete invalidated credentials last touched before the cutoff
    ///
    /// Used by the cleanup job's `expired_tokens` target. Returns the
    /// number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn purge_invalid_credentials(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM credentials WHERE is_valid = FALSE AND updated_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to purge invalid credentials: {e}")))?;

        Ok(result.rows_affected())
    }

    /// Convert a database row to a `Credential`, decrypting token material
    fn row_to_credential(&self, row: &SqliteRow) -> AppResult<Credential> {
        let tenant_id: TenantId = row.get::<String, _>("tenant_id").parse()?;
        let provider: Provider = row.get::<String, _>("provider").parse()?;
        let aad = aad_context(tenant_id, provider);

        let encrypted_access_token: String = row.get("access_token");
        let access_token = self.decrypt_data_with_aad(&encrypted_access_token, &aad)?;

        let encrypted_refresh_token: Option<String> = row.get("refresh_token");
        let refresh_token = encrypted_refresh_token
            .as_deref()
            .map(|ert| self.decrypt_data_with_aad(ert, &aad))
            .transpose()?;

        Ok(Credential {
            tenant_id,
            provider,
            access_token,
            refresh_token,
            token_type: row.get("token_type"),
            expires_at: row.get("expires_at"),
            scope: row.get("scope"),
            is_valid: row.get("is_valid"),
            last_refresh_at: row.get("last_refresh_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}
