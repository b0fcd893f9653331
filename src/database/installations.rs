// ABOUTME: Installation row operations - one bot-level authorization per workspace
// ABOUTME: Primary tokens are encrypted at rest like per-provider credentials
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{Installation, TenantId};

/// Sentinel stored in place of a missing parent org so the composite key
/// stays NOT NULL (SQLite treats NULLs as distinct in unique constraints)
const NO_PARENT_ORG: &str = "null";

fn parent_org_column(parent_org_id: Option<&str>) -> &str {
    parent_org_id.unwrap_or(NO_PARENT_ORG)
}

/// AAD context binding a primary token to its installation row
fn aad_context(tenant_id: TenantId, parent_org_id: Option<&str>) -> String {
    format!(
        "{tenant_id}|{}|installations",
        parent_org_column(parent_org_id)
    )
}

impl Database {
    /// Upsert an installation, keyed by `(tenant_id, parent_org_id)`
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the database operation fails.
    pub async fn upsert_installation(
        &self,
        tenant_id: TenantId,
        parent_org_id: Option<&str>,
        primary_token: &str,
    ) -> AppResult<()> {
        let aad = aad_context(tenant_id, parent_org_id);
        let encrypted_token = self.encrypt_data_with_aad(primary_token, &aad)?;

        sqlx::query(
            r"
            INSERT INTO installations (tenant_id, parent_org_id, primary_token, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (tenant_id, parent_org_id)
            DO UPDATE SET
                primary_token = EXCLUDED.primary_token,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(tenant_id.to_string())
        .bind(parent_org_column(parent_org_id))
        .bind(&encrypted_token)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert installation: {e}")))?;

        Ok(())
    }

    /// Get an installation, decrypting the primary token
    ///
    /// # Errors
    ///
    /// Returns an error if the query or decryption fails.
    pub async fn get_installation(
        &self,
        tenant_id: TenantId,
        parent_org_id: Option<&str>,
    ) -> AppResult<Option<Installation>> {
        let row = sqlx::query(
            r"
            SELECT tenant_id, parent_org_id, primary_token, created_at, updated_at
            FROM installations
            WHERE tenant_id = $1 AND parent_org_id = $2
            ",
        )
        .bind(tenant_id.to_string())
        .bind(parent_org_column(parent_org_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to query installation: {e}")))?;

        row.map_or_else(|| Ok(None), |row| Ok(Some(self.row_to_installation(&row)?)))
    }

    /// Delete an installation
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn delete_installation(
        &self,
        tenant_id: TenantId,
        parent_org_id: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query("DELETE FROM installations WHERE tenant_id = $1 AND parent_org_id = $2")
            .bind(tenant_id.to_string())
            .bind(parent_org_column(parent_org_id))
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete installation: {e}")))?;

        Ok(())
    }

    /// List all installations, for audit enumeration
    ///
    /// # Errors
    ///
    /// Returns an error if the query or any row's decryption fails.
    pub async fn list_installations(&self) -> AppResult<Vec<Installation>> {
        let rows = sqlx::query(
            r"
            SELECT tenant_id, parent_org_id, primary_token, created_at, updated_at
            FROM installations
            ORDER BY tenant_id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list installations: {e}")))?;

        let mut installations = Vec::with_capacity(rows.len());
        for row in rows {
            installations.push(self.row_to_installation(&row)?);
        }
        Ok(installations)
    }

    /// List installations for one tenant across all parent orgs
    ///
    /// # Errors
    ///
    /// Returns an error if the query or any row's decryption fails.
    pub async fn list_tenant_installations(
        &self,
        tenant_id: TenantId,
    ) -> AppResult<Vec<Installation>> {
        let rows = sqlx::query(
            r"
            SELECT tenant_id, parent_org_id, primary_token, created_at, updated_at
            FROM installations
            WHERE tenant_id = $1
            ORDER BY parent_org_id
            ",
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list tenant installations: {e}")))?;

        let mut installations = Vec::with_capacity(rows.len());
        for row in rows {
            installations.push(self.row_to_installation(&row)?);
        }
        Ok(installations)
    }

    fn row_to_installation(&self, row: &SqliteRow) -> AppResult<Installation> {
        let tenant_id: TenantId = row.get::<String, _>("tenant_id").parse()?;
        let parent_org_raw: String = row.get("parent_org_id");
        let parent_org_id = if parent_org_raw == NO_PARENT_ORG {
            None
        } else {
            Some(parent_org_raw)
        };

        let aad = aad_context(tenant_id, parent_org_id.as_deref());
        let encrypted_token: String = row.get("primary_token");
        let primary_token = self.decrypt_data_with_aad(&encrypted_token, &aad)?;

        Ok(Installation {
            tenant_id,
            parent_org_id,
            primary_token,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}
