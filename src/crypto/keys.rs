// ABOUTME: Process-wide encryption key loading and generation
// ABOUTME: Key file is the primary source; env var fallback is logged as a warning
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::fs;
use std::path::Path;

use base64::engine::general_purpose;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};

/// AES-256-GCM key length in bytes
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Environment variable consulted when no key file is configured
pub const ENCRYPTION_KEY_ENV: &str = "HUDDLEBOT_ENCRYPTION_KEY";

/// Generate a fresh random 256-bit encryption key
///
/// # Errors
///
/// Returns an error if the system RNG fails.
pub fn generate_encryption_key() -> AppResult<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut key = vec![0u8; ENCRYPTION_KEY_LEN];
    rng.fill(&mut key)
        .map_err(|e| AppError::internal(format!("Failed to generate encryption key: {e}")))?;
    Ok(key)
}

/// Load the process-wide encryption key
///
/// Precedence: key file (base64 contents) when a path is configured, then
/// the `HUDDLEBOT_ENCRYPTION_KEY` env var. The env fallback bypasses the
/// secret store and is logged at warn level.
///
/// # Errors
///
/// Returns `AppError::Config` if neither source yields a valid 32-byte key.
pub fn load_encryption_key(key_path: Option<&Path>) -> AppResult<Vec<u8>> {
    if let Some(path) = key_path {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!(
                "Failed to read encryption key file {}: {e}",
                path.display()
            ))
        })?;
        let key = decode_key(raw.trim())?;
        info!(path = %path.display(), "Loaded encryption key from key file");
        return Ok(key);
    }

    match std::env::var(ENCRYPTION_KEY_ENV) {
        Ok(raw) => {
            warn!(
                "Loading encryption key from {ENCRYPTION_KEY_ENV} environment variable; \
                 configure HUDDLEBOT_ENCRYPTION_KEY_PATH for production deployments"
            );
            decode_key(raw.trim())
        }
        Err(_) => Err(AppError::config(format!(
            "No encryption key available: set HUDDLEBOT_ENCRYPTION_KEY_PATH or {ENCRYPTION_KEY_ENV}"
        ))),
    }
}

/// Decode and length-check a base64 key
fn decode_key(raw: &str) -> AppResult<Vec<u8>> {
    let key = general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| AppError::config(format!("Encryption key is not valid base64: {e}")))?;
    if key.len() != ENCRYPTION_KEY_LEN {
        return Err(AppError::config(format!(
            "Encryption key must be {ENCRYPTION_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}
