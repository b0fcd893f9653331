// ABOUTME: Cryptographic utilities and key management
// ABOUTME: Token encryption itself lives on Database so AAD binding stays next to storage
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

/// Encryption key loading and generation
pub mod keys;

pub use keys::{
    generate_encryption_key, load_encryption_key, ENCRYPTION_KEY_ENV, ENCRYPTION_KEY_LEN,
};
