// ABOUTME: Configuration management module, environment-only by policy
// ABOUTME: Re-exports the typed ServerConfig sections
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

/// Environment-based configuration loading
pub mod environment;

pub use environment::{CacheConfig, JobsConfig, ProviderOAuthConfig, ServerConfig};
