// ABOUTME: Main library entry point for the Huddlebot multi-tenant chat-bot backend
// ABOUTME: Provides credential storage, client resolution, and durable background jobs
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

// Crate-level attributes:
// - recursion_limit: Increased from default 128 to 256 for derive macros
//   (serde, thiserror) on nested payload and snapshot types
// - deny(unsafe_code): Zero-tolerance unsafe policy
#![recursion_limit = "256"]
#![deny(unsafe_code)]

//! # Huddlebot Server
//!
//! Multi-tenant backend for a chat-platform bot: each tenant is one
//! workspace that installed the bot via OAuth. The server keeps tenant
//! credentials encrypted at rest, resolves tenants into live API clients
//! through a bounded cache, and runs durable background jobs (reminders,
//! reports, syncs, cleanup, credential audits) with retries and graceful
//! shutdown.
//!
//! ## Architecture
//!
//! - **Tokens**: Encrypted per-tenant, per-provider credential storage
//!   with refresh orchestration
//! - **Resolver**: LRU + TTL cache from `(tenant, parent_org)` to a live
//!   platform client, fed by an ordered credential source chain
//! - **Jobs**: One durable queue and worker pool per job type over the
//!   shared `SQLite` database
//! - **Health**: Recurring audit that probes stored credentials and tears
//!   down the ones the platform definitively rejects
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use huddlebot::config::environment::ServerConfig;
//! use huddlebot::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("Huddlebot configured against {}", config.platform_api_base);
//!     Ok(())
//! }
//! ```

/// Configuration management, environment-driven
pub mod config;

/// Focused dependency injection container
pub mod context;

/// Token encryption key management
pub mod crypto;

/// Database abstraction and encrypted persistence
pub mod database;

/// Application error types
pub mod errors;

/// Credential health auditing
pub mod health;

/// Durable background job system
pub mod jobs;

/// Process-wide metrics registry
pub mod metrics;

/// Common data models
pub mod models;

/// OAuth 2.0 refresh client for external providers
pub mod oauth;

/// Chat platform API client
pub mod platform;

/// Tenant-to-client cache and credential sources
pub mod resolver;

/// Encrypted credential store service
pub mod tokens;
