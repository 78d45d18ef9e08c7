//! Common types and plumbing shared by the hvpn registry, router and relay.
//!
//! This crate provides:
//! - Wire types exchanged between services ([`types`])
//! - Relay endpoint validation ([`endpoint`])
//! - The HTTP error taxonomy ([`error`])
//! - Per-IP sliding window rate limiting ([`ratelimit`])
//! - The shared plain/TLS accept loop ([`server`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Bearer token checks for protected endpoints.
pub mod auth;
/// Exponential backoff with jitter for sync retries.
pub mod backoff;
/// Caller address extraction (Cloudflare-aware).
pub mod client_ip;
/// CLI argument groups shared by every service.
pub mod config;
pub mod endpoint;
pub mod error;
pub mod ratelimit;
pub mod server;
/// Tracing and Prometheus bootstrap for the binaries.
pub mod telemetry;
pub mod types;

pub use error::ApiError;
pub use types::RelayEntry;
