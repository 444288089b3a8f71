//! In-process tests that drive the full router with `tower::ServiceExt::oneshot`.
//!
//! ## Test Modules
//!
//! - **common**: app construction over a temporary database and storage directory
//! - **api_tests**: upload, serve, delete, compress, listing
//! - **rate_limit_api_tests**: throttle scopes, 429 responses and the pool under saturation
//! - **health_api_tests**: probes and metrics
//! - **error_tests**: error mapping to HTTP responses
//! - **config_tests**: configuration loading and validation

pub mod api_tests;
pub mod common;
