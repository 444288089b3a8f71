//! # Ablage
//!
//! Backend for uploading, serving and recompressing files, with file
//! metadata kept in SQLite.
//!
//! ## Core Components
//!
//! - [`rate_limit`]: per-client fixed-window admission, one table per throttle scope
//! - [`pool`]: bounded async connection pool with scoped leases
//! - [`store`]: file metadata CRUD over the pool, with expiry handling
//! - [`storage`]: raw file bytes on local disk
//! - [`compress`]: image recompression
//! - [`routes`], [`middleware`]: the HTTP surface
//! - [`config`], [`error`], [`metrics`], [`state`]: ambient plumbing

pub mod clock;
pub mod compress;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod pool;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod storage;
pub mod store;
pub mod tasks;
pub mod types;

#[cfg(test)]
mod tests;
