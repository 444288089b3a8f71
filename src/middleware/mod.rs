//! Request middleware: client identification, master-key auth and
//! per-scope rate limiting.

pub mod auth;
pub mod ip;
pub mod rate_limit;
