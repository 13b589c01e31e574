//! Tollgate - Request Admission Control
//!
//! This crate decides, for every incoming request, whether it may proceed,
//! using fixed-window quotas keyed by client IP and by access token. Counts
//! and blocks live in a pluggable counter store (in-process or Redis) chosen
//! by name at startup.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
