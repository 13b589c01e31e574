//! Admission policy: per-IP and per-token fixed-window limits.

mod identity;
mod limiter;
mod rules;

pub use identity::IdentityKey;
pub use limiter::RateLimiter;
pub use rules::{LimiterConfig, Quota};
