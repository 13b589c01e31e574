//! HTTP boundary: admission middleware and the demo server.

mod middleware;
mod server;

pub use middleware::{admission, AdmissionState, RATE_LIMIT_EXCEEDED_MESSAGE};
pub use server::HttpServer;
