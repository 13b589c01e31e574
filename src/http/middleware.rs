//! Admission middleware: maps rate limiter decisions onto HTTP responses.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::field::Empty;
use tracing::{debug, error, instrument, warn, Span};

use crate::config::AdmissionConfig;
use crate::error::{Result, TollgateError};
use crate::ratelimit::RateLimiter;
use crate::store::StoreError;

/// Body of every 429 response.
pub const RATE_LIMIT_EXCEEDED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Body of 500 responses; the store error itself is never exposed.
const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

const FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Client IP used when neither a forwarded header nor a peer address is available.
const UNKNOWN_CLIENT: &str = "unknown";

/// Shared state of the admission middleware.
#[derive(Clone)]
pub struct AdmissionState {
    limiter: Arc<RateLimiter>,
    token_header: HeaderName,
    trust_forwarded_for: bool,
    fail_open: bool,
    timeout: Duration,
}

impl AdmissionState {
    /// Build the middleware state from a limiter and its admission settings.
    pub fn new(limiter: Arc<RateLimiter>, config: &AdmissionConfig) -> Result<Self> {
        let token_header = HeaderName::from_bytes(config.token_header.as_bytes()).map_err(|_| {
            TollgateError::Config(format!("invalid token header name: {:?}", config.token_header))
        })?;

        Ok(Self {
            limiter,
            token_header,
            trust_forwarded_for: config.trust_forwarded_for,
            fail_open: config.fail_open,
            timeout: config.timeout,
        })
    }

    /// The limiter consulted for every request.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

/// Admit or reject a request before it reaches the wrapped handler.
///
/// Answers 429 when the limiter denies, 500 when the decision could not be
/// made (unless failing open), and otherwise forwards the request untouched.
#[instrument(
    skip_all,
    fields(method = %request.method(), path = %request.uri().path(), ip = Empty, has_token = Empty)
)]
pub async fn admission(State(state): State<AdmissionState>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request, state.trust_forwarded_for);
    let token = request
        .headers()
        .get(&state.token_header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned);

    let span = Span::current();
    span.record("ip", ip.as_str());
    span.record("has_token", token.is_some());

    let decision = tokio::time::timeout(state.timeout, state.limiter.allow(&ip, token.as_deref()))
        .await
        .unwrap_or(Err(StoreError::Timeout { operation: "allow" }));

    match decision {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            debug!("Request rejected");
            (StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_EXCEEDED_MESSAGE).into_response()
        }
        Err(err) if state.fail_open => {
            warn!(error = %err, "Admission undetermined, failing open");
            next.run(request).await
        }
        Err(err) => {
            error!(error = %err, "Admission undetermined, rejecting request");
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE).into_response()
        }
    }
}

/// The client IP: the first `X-Forwarded-For` entry when trusted and present,
/// otherwise the peer address without its port.
fn client_ip(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            // "client, proxy1, proxy2": the leftmost entry is the original client
            .and_then(|value| value.split(',').map(str::trim).find(|ip| !ip.is_empty()));
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
