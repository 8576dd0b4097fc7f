//! Request logging and HTTP metrics middleware
//!
//! `logging.log_requests` (or `LOG_REQUESTS`) lists the status codes whose
//! requests are logged, e.g. `"404,500"`. A leading `-` logs every status
//! except the listed ones.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::config::LoggingConfig;
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

/// Which responses get an access log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestLogFilter {
    Disabled,
    Only(Vec<u16>),
    Except(Vec<u16>),
}

impl RequestLogFilter {
    /// Parse a status code list such as `"200,404"` or `"-200"`
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        let (invert, list) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value),
        };

        let codes: Vec<u16> = list
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter_map(|code| code.trim().parse().ok())
            .collect();

        if invert {
            Self::Except(codes)
        } else {
            Self::Only(codes)
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        match config.log_requests.as_deref() {
            Some(value) => {
                tracing::warn!(
                    filter = value,
                    "Request logging is enabled! This will spam your logs. Unset LOG_REQUESTS to disable it."
                );
                Self::parse(value)
            }
            None => Self::Disabled,
        }
    }

    pub fn should_log(&self, status: StatusCode) -> bool {
        match self {
            Self::Disabled => false,
            Self::Only(codes) => codes.contains(&status.as_u16()),
            Self::Except(codes) => !codes.contains(&status.as_u16()),
        }
    }
}

/// Record request metrics and write the access log line
pub async fn record_request(
    State(filter): State<Arc<RequestLogFilter>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();
    let status = response.status();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), status.as_str()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method.as_str()])
        .observe(elapsed.as_secs_f64());

    if filter.should_log(status) {
        tracing::info!(
            target: "chatfed::access",
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            user_agent = %user_agent,
            "request"
        );
    }

    response
}
