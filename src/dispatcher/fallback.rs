use crate::executor::FatalFailure;
use crate::request::Request;
use crate::response::{HeaderType, Response, RetryAfter};
use http::StatusCode;
use serde_json::json;
use std::time::Duration;

/// Responses the dispatcher produces itself, without any page.
pub trait FallbackResponder: Send + Sync {
    /// No page answered.
    fn not_found(&self, request: &Request) -> Response;

    /// Reporting a failure failed. The connection is closed afterwards.
    fn on_error(&self, request: &Request, fatal: &FatalFailure) -> Response;

    /// Refused at admission.
    fn overloaded(&self, request: &Request) -> Response;
}

/// JSON error bodies in the shape `{"error": ..., "request_id": ...}`.
#[derive(Debug, Clone, Copy)]
pub struct DefaultFallback {
    pub retry_after: Duration,
}

impl Default for DefaultFallback {
    fn default() -> Self {
        Self {
            retry_after: Duration::from_secs(1),
        }
    }
}

impl FallbackResponder for DefaultFallback {
    fn not_found(&self, request: &Request) -> Response {
        Response::json(
            StatusCode::NOT_FOUND,
            &json!({
                "error": "Not Found",
                "method": request.method.as_str(),
                "path": request.path,
                "request_id": request.request_id.to_string(),
            }),
        )
    }

    fn on_error(&self, request: &Request, _fatal: &FatalFailure) -> Response {
        Response::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            &json!({
                "error": "Internal Server Error",
                "request_id": request.request_id.to_string(),
            }),
        )
    }

    fn overloaded(&self, request: &Request) -> Response {
        let resp = Response::json(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({
                "error": "Service Unavailable",
                "request_id": request.request_id.to_string(),
            }),
        );
        match RetryAfter.write(&self.retry_after) {
            Ok(value) => resp.with_header(RetryAfter.name().clone(), value),
            Err(_) => resp,
        }
    }
}
