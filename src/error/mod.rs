//! The shared error model (ErrorModel, component C13).
//!
//! `CoreError` is the single tagged-variant error type every component in
//! this crate returns. It is intentionally closed: new failure sources
//! must classify into an existing `ErrorKind` or a new one must be added
//! here, never invented ad-hoc at a call site.

mod context_ext;
mod severity;

pub use context_ext::ErrorContext;
pub use severity::Severity;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// Closed classification of failure sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller input failed validation.
    Validation,
    /// Missing or invalid credentials.
    Auth,
    /// Authenticated caller lacks permission.
    Authz,
    /// Referenced entity does not exist.
    NotFound,
    /// A bounded wait elapsed.
    Timeout,
    /// A downstream dependency is unreachable, or a pool is closed.
    ServiceUnavailable,
    /// A rate limiter rejected the call outright (as opposed to waiting).
    RateLimited,
    /// A circuit breaker rejected the call while open.
    CircuitOpen,
    /// A resource pool has been closed and can no longer be used.
    PoolClosed,
    /// A lifecycle operation was rejected (e.g. submit during shutdown).
    Lifecycle,
    /// Programming error / invariant violation.
    Internal,
}

impl ErrorKind {
    /// HTTP status this kind maps to at an HTTP-facing boundary.
    pub const fn http_status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Auth => 401,
            ErrorKind::Authz => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 504,
            ErrorKind::RateLimited => 429,
            ErrorKind::CircuitOpen => 503,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::PoolClosed => 503,
            ErrorKind::Lifecycle => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Default severity for a kind when none is given explicitly.
    const fn default_severity(self) -> Severity {
        match self {
            ErrorKind::Internal => Severity::High,
            ErrorKind::ServiceUnavailable | ErrorKind::CircuitOpen | ErrorKind::PoolClosed => {
                Severity::Medium
            }
            ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::Lifecycle => Severity::Medium,
            ErrorKind::Validation | ErrorKind::Auth | ErrorKind::Authz | ErrorKind::NotFound => {
                Severity::Low
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Authz => "authz",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::PoolClosed => "pool_closed",
            ErrorKind::Lifecycle => "lifecycle",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The crate's single error type.
///
/// Carries both an operator-facing message (may contain internals) and an
/// optional caller-facing message safe to return to an external caller.
/// Boundaries MUST NOT leak `message` to callers in production; see
/// `to_boundary_shape`.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct CoreError {
    kind: ErrorKind,
    message: String,
    caller_message: Option<String>,
    details: HashMap<String, String>,
    severity: Severity,
    trace_id: Option<String>,
}

impl CoreError {
    /// Construct a new error of the given kind with an operator message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            caller_message: None,
            details: HashMap::new(),
            severity: kind.default_severity(),
            trace_id: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircuitOpen, message)
    }

    pub fn pool_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PoolClosed, message)
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lifecycle, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Attach a caller-safe message, builder-style.
    #[must_use]
    pub fn with_caller_message(mut self, message: impl Into<String>) -> Self {
        self.caller_message = Some(message.into());
        self
    }

    /// Attach a structured detail, builder-style.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Additive context enrichment: attach correlation/caller id and custom
    /// attributes from the ambient `CallerContext` without changing `kind`.
    #[must_use]
    pub fn with_caller_context(mut self, ctx: &crate::context::CallerContext) -> Self {
        self.details
            .entry("caller_id".into())
            .or_insert_with(|| ctx.caller_id().to_string());
        self.details
            .entry("correlation_id".into())
            .or_insert_with(|| ctx.correlation_id().to_string());
        if self.trace_id.is_none() {
            self.trace_id = Some(ctx.correlation_id().to_string());
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn caller_message(&self) -> Option<&str> {
        self.caller_message.as_deref()
    }

    pub fn details(&self) -> &HashMap<String, String> {
        &self.details
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Render the outermost boundary wire shape:
    /// `{error, error_code, message, trace_id?, timestamp, details?}`.
    ///
    /// `expose_operator_message` controls whether `message` (which may
    /// contain internals) is used, or the caller-facing message (falling
    /// back to a generic phrase). Production boundaries MUST pass `false`.
    pub fn to_boundary_shape(&self, expose_operator_message: bool) -> BoundaryError {
        let message = if expose_operator_message {
            self.message.clone()
        } else {
            self.caller_message
                .clone()
                .unwrap_or_else(|| "an internal error occurred".to_string())
        };
        BoundaryError {
            error: true,
            error_code: self.kind,
            message,
            trace_id: self.trace_id.clone(),
            timestamp: chrono::Utc::now(),
            details: if self.details.is_empty() {
                None
            } else {
                Some(self.details.clone())
            },
        }
    }
}

/// Wire shape for errors crossing the outermost boundary.
#[derive(Debug, Clone, Serialize)]
pub struct BoundaryError {
    pub error: bool,
    pub error_code: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
}

impl From<tokio::time::error::Elapsed> for CoreError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CoreError::timeout("operation timed out")
    }
}

/// Catch-all conversion for opaque errors crossing into this crate's
/// closed error model, mirroring the teacher's `Other(#[from] anyhow::
/// Error)` variant: anything that isn't already a `CoreError` is treated
/// as a programming error until classified otherwise at the call site.
impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping_matches_spec() {
        assert_eq!(ErrorKind::Validation.http_status(), 400);
        assert_eq!(ErrorKind::Auth.http_status(), 401);
        assert_eq!(ErrorKind::Authz.http_status(), 403);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
        assert_eq!(ErrorKind::RateLimited.http_status(), 429);
        assert_eq!(ErrorKind::CircuitOpen.http_status(), 503);
        assert_eq!(ErrorKind::ServiceUnavailable.http_status(), 503);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn internal_defaults_to_high_severity() {
        let err = CoreError::internal("boom");
        assert_eq!(err.severity(), Severity::High);
    }

    #[test]
    fn boundary_shape_hides_operator_message_unless_asked() {
        let err = CoreError::internal("leaked db password in log line")
            .with_caller_message("something went wrong");
        let shape = err.to_boundary_shape(false);
        assert_eq!(shape.message, "something went wrong");

        let shape = err.to_boundary_shape(true);
        assert_eq!(shape.message, "leaked db password in log line");
    }

    #[test]
    fn display_is_operator_oriented() {
        let err = CoreError::validation("caller_id must not be empty");
        assert_eq!(err.to_string(), "validation: caller_id must not be empty");
    }

    #[test]
    fn opaque_anyhow_errors_classify_as_internal() {
        let opaque: anyhow::Result<()> = Err(anyhow::anyhow!("unexpected state in third-party call"));
        let err: CoreError = opaque.unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.severity(), Severity::High);
        assert!(err.message().contains("unexpected state"));
    }
}
