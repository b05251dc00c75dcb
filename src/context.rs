//! Ambient per-call context (CallerContext, component C1).
//!
//! The Python original threads this through `contextvars.ContextVar`
//! (`error_context.py`). Rust has no ambient global state we're willing to
//! use here — instead every async entry point in this crate takes a
//! `&CallerContext` explicitly, and `task_local!` is used only to
//! propagate it across a spawned task boundary where the caller cannot
//! pass it by hand (see `task_pool`).

use std::collections::HashMap;

use tokio::task_local;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

task_local! {
    static CURRENT: CallerContext;
}

/// Identity and correlation data attached to a single inbound call.
///
/// Equality is by identity (there is deliberately no `PartialEq`): two
/// concurrent requests from the same `caller_id` are distinct contexts,
/// and nothing in this crate should collapse them by comparing fields.
///
/// `caller_id` must be non-empty and must not be one of the reserved
/// sentinel values `"None"` or `"registry"` (accidental strings that show
/// up when a caller-id extraction upstream silently fails).
#[derive(Debug, Clone)]
pub struct CallerContext {
    caller_id: String,
    session_id: String,
    correlation_id: String,
    request_id: Option<String>,
    transport_id: Option<String>,
    attributes: HashMap<String, String>,
}

const RESERVED_CALLER_IDS: [&str; 2] = ["None", "registry"];

impl CallerContext {
    /// Construct a context for a synchronous inbound request.
    pub fn from_request(
        caller_id: impl Into<String>,
        session_id: impl Into<String>,
        correlation_id: impl Into<String>,
        request_id: Option<String>,
    ) -> CoreResult<Self> {
        Self::new(caller_id, session_id, correlation_id, request_id, None)
    }

    /// Construct a context for a streaming entry point (e.g. a websocket
    /// connection). Mints a fresh correlation id per call, uses the
    /// transport identity as the session id, and records `operation_name`
    /// as an attribute for downstream logging/telemetry.
    pub fn from_transport(
        caller_id: impl Into<String>,
        transport_id: impl Into<String>,
        operation_name: impl Into<String>,
    ) -> CoreResult<Self> {
        let transport_id = transport_id.into();
        let ctx = Self::new(
            caller_id,
            transport_id.clone(),
            Uuid::new_v4().to_string(),
            None,
            Some(transport_id),
        )?;
        Ok(ctx.with_attribute("operation", operation_name.into()))
    }

    fn new(
        caller_id: impl Into<String>,
        session_id: impl Into<String>,
        correlation_id: impl Into<String>,
        request_id: Option<String>,
        transport_id: Option<String>,
    ) -> CoreResult<Self> {
        let caller_id = caller_id.into();
        if caller_id.trim().is_empty() || RESERVED_CALLER_IDS.contains(&caller_id.as_str()) {
            return Err(CoreError::validation(format!(
                "invalid caller_id: {caller_id:?}"
            )));
        }
        Ok(Self {
            caller_id,
            session_id: session_id.into(),
            correlation_id: correlation_id.into(),
            request_id,
            transport_id,
            attributes: HashMap::new(),
        })
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn transport_id(&self) -> Option<&str> {
        self.transport_id.as_deref()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Derive a new context with an additional attribute. Attributes are
    /// additive metadata (tenant tier, feature flags) carried alongside
    /// identity, never used for authorization decisions by this crate.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Run `f` with this context installed as the ambient task-local
    /// value, so code deeper in the call stack that cannot receive the
    /// context as a parameter (spawned subtasks, `Drop` impls) can still
    /// recover it via [`CallerContext::try_current`]. The binding is
    /// scoped to `f` and anything it awaits; it never leaks into sibling
    /// tasks spawned outside of `f`.
    pub async fn scope<F, T>(self, f: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        CURRENT.scope(self, f).await
    }

    /// Recover the ambient context installed by the nearest enclosing
    /// [`CallerContext::scope`]. Returns `None` outside of a scope rather
    /// than panicking — callers that require a context should propagate it
    /// explicitly instead of relying on this as their primary mechanism.
    pub fn try_current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }
}
