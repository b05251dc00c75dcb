use super::{CoreError, CoreResult};

/// `anyhow`-style context attachment that stays within the closed
/// `CoreError` type instead of boxing into `anyhow::Error`.
///
/// Attaching context never changes `kind` or `severity`; it only enriches
/// the operator-facing message, matching the Python original's
/// `error_context.py` "don't reclassify, just annotate" behavior.
pub trait ErrorContext<T> {
    /// Prefix the error's message with a static description of the
    /// operation that failed.
    fn context(self, msg: &str) -> CoreResult<T>;

    /// Prefix the error's message, computing the description lazily so
    /// callers can afford a `format!` only on the failure path.
    fn with_context<F>(self, f: F) -> CoreResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: Into<CoreError>,
{
    fn context(self, msg: &str) -> CoreResult<T> {
        self.map_err(|e| prefix(e.into(), msg))
    }

    fn with_context<F>(self, f: F) -> CoreResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| prefix(e.into(), &f()))
    }
}

fn prefix(err: CoreError, msg: &str) -> CoreError {
    let message = format!("{msg}: {}", err.message());
    CoreError::new(err.kind(), message)
        .with_severity(err.severity())
        .with_detail("context", msg)
}
