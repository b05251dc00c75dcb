//! Resource lifecycle management: registration/shutdown ordering (C2) and
//! application-level startup/shutdown orchestration (C3).

pub mod app_lifecycle;
pub mod resource_tracker;

pub use app_lifecycle::AppLifecycle;
pub use resource_tracker::{Closable, ClosableFn, ResourceTracker};
