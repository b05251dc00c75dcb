//! Async concurrency and resource-management core for a multi-tenant
//! agent-serving backend.
//!
//! This crate provides the runtime primitives an agent-serving backend
//! needs underneath its transport and orchestration layers: a caller
//! context carried explicitly through every call, a resource tracker with
//! priority-ordered shutdown, application lifecycle orchestration, named
//! locks, a sliding-window rate limiter, a circuit breaker, a bounded task
//! pool with cooperative cancellation, a generic resource pool with RAII
//! release, a bounded-parallelism batch processor, a health monitor, a
//! caller-partitioned cache with a resilient degrading-mode factory, a
//! progress event bridge, and the shared tagged-variant error model.
//!
//! Deliberately out of scope: distributing any of this across machines,
//! durable task queues, exactly-once delivery, agent orchestration and
//! prompt/tool plumbing, transport wire formats, persistent storage, and
//! request auth/parsing — those are the embedding application's concerns.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod background;
pub mod batch;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod lock;
pub mod progress;
pub mod rate_limit;
pub mod resource_pool;
pub mod retry;
pub mod task_pool;
pub mod telemetry;

pub use background::BackgroundTaskOwner;
pub use batch::BatchProcessor;
pub use cache::resilient_factory::{FactoryMode, ResilientFactory, ResilientFactoryHealth};
pub use cache::{CacheKey, CacheManager, ScopedCache};
pub use circuit_breaker::{BreakerState, CircuitBreaker, FailurePredicate};
pub use config::{CoreConfig, EnvironmentProfile};
pub use context::CallerContext;
pub use error::{CoreError, CoreResult, ErrorContext, ErrorKind, Severity};
pub use health::{HealthMonitor, HealthStatus};
pub use lifecycle::{AppLifecycle, Closable, ResourceTracker};
pub use lock::{LockGuard, LockInfo, NamedLock};
pub use progress::{EventEnvelope, EventKind, ProgressBridge};
pub use rate_limit::RateLimiter;
pub use resource_pool::{PooledResource, ResourceFactory, ResourcePool};
pub use retry::{retry_with_backoff, RetryConfig};
pub use task_pool::{CancelToken, TaskPool};
