//! Configuration and environment profile (ambient stack).

use std::collections::HashMap;
use std::time::Duration;

/// Deployment profile, resolved from an injected environment map rather
/// than `std::env` directly so the crate stays testable without process
/// environment mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentProfile {
    Development,
    Testing,
    Staging,
    Production,
}

impl EnvironmentProfile {
    /// Resolve a profile from an ambient environment map, looking at the
    /// `APP_ENV` key. Defaults to `Development` when absent or unrecognized.
    pub fn from_env_map(env: &HashMap<String, String>) -> Self {
        match env.get("APP_ENV").map(String::as_str) {
            Some("production") | Some("prod") => EnvironmentProfile::Production,
            Some("staging") => EnvironmentProfile::Staging,
            Some("testing") | Some("test") => EnvironmentProfile::Testing,
            _ => EnvironmentProfile::Development,
        }
    }

    /// Whether operator messages are safe to expose at the outermost
    /// boundary for this profile (never in production).
    pub fn expose_operator_messages(self) -> bool {
        !matches!(self, EnvironmentProfile::Production)
    }

    /// Whether tracing should emit structured JSON (prod/staging) or a
    /// human-readable compact formatter (dev/test).
    pub fn use_json_logs(self) -> bool {
        matches!(self, EnvironmentProfile::Production | EnvironmentProfile::Staging)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub max_calls: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskPoolConfig {
    pub max_concurrency: usize,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourcePoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchProcessorConfig {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ResilientFactoryConfig {
    pub failure_threshold: u32,
    pub circuit_open_duration: Duration,
    pub degraded_after_failures: u32,
}

/// Aggregate configuration for all components, constructible per profile
/// or assembled field-by-field for tests that need specific values.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    pub profile: EnvironmentProfile,
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub task_pool: TaskPoolConfig,
    pub resource_pool: ResourcePoolConfig,
    pub batch_processor: BatchProcessorConfig,
    pub health_monitor: HealthMonitorConfig,
    pub resilient_factory: ResilientFactoryConfig,
}

impl CoreConfig {
    pub fn for_profile(profile: EnvironmentProfile) -> Self {
        let (max_concurrency, failure_threshold, check_interval) = match profile {
            EnvironmentProfile::Development | EnvironmentProfile::Testing => {
                (4, 3, Duration::from_secs(5))
            }
            EnvironmentProfile::Staging => (16, 5, Duration::from_secs(15)),
            EnvironmentProfile::Production => (64, 5, Duration::from_secs(30)),
        };

        Self {
            profile,
            rate_limiter: RateLimiterConfig {
                max_calls: 100,
                window: Duration::from_secs(60),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold,
                reset_timeout: Duration::from_secs(30),
            },
            task_pool: TaskPoolConfig {
                max_concurrency,
                shutdown_timeout: Duration::from_secs(30),
            },
            resource_pool: ResourcePoolConfig {
                min_size: (max_concurrency / 4).max(1),
                max_size: max_concurrency,
                acquire_timeout: Duration::from_secs(10),
            },
            batch_processor: BatchProcessorConfig {
                batch_size: 10,
                max_concurrent_batches: max_concurrency.max(1),
            },
            health_monitor: HealthMonitorConfig {
                check_interval,
                probe_timeout: Duration::from_secs(10),
            },
            resilient_factory: ResilientFactoryConfig {
                failure_threshold,
                circuit_open_duration: Duration::from_secs(60),
                degraded_after_failures: 2,
            },
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::for_profile(EnvironmentProfile::Development)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_development_when_unset() {
        let env = HashMap::new();
        assert_eq!(
            EnvironmentProfile::from_env_map(&env),
            EnvironmentProfile::Development
        );
    }

    #[test]
    fn recognizes_production_aliases() {
        let mut env = HashMap::new();
        env.insert("APP_ENV".to_string(), "prod".to_string());
        assert_eq!(
            EnvironmentProfile::from_env_map(&env),
            EnvironmentProfile::Production
        );
    }

    #[test]
    fn production_never_exposes_operator_messages() {
        assert!(!EnvironmentProfile::Production.expose_operator_messages());
        assert!(EnvironmentProfile::Development.expose_operator_messages());
    }

    #[test]
    fn production_profile_scales_up_concurrency() {
        let dev = CoreConfig::for_profile(EnvironmentProfile::Development);
        let prod = CoreConfig::for_profile(EnvironmentProfile::Production);
        assert!(prod.task_pool.max_concurrency > dev.task_pool.max_concurrency);
    }
}
