//! Health monitor (HealthMonitor, component C10).
//!
//! Shaped after `knhk-workflow-engine`'s `observability/health.rs`
//! (aggregate status plus readiness/liveness probes), but redesigned to
//! be probe-registry driven: callers register named async probes instead
//! of a hardcoded component list, and a background loop refreshes them on
//! an interval rather than only on manual `update_component` calls.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub error: Option<String>,
}

type Probe = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ComponentHealth> + Send>> + Send + Sync>;

/// A registry of named health probes, each bounded to `probe_timeout`
/// (spec: a single slow probe must not stall the whole monitor).
pub struct HealthMonitor {
    probes: RwLock<HashMap<String, Probe>>,
    latest: RwLock<HashMap<String, ComponentHealth>>,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probes: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
            probe_timeout,
        }
    }

    /// Register a probe under `name`. Re-registering the same name
    /// replaces the previous probe.
    pub fn register<F, Fut>(&self, name: impl Into<String>, probe: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ComponentHealth> + Send + 'static,
    {
        let name = name.into();
        self.probes
            .write()
            .insert(name, Arc::new(move || Box::pin(probe())));
    }

    /// Run every registered probe once, bounded by `probe_timeout`, and
    /// record the results. A probe that times out or panics is recorded
    /// as `Unhealthy`.
    #[instrument(skip(self))]
    pub async fn check_all(&self) {
        let probes: Vec<(String, Probe)> = self
            .probes
            .read()
            .iter()
            .map(|(name, probe)| (name.clone(), probe.clone()))
            .collect();

        for (name, probe) in probes {
            let result = tokio::time::timeout(self.probe_timeout, probe()).await;
            let health = match result {
                Ok(health) => health,
                Err(_) => {
                    warn!(component = %name, "health probe timed out");
                    ComponentHealth {
                        name: name.clone(),
                        status: HealthStatus::Unhealthy,
                        error: Some("probe timed out".to_string()),
                    }
                }
            };
            self.latest.write().insert(name, health);
        }
    }

    /// Spawn a background task that calls `check_all` every `interval`
    /// until `cancel` is observed. Returns the join handle so the owner
    /// can await it during shutdown.
    pub fn spawn_periodic(
        self: &Arc<Self>,
        interval: Duration,
        cancel: crate::task_pool::CancelToken,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("running periodic health checks");
                        monitor.check_all().await;
                    }
                    _ = cancel.cancelled() => {
                        debug!("health monitor periodic loop stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Aggregate status across every probe last run. With no probes
    /// registered, reports `Healthy` (nothing to be unhealthy about).
    pub fn aggregate_status(&self) -> HealthStatus {
        let latest = self.latest.read();
        if latest.values().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if latest.values().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.aggregate_status() == HealthStatus::Healthy
    }

    pub fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.latest.read().get(name).cloned()
    }

    pub fn all_components(&self) -> Vec<ComponentHealth> {
        self.latest.read().values().cloned().collect()
    }

    /// Kubernetes-style readiness probe: healthy or degraded both count as
    /// "ready to receive traffic".
    pub fn readiness_probe(&self) -> bool {
        self.aggregate_status() != HealthStatus::Unhealthy
    }

    /// Liveness probe: only proves the registry lock is acquirable, i.e.
    /// the process hasn't deadlocked. Does not reflect dependency health.
    pub fn liveness_probe(&self) -> bool {
        let _ = self.latest.read();
        true
    }
}
