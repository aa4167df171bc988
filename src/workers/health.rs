use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

// ============================================================================
// Health Monitoring
// ============================================================================
//
// Workers publish their status here; the metrics server reads the
// aggregate for /health.
//
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthStatus::Degraded(_))
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }

    /// Gauge encoding: 0=Unhealthy, 1=Degraded, 2=Healthy
    pub fn level(&self) -> i64 {
        match self {
            HealthStatus::Unhealthy(_) => 0,
            HealthStatus::Degraded(_) => 1,
            HealthStatus::Healthy => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

#[derive(Default)]
pub struct HealthMonitor {
    components: RwLock<HashMap<String, ComponentHealth>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, health: ComponentHealth) {
        tracing::debug!(
            component = %health.name,
            status = ?health.status,
            "Updated component health"
        );
        self.components
            .write()
            .await
            .insert(health.name.clone(), health);
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(name).cloned()
    }

    pub async fn snapshot(&self) -> SystemHealth {
        let components = self.components.read().await.clone();
        SystemHealth {
            overall_status: compute_overall_status(&components),
            components,
            check_time: Utc::now(),
        }
    }
}

/// Any unhealthy component makes the system unhealthy; any degraded one
/// makes it degraded.
pub fn compute_overall_status(components: &HashMap<String, ComponentHealth>) -> HealthStatus {
    let mut has_degraded = false;
    let mut unhealthy = Vec::new();

    for (name, health) in components {
        match &health.status {
            HealthStatus::Unhealthy(msg) => unhealthy.push(format!("{name}: {msg}")),
            HealthStatus::Degraded(_) => has_degraded = true,
            HealthStatus::Healthy => {}
        }
    }

    if !unhealthy.is_empty() {
        unhealthy.sort();
        HealthStatus::Unhealthy(unhealthy.join(", "))
    } else if has_degraded {
        HealthStatus::Degraded("Some components degraded".to_string())
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_monitor_is_healthy() {
        let monitor = HealthMonitor::new();
        assert!(monitor.snapshot().await.overall_status.is_healthy());
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let monitor = HealthMonitor::new();
        monitor.update(ComponentHealth::new("a", HealthStatus::Healthy)).await;
        monitor
            .update(ComponentHealth::new("b", HealthStatus::Degraded("retrying".into())))
            .await;
        assert!(monitor.snapshot().await.overall_status.is_degraded());

        monitor
            .update(ComponentHealth::new("c", HealthStatus::Unhealthy("down".into())))
            .await;
        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot.overall_status, HealthStatus::Unhealthy("c: down".into()));
        assert_eq!(snapshot.components.len(), 3);
    }

    #[tokio::test]
    async fn test_update_replaces_component() {
        let monitor = HealthMonitor::new();
        monitor
            .update(ComponentHealth::new("w", HealthStatus::Unhealthy("x".into())))
            .await;
        monitor
            .update(ComponentHealth::new("w", HealthStatus::Healthy).with_details("recovered"))
            .await;

        let health = monitor.component("w").await.unwrap();
        assert!(health.status.is_healthy());
        assert_eq!(health.details.as_deref(), Some("recovered"));
    }

    #[test]
    fn test_levels() {
        assert_eq!(HealthStatus::Healthy.level(), 2);
        assert_eq!(HealthStatus::Degraded(String::new()).level(), 1);
        assert!(HealthStatus::Unhealthy(String::new()).is_unhealthy());
    }
}
