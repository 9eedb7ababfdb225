use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::utils::errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentStatus {
    #[serde(rename = "operational")]
    Operational,
    #[serde(rename = "degraded")]
    Degraded,
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ComponentStatus,
    pub message: String,
    pub metrics: Option<serde_json::Value>,
    pub last_checked: DateTime<Utc>,
    pub uptime_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverallStatus {
    #[serde(rename = "healthy")]
    Healthy,
    #[serde(rename = "degraded")]
    Degraded,
    #[serde(rename = "unhealthy")]
    Unhealthy,
    #[serde(rename = "critical")]
    Critical,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Healthy => "healthy",
            OverallStatus::Degraded => "degraded",
            OverallStatus::Unhealthy => "unhealthy",
            OverallStatus::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "critical")]
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub component: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

/// Whether larger or smaller readings breach the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SloDirection {
    #[serde(rename = "above_is_bad")]
    AboveIsBad,
    #[serde(rename = "below_is_bad")]
    BelowIsBad,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloDefinition {
    pub name: String,
    pub target: f64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub unit: String,
    pub description: String,
    pub direction: SloDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationSeverity {
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "critical")]
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct SloViolation {
    pub name: String,
    pub target: f64,
    pub actual: f64,
    pub severity: ViolationSeverity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot served to the health endpoints; recomputed on every request.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthCheck {
    pub overall_status: OverallStatus,
    pub components: Vec<ComponentHealth>,
    pub metrics: HashMap<String, f64>,
    pub slo_violations: Vec<SloViolation>,
    pub active_alerts: Vec<Alert>,
    pub checked_at: DateTime<Utc>,
    pub uptime_seconds: u64,
}

type ComponentCheck =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ComponentHealth, PipelineError>> + Send + Sync>;
type MetricCollector = Arc<dyn Fn() -> Result<f64, PipelineError> + Send + Sync>;

/// Metric keys every snapshot carries, defaulted to zero when no collector
/// supplies them.
const DEFAULT_METRIC_KEYS: [&str; 4] = [
    "error_rate",
    "processing_rate",
    "memory_usage_mb",
    "open_circuits",
];

/// Sentinel reported when a collector fails; the check itself never aborts.
pub const FAILED_COLLECTOR_SENTINEL: f64 = -1.0;

/// Aggregates component checks and metric collectors, evaluates SLOs, and
/// keeps the append-only alert log.
pub struct HealthMonitor {
    components: RwLock<Vec<(String, ComponentCheck)>>,
    collectors: RwLock<Vec<(String, MetricCollector)>>,
    slos: RwLock<Vec<SloDefinition>>,
    alerts: RwLock<Vec<Alert>>,
    started: Instant,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(Vec::new()),
            collectors: RwLock::new(Vec::new()),
            slos: RwLock::new(Vec::new()),
            alerts: RwLock::new(Vec::new()),
            started: Instant::now(),
        }
    }

    /// The stock objectives: error rate climbs into trouble, processing
    /// rate falls into it.
    pub fn with_default_slos() -> Self {
        let monitor = Self::new();
        monitor.register_slo(SloDefinition {
            name: "error_rate".to_string(),
            target: 1.0,
            warning_threshold: 2.0,
            critical_threshold: 5.0,
            unit: "%".to_string(),
            description: "share of file ingestions failing".to_string(),
            direction: SloDirection::AboveIsBad,
        });
        monitor.register_slo(SloDefinition {
            name: "processing_rate".to_string(),
            target: 1000.0,
            warning_threshold: 800.0,
            critical_threshold: 500.0,
            unit: "records/min".to_string(),
            description: "bronze ingestion throughput".to_string(),
            direction: SloDirection::BelowIsBad,
        });
        monitor
    }

    pub fn register_component<F, Fut>(&self, name: &str, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ComponentHealth, PipelineError>> + Send + 'static,
    {
        let boxed: ComponentCheck = Arc::new(move || Box::pin(check()) as BoxFuture<'static, _>);
        self.components
            .write()
            .unwrap()
            .push((name.to_string(), boxed));
        info!("🩺 [MONITOR] registered component check '{}'", name);
    }

    pub fn register_metric<F>(&self, name: &str, collector: F)
    where
        F: Fn() -> Result<f64, PipelineError> + Send + Sync + 'static,
    {
        self.collectors
            .write()
            .unwrap()
            .push((name.to_string(), Arc::new(collector)));
        debug!("🩺 [MONITOR] registered metric collector '{}'", name);
    }

    pub fn register_slo(&self, slo: SloDefinition) {
        self.slos.write().unwrap().push(slo);
    }

    pub fn create_alert(
        &self,
        severity: AlertSeverity,
        title: &str,
        description: &str,
        component: &str,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let alert = Alert {
            id: id.clone(),
            severity,
            title: title.to_string(),
            description: description.to_string(),
            component: component.to_string(),
            timestamp: Utc::now(),
            resolved: false,
        };
        self.alerts.write().unwrap().push(alert);
        id
    }

    pub fn resolve_alert(&self, id: &str) -> bool {
        let mut alerts = self.alerts.write().unwrap();
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.resolved = true;
                true
            }
            None => false,
        }
    }

    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .unwrap()
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect()
    }

    fn collect_metrics(&self) -> HashMap<String, f64> {
        let collectors: Vec<(String, MetricCollector)> =
            self.collectors.read().unwrap().clone();
        let mut metrics = HashMap::new();
        for (name, collector) in collectors {
            let value = match collector() {
                Ok(value) => value,
                Err(err) => {
                    error!("❌ [MONITOR] metric collector '{}' failed: {}", name, err);
                    FAILED_COLLECTOR_SENTINEL
                }
            };
            metrics.insert(name, value);
        }
        for key in DEFAULT_METRIC_KEYS {
            metrics.entry(key.to_string()).or_insert(0.0);
        }
        metrics
    }

    fn evaluate_slos(&self, metrics: &HashMap<String, f64>) -> Vec<SloViolation> {
        let slos = self.slos.read().unwrap();
        let mut violations = Vec::new();
        for slo in slos.iter() {
            let Some(actual) = metrics.get(&slo.name).copied() else {
                continue;
            };
            let severity = match slo.direction {
                SloDirection::AboveIsBad => {
                    if actual > slo.critical_threshold {
                        Some(ViolationSeverity::Critical)
                    } else if actual > slo.warning_threshold {
                        Some(ViolationSeverity::Warning)
                    } else {
                        None
                    }
                }
                SloDirection::BelowIsBad => {
                    if actual < slo.critical_threshold {
                        Some(ViolationSeverity::Critical)
                    } else if actual < slo.warning_threshold {
                        Some(ViolationSeverity::Warning)
                    } else {
                        None
                    }
                }
            };
            if let Some(severity) = severity {
                violations.push(SloViolation {
                    name: slo.name.clone(),
                    target: slo.target,
                    actual,
                    severity,
                    description: slo.description.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
        violations
    }

    fn overall_status(
        components: &[ComponentHealth],
        violations: &[SloViolation],
        active_alerts: &[Alert],
    ) -> OverallStatus {
        let any_failed = components.iter().any(|c| c.status == ComponentStatus::Failed);
        let any_critical_violation = violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Critical);
        if any_failed || any_critical_violation {
            return OverallStatus::Critical;
        }

        let degraded = components
            .iter()
            .filter(|c| c.status == ComponentStatus::Degraded)
            .count();
        let warning_alerts = active_alerts
            .iter()
            .filter(|a| a.severity >= AlertSeverity::Warning)
            .count();
        if degraded >= 2 || (degraded >= 1 && warning_alerts >= 1) {
            return OverallStatus::Unhealthy;
        }

        let warnings = violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Warning)
            .count();
        if degraded >= 1 || warnings >= 1 {
            return OverallStatus::Degraded;
        }
        OverallStatus::Healthy
    }

    /// Run every component check and collector; a failing check becomes a
    /// failed component entry, a failing collector a sentinel value. The
    /// snapshot always completes.
    pub async fn get_health_check(&self) -> SystemHealthCheck {
        let checks: Vec<(String, ComponentCheck)> = self.components.read().unwrap().clone();
        let mut components = Vec::new();
        for (name, check) in checks {
            match check().await {
                Ok(health) => components.push(health),
                Err(err) => {
                    error!("❌ [MONITOR] component check '{}' failed: {}", name, err);
                    components.push(ComponentHealth {
                        name,
                        status: ComponentStatus::Failed,
                        message: err.to_string(),
                        metrics: None,
                        last_checked: Utc::now(),
                        uptime_seconds: None,
                    });
                }
            }
        }

        let metrics = self.collect_metrics();
        let slo_violations = self.evaluate_slos(&metrics);
        let active_alerts = self.get_active_alerts();
        let overall_status = Self::overall_status(&components, &slo_violations, &active_alerts);

        SystemHealthCheck {
            overall_status,
            components,
            metrics,
            slo_violations,
            active_alerts,
            checked_at: Utc::now(),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Resident memory of this process in MiB, for the default collectors.
pub fn process_memory_mb() -> Result<f64, PipelineError> {
    let pid = sysinfo::get_current_pid()
        .map_err(|e| PipelineError::Health(format!("pid lookup failed: {e}")))?;
    let mut system = sysinfo::System::new();
    system.refresh_process(pid);
    match system.process(pid) {
        Some(process) => Ok(process.memory() as f64 / (1024.0 * 1024.0)),
        None => Err(PipelineError::Health("process not visible".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str, status: ComponentStatus) -> ComponentHealth {
        ComponentHealth {
            name: name.to_string(),
            status,
            message: String::new(),
            metrics: None,
            last_checked: Utc::now(),
            uptime_seconds: None,
        }
    }

    fn scenario_monitor(error_rate: f64, processing_rate: f64) -> HealthMonitor {
        let monitor = HealthMonitor::with_default_slos();
        monitor.register_component("ingest", || async {
            Ok(component("ingest", ComponentStatus::Operational))
        });
        monitor.register_metric("error_rate", move || Ok(error_rate));
        monitor.register_metric("processing_rate", move || Ok(processing_rate));
        monitor
    }

    #[tokio::test]
    async fn test_status_cascade_operational_plus_degraded() {
        let monitor = scenario_monitor(3.0, 900.0);
        monitor.register_component("extract", || async {
            Ok(component("extract", ComponentStatus::Degraded))
        });

        let check = monitor.get_health_check().await;
        assert_eq!(check.components.len(), 2);
        // error_rate 3% breaches the 2% warning threshold; a 900/min
        // processing rate is above the 800 floor and raises nothing.
        assert_eq!(check.slo_violations.len(), 1);
        assert_eq!(check.slo_violations[0].name, "error_rate");
        assert_eq!(check.slo_violations[0].severity, ViolationSeverity::Warning);
        assert_eq!(check.overall_status, OverallStatus::Degraded);
    }

    #[tokio::test]
    async fn test_status_cascade_failed_component_is_critical() {
        let monitor = scenario_monitor(3.0, 900.0);
        monitor.register_component("extract", || async {
            Ok(component("extract", ComponentStatus::Failed))
        });

        let check = monitor.get_health_check().await;
        assert_eq!(check.overall_status, OverallStatus::Critical);
    }

    #[tokio::test]
    async fn test_check_exception_becomes_failed_component() {
        let monitor = HealthMonitor::new();
        monitor.register_component("broken", || async {
            Err(PipelineError::Health("probe exploded".to_string()))
        });

        let check = monitor.get_health_check().await;
        assert_eq!(check.components[0].status, ComponentStatus::Failed);
        assert!(check.components[0].message.contains("probe exploded"));
        assert_eq!(check.overall_status, OverallStatus::Critical);
    }

    #[tokio::test]
    async fn test_failing_collector_yields_sentinel() {
        let monitor = HealthMonitor::new();
        monitor.register_metric("disk_latency_ms", || {
            Err(PipelineError::Health("collector down".to_string()))
        });

        let check = monitor.get_health_check().await;
        assert_eq!(check.metrics["disk_latency_ms"], FAILED_COLLECTOR_SENTINEL);
        // Default keys are present even with no collectors registered.
        assert_eq!(check.metrics["error_rate"], 0.0);
        assert_eq!(check.overall_status, OverallStatus::Healthy);
    }

    #[tokio::test]
    async fn test_critical_slo_violation_is_critical() {
        let monitor = scenario_monitor(9.0, 900.0);
        let check = monitor.get_health_check().await;
        assert_eq!(check.slo_violations[0].severity, ViolationSeverity::Critical);
        assert_eq!(check.overall_status, OverallStatus::Critical);
    }

    #[tokio::test]
    async fn test_below_is_bad_direction() {
        let monitor = scenario_monitor(1.0, 600.0);
        let check = monitor.get_health_check().await;
        assert_eq!(check.slo_violations.len(), 1);
        assert_eq!(check.slo_violations[0].name, "processing_rate");
        assert_eq!(check.slo_violations[0].severity, ViolationSeverity::Warning);
    }

    #[test]
    fn test_alert_lifecycle() {
        let monitor = HealthMonitor::new();
        let id = monitor.create_alert(
            AlertSeverity::Warning,
            "breaker open",
            "fs_stat circuit opened",
            "bronze",
        );
        assert_eq!(monitor.get_active_alerts().len(), 1);

        assert!(monitor.resolve_alert(&id));
        assert!(monitor.get_active_alerts().is_empty());
        assert!(!monitor.resolve_alert("no-such-alert"));
    }

    #[tokio::test]
    async fn test_degraded_component_plus_warning_alert_is_unhealthy() {
        let monitor = scenario_monitor(1.0, 900.0);
        monitor.register_component("extract", || async {
            Ok(component("extract", ComponentStatus::Degraded))
        });
        monitor.create_alert(AlertSeverity::Warning, "t", "d", "extract");

        let check = monitor.get_health_check().await;
        assert_eq!(check.overall_status, OverallStatus::Unhealthy);
    }
}
