use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::config::MonitoringConfig;
use crate::utils::logger::generate_correlation_id;
use crate::utils::monitoring::{ComponentStatus, HealthMonitor, OverallStatus, SystemHealthCheck};

fn service_version() -> String {
    std::env::var("SCHOOLTRENDS_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string())
}

fn json_reply<T: Serialize>(value: &T, status: StatusCode) -> warp::reply::Response {
    let request_id = generate_correlation_id();
    warp::reply::with_header(
        warp::reply::with_status(warp::reply::json(value), status),
        "X-Request-ID",
        request_id,
    )
    .into_response()
}

fn error_envelope(status: StatusCode, message: &str) -> warp::reply::Response {
    let request_id = generate_correlation_id();
    let body = json!({
        "error": {
            "code": status.as_u16(),
            "message": message,
            "timestamp": Utc::now(),
            "request_id": request_id.clone(),
        }
    });
    warp::reply::with_header(
        warp::reply::with_status(warp::reply::json(&body), status),
        "X-Request-ID",
        request_id,
    )
    .into_response()
}

fn status_code_for(overall: OverallStatus) -> StatusCode {
    match overall {
        OverallStatus::Healthy | OverallStatus::Degraded => StatusCode::OK,
        OverallStatus::Unhealthy | OverallStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn snapshot(
    monitor: &HealthMonitor,
    max_request_time_ms: u64,
) -> Result<SystemHealthCheck, warp::reply::Response> {
    match tokio::time::timeout(
        Duration::from_millis(max_request_time_ms),
        monitor.get_health_check(),
    )
    .await
    {
        Ok(check) => Ok(check),
        Err(_) => {
            warn!("⏰ [HEALTH] health check exceeded {}ms limit", max_request_time_ms);
            Err(error_envelope(
                StatusCode::SERVICE_UNAVAILABLE,
                "health check timed out",
            ))
        }
    }
}

async fn handle_health(
    monitor: Arc<HealthMonitor>,
    max_request_time_ms: u64,
) -> Result<warp::reply::Response, Rejection> {
    let check = match snapshot(&monitor, max_request_time_ms).await {
        Ok(check) => check,
        Err(reply) => return Ok(reply),
    };
    let body = json!({
        "status": check.overall_status.as_str(),
        "uptime_seconds": check.uptime_seconds,
        "version": service_version(),
        "timestamp": check.checked_at,
    });
    Ok(json_reply(&body, status_code_for(check.overall_status)))
}

async fn handle_health_detailed(
    monitor: Arc<HealthMonitor>,
    max_request_time_ms: u64,
) -> Result<warp::reply::Response, Rejection> {
    let check = match snapshot(&monitor, max_request_time_ms).await {
        Ok(check) => check,
        Err(reply) => return Ok(reply),
    };
    let status = status_code_for(check.overall_status);
    Ok(json_reply(&check, status))
}

async fn handle_health_metrics(
    monitor: Arc<HealthMonitor>,
    max_request_time_ms: u64,
) -> Result<warp::reply::Response, Rejection> {
    let check = match snapshot(&monitor, max_request_time_ms).await {
        Ok(check) => check,
        Err(reply) => return Ok(reply),
    };
    let body = json!({
        "metrics": check.metrics,
        "timestamp": check.checked_at,
    });
    Ok(json_reply(&body, StatusCode::OK))
}

async fn handle_health_slo(
    monitor: Arc<HealthMonitor>,
    max_request_time_ms: u64,
) -> Result<warp::reply::Response, Rejection> {
    let check = match snapshot(&monitor, max_request_time_ms).await {
        Ok(check) => check,
        Err(reply) => return Ok(reply),
    };
    let warning_count = check
        .slo_violations
        .iter()
        .filter(|v| matches!(v.severity, crate::utils::monitoring::ViolationSeverity::Warning))
        .count();
    let critical_count = check.slo_violations.len() - warning_count;
    let body = json!({
        "violations": check.slo_violations,
        "warning_count": warning_count,
        "critical_count": critical_count,
        "timestamp": check.checked_at,
    });
    Ok(json_reply(&body, StatusCode::OK))
}

async fn handle_health_alerts(
    monitor: Arc<HealthMonitor>,
) -> Result<warp::reply::Response, Rejection> {
    let alerts = monitor.get_active_alerts();
    let body = json!({
        "alerts": alerts,
        "count": alerts.len(),
        "timestamp": Utc::now(),
    });
    Ok(json_reply(&body, StatusCode::OK))
}

async fn handle_ready(
    monitor: Arc<HealthMonitor>,
    max_request_time_ms: u64,
) -> Result<warp::reply::Response, Rejection> {
    let check = match snapshot(&monitor, max_request_time_ms).await {
        Ok(check) => check,
        Err(reply) => return Ok(reply),
    };
    let any_failed = check
        .components
        .iter()
        .any(|c| c.status == ComponentStatus::Failed);
    let ready = check.overall_status != OverallStatus::Critical && !any_failed;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "ready": ready,
        "status": check.overall_status.as_str(),
        "timestamp": check.checked_at,
    });
    Ok(json_reply(&body, status))
}

async fn handle_live() -> Result<warp::reply::Response, Rejection> {
    let body = json!({ "alive": true, "timestamp": Utc::now() });
    Ok(json_reply(&body, StatusCode::OK))
}

/// Map rejections to the JSON error envelope: unknown paths 404, non-GET
/// methods 405, the rest 500.
async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if err.is_not_found() {
        return Ok(error_envelope(StatusCode::NOT_FOUND, "Not Found"));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(error_envelope(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
        ));
    }
    error!("Unhandled rejection: {:?}", err);
    Ok(error_envelope(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error",
    ))
}

/// HTTP surface over the health monitor.
pub struct HealthServer {
    monitor: Arc<HealthMonitor>,
    config: MonitoringConfig,
}

impl HealthServer {
    pub fn new(monitor: Arc<HealthMonitor>, config: MonitoringConfig) -> Self {
        Self { monitor, config }
    }

    /// Serve until the process exits.
    pub async fn start(self) -> anyhow::Result<()> {
        let host: IpAddr = self
            .config
            .host
            .parse()
            .unwrap_or_else(|_| IpAddr::from([127, 0, 0, 1]));
        let port = self.config.health_check_port;
        let max_ms = self.config.max_request_time_ms;
        info!("🌐 [HEALTH] serving health endpoints on {}:{}", host, port);

        let monitor = self.monitor;

        let with_monitor = {
            let monitor = Arc::clone(&monitor);
            warp::any().map(move || Arc::clone(&monitor))
        };

        let health = warp::path!("health")
            .and(warp::get())
            .and(with_monitor.clone())
            .and_then(move |m| handle_health(m, max_ms));

        let detailed = warp::path!("health" / "detailed")
            .and(warp::get())
            .and(with_monitor.clone())
            .and_then(move |m| handle_health_detailed(m, max_ms));

        let metrics = warp::path!("health" / "metrics")
            .and(warp::get())
            .and(with_monitor.clone())
            .and_then(move |m| handle_health_metrics(m, max_ms));

        let slo = warp::path!("health" / "slo")
            .and(warp::get())
            .and(with_monitor.clone())
            .and_then(move |m| handle_health_slo(m, max_ms));

        let alerts = warp::path!("health" / "alerts")
            .and(warp::get())
            .and(with_monitor.clone())
            .and_then(handle_health_alerts);

        let ready = warp::path!("ready")
            .and(warp::get())
            .and(with_monitor.clone())
            .and_then(move |m| handle_ready(m, max_ms));

        let live = warp::path!("live").and(warp::get()).and_then(|| handle_live());

        let options = warp::options().map(|| {
            warp::reply::with_header(
                warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT),
                "X-Request-ID",
                generate_correlation_id(),
            )
        });

        let routes = detailed
            .or(metrics)
            .or(slo)
            .or(alerts)
            .or(health)
            .or(ready)
            .or(live)
            .or(options)
            .recover(handle_rejection);

        if self.config.enable_cors {
            let cors = warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "OPTIONS"]);
            warp::serve(routes.with(cors)).run((host, port)).await;
        } else {
            warp::serve(routes).run((host, port)).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::monitoring::{AlertSeverity, ComponentHealth};
    use warp::hyper::body::to_bytes;

    fn operational(name: &str) -> ComponentHealth {
        ComponentHealth {
            name: name.to_string(),
            status: ComponentStatus::Operational,
            message: String::new(),
            metrics: None,
            last_checked: Utc::now(),
            uptime_seconds: None,
        }
    }

    async fn body_json(response: warp::reply::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_status_and_version() {
        let monitor = Arc::new(HealthMonitor::new());
        monitor.register_component("ingest", || async {
            Ok(ComponentHealth {
                status: ComponentStatus::Operational,
                ..operational_template()
            })
        });

        let response = handle_health(monitor, 30_000).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-Request-ID"));

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["version"].is_string());
    }

    fn operational_template() -> ComponentHealth {
        operational("ingest")
    }

    #[tokio::test]
    async fn test_ready_degrades_to_503_on_failed_component() {
        let monitor = Arc::new(HealthMonitor::new());
        monitor.register_component("store", || async {
            Ok(ComponentHealth {
                status: ComponentStatus::Failed,
                ..operational_template()
            })
        });

        let response = handle_ready(monitor, 30_000).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["ready"], false);
    }

    #[tokio::test]
    async fn test_ready_ok_when_degraded() {
        let monitor = Arc::new(HealthMonitor::new());
        monitor.register_component("store", || async {
            Ok(ComponentHealth {
                status: ComponentStatus::Degraded,
                ..operational_template()
            })
        });

        let response = handle_ready(monitor, 30_000).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_live_always_200() {
        let response = handle_live().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_returns_metric_map() {
        let monitor = Arc::new(HealthMonitor::new());
        monitor.register_metric("processing_rate", || Ok(900.0));

        let response = handle_health_metrics(monitor, 30_000).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["metrics"]["processing_rate"], 900.0);
        assert_eq!(body["metrics"]["error_rate"], 0.0);
    }

    #[tokio::test]
    async fn test_alerts_endpoint_lists_active_only() {
        let monitor = Arc::new(HealthMonitor::new());
        let id = monitor.create_alert(AlertSeverity::Error, "t", "d", "bronze");
        monitor.create_alert(AlertSeverity::Info, "t2", "d2", "silver");
        monitor.resolve_alert(&id);

        let response = handle_health_alerts(monitor).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["alerts"][0]["severity"], "info");
    }

    #[tokio::test]
    async fn test_slo_endpoint_counts_violations() {
        let monitor = Arc::new(HealthMonitor::with_default_slos());
        monitor.register_metric("error_rate", || Ok(3.0));
        monitor.register_metric("processing_rate", || Ok(900.0));

        let response = handle_health_slo(monitor, 30_000).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["warning_count"], 1);
        assert_eq!(body["critical_count"], 0);
    }

    #[tokio::test]
    async fn test_detailed_maps_unhealthy_to_503() {
        let monitor = Arc::new(HealthMonitor::new());
        monitor.register_component("a", || async {
            Ok(ComponentHealth {
                status: ComponentStatus::Degraded,
                ..operational_template()
            })
        });
        monitor.register_component("b", || async {
            Ok(ComponentHealth {
                status: ComponentStatus::Degraded,
                ..operational_template()
            })
        });

        let response = handle_health_detailed(monitor, 30_000).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
