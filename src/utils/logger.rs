use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// Initialize the process-wide tracing subscriber.
///
/// The minimum level comes from `LOG_LEVEL` (falling back to `RUST_LOG`,
/// defaulting to `info`). When `APP_ENV=production` the subscriber emits one
/// JSON record per event so a log aggregator can join on correlation ids;
/// otherwise output is human-friendly compact form.
pub fn setup_logging() -> Result<()> {
    let env_filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let production = std::env::var("APP_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false);

    if production {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            )
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_file(true)
                    .compact(),
            )
            .with(env_filter)
            .init();
    }

    Ok(())
}

/// Opaque token used to stitch events of one batch run across components.
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Context-carrying logger value. Children carry the union of ancestor and
/// new context keys; the parent is never mutated.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    context: BTreeMap<String, String>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child logger carrying additional context keys.
    pub fn with_context(&self, extra: &[(&str, &str)]) -> Logger {
        let mut context = self.context.clone();
        for (key, value) in extra {
            context.insert((*key).to_string(), (*value).to_string());
        }
        Logger { context }
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    fn render_context(&self) -> String {
        let mut rendered = String::new();
        for (key, value) in &self.context {
            if !rendered.is_empty() {
                rendered.push(' ');
            }
            rendered.push_str(key);
            rendered.push('=');
            rendered.push_str(value);
        }
        rendered
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(context = %self.render_context(), "{}", message);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(context = %self.render_context(), "{}", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(context = %self.render_context(), "{}", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(context = %self.render_context(), "{}", message);
    }

    /// Start a performance timer bound to this logger's context snapshot.
    pub fn start_timer(&self, operation: &str) -> PerformanceTimer {
        PerformanceTimer {
            operation: operation.to_string(),
            started: Instant::now(),
            logger: self.clone(),
        }
    }
}

/// Captures the start of an operation and emits its duration on completion.
#[derive(Debug)]
pub struct PerformanceTimer {
    operation: String,
    started: Instant,
    logger: Logger,
}

impl PerformanceTimer {
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Emit an `info` event with the elapsed milliseconds.
    pub fn end(self, message: Option<&str>) -> u64 {
        let duration_ms = self.elapsed_ms();
        tracing::info!(
            operation = %self.operation,
            duration_ms,
            context = %self.logger.render_context(),
            "{}",
            message.unwrap_or("operation completed")
        );
        duration_ms
    }

    /// Emit an `error` event with the same duration plus error details.
    pub fn end_with_error(self, error: &dyn std::error::Error, message: Option<&str>) -> u64 {
        let duration_ms = self.elapsed_ms();
        tracing::error!(
            operation = %self.operation,
            duration_ms,
            error = %error,
            context = %self.logger.render_context(),
            "{}",
            message.unwrap_or("operation failed")
        );
        duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_logger_carries_union_of_context() {
        let root = Logger::new().with_context(&[("component", "bronze")]);
        let child = root.with_context(&[("correlation_id", "abc-123")]);

        assert_eq!(root.context().len(), 1);
        assert_eq!(child.context().len(), 2);
        assert_eq!(child.context().get("component").map(String::as_str), Some("bronze"));
        assert_eq!(
            child.context().get("correlation_id").map(String::as_str),
            Some("abc-123")
        );
    }

    #[test]
    fn test_child_overrides_do_not_mutate_parent() {
        let root = Logger::new().with_context(&[("stage", "discovery")]);
        let child = root.with_context(&[("stage", "checksum")]);

        assert_eq!(root.context().get("stage").map(String::as_str), Some("discovery"));
        assert_eq!(child.context().get("stage").map(String::as_str), Some("checksum"));
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = generate_correlation_id();
        let b = generate_correlation_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_timer_reports_duration() {
        let logger = Logger::new();
        let timer = logger.start_timer("noop");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.end(None) >= 5);
    }
}
