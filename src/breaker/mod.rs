use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::utils::errors::PipelineError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "half_open")]
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Per-call timeout applied to the wrapped operation
    pub timeout_ms: u64,
    /// How long the circuit stays open before a half-open probe
    pub recovery_time_ms: u64,
    /// Consecutive half-open successes required to close
    pub success_threshold: u32,
    /// In-call retries for retriable failures
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl BreakerConfig {
    /// Slow, flaky external volumes: patient timeouts, generous retries.
    pub fn external_drive() -> Self {
        Self {
            failure_threshold: 5,
            timeout_ms: 10_000,
            recovery_time_ms: 60_000,
            success_threshold: 2,
            max_retries: 3,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
        }
    }

    /// Local store operations: fail fast, short recovery window.
    pub fn database() -> Self {
        Self {
            failure_threshold: 3,
            timeout_ms: 5_000,
            recovery_time_ms: 30_000,
            success_threshold: 2,
            max_retries: 2,
            retry_delay_ms: 500,
            max_retry_delay_ms: 5_000,
        }
    }

    /// CPU-heavy per-file work: high threshold, long per-call timeout.
    pub fn file_processing() -> Self {
        Self {
            failure_threshold: 10,
            timeout_ms: 30_000,
            recovery_time_ms: 120_000,
            success_threshold: 3,
            max_retries: 2,
            retry_delay_ms: 2_000,
            max_retry_delay_ms: 60_000,
        }
    }
}

/// Outcome of one breaker-wrapped call.
#[derive(Debug)]
pub struct BreakerOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub response_time_ms: u64,
}

impl<T> BreakerOutcome<T> {
    pub fn into_result(self, breaker_name: &str) -> Result<T, PipelineError> {
        match self.data {
            Some(data) => Ok(data),
            None => {
                let message = self
                    .error
                    .unwrap_or_else(|| format!("Circuit breaker '{}' returned no data", breaker_name));
                Err(PipelineError::Extraction(message))
            }
        }
    }
}

/// Point-in-time metrics for one breaker, observed by health probes.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub rejected_calls: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub retry_window_remaining_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<Instant>,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    rejected_calls: u64,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt_at: None,
            total_calls: 0,
            total_failures: 0,
            total_successes: 0,
            rejected_calls: 0,
            last_failure_at: None,
            last_success_at: None,
        }
    }
}

/// Error families that a breaker retries in place; transient by nature.
/// Both the errno spellings and the OS error strings are matched.
const RETRIABLE_PATTERNS: [&str; 11] = [
    "timeout",
    "timed out",
    "ebusy",
    "resource busy",
    "eagain",
    "econnreset",
    "connection reset",
    "etimedout",
    "enetunreach",
    "ehostunreach",
    "temporary",
];

/// Error families that no amount of retrying will fix.
const NON_RETRIABLE_PATTERNS: [&str; 15] = [
    "enoent",
    "no such file",
    "eacces",
    "permission denied",
    "enotdir",
    "not a directory",
    "eisdir",
    "is a directory",
    "emfile",
    "enfile",
    "enospc",
    "no space left",
    "erofs",
    "unique constraint",
    "duplicate",
];

/// Classify retriability by error-message pattern. Unknown errors are
/// treated as retriable.
pub fn is_retriable_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    if NON_RETRIABLE_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return false;
    }
    if RETRIABLE_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return true;
    }
    true
}

/// Three-state circuit breaker wrapping fallible async operations with a
/// per-call timeout and exponential-backoff retries.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    rng: Mutex<StdRng>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerInner::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(name: &str, config: BreakerConfig, seed: u64) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerInner::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.inner.lock().unwrap();
        let now = Instant::now();
        BreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            rejected_calls: inner.rejected_calls,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            retry_window_remaining_ms: inner.next_attempt_at.and_then(|at| {
                at.checked_duration_since(now).map(|d| d.as_millis() as u64)
            }),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = BreakerInner::new();
        info!("🔄 [BREAKER] '{}' reset to closed", self.name);
    }

    /// Execute `operation` under this breaker's failure gating.
    ///
    /// Open circuits fail fast without invoking the operation; retriable
    /// failures are retried in place up to `max_retries` with jittered
    /// exponential backoff; the aggregated result drives state transitions.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> BreakerOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let started = Instant::now();

        {
            let mut inner = self.inner.lock().unwrap();
            inner.total_calls += 1;
            if inner.state == CircuitState::Open {
                let window_open = inner
                    .next_attempt_at
                    .map(|at| Instant::now() < at)
                    .unwrap_or(false);
                if window_open {
                    inner.rejected_calls += 1;
                    return BreakerOutcome {
                        success: false,
                        data: None,
                        error: Some(format!("Circuit breaker '{}' is OPEN", self.name)),
                        retry_count: 0,
                        response_time_ms: started.elapsed().as_millis() as u64,
                    };
                }
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                info!("🔍 [BREAKER] '{}' recovery window elapsed, probing half-open", self.name);
            }
        }

        let call_timeout = Duration::from_millis(self.config.timeout_ms);
        let mut attempt: u32 = 0;

        loop {
            let error_message = match tokio::time::timeout(call_timeout, operation()).await {
                Ok(Ok(value)) => {
                    self.record_success();
                    return BreakerOutcome {
                        success: true,
                        data: Some(value),
                        error: None,
                        retry_count: attempt,
                        response_time_ms: started.elapsed().as_millis() as u64,
                    };
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("timeout after {}ms", self.config.timeout_ms),
            };

            if attempt < self.config.max_retries && is_retriable_message(&error_message) {
                let delay = self.backoff_delay(attempt);
                debug!(
                    "⏳ [BREAKER] '{}' retrying in {}ms (attempt {}): {}",
                    self.name,
                    delay.as_millis(),
                    attempt + 1,
                    error_message
                );
                sleep(delay).await;
                attempt += 1;
                continue;
            }

            self.record_failure();
            return BreakerOutcome {
                success: false,
                data: None,
                error: Some(error_message),
                retry_count: attempt,
                response_time_ms: started.elapsed().as_millis() as u64,
            };
        }
    }

    /// `min(retry_delay × 2^attempt + jitter, max_retry_delay)` with
    /// jitter uniform in [0, 0.1·delay).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_delay_ms.saturating_mul(1u64 << attempt.min(20));
        let jitter_cap = (base as f64 * 0.1).max(1.0);
        let jitter = self.rng.lock().unwrap().gen_range(0.0..jitter_cap) as u64;
        Duration::from_millis(base.saturating_add(jitter).min(self.config.max_retry_delay_ms))
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_successes += 1;
        inner.last_success_at = Some(Utc::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt_at = None;
                    info!("✅ [BREAKER] '{}' recovered, circuit closed", self.name);
                }
            }
            _ => {
                inner.failure_count = 0;
            }
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_failures += 1;
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.next_attempt_at =
                    Some(Instant::now() + Duration::from_millis(self.config.recovery_time_ms));
                warn!("⚠️ [BREAKER] '{}' half-open probe failed, circuit re-opened", self.name);
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.next_attempt_at =
                        Some(Instant::now() + Duration::from_millis(self.config.recovery_time_ms));
                    warn!(
                        "🚫 [BREAKER] '{}' opened after {} consecutive failures",
                        self.name, inner.failure_count
                    );
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// Registry of named breakers shared across the pipeline.
#[derive(Debug, Default)]
pub struct CircuitBreakerManager {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breaker under `name`, returning the existing one if the
    /// name is already taken.
    pub fn register(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.write().unwrap();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().unwrap().get(name).cloned()
    }

    pub fn get_all_metrics(&self) -> HashMap<String, BreakerMetrics> {
        self.breakers
            .read()
            .unwrap()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.metrics()))
            .collect()
    }

    pub fn get_open_circuits(&self) -> Vec<String> {
        self.breakers
            .read()
            .unwrap()
            .values()
            .filter(|b| b.state() == CircuitState::Open)
            .map(|b| b.name().to_string())
            .collect()
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().unwrap().values() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(failure_threshold: u32, max_retries: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold,
            timeout_ms: 1_000,
            recovery_time_ms: 60_000,
            success_threshold: 2,
            max_retries,
            retry_delay_ms: 1,
            max_retry_delay_ms: 10,
        }
    }

    async fn fail_once(breaker: &CircuitBreaker) -> BreakerOutcome<()> {
        breaker
            .execute(|| async { Err::<(), _>(PipelineError::Extraction("ENOENT: no such file".into())) })
            .await
    }

    #[tokio::test]
    async fn test_opens_after_exact_failure_threshold() {
        let breaker = CircuitBreaker::with_seed("stat", fast_config(3, 0), 7);

        for _ in 0..2 {
            let outcome = fail_once(&breaker).await;
            assert!(!outcome.success);
            assert_eq!(breaker.state(), CircuitState::Closed);
        }

        let third = fail_once(&breaker).await;
        assert!(!third.success);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_invoking_operation() {
        let breaker = CircuitBreaker::with_seed("stat", fast_config(1, 0), 7);
        fail_once(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let outcome = breaker
            .execute(|| {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok::<_, PipelineError>(()) }
            })
            .await;

        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!outcome.success);
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Circuit breaker 'stat' is OPEN")
        );
    }

    #[tokio::test]
    async fn test_half_open_closes_after_success_threshold() {
        let mut config = fast_config(1, 0);
        config.recovery_time_ms = 0;
        config.success_threshold = 2;
        let breaker = CircuitBreaker::with_seed("probe", config, 7);

        fail_once(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let first = breaker.execute(|| async { Ok::<_, PipelineError>(1u8) }).await;
        assert!(first.success);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let second = breaker.execute(|| async { Ok::<_, PipelineError>(2u8) }).await;
        assert!(second.success);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let mut config = fast_config(1, 0);
        config.recovery_time_ms = 0;
        let breaker = CircuitBreaker::with_seed("probe", config, 7);

        fail_once(&breaker).await;
        fail_once(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_retriable_failures_are_retried() {
        let breaker = CircuitBreaker::with_seed("read", fast_config(10, 2), 7);
        let calls = std::sync::atomic::AtomicU32::new(0);

        let outcome = breaker
            .execute(|| {
                let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(PipelineError::Extraction("EBUSY: device busy".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.retry_count, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_non_retriable_failures_are_not_retried() {
        let breaker = CircuitBreaker::with_seed("read", fast_config(10, 3), 7);
        let calls = std::sync::atomic::AtomicU32::new(0);

        let outcome = breaker
            .execute(|| {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err::<(), _>(PipelineError::Extraction("EACCES: permission denied".into())) }
            })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retriability_classification() {
        assert!(is_retriable_message("operation timeout"));
        assert!(is_retriable_message("EAGAIN: resource temporarily unavailable"));
        assert!(is_retriable_message("ECONNRESET"));
        assert!(!is_retriable_message("ENOENT: no such file or directory"));
        assert!(!is_retriable_message("ENOSPC: no space left on device"));
        assert!(!is_retriable_message("UNIQUE constraint failed: bronze_records.file_path"));
        // Unknown errors default to retriable.
        assert!(is_retriable_message("something inexplicable"));
    }

    #[test]
    fn test_backoff_delay_is_capped_and_jittered() {
        let mut config = fast_config(1, 5);
        config.retry_delay_ms = 100;
        config.max_retry_delay_ms = 350;
        let breaker = CircuitBreaker::with_seed("backoff", config, 42);

        let first = breaker.backoff_delay(0).as_millis() as u64;
        assert!((100..110).contains(&first));

        let capped = breaker.backoff_delay(4).as_millis() as u64;
        assert_eq!(capped, 350);
    }

    #[test]
    fn test_manager_registry_and_open_circuits() {
        let manager = CircuitBreakerManager::new();
        let a = manager.register("alpha", fast_config(1, 0));
        let again = manager.register("alpha", BreakerConfig::database());
        assert!(Arc::ptr_eq(&a, &again));

        assert!(manager.get("alpha").is_some());
        assert!(manager.get("missing").is_none());
        assert!(manager.get_open_circuits().is_empty());
        assert_eq!(manager.get_all_metrics().len(), 1);
    }
}
