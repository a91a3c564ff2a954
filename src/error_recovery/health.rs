//! Health check registry and degradation aggregation
//!
//! Probes are registered by name and run on demand; this module never schedules
//! them. Every run fans out all probes concurrently, each bounded by its own
//! timeout, and the aggregated snapshot yields the current [`DegradationLevel`].

use crate::error::{ErrorCategory, OperationContext, Result};
use crate::error_recovery::timeout::execute_with_timeout;
use crate::utils::{safe_read, safe_write};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A health probe
///
/// Any `Fn() -> impl Future<Output = Result<serde_json::Value>>` closure is a
/// probe; implement the trait directly for probes that carry state.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Check the resource, returning a healthiness payload
    async fn check(&self) -> Result<serde_json::Value>;
}

#[async_trait]
impl<F, Fut> HealthProbe for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    async fn check(&self) -> Result<serde_json::Value> {
        (self)().await
    }
}

/// Registration options of a health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckOptions {
    /// Upper bound for a single probe run
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// An unhealthy critical probe makes the whole system critical
    pub critical: bool,
    /// How often an external scheduler should run the probe
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            critical: false,
            interval: Duration::from_secs(30),
        }
    }
}

impl HealthCheckOptions {
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of one probe run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    /// Payload returned by a healthy probe
    pub result: Option<serde_json::Value>,
    /// Failure message of an unhealthy probe
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub critical: bool,
}

/// Ordered classification of overall system health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradationLevel {
    Normal = 0,
    Degraded = 1,
    Minimal = 2,
    Critical = 3,
}

const ALL_FEATURES: &[&str] = &[
    "playlist_creation",
    "metadata_enrichment",
    "genre_categorization",
    "cache_writes",
    "cache_reads",
    "basic_listing",
];

impl DegradationLevel {
    pub fn description(&self) -> &'static str {
        match self {
            DegradationLevel::Normal => "All systems operational",
            DegradationLevel::Degraded => "Some non-critical services unavailable",
            DegradationLevel::Minimal => "Running with minimal functionality",
            DegradationLevel::Critical => "Critical services unavailable",
        }
    }

    /// Features that stay available at this level
    pub fn enabled_features(&self) -> &'static [&'static str] {
        match self {
            DegradationLevel::Normal => ALL_FEATURES,
            DegradationLevel::Degraded => &[
                "playlist_creation",
                "genre_categorization",
                "cache_writes",
                "cache_reads",
                "basic_listing",
            ],
            DegradationLevel::Minimal => &["cache_reads", "basic_listing"],
            DegradationLevel::Critical => &["basic_listing"],
        }
    }

    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        self.enabled_features().contains(&feature)
    }

    /// Derive the level from probe counts
    pub fn from_counts(healthy: usize, unhealthy: usize, critical_unhealthy: usize) -> Self {
        if critical_unhealthy > 0 {
            DegradationLevel::Critical
        } else if unhealthy > healthy {
            DegradationLevel::Minimal
        } else if unhealthy > 0 {
            DegradationLevel::Degraded
        } else {
            DegradationLevel::Normal
        }
    }
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DegradationLevel::Normal => "normal",
            DegradationLevel::Degraded => "degraded",
            DegradationLevel::Minimal => "minimal",
            DegradationLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Health summary counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Probes that are both unhealthy and critical
    pub critical: usize,
}

/// Aggregated health of all registered probes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    /// False iff a critical probe is unhealthy
    pub healthy: bool,
    pub degradation_level: DegradationLevel,
    pub checks: BTreeMap<String, HealthCheckResult>,
    pub summary: HealthSummary,
    pub timestamp: DateTime<Utc>,
}

impl SystemHealth {
    /// Aggregate a set of probe results
    pub fn from_results(checks: BTreeMap<String, HealthCheckResult>) -> Self {
        let total = checks.len();
        let healthy = checks.values().filter(|r| r.healthy).count();
        let critical = checks
            .values()
            .filter(|r| !r.healthy && r.critical)
            .count();
        let summary = HealthSummary {
            total,
            healthy,
            unhealthy: total - healthy,
            critical,
        };

        Self {
            healthy: summary.critical == 0,
            degradation_level: DegradationLevel::from_counts(
                summary.healthy,
                summary.unhealthy,
                summary.critical,
            ),
            checks,
            summary,
            timestamp: Utc::now(),
        }
    }
}

struct RegisteredCheck {
    probe: Arc<dyn HealthProbe>,
    options: HealthCheckOptions,
    last_check: Option<DateTime<Utc>>,
    last_result: Option<HealthCheckResult>,
}

/// Registry of named health probes
#[derive(Default)]
pub struct HealthCheckRegistry {
    checks: RwLock<HashMap<String, RegisteredCheck>>,
}

impl HealthCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `probe` under `name`, replacing an existing probe of that name
    pub fn register_health_check<P>(&self, name: &str, probe: P, options: HealthCheckOptions)
    where
        P: HealthProbe + 'static,
    {
        self.register_shared(name, Arc::new(probe), options);
    }

    pub fn register_shared(&self, name: &str, probe: Arc<dyn HealthProbe>, options: HealthCheckOptions) {
        info!(
            check = name,
            critical = options.critical,
            timeout_ms = options.timeout.as_millis() as u64,
            "Registered health check"
        );
        safe_write(&self.checks, "health registry").insert(
            name.to_string(),
            RegisteredCheck {
                probe,
                options,
                last_check: None,
                last_result: None,
            },
        );
    }

    pub fn unregister_health_check(&self, name: &str) -> bool {
        safe_write(&self.checks, "health registry")
            .remove(name)
            .is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = safe_read(&self.checks, "health registry")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn options(&self, name: &str) -> Option<HealthCheckOptions> {
        safe_read(&self.checks, "health registry")
            .get(name)
            .map(|check| check.options.clone())
    }

    /// Result of the most recent run of `name`
    pub fn last_result(&self, name: &str) -> Option<HealthCheckResult> {
        safe_read(&self.checks, "health registry")
            .get(name)
            .and_then(|check| check.last_result.clone())
    }

    pub fn last_check(&self, name: &str) -> Option<DateTime<Utc>> {
        safe_read(&self.checks, "health registry")
            .get(name)
            .and_then(|check| check.last_check)
    }

    /// Run every registered probe concurrently and wait for all of them
    pub async fn run_health_checks(&self) -> BTreeMap<String, HealthCheckResult> {
        let snapshot: Vec<_> = safe_read(&self.checks, "health registry")
            .iter()
            .map(|(name, check)| (name.clone(), check.probe.clone(), check.options.clone()))
            .collect();

        debug!(count = snapshot.len(), "Running health checks");

        let runs = snapshot
            .into_iter()
            .map(|(name, probe, options)| async move {
                let result = run_probe(&name, probe, &options).await;
                (name, result)
            });
        let results: BTreeMap<_, _> = futures::future::join_all(runs).await.into_iter().collect();

        let mut checks = safe_write(&self.checks, "health registry");
        for (name, result) in &results {
            // A probe unregistered mid-run is not re-added
            if let Some(check) = checks.get_mut(name) {
                check.last_check = Some(result.timestamp);
                check.last_result = Some(result.clone());
            }
        }

        results
    }

    /// Run all probes and aggregate them into a system health snapshot
    pub async fn get_system_health(&self) -> SystemHealth {
        let health = SystemHealth::from_results(self.run_health_checks().await);

        match health.degradation_level {
            DegradationLevel::Critical => error!(
                unhealthy = health.summary.unhealthy,
                critical = health.summary.critical,
                "System health critical"
            ),
            DegradationLevel::Minimal | DegradationLevel::Degraded => warn!(
                level = %health.degradation_level,
                unhealthy = health.summary.unhealthy,
                total = health.summary.total,
                "System running degraded"
            ),
            DegradationLevel::Normal => debug!(total = health.summary.total, "System healthy"),
        }

        health
    }
}

async fn run_probe(
    name: &str,
    probe: Arc<dyn HealthProbe>,
    options: &HealthCheckOptions,
) -> HealthCheckResult {
    let start = Instant::now();
    let outcome = execute_with_timeout(
        move || async move { probe.check().await },
        options.timeout,
        Some(OperationContext::new("health", name)),
    )
    .await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(ok) => HealthCheckResult {
            healthy: true,
            result: Some(ok.value),
            error: None,
            error_category: None,
            duration_ms,
            timestamp: Utc::now(),
            critical: options.critical,
        },
        Err(err) => {
            warn!(check = name, error = %err, "Health check failed");
            HealthCheckResult {
                healthy: false,
                result: None,
                error: Some(err.to_string()),
                error_category: Some(err.category()),
                duration_ms,
                timestamp: Utc::now(),
                critical: options.critical,
            }
        }
    }
}

impl std::fmt::Debug for HealthCheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckRegistry")
            .field("checks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultError;
    use rstest::rstest;

    #[rstest]
    #[case(3, 0, 0, DegradationLevel::Normal)]
    #[case(2, 1, 0, DegradationLevel::Degraded)]
    #[case(1, 1, 0, DegradationLevel::Degraded)]
    #[case(1, 2, 0, DegradationLevel::Minimal)]
    #[case(5, 1, 1, DegradationLevel::Critical)]
    fn test_degradation_derivation(
        #[case] healthy: usize,
        #[case] unhealthy: usize,
        #[case] critical: usize,
        #[case] expected: DegradationLevel,
    ) {
        assert_eq!(
            DegradationLevel::from_counts(healthy, unhealthy, critical),
            expected
        );
    }

    #[test]
    fn test_levels_shrink_feature_sets() {
        assert!(DegradationLevel::Normal.is_feature_enabled("metadata_enrichment"));
        assert!(!DegradationLevel::Degraded.is_feature_enabled("metadata_enrichment"));
        assert!(DegradationLevel::Minimal.is_feature_enabled("cache_reads"));
        assert!(!DegradationLevel::Critical.is_feature_enabled("cache_reads"));
        assert!(DegradationLevel::Normal < DegradationLevel::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_times_out() {
        let registry = HealthCheckRegistry::new();
        registry.register_health_check(
            "slow",
            || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, FaultError>(serde_json::json!({"ok": true}))
            },
            HealthCheckOptions::default().with_timeout(Duration::from_millis(50)),
        );

        let results = registry.run_health_checks().await;
        let slow = &results["slow"];
        assert!(!slow.healthy);
        assert_eq!(slow.error_category, Some(ErrorCategory::Network));
        assert!(slow.error.as_deref().unwrap_or_default().contains("timed out"));
        assert_eq!(registry.last_result("slow").as_ref(), Some(slow));
    }

    #[tokio::test]
    async fn test_failing_probe_does_not_abort_others() {
        let registry = HealthCheckRegistry::new();
        registry.register_health_check(
            "broken",
            || async { Err::<serde_json::Value, _>(FaultError::remote_api(Some(503), "down")) },
            HealthCheckOptions::default(),
        );
        registry.register_health_check(
            "fine",
            || async { Ok::<_, FaultError>(serde_json::json!("ok")) },
            HealthCheckOptions::default(),
        );

        let health = registry.get_system_health().await;
        assert_eq!(health.summary.total, 2);
        assert_eq!(health.summary.healthy, 1);
        assert_eq!(health.degradation_level, DegradationLevel::Degraded);
        assert!(health.healthy);
    }
}
