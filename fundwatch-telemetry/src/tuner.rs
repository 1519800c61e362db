//! Rule-based runtime tuning.
//!
//! Each rule pairs a predicate over the latest [`PerformanceSample`] with an
//! adjustment of the [`RuntimeConfig`]. Rules run in registration order and
//! compose into one new config per pass. Every intermediate result is
//! clamped with [`RuntimeConfig::tightened_from`], so tuning can only slow
//! the workload down.

use chrono::{DateTime, Utc};
use fundwatch_core::RuntimeConfig;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use fundwatch_store::SharedConfig;

use crate::error::TelemetryError;
use crate::monitor::PerformanceSample;

const TUNING_HISTORY: usize = 100;
const REPORT_WINDOW: usize = 10;

type Condition = Box<dyn Fn(&PerformanceSample) -> bool + Send + Sync>;
type Adjustment = Box<dyn Fn(&RuntimeConfig) -> RuntimeConfig + Send + Sync>;

// ============================================================================
// Rules
// ============================================================================

/// A named predicate/adjustment pair with a cooldown.
pub struct TuningRule {
    name: String,
    cooldown: Duration,
    condition: Condition,
    adjustment: Adjustment,
}

impl fmt::Debug for TuningRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TuningRule")
            .field("name", &self.name)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl TuningRule {
    /// Creates a rule.
    pub fn new<C, A>(name: impl Into<String>, cooldown: Duration, condition: C, adjustment: A) -> Self
    where
        C: Fn(&PerformanceSample) -> bool + Send + Sync + 'static,
        A: Fn(&RuntimeConfig) -> RuntimeConfig + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            cooldown,
            condition: Box::new(condition),
            adjustment: Box::new(adjustment),
        }
    }

    /// Rule name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum time between two firings.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

/// The built-in rules, in evaluation order.
pub fn default_rules() -> Vec<TuningRule> {
    vec![
        TuningRule::new(
            "reduce_concurrency_on_high_cpu",
            Duration::from_secs(120),
            |s| s.cpu_percent > 80.0,
            |c| RuntimeConfig {
                max_concurrent_requests: c.max_concurrent_requests.saturating_sub(1).max(1),
                ..c.clone()
            },
        ),
        TuningRule::new(
            "reclaim_on_high_memory",
            Duration::from_secs(60),
            |s| s.memory_percent > 85.0,
            |c| RuntimeConfig {
                reclaim_epoch: c.reclaim_epoch + 1,
                ..c.clone()
            },
        ),
        TuningRule::new(
            "increase_delay_on_slow_response",
            Duration::from_secs(180),
            |s| s.avg_response_time > 5.0,
            |c| RuntimeConfig {
                request_delay: (c.request_delay.0 + 0.5, c.request_delay.1 + 1.0),
                ..c.clone()
            },
        ),
        TuningRule::new(
            "reduce_rate_on_high_errors",
            Duration::from_secs(300),
            |s| s.error_rate > 10.0,
            |c| RuntimeConfig {
                request_delay: (
                    (c.request_delay.0 * 1.5).max(2.0),
                    (c.request_delay.1 * 1.5).max(5.0),
                ),
                ..c.clone()
            },
        ),
    ]
}

// ============================================================================
// History & Reports
// ============================================================================

/// One applied adjustment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningAction {
    /// When it was applied.
    pub timestamp: DateTime<Utc>,
    /// Rule that fired.
    pub rule: String,
    /// Config before the rule.
    pub before: RuntimeConfig,
    /// Config after the rule.
    pub after: RuntimeConfig,
    /// CPU usage that triggered it.
    pub cpu_percent: f64,
    /// Memory usage that triggered it.
    pub memory_percent: f64,
    /// Response time that triggered it.
    pub avg_response_time: f64,
    /// Error rate that triggered it.
    pub error_rate: f64,
}

/// State of one rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleStatus {
    /// Rule name.
    pub name: String,
    /// Cooldown in seconds.
    pub cooldown_secs: u64,
    /// Last time the predicate held.
    pub last_applied: Option<DateTime<Utc>>,
}

/// Snapshot of the tuner for display.
#[derive(Debug, Clone, Serialize)]
pub struct TuningReport {
    /// Whether tuning is active.
    pub enabled: bool,
    /// Registered rules in order.
    pub rules: Vec<RuleStatus>,
    /// Most recent actions, oldest first.
    pub recent_actions: Vec<TuningAction>,
    /// Actions in the history.
    pub total_actions: usize,
}

// ============================================================================
// Tuner
// ============================================================================

struct RuleSlot {
    rule: TuningRule,
    last_fired: Option<(Instant, DateTime<Utc>)>,
}

impl RuleSlot {
    fn cooling_down(&self, now: Instant) -> bool {
        self.last_fired
            .is_some_and(|(at, _)| now.duration_since(at) < self.rule.cooldown)
    }
}

/// Applies tuning rules to the runtime configuration.
pub struct AdaptiveTuner {
    enabled: AtomicBool,
    rules: Mutex<Vec<RuleSlot>>,
    history: RwLock<VecDeque<TuningAction>>,
}

impl Default for AdaptiveTuner {
    fn default() -> Self {
        Self::with_rules(default_rules())
    }
}

impl AdaptiveTuner {
    /// Creates an enabled tuner with the built-in rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an enabled tuner with the given rules.
    pub fn with_rules(rules: Vec<TuningRule>) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            rules: Mutex::new(
                rules
                    .into_iter()
                    .map(|rule| RuleSlot { rule, last_fired: None })
                    .collect(),
            ),
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Turns tuning on.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!("Adaptive tuning enabled");
    }

    /// Turns tuning off. Passes return the config unchanged.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        info!("Adaptive tuning disabled");
    }

    /// Returns true if tuning is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Appends a rule. Names must be unique and non-empty.
    pub async fn add_rule(&self, rule: TuningRule) -> Result<(), TelemetryError> {
        if rule.name.trim().is_empty() {
            return Err(TelemetryError::InvalidRule("rule name is empty".to_string()));
        }
        let mut rules = self.rules.lock().await;
        if rules.iter().any(|slot| slot.rule.name == rule.name) {
            return Err(TelemetryError::InvalidRule(format!("duplicate rule '{}'", rule.name)));
        }
        info!(rule = %rule.name, "Registered tuning rule");
        rules.push(RuleSlot { rule, last_fired: None });
        Ok(())
    }

    /// Runs one pass over the rules and returns the resulting config.
    pub async fn apply(&self, config: &RuntimeConfig, sample: &PerformanceSample) -> RuntimeConfig {
        if !self.is_enabled() {
            return config.clone();
        }

        let now = Instant::now();
        let mut current = config.clone();
        let mut actions = Vec::new();

        for slot in self.rules.lock().await.iter_mut() {
            if slot.cooling_down(now) || !(slot.rule.condition)(sample) {
                continue;
            }
            slot.last_fired = Some((now, Utc::now()));

            let candidate = (slot.rule.adjustment)(&current).tightened_from(&current);
            if candidate == current {
                continue;
            }

            warn!(
                rule = %slot.rule.name,
                concurrency = candidate.max_concurrent_requests,
                delay_lo = candidate.request_delay.0,
                delay_hi = candidate.request_delay.1,
                reclaim_epoch = candidate.reclaim_epoch,
                "Tuning rule applied"
            );
            actions.push(TuningAction {
                timestamp: Utc::now(),
                rule: slot.rule.name.clone(),
                before: current.clone(),
                after: candidate.clone(),
                cpu_percent: sample.cpu_percent,
                memory_percent: sample.memory_percent,
                avg_response_time: sample.avg_response_time,
                error_rate: sample.error_rate,
            });
            current = candidate;
        }

        if !actions.is_empty() {
            let mut history = self.history.write().await;
            history.extend(actions);
            while history.len() > TUNING_HISTORY {
                history.pop_front();
            }
        }
        current
    }

    /// Runs one pass against the shared config. Returns true if it changed.
    pub async fn apply_to(&self, shared: &SharedConfig, sample: &PerformanceSample) -> bool {
        let current = shared.snapshot();
        let next = self.apply(&current, sample).await;
        next != current && shared.replace(next)
    }

    /// Returns up to `limit` of the most recent actions, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<TuningAction> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Summarizes the tuner state.
    pub async fn tuning_report(&self) -> TuningReport {
        let rules = self
            .rules
            .lock()
            .await
            .iter()
            .map(|slot| RuleStatus {
                name: slot.rule.name.clone(),
                cooldown_secs: slot.rule.cooldown.as_secs(),
                last_applied: slot.last_fired.map(|(_, at)| at),
            })
            .collect();

        TuningReport {
            enabled: self.is_enabled(),
            rules,
            recent_actions: self.history(REPORT_WINDOW).await,
            total_actions: self.history.read().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample;

    fn base() -> RuntimeConfig {
        RuntimeConfig::default()
    }

    #[tokio::test]
    async fn test_high_cpu_reduces_concurrency_once_per_cooldown() {
        let tuner = AdaptiveTuner::new();
        let hot = sample(95.0, 10.0, 0.1, 0.0);

        let first = tuner.apply(&base(), &hot).await;
        assert_eq!(first.max_concurrent_requests, 4);

        let second = tuner.apply(&first, &hot).await;
        assert_eq!(second, first);
        assert_eq!(tuner.history(10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_high_memory_bumps_epoch() {
        let tuner = AdaptiveTuner::new();
        let next = tuner.apply(&base(), &sample(10.0, 90.0, 0.1, 0.0)).await;
        assert_eq!(next.reclaim_epoch, 1);
        assert_eq!(next.max_concurrent_requests, base().max_concurrent_requests);
    }

    #[tokio::test]
    async fn test_delay_rules() {
        let slow = AdaptiveTuner::new()
            .apply(&base(), &sample(10.0, 10.0, 6.0, 0.0))
            .await;
        assert_eq!(slow.request_delay, (1.5, 4.0));

        let failing = AdaptiveTuner::new()
            .apply(&base(), &sample(10.0, 10.0, 0.1, 25.0))
            .await;
        assert_eq!(failing.request_delay, (2.0, 5.0));
    }

    #[tokio::test]
    async fn test_rules_compose_in_order() {
        let tuner = AdaptiveTuner::new();
        let next = tuner.apply(&base(), &sample(95.0, 90.0, 6.0, 25.0)).await;

        assert_eq!(next.max_concurrent_requests, 4);
        assert_eq!(next.reclaim_epoch, 1);
        assert_eq!(next.request_delay, (2.25, 6.0));

        let rules: Vec<String> = tuner.history(10).await.into_iter().map(|a| a.rule).collect();
        assert_eq!(
            rules,
            vec![
                "reduce_concurrency_on_high_cpu",
                "reclaim_on_high_memory",
                "increase_delay_on_slow_response",
                "reduce_rate_on_high_errors",
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrency_floor() {
        let tuner = AdaptiveTuner::new();
        let single = RuntimeConfig {
            max_concurrent_requests: 1,
            ..base()
        };
        let next = tuner.apply(&single, &sample(99.0, 10.0, 0.1, 0.0)).await;
        assert_eq!(next.max_concurrent_requests, 1);
        assert!(tuner.history(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_loosening_rule_is_clamped() {
        let tuner = AdaptiveTuner::with_rules(Vec::new());
        tuner
            .add_rule(TuningRule::new("loosen", Duration::ZERO, |_| true, |_| RuntimeConfig {
                max_concurrent_requests: 50,
                request_delay: (0.0, 0.0),
                reclaim_epoch: 0,
            }))
            .await
            .unwrap();

        let tight = RuntimeConfig {
            max_concurrent_requests: 2,
            request_delay: (3.0, 6.0),
            reclaim_epoch: 2,
        };
        assert_eq!(tuner.apply(&tight, &sample(0.0, 0.0, 0.0, 0.0)).await, tight);
    }

    #[tokio::test]
    async fn test_disabled_tuner_is_inert() {
        let tuner = AdaptiveTuner::new();
        tuner.disable();
        let next = tuner.apply(&base(), &sample(99.0, 99.0, 9.0, 50.0)).await;
        assert_eq!(next, base());

        tuner.enable();
        assert_ne!(tuner.apply(&base(), &sample(99.0, 99.0, 9.0, 50.0)).await, base());
    }

    #[tokio::test]
    async fn test_add_rule_validation() {
        let tuner = AdaptiveTuner::new();
        let duplicate = TuningRule::new("reclaim_on_high_memory", Duration::ZERO, |_| true, RuntimeConfig::clone);
        assert!(matches!(tuner.add_rule(duplicate).await, Err(TelemetryError::InvalidRule(_))));

        let unnamed = TuningRule::new("  ", Duration::ZERO, |_| true, RuntimeConfig::clone);
        assert!(tuner.add_rule(unnamed).await.is_err());
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let tuner = AdaptiveTuner::with_rules(vec![TuningRule::new(
            "bump",
            Duration::ZERO,
            |_| true,
            |c| RuntimeConfig {
                reclaim_epoch: c.reclaim_epoch + 1,
                ..c.clone()
            },
        )]);

        let mut config = base();
        for _ in 0..(TUNING_HISTORY + 5) {
            config = tuner.apply(&config, &sample(0.0, 0.0, 0.0, 0.0)).await;
        }
        assert_eq!(config.reclaim_epoch, 105);

        let report = tuner.tuning_report().await;
        assert_eq!(report.total_actions, TUNING_HISTORY);
        assert_eq!(report.recent_actions.len(), 10);
        assert_eq!(report.recent_actions.last().unwrap().after.reclaim_epoch, 105);
    }

    #[tokio::test]
    async fn test_apply_to_shared_config() {
        let tuner = AdaptiveTuner::new();
        let shared = SharedConfig::default();

        assert!(!tuner.apply_to(&shared, &sample(10.0, 10.0, 0.1, 0.0)).await);
        assert!(tuner.apply_to(&shared, &sample(95.0, 10.0, 0.1, 0.0)).await);
        assert_eq!(shared.snapshot().max_concurrent_requests, 4);

        let report = tuner.tuning_report().await;
        assert!(report.enabled);
        assert_eq!(report.rules.len(), 4);
        assert!(report.rules[0].last_applied.is_some());
        assert!(report.rules[1].last_applied.is_none());
    }
}
