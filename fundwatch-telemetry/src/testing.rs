//! Fakes shared by the unit tests of this crate.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::TelemetryError;
use crate::metrics::{MetricsSource, SystemSnapshot};
use crate::monitor::PerformanceSample;
use crate::workload::{WorkloadCounters, WorkloadSource};

/// Replays readings in order, then repeats the last one.
pub(crate) struct ScriptedMetrics {
    readings: VecDeque<SystemSnapshot>,
    last: SystemSnapshot,
}

impl ScriptedMetrics {
    pub(crate) fn new(readings: Vec<SystemSnapshot>) -> Self {
        Self {
            readings: readings.into(),
            last: SystemSnapshot::default(),
        }
    }
}

impl MetricsSource for ScriptedMetrics {
    fn sample(&mut self) -> Result<SystemSnapshot, TelemetryError> {
        if let Some(next) = self.readings.pop_front() {
            self.last = next;
        }
        Ok(self.last)
    }
}

pub(crate) fn reading(cpu_percent: f64, memory_percent: f64) -> SystemSnapshot {
    SystemSnapshot {
        cpu_percent,
        memory_percent,
        thread_count: 4,
        ..SystemSnapshot::default()
    }
}

/// Counters set directly by the test.
#[derive(Default)]
pub(crate) struct FixedWorkload {
    counters: Mutex<WorkloadCounters>,
}

impl FixedWorkload {
    pub(crate) fn set(&self, requests: u64, errors: u64, avg_response_time: f64) {
        *self.counters.lock().unwrap() = WorkloadCounters {
            requests,
            errors,
            avg_response_time,
        };
    }
}

#[async_trait]
impl WorkloadSource for FixedWorkload {
    async fn counters(&self) -> WorkloadCounters {
        *self.counters.lock().unwrap()
    }
}

/// A sample with only the fields the tuner looks at.
pub(crate) fn sample(cpu: f64, memory: f64, response_time: f64, error_rate: f64) -> PerformanceSample {
    PerformanceSample {
        cpu_percent: cpu,
        memory_percent: memory,
        avg_response_time: response_time,
        error_rate,
        ..PerformanceSample::default()
    }
}
