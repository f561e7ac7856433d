use crate::types::{ActionKind, OutcomeStatus};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub tasks: TaskMetrics,
    pub performance: PerformanceMetrics,
    pub by_kind: BTreeMap<ActionKind, KindMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskMetrics {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped_quota: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub total_duration_ms: u64,
    pub avg_task_duration_ms: f64,
    pub min_task_duration_ms: u64,
    pub max_task_duration_ms: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindMetrics {
    pub success: u64,
    pub failed: u64,
    pub skipped_quota: u64,
}

#[derive(Debug, Default)]
struct KindCounters {
    success: AtomicU64,
    failed: AtomicU64,
    skipped_quota: AtomicU64,
}

#[derive(Debug)]
pub struct MetricsCollector {
    tasks_total: AtomicU64,
    tasks_success: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_skipped: AtomicU64,
    task_duration_sum_ms: AtomicU64,
    task_min_duration_ms: AtomicU64,
    task_max_duration_ms: AtomicU64,
    kinds: [KindCounters; 7],
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            tasks_total: AtomicU64::new(0),
            tasks_success: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_skipped: AtomicU64::new(0),
            task_duration_sum_ms: AtomicU64::new(0),
            task_min_duration_ms: AtomicU64::new(u64::MAX),
            task_max_duration_ms: AtomicU64::new(0),
            kinds: Default::default(),
            start_time: Instant::now(),
        }
    }
}

fn kind_index(kind: ActionKind) -> usize {
    ActionKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_default()
}

impl MetricsCollector {
    pub fn global() -> &'static Self {
        static INSTANCE: std::sync::OnceLock<MetricsCollector> = std::sync::OnceLock::new();
        INSTANCE.get_or_init(MetricsCollector::default)
    }

    /// Count one per-target outcome. Skipped targets carry no duration.
    pub fn record_outcome(&self, kind: ActionKind, status: OutcomeStatus, duration: Duration) {
        self.tasks_total.fetch_add(1, Ordering::SeqCst);
        let counters = &self.kinds[kind_index(kind)];

        match status {
            OutcomeStatus::SkippedQuota => {
                self.tasks_skipped.fetch_add(1, Ordering::SeqCst);
                counters.skipped_quota.fetch_add(1, Ordering::SeqCst);
                return;
            }
            OutcomeStatus::Success => {
                self.tasks_success.fetch_add(1, Ordering::SeqCst);
                counters.success.fetch_add(1, Ordering::SeqCst);
            }
            OutcomeStatus::Failed(_) => {
                self.tasks_failed.fetch_add(1, Ordering::SeqCst);
                counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        let duration_ms = duration.as_millis() as u64;
        self.task_duration_sum_ms
            .fetch_add(duration_ms, Ordering::SeqCst);
        self.task_min_duration_ms
            .fetch_min(duration_ms, Ordering::SeqCst);
        self.task_max_duration_ms
            .fetch_max(duration_ms, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_tasks = self.tasks_total.load(Ordering::SeqCst);
        let total_success = self.tasks_success.load(Ordering::SeqCst);
        let total_failed = self.tasks_failed.load(Ordering::SeqCst);
        let timed = total_success + total_failed;
        let total_duration = self.task_duration_sum_ms.load(Ordering::SeqCst);
        let min_duration = self.task_min_duration_ms.load(Ordering::SeqCst);

        let by_kind = ActionKind::ALL
            .iter()
            .map(|kind| {
                let c = &self.kinds[kind_index(*kind)];
                (
                    *kind,
                    KindMetrics {
                        success: c.success.load(Ordering::SeqCst),
                        failed: c.failed.load(Ordering::SeqCst),
                        skipped_quota: c.skipped_quota.load(Ordering::SeqCst),
                    },
                )
            })
            .filter(|(_, m)| *m != KindMetrics::default())
            .collect();

        MetricsSnapshot {
            timestamp: Utc::now().to_rfc3339(),
            tasks: TaskMetrics {
                total: total_tasks,
                success: total_success,
                failed: total_failed,
                skipped_quota: self.tasks_skipped.load(Ordering::SeqCst),
                success_rate: if total_tasks > 0 {
                    total_success as f64 / total_tasks as f64 * 100.0
                } else {
                    0.0
                },
            },
            performance: PerformanceMetrics {
                total_duration_ms: total_duration,
                avg_task_duration_ms: if timed > 0 {
                    total_duration as f64 / timed as f64
                } else {
                    0.0
                },
                min_task_duration_ms: if min_duration == u64::MAX {
                    0
                } else {
                    min_duration
                },
                max_task_duration_ms: self.task_max_duration_ms.load(Ordering::SeqCst),
                uptime_secs: self.uptime().as_secs(),
            },
            by_kind,
        }
    }

    pub fn to_json(&self) -> String {
        let snapshot = self.snapshot();
        serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| "{}".to_string())
    }

    pub async fn export_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = self.to_json();
        tokio::fs::write(path, json).await
    }

    pub fn tasks_total(&self) -> u64 {
        self.tasks_total.load(Ordering::SeqCst)
    }

    pub fn tasks_success(&self) -> u64 {
        self.tasks_success.load(Ordering::SeqCst)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::SeqCst)
    }

    pub fn tasks_skipped(&self) -> u64 {
        self.tasks_skipped.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_metrics_collector() {
        let metrics = MetricsCollector::default();

        metrics.record_outcome(ActionKind::Follow, OutcomeStatus::Success, Duration::from_millis(100));
        metrics.record_outcome(ActionKind::Follow, OutcomeStatus::Success, Duration::from_millis(200));
        metrics.record_outcome(
            ActionKind::Dm,
            OutcomeStatus::Failed(ErrorKind::MaxAttemptsExceeded),
            Duration::from_millis(150),
        );
        metrics.record_outcome(ActionKind::Dm, OutcomeStatus::SkippedQuota, Duration::ZERO);

        assert_eq!(metrics.tasks_total(), 4);
        assert_eq!(metrics.tasks_success(), 2);
        assert_eq!(metrics.tasks_failed(), 1);
        assert_eq!(metrics.tasks_skipped(), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.performance.min_task_duration_ms, 100);
        assert_eq!(snapshot.performance.avg_task_duration_ms, 150.0);
        assert_eq!(snapshot.by_kind[&ActionKind::Dm].skipped_quota, 1);
        assert!(!snapshot.by_kind.contains_key(&ActionKind::Like));
    }

    #[test]
    fn test_json_export() {
        let metrics = MetricsCollector::default();
        metrics.record_outcome(ActionKind::Like, OutcomeStatus::Success, Duration::from_millis(100));

        let json = metrics.to_json();
        assert!(json.contains("tasks"));
        assert!(json.contains("\"like\""));
    }
}
