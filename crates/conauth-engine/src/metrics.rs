//! Observability metrics for the engine.
//!
//! Exposed through the `metrics` facade so the embedding process can
//! install whatever recorder it wants (Prometheus in production, none in
//! tests).
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `conauth_checks_executed_total` | Counter | `kind`, `status` | Check executions by kind and outcome |
//! | `conauth_check_duration_seconds` | Histogram | `kind` | Check execution duration |
//! | `conauth_rules_status_changes_total` | Counter | `from`, `to` | Rule operational-status changes |
//! | `conauth_scheduler_tick_duration_seconds` | Histogram | - | Scheduler tick processing time |
//! | `conauth_scheduler_due_checks` | Gauge | - | Checks due at the last tick |
//! | `conauth_transitions_total` | Counter | `aggregate`, `operation` | Lifecycle transitions applied |
//! | `conauth_events_emitted_total` | Counter | `event` | Outbound events pushed to the sink |
//! | `conauth_reports_generated_total` | Counter | - | Quarterly reports generated |

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Check executions by kind and outcome.
    pub const CHECKS_EXECUTED_TOTAL: &str = "conauth_checks_executed_total";
    /// Histogram: Check execution duration in seconds.
    pub const CHECK_DURATION_SECONDS: &str = "conauth_check_duration_seconds";
    /// Counter: Rule operational-status changes.
    pub const RULE_STATUS_CHANGES_TOTAL: &str = "conauth_rules_status_changes_total";
    /// Histogram: Scheduler tick processing time in seconds.
    pub const SCHEDULER_TICK_DURATION_SECONDS: &str = "conauth_scheduler_tick_duration_seconds";
    /// Gauge: Checks due at the last tick.
    pub const SCHEDULER_DUE_CHECKS: &str = "conauth_scheduler_due_checks";
    /// Counter: Lifecycle transitions applied.
    pub const TRANSITIONS_TOTAL: &str = "conauth_transitions_total";
    /// Counter: Outbound events pushed to the sink.
    pub const EVENTS_EMITTED_TOTAL: &str = "conauth_events_emitted_total";
    /// Counter: Quarterly reports generated.
    pub const REPORTS_GENERATED_TOTAL: &str = "conauth_reports_generated_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Check kind (scanner, api_probe, ...).
    pub const KIND: &str = "kind";
    /// Execution outcome status.
    pub const STATUS: &str = "status";
    /// Previous rule status.
    pub const FROM: &str = "from";
    /// New rule status.
    pub const TO: &str = "to";
    /// Aggregate type (incident, change, service, report).
    pub const AGGREGATE: &str = "aggregate";
    /// Operation name.
    pub const OPERATION: &str = "operation";
    /// Event name.
    pub const EVENT: &str = "event";
}

/// Handle for recording engine metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMetrics;

impl EngineMetrics {
    /// Creates a metrics handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records one check execution.
    pub fn record_check_execution(self, kind: &str, status: &str, duration_secs: f64) {
        counter!(
            names::CHECKS_EXECUTED_TOTAL,
            labels::KIND => kind.to_string(),
            labels::STATUS => status.to_string()
        )
        .increment(1);
        histogram!(names::CHECK_DURATION_SECONDS, labels::KIND => kind.to_string())
            .record(duration_secs);
    }

    /// Records a rule operational-status change.
    pub fn record_rule_status_change(self, from: &str, to: &str) {
        counter!(
            names::RULE_STATUS_CHANGES_TOTAL,
            labels::FROM => from.to_string(),
            labels::TO => to.to_string()
        )
        .increment(1);
    }

    /// Records the duration of one scheduler tick.
    pub fn record_tick_duration(self, duration_secs: f64) {
        histogram!(names::SCHEDULER_TICK_DURATION_SECONDS).record(duration_secs);
    }

    /// Records how many checks were due at the last tick.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_due_checks(self, due: usize) {
        gauge!(names::SCHEDULER_DUE_CHECKS).set(due as f64);
    }

    /// Records one applied lifecycle transition.
    pub fn record_transition(self, aggregate: &'static str, operation: &'static str) {
        counter!(
            names::TRANSITIONS_TOTAL,
            labels::AGGREGATE => aggregate,
            labels::OPERATION => operation
        )
        .increment(1);
    }

    /// Records one outbound event emission.
    pub fn record_event(self, event: &'static str) {
        counter!(names::EVENTS_EMITTED_TOTAL, labels::EVENT => event).increment(1);
    }

    /// Records one generated report.
    pub fn record_report_generated(self) {
        counter!(names::REPORTS_GENERATED_TOTAL).increment(1);
    }
}
