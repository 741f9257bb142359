//! Automated check definitions and their execution history.
//!
//! A [`CheckDefinition`] is one automated validation rule: what to run, how
//! often, which indicators it validates, and a rolling execution history
//! from which the rule's own operational status is derived.
//!
//! ```text
//!            activate                 3 consecutive failures
//! ┌───────┐ ─────────► ┌────────┐ ─────────────────────────► ┌───────┐
//! │ DRAFT │            │ ACTIVE │ ◄───────────────────────── │ ERROR │
//! └───────┘            └────────┘      first success         └───────┘
//!                        │    ▲
//!                  pause │    │ activate
//!                        ▼    │
//!                      ┌────────┐              ┌────────────┐
//!                      │ PAUSED │   deprecate  │ DEPRECATED │
//!                      └────────┘ ───────────► └────────────┘
//! ```
//!
//! Error is a derived status: it holds exactly while the consecutive-failure
//! count is at or above [`FAILURE_THRESHOLD`]. Entering it does not reset
//! the count; only a subsequent success does. Error rules keep being retried
//! on their normal cadence.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use conauth_core::{CheckId, EvidenceId, ExecutionId, ServiceId};

use crate::error::{Error, Result};

/// Number of consecutive failed executions after which a rule's operational
/// status is forced to error.
///
/// Fixed policy; there is no configuration surface for it.
pub const FAILURE_THRESHOLD: u32 = 3;

/// How often an active rule executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Re-run every five minutes.
    Continuous,
    /// Re-run hourly.
    Hourly,
    /// Re-run daily.
    Daily,
    /// Re-run weekly.
    Weekly,
    /// Re-run every thirty days.
    Monthly,
    /// Re-run every ninety days.
    Quarterly,
    /// Never auto-fires; executed only by explicit operator trigger.
    OnDemand,
}

impl Frequency {
    /// Returns the scheduling interval, or `None` for on-demand rules.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Continuous => Some(Duration::minutes(5)),
            Self::Hourly => Some(Duration::hours(1)),
            Self::Daily => Some(Duration::hours(24)),
            Self::Weekly => Some(Duration::days(7)),
            Self::Monthly => Some(Duration::days(30)),
            Self::Quarterly => Some(Duration::days(90)),
            Self::OnDemand => None,
        }
    }

    /// Computes the next due time relative to `now`.
    ///
    /// Always relative to now rather than to the previous due time: missed
    /// runs skip forward instead of firing a backlog.
    #[must_use]
    pub fn next_due_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval().map(|interval| now + interval)
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continuous => write!(f, "continuous"),
            Self::Hourly => write!(f, "hourly"),
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::Quarterly => write!(f, "quarterly"),
            Self::OnDemand => write!(f, "on_demand"),
        }
    }
}

/// Operational status of a check definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    /// Defined but never activated; not scheduled.
    Draft,
    /// Scheduled and executing on cadence.
    Active,
    /// Temporarily stopped; not scheduled.
    Paused,
    /// Permanently retired; not scheduled.
    Deprecated,
    /// At or above the consecutive-failure threshold. Still retried on
    /// cadence; returns to active on the first success.
    Error,
}

impl RuleStatus {
    /// Returns true if the scheduler considers rules in this status.
    ///
    /// Error rules remain schedulable so they keep being retried on their
    /// normal cadence.
    #[must_use]
    pub const fn is_schedulable(&self) -> bool {
        matches!(self, Self::Active | Self::Error)
    }
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "DRAFT"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Deprecated => write!(f, "DEPRECATED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Kind-specific configuration for a check.
///
/// A closed sum over the supported check kinds; each variant carries only
/// the fields its executor needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckConfig {
    /// Invoke an external vulnerability or compliance scanner.
    Scanner {
        /// Scanner endpoint to call.
        endpoint: String,
        /// Named scan profile to run.
        profile: String,
    },
    /// Probe an HTTP API and compare the response status.
    ApiProbe {
        /// URL to probe.
        url: String,
        /// HTTP method to use.
        method: String,
        /// Status code that counts as a pass.
        expected_status: u16,
    },
    /// Compare live configuration against an expected value.
    Configuration {
        /// Configuration target, e.g. `s3://bucket/encryption`.
        target: String,
        /// Expected configuration value.
        expected: serde_json::Value,
    },
    /// Run a query against a log source and evaluate the hit count.
    LogQuery {
        /// Log source to query.
        source: String,
        /// Query expression.
        query: String,
        /// Maximum hits that still count as a pass.
        max_hits: u64,
    },
    /// Verify attached evidence is fresher than a maximum age.
    EvidenceFreshness {
        /// Evidence to verify.
        evidence_ids: Vec<EvidenceId>,
        /// Maximum acceptable age in days.
        max_age_days: u32,
    },
    /// Run an operator-supplied script.
    CustomScript {
        /// Command to execute.
        command: String,
        /// Arguments passed to the command.
        #[serde(default)]
        args: Vec<String>,
    },
    /// Manual review with an automated reminder cadence.
    ManualReminder {
        /// Who to remind.
        assignee: String,
        /// What the reviewer is expected to verify.
        instructions: String,
    },
}

impl CheckConfig {
    /// Returns a stable label for the check kind, used in metrics and logs.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Scanner { .. } => "scanner",
            Self::ApiProbe { .. } => "api_probe",
            Self::Configuration { .. } => "configuration",
            Self::LogQuery { .. } => "log_query",
            Self::EvidenceFreshness { .. } => "evidence_freshness",
            Self::CustomScript { .. } => "custom_script",
            Self::ManualReminder { .. } => "manual_reminder",
        }
    }
}

/// Outcome status of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The check ran and its pass criteria were met.
    Passed,
    /// The check ran and its pass criteria were not met.
    Failed,
    /// The check could not complete: timeout, executor unreachable.
    Error,
    /// The check declined to run, e.g. nothing to evaluate.
    Skipped,
}

impl ExecutionStatus {
    /// Returns true if the outcome feeds the consecutive-failure counter.
    ///
    /// Executor errors are counted identically to reported failures for
    /// threshold purposes; they differ only in diagnostics.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One structured finding produced by an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Short human-readable summary.
    pub summary: String,
    /// Structured detail payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl Finding {
    /// Creates a finding with a summary only.
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            detail: None,
        }
    }

    /// Attaches a structured detail payload.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// The outcome of running a check once, before it is recorded.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Outcome status.
    pub status: ExecutionStatus,
    /// Structured findings.
    pub findings: Vec<Finding>,
    /// Evidence produced by the run.
    pub evidence_ids: Vec<EvidenceId>,
    /// Error detail for failed or errored runs.
    pub error: Option<String>,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    /// A passing outcome.
    #[must_use]
    pub fn passed(findings: Vec<Finding>) -> Self {
        Self {
            status: ExecutionStatus::Passed,
            findings,
            evidence_ids: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    /// A failing outcome: the check ran, its criteria were not met.
    #[must_use]
    pub fn failed(findings: Vec<Finding>, error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            findings,
            evidence_ids: Vec::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// An errored outcome: the check could not complete.
    #[must_use]
    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            findings: Vec::new(),
            evidence_ids: Vec::new(),
            error: Some(message.into()),
            duration_ms: 0,
        }
    }

    /// A skipped outcome.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Skipped,
            findings: Vec::new(),
            evidence_ids: Vec::new(),
            error: Some(reason.into()),
            duration_ms: 0,
        }
    }

    /// Sets the measured duration.
    #[must_use]
    pub const fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Attaches produced evidence.
    #[must_use]
    pub fn with_evidence(mut self, evidence_ids: Vec<EvidenceId>) -> Self {
        self.evidence_ids = evidence_ids;
        self
    }
}

/// One immutable record of running a check at a point in time.
///
/// Append-only; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Unique record identifier.
    pub id: ExecutionId,
    /// The check that was executed.
    pub check_id: CheckId,
    /// When the execution happened.
    pub executed_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Outcome status.
    pub status: ExecutionStatus,
    /// Convenience pass flag, true iff `status` is passed.
    pub passed: bool,
    /// Structured findings.
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Evidence produced by the run.
    #[serde(default)]
    pub evidence_ids: Vec<EvidenceId>,
    /// Error detail for failed or errored runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An automated validation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDefinition {
    /// Unique rule identifier.
    pub id: CheckId,
    /// Owning service; `None` for a platform-global rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    /// Human-readable rule name.
    pub name: String,
    /// Kind-specific configuration.
    pub config: CheckConfig,
    /// Indicator reference codes this rule validates.
    pub indicator_refs: Vec<String>,
    /// Execution cadence.
    pub frequency: Frequency,
    /// Human-readable pass criteria.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_criteria: Option<String>,
    /// Operational status.
    pub status: RuleStatus,
    /// When the rule next becomes due. `None` for on-demand rules and for
    /// rules that are not scheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due_at: Option<DateTime<Utc>>,
    /// When the rule last executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    /// Whether the last execution passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_passed: Option<bool>,
    /// Error detail from the most recent failed or errored execution.
    /// Cleared by the next success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Consecutive failed executions. Reset only by a success.
    pub consecutive_failures: u32,
    /// Lifetime execution count.
    pub total_executions: u64,
    /// Lifetime passed-execution count.
    pub total_passes: u64,
    /// When the rule was created.
    pub created_at: DateTime<Utc>,
    /// When the rule was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version.
    #[serde(default)]
    pub version: u64,
}

impl CheckDefinition {
    /// Creates a new rule in draft status.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the name is empty or no indicator
    /// references are given.
    pub fn new(
        service_id: Option<ServiceId>,
        name: impl Into<String>,
        config: CheckConfig,
        indicator_refs: Vec<String>,
        frequency: Frequency,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::validation("check name must not be empty"));
        }
        if indicator_refs.is_empty() {
            return Err(Error::validation(
                "a check must validate at least one indicator",
            ));
        }

        Ok(Self {
            id: CheckId::generate(),
            service_id,
            name,
            config,
            indicator_refs,
            frequency,
            pass_criteria: None,
            status: RuleStatus::Draft,
            next_due_at: None,
            last_executed_at: None,
            last_passed: None,
            last_error: None,
            consecutive_failures: 0,
            total_executions: 0,
            total_passes: 0,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Activates the rule and computes its first due time from `now`.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the rule is draft or paused.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.status, RuleStatus::Draft | RuleStatus::Paused) {
            return Err(Error::precondition(
                "activate",
                self.status.to_string(),
                "DRAFT | PAUSED",
            ));
        }
        self.status = RuleStatus::Active;
        self.next_due_at = self.frequency.next_due_from(now);
        self.updated_at = now;
        Ok(())
    }

    /// Pauses an active or errored rule, stopping scheduling.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the rule is active or in error.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.status, RuleStatus::Active | RuleStatus::Error) {
            return Err(Error::precondition(
                "pause",
                self.status.to_string(),
                "ACTIVE | ERROR",
            ));
        }
        self.status = RuleStatus::Paused;
        self.next_due_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Permanently retires the rule.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the rule is already deprecated.
    pub fn deprecate(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status == RuleStatus::Deprecated {
            return Err(Error::precondition(
                "deprecate",
                self.status.to_string(),
                "any status except DEPRECATED",
            ));
        }
        self.status = RuleStatus::Deprecated;
        self.next_due_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Returns true if the rule should fire now.
    ///
    /// On-demand rules carry no due time and never auto-fire; they run only
    /// via explicit operator trigger. Error rules stay due-eligible so they
    /// keep being retried on cadence.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.status.is_schedulable() {
            return false;
        }
        self.next_due_at.is_some_and(|due| now >= due)
    }

    /// Records one execution outcome, deriving the rule's operational status
    /// from its updated history. Always legal while the rule exists.
    ///
    /// On success the consecutive-failure count resets, the last error
    /// clears, and an errored rule returns to active. On failure the count
    /// increments and at [`FAILURE_THRESHOLD`] forces error status
    /// regardless of the prior status. The next due time is recomputed
    /// relative to `now` in both cases unless the rule is no longer
    /// scheduled (paused, deprecated, draft).
    pub fn record_execution(
        &mut self,
        outcome: &ExecutionOutcome,
        now: DateTime<Utc>,
    ) -> ExecutionRecord {
        let passed = outcome.status == ExecutionStatus::Passed;

        self.total_executions += 1;
        if passed {
            self.total_passes += 1;
        }
        self.last_executed_at = Some(now);
        self.last_passed = Some(passed);

        if passed {
            self.consecutive_failures = 0;
            self.last_error = None;
            if self.status == RuleStatus::Error {
                self.status = RuleStatus::Active;
            }
        } else if outcome.status.is_failure() {
            self.consecutive_failures += 1;
            self.last_error = Some(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "check reported failure".to_string()),
            );
            if self.consecutive_failures >= FAILURE_THRESHOLD && self.status != RuleStatus::Error {
                tracing::warn!(
                    check_id = %self.id,
                    failures = self.consecutive_failures,
                    "check reached consecutive-failure threshold, forcing error status"
                );
                self.status = RuleStatus::Error;
            }
        }

        self.next_due_at = if self.status.is_schedulable() {
            self.frequency.next_due_from(now)
        } else {
            None
        };
        self.updated_at = now;

        ExecutionRecord {
            id: ExecutionId::generate(),
            check_id: self.id,
            executed_at: now,
            duration_ms: outcome.duration_ms,
            status: outcome.status,
            passed,
            findings: outcome.findings.clone(),
            evidence_ids: outcome.evidence_ids.clone(),
            error: outcome.error.clone(),
        }
    }

    /// Lifetime pass rate: passes / executions, `0.0` with no executions.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pass_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.total_passes as f64 / self.total_executions as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily_check(now: DateTime<Utc>) -> CheckDefinition {
        CheckDefinition::new(
            Some(ServiceId::generate()),
            "tls-config-check",
            CheckConfig::Configuration {
                target: "elb/listener".into(),
                expected: serde_json::json!({"minimum_tls": "1.2"}),
            },
            vec!["KSI-SVC-03".into()],
            Frequency::Daily,
            now,
        )
        .unwrap()
    }

    #[test]
    fn new_check_requires_name_and_indicators() {
        let now = Utc::now();
        assert!(CheckDefinition::new(
            None,
            "  ",
            CheckConfig::CustomScript {
                command: "true".into(),
                args: vec![],
            },
            vec!["KSI-CMT-01".into()],
            Frequency::Daily,
            now,
        )
        .is_err());

        assert!(CheckDefinition::new(
            None,
            "no-indicators",
            CheckConfig::CustomScript {
                command: "true".into(),
                args: vec![],
            },
            vec![],
            Frequency::Daily,
            now,
        )
        .is_err());
    }

    #[test]
    fn activate_computes_next_due_from_frequency() {
        let now = Utc::now();
        let mut check = daily_check(now);
        check.activate(now).unwrap();
        assert_eq!(check.status, RuleStatus::Active);
        assert_eq!(check.next_due_at, Some(now + Duration::hours(24)));
    }

    #[test]
    fn activate_rejected_from_active_and_deprecated() {
        let now = Utc::now();
        let mut check = daily_check(now);
        check.activate(now).unwrap();
        assert!(check.activate(now).unwrap_err().is_precondition());

        check.deprecate(now).unwrap();
        assert!(check.activate(now).unwrap_err().is_precondition());
    }

    #[test]
    fn paused_rule_can_reactivate() {
        let now = Utc::now();
        let mut check = daily_check(now);
        check.activate(now).unwrap();
        check.pause(now).unwrap();
        assert_eq!(check.next_due_at, None);
        check.activate(now).unwrap();
        assert_eq!(check.status, RuleStatus::Active);
    }

    #[test]
    fn on_demand_rules_never_auto_fire() {
        let now = Utc::now();
        let mut check = daily_check(now);
        check.frequency = Frequency::OnDemand;
        check.activate(now).unwrap();
        assert_eq!(check.next_due_at, None);
        assert!(!check.is_due(now + Duration::days(400)));
    }

    #[test]
    fn is_due_respects_next_due_time() {
        let now = Utc::now();
        let mut check = daily_check(now);
        check.activate(now).unwrap();
        assert!(!check.is_due(now + Duration::hours(23)));
        assert!(check.is_due(now + Duration::hours(24)));
    }

    #[test]
    fn three_consecutive_failures_force_error_and_success_recovers() {
        let now = Utc::now();
        let mut check = daily_check(now);
        check.activate(now).unwrap();

        for i in 1..=2 {
            check.record_execution(&ExecutionOutcome::failed(vec![], "criteria not met"), now);
            assert_eq!(check.consecutive_failures, i);
            assert_eq!(check.status, RuleStatus::Active);
        }

        check.record_execution(&ExecutionOutcome::errored("probe unreachable"), now);
        assert_eq!(check.consecutive_failures, 3);
        assert_eq!(check.status, RuleStatus::Error);
        // Error rules stay on cadence.
        assert!(check.next_due_at.is_some());

        // Entering error does not reset the count; a fourth failure keeps counting.
        check.record_execution(&ExecutionOutcome::failed(vec![], "still failing"), now);
        assert_eq!(check.consecutive_failures, 4);
        assert_eq!(check.status, RuleStatus::Error);

        check.record_execution(&ExecutionOutcome::passed(vec![]), now);
        assert_eq!(check.consecutive_failures, 0);
        assert_eq!(check.status, RuleStatus::Active);
        assert_eq!(check.last_error, None);
    }

    #[test]
    fn skipped_executions_do_not_touch_failure_count() {
        let now = Utc::now();
        let mut check = daily_check(now);
        check.activate(now).unwrap();
        check.record_execution(&ExecutionOutcome::failed(vec![], "nope"), now);
        check.record_execution(&ExecutionOutcome::skipped("nothing to evaluate"), now);
        assert_eq!(check.consecutive_failures, 1);
        assert_eq!(check.total_executions, 2);
    }

    #[test]
    fn next_due_cleared_when_rule_paused_mid_flight() {
        let now = Utc::now();
        let mut check = daily_check(now);
        check.activate(now).unwrap();
        check.pause(now).unwrap();
        // An in-flight run still records its outcome, but no next run is scheduled.
        let record = check.record_execution(&ExecutionOutcome::passed(vec![]), now);
        assert_eq!(record.status, ExecutionStatus::Passed);
        assert_eq!(check.total_executions, 1);
        assert_eq!(check.next_due_at, None);
    }

    #[test]
    fn pass_rate_counts_lifetime_history() {
        let now = Utc::now();
        let mut check = daily_check(now);
        check.activate(now).unwrap();
        assert!((check.pass_rate() - 0.0).abs() < f64::EPSILON);

        check.record_execution(&ExecutionOutcome::passed(vec![]), now);
        check.record_execution(&ExecutionOutcome::failed(vec![], "x"), now);
        check.record_execution(&ExecutionOutcome::passed(vec![]), now);
        check.record_execution(&ExecutionOutcome::passed(vec![]), now);
        assert!((check.pass_rate() - 0.75).abs() < f64::EPSILON);
    }
}
