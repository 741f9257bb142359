//! Time-driven validation scheduling.
//!
//! A single coordinating tick scans all schedulable checks and dispatches
//! the due ones to a bounded worker pool, decoupling slow external checks
//! (scanner calls, API probes) from the scheduling decision.
//!
//! Correctness properties:
//!
//! - **No double dispatch**: A due check is claimed via CAS before dispatch,
//!   so overlapping ticks (or a second scheduler instance) skip it
//! - **Serialized history updates**: Outcome recording is a load-modify-CAS
//!   loop per rule, so concurrent executions of the same rule cannot race
//!   the failure counters; different rules record in parallel freely
//! - **Absorbed failures**: Execution failures and errors feed the rule's
//!   own status machine and are never surfaced to the scan loop
//! - **Explicit timeout**: Each execution runs under a timeout; a timeout is
//!   recorded as an errored execution, distinguishable from a reported
//!   failure
//! - **Cancellation**: A rule paused or deprecated mid-flight still records
//!   its outcome, but no next run is scheduled for it

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use conauth_core::CheckId;

use crate::check::{CheckDefinition, ExecutionOutcome, ExecutionRecord, ExecutionStatus};
use crate::error::{Error, Result};
use crate::events::{EngineEventData, EventEnvelope};
use crate::executor::{CheckExecutor, CheckRequest};
use crate::metrics::EngineMetrics;
use crate::outbox::{emit, SharedSink};
use crate::rollup::AuthorizationRollup;
use crate::store::{CasResult, CheckStore, IndicatorStore};

/// Bounded retries for the outcome-recording CAS loop.
const CAS_RETRIES: usize = 4;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum checks executing concurrently.
    pub max_concurrent_checks: usize,
    /// Per-execution timeout.
    pub check_timeout: std::time::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_checks: 8,
            check_timeout: std::time::Duration::from_secs(60),
        }
    }
}

/// Summary of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Checks found due at the tick.
    pub due: usize,
    /// Checks claimed and dispatched to the pool.
    pub dispatched: usize,
    /// Dispatched checks whose worker completed.
    pub completed: usize,
}

/// The validation scheduler.
///
/// Owns no state of its own; all rule state lives in the check store, so
/// multiple scheduler instances can run against the same store and the CAS
/// claims keep them from duplicating work.
pub struct ValidationScheduler {
    checks: Arc<dyn CheckStore>,
    indicators: Arc<dyn IndicatorStore>,
    executor: Arc<dyn CheckExecutor>,
    rollup: Option<Arc<AuthorizationRollup>>,
    sink: SharedSink,
    metrics: EngineMetrics,
    config: SchedulerConfig,
}

impl ValidationScheduler {
    /// Creates a scheduler over the given stores and executor.
    #[must_use]
    pub fn new(
        checks: Arc<dyn CheckStore>,
        indicators: Arc<dyn IndicatorStore>,
        executor: Arc<dyn CheckExecutor>,
        sink: SharedSink,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            checks,
            indicators,
            executor,
            rollup: None,
            sink,
            metrics: EngineMetrics::new(),
            config,
        }
    }

    /// Attaches an authorization rollup refreshed after executions change
    /// the indicator ledger.
    #[must_use]
    pub fn with_rollup(mut self, rollup: Arc<AuthorizationRollup>) -> Self {
        self.rollup = Some(rollup);
        self
    }

    /// Runs one scheduling pass: scan, claim, dispatch, await the pool.
    ///
    /// # Errors
    ///
    /// Returns an error only when the scan itself fails; per-check failures
    /// are absorbed into each rule's status machine.
    #[tracing::instrument(
        skip(self),
        fields(due = tracing::field::Empty, dispatched = tracing::field::Empty)
    )]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let started = Instant::now();
        let due = self.checks.list_due_checks(now).await?;
        self.metrics.set_due_checks(due.len());
        tracing::Span::current().record("due", due.len() as u64);

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_checks));
        let mut pool: JoinSet<()> = JoinSet::new();
        let mut summary = TickSummary {
            due: due.len(),
            ..TickSummary::default()
        };

        for check in due {
            if !self.claim(&check, now).await? {
                continue;
            }
            summary.dispatched += 1;

            let semaphore = Arc::clone(&semaphore);
            let checks = Arc::clone(&self.checks);
            let indicators = Arc::clone(&self.indicators);
            let executor = Arc::clone(&self.executor);
            let rollup = self.rollup.clone();
            let sink = Arc::clone(&self.sink);
            let metrics = self.metrics;
            let timeout = self.config.check_timeout;

            pool.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                execute_and_record(
                    &checks,
                    &indicators,
                    rollup.as_deref(),
                    &executor,
                    &sink,
                    metrics,
                    &check,
                    timeout,
                )
                .await;
            });
        }
        tracing::Span::current().record("dispatched", summary.dispatched as u64);

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(()) => summary.completed += 1,
                Err(err) => tracing::warn!(%err, "check worker panicked"),
            }
        }

        self.metrics
            .record_tick_duration(started.elapsed().as_secs_f64());
        Ok(summary)
    }

    /// Claims a due check by provisionally pushing its due time forward.
    ///
    /// The provisional value is an in-flight guard only; recording the
    /// outcome recomputes the real next due time relative to execution
    /// time. A CAS conflict means another scheduler instance (or an
    /// overlapping tick) claimed the rule first.
    async fn claim(&self, check: &CheckDefinition, now: DateTime<Utc>) -> Result<bool> {
        let mut claimed = check.clone();
        claimed.next_due_at = claimed.frequency.next_due_from(now);
        match self.checks.cas_save_check(&claimed).await? {
            CasResult::Success => Ok(true),
            CasResult::NotFound => Ok(false),
            CasResult::VersionConflict { .. } => {
                tracing::debug!(check_id = %check.id, "check already claimed, skipping");
                Ok(false)
            }
        }
    }

    /// Executes one check immediately, bypassing the due-time check.
    ///
    /// This is the operator trigger for on-demand rules (and ad-hoc reruns
    /// of scheduled ones).
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown check, or a precondition
    /// error for a deprecated one.
    #[tracing::instrument(skip(self), fields(check_id = %check_id))]
    pub async fn run_check_now(
        &self,
        check_id: &CheckId,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord> {
        let check = self
            .checks
            .get_check(check_id)
            .await?
            .ok_or_else(|| Error::not_found("check", check_id))?;
        if check.status == crate::check::RuleStatus::Deprecated {
            return Err(Error::precondition(
                "run_check_now",
                check.status.to_string(),
                "any status except DEPRECATED",
            ));
        }

        let outcome = execute_with_timeout(
            &*self.executor,
            &check,
            self.config.check_timeout,
        )
        .await;
        record_outcome(
            &self.checks,
            &self.indicators,
            self.rollup.as_deref(),
            &self.sink,
            self.metrics,
            check_id,
            &outcome,
            now,
        )
        .await
    }

    /// Runs the scheduler loop until `shutdown` signals.
    ///
    /// Tick errors are logged and the loop keeps scanning; a broken store
    /// must not kill the scheduler.
    pub async fn run(
        &self,
        tick_interval: std::time::Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick(Utc::now()).await {
                        tracing::warn!(%err, "scheduler tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("scheduler shutting down");
                        return;
                    }
                }
            }
        }
    }
}

/// Executes a check under the configured timeout, mapping every failure
/// mode to an [`ExecutionOutcome`].
async fn execute_with_timeout(
    executor: &dyn CheckExecutor,
    check: &CheckDefinition,
    timeout: std::time::Duration,
) -> ExecutionOutcome {
    let request = CheckRequest {
        check_id: check.id,
        service_id: check.service_id,
        name: check.name.clone(),
        config: check.config.clone(),
    };
    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, executor.execute(&request)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => ExecutionOutcome::errored(format!("executor unreachable: {err}")),
        Err(_) => ExecutionOutcome::errored(format!(
            "timed out after {}s",
            timeout.as_secs()
        )),
    };
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    outcome.with_duration_ms(duration_ms)
}

#[allow(clippy::too_many_arguments)]
async fn execute_and_record(
    checks: &Arc<dyn CheckStore>,
    indicators: &Arc<dyn IndicatorStore>,
    rollup: Option<&AuthorizationRollup>,
    executor: &Arc<dyn CheckExecutor>,
    sink: &SharedSink,
    metrics: EngineMetrics,
    check: &CheckDefinition,
    timeout: std::time::Duration,
) {
    let outcome = execute_with_timeout(&**executor, check, timeout).await;
    if let Err(err) = record_outcome(
        checks,
        indicators,
        rollup,
        sink,
        metrics,
        &check.id,
        &outcome,
        Utc::now(),
    )
    .await
    {
        tracing::warn!(check_id = %check.id, %err, "failed to record execution outcome");
    }
}

/// Records one execution outcome against a rule with per-rule
/// serialization, appends the immutable record, propagates pass/fail into
/// the indicator ledger, and emits events.
///
/// Shared by the scheduler workers and the engine's manual recording
/// operation.
///
/// # Errors
///
/// Returns a not-found error for an unknown check, or a version-conflict
/// error if concurrent writers exhaust the CAS retries.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn record_outcome(
    checks: &Arc<dyn CheckStore>,
    indicators: &Arc<dyn IndicatorStore>,
    rollup: Option<&AuthorizationRollup>,
    sink: &SharedSink,
    metrics: EngineMetrics,
    check_id: &CheckId,
    outcome: &ExecutionOutcome,
    now: DateTime<Utc>,
) -> Result<ExecutionRecord> {
    for _ in 0..=CAS_RETRIES {
        let mut check = checks
            .get_check(check_id)
            .await?
            .ok_or_else(|| Error::not_found("check", check_id))?;
        let status_before = check.status;
        let record = check.record_execution(outcome, now);

        match checks.cas_save_check(&check).await? {
            CasResult::Success => {
                checks.append_execution(&record).await?;

                metrics.record_check_execution(
                    check.config.kind_label(),
                    &record.status.to_string(),
                    outcome.duration_ms_as_secs(),
                );
                emit(
                    sink,
                    EventEnvelope::new(
                        check.service_id,
                        EngineEventData::ExecutionRecorded {
                            check_id: check.id,
                            execution_id: record.id,
                            status: record.status,
                            passed: record.passed,
                        },
                    ),
                );
                if status_before != check.status {
                    metrics.record_rule_status_change(
                        &status_before.to_string(),
                        &check.status.to_string(),
                    );
                    emit(
                        sink,
                        EventEnvelope::new(
                            check.service_id,
                            EngineEventData::RuleStatusChanged {
                                check_id: check.id,
                                from: status_before,
                                to: check.status,
                                consecutive_failures: check.consecutive_failures,
                            },
                        ),
                    );
                }

                propagate_to_ledger(indicators, rollup, &check, &record, now).await;
                return Ok(record);
            }
            CasResult::NotFound => {
                return Err(Error::not_found("check", check_id));
            }
            CasResult::VersionConflict { .. } => {
                tracing::debug!(check_id = %check_id, "outcome recording lost CAS race, retrying");
            }
        }
    }
    Err(Error::VersionConflict {
        resource_type: "check",
        id: check_id.to_string(),
        expected: 0,
    })
}

/// Pushes a definitive pass/fail into the indicator ledger.
///
/// Errored and skipped executions did not evaluate the indicators and
/// leave the ledger untouched. Ledger write failures are logged, never
/// propagated: the execution record is already durable.
async fn propagate_to_ledger(
    indicators: &Arc<dyn IndicatorStore>,
    rollup: Option<&AuthorizationRollup>,
    check: &CheckDefinition,
    record: &ExecutionRecord,
    now: DateTime<Utc>,
) {
    if !matches!(
        record.status,
        ExecutionStatus::Passed | ExecutionStatus::Failed
    ) {
        return;
    }
    let Some(service_id) = check.service_id else {
        return;
    };

    for indicator_ref in &check.indicator_refs {
        let result = async {
            for _ in 0..=CAS_RETRIES {
                let Some(mut indicator) =
                    indicators.find_indicator(&service_id, indicator_ref).await?
                else {
                    tracing::debug!(
                        %service_id,
                        indicator_ref,
                        "check validates an indicator the service is not scoped to"
                    );
                    return Ok(());
                };
                indicator.record_automated_result(record.passed, now);
                match indicators.cas_save_indicator(&indicator).await? {
                    CasResult::Success => return Ok(()),
                    CasResult::NotFound => return Ok(()),
                    CasResult::VersionConflict { .. } => {}
                }
            }
            Err(Error::VersionConflict {
                resource_type: "indicator",
                id: indicator_ref.clone(),
                expected: 0,
            })
        }
        .await;

        if let Err(err) = result {
            tracing::warn!(
                check_id = %check.id,
                indicator_ref,
                %err,
                "failed to propagate execution result to indicator ledger"
            );
        }
    }

    // Underlying counts changed; refresh the service's denormalized
    // counters by full recount.
    if let Some(rollup) = rollup {
        if let Err(err) = rollup.recount_metrics(&service_id).await {
            tracing::warn!(%service_id, %err, "rollup recount after execution failed");
        }
    }
}

impl ExecutionOutcome {
    /// Duration in seconds for histogram recording.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn duration_ms_as_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}
