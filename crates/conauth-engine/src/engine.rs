//! The engine facade.
//!
//! One operation per named lifecycle transition, each taking the aggregate
//! identifier plus the transition's arguments and returning the updated
//! aggregate or a single typed error. All collaborators are injected at
//! construction; the engine holds no ambient global state.
//!
//! Concurrency: every mutation is a load, a guarded in-memory transition,
//! and a CAS save. Two concurrent transitions on the same aggregate cannot
//! both succeed from the same precondition; the loser gets a
//! [`Error::VersionConflict`] and must reload before retrying.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use conauth_core::{
    ChangeRequestId, CheckId, EvidenceId, IncidentId, IndicatorId, ReportId, ServiceId,
};

use crate::change::{ChangeRequest, ChangeType, ImpactAnalysis};
use crate::check::{
    CheckConfig, CheckDefinition, ExecutionOutcome, ExecutionRecord, Frequency,
};
use crate::error::{Error, Result};
use crate::events::{EngineEventData, EventEnvelope};
use crate::incident::{
    Incident, IncidentCategory, IncidentImpact, IncidentSeverity,
};
use crate::indicator::{ComplianceStatus, ImplementationStatus, IndicatorRecord, TierApplicability};
use crate::metrics::EngineMetrics;
use crate::outbox::{emit, SharedSink};
use crate::report::{Attestation, AuthorizationReport, ReportAggregator};
use crate::rollup::{AuthorizationRollup, ComplianceMetrics, ImpactTier, ServiceAuthorization};
use crate::scheduler::record_outcome;
use crate::store::{
    AuthorizationStore, CasResult, ChangeStore, CheckStore, EvidenceStore, IncidentStore,
    IndicatorStore, ReportStore, VulnerabilityFeed,
};

/// Collaborators injected into the engine.
pub struct EngineDeps {
    /// Indicator ledger storage.
    pub indicators: Arc<dyn IndicatorStore>,
    /// Check definition and execution storage.
    pub checks: Arc<dyn CheckStore>,
    /// Incident storage.
    pub incidents: Arc<dyn IncidentStore>,
    /// Change request storage.
    pub changes: Arc<dyn ChangeStore>,
    /// Service authorization storage.
    pub services: Arc<dyn AuthorizationStore>,
    /// Report storage.
    pub reports: Arc<dyn ReportStore>,
    /// External evidence resolver.
    pub evidence: Arc<dyn EvidenceStore>,
    /// External vulnerability feed.
    pub vulnerabilities: Arc<dyn VulnerabilityFeed>,
}

/// The continuous-authorization workflow engine.
pub struct Engine {
    indicators: Arc<dyn IndicatorStore>,
    checks: Arc<dyn CheckStore>,
    incidents: Arc<dyn IncidentStore>,
    changes: Arc<dyn ChangeStore>,
    services: Arc<dyn AuthorizationStore>,
    reports: Arc<dyn ReportStore>,
    evidence: Arc<dyn EvidenceStore>,
    rollup: Arc<AuthorizationRollup>,
    aggregator: ReportAggregator,
    sink: SharedSink,
    metrics: EngineMetrics,
}

impl Engine {
    /// Creates an engine over the given collaborators.
    #[must_use]
    pub fn new(deps: EngineDeps, sink: SharedSink) -> Self {
        let rollup = Arc::new(AuthorizationRollup::new(
            Arc::clone(&deps.indicators),
            Arc::clone(&deps.services),
        ));
        let aggregator = ReportAggregator::new(
            Arc::clone(&deps.indicators),
            Arc::clone(&deps.incidents),
            Arc::clone(&deps.changes),
            Arc::clone(&deps.vulnerabilities),
            Arc::clone(&deps.reports),
        );
        Self {
            indicators: deps.indicators,
            checks: deps.checks,
            incidents: deps.incidents,
            changes: deps.changes,
            services: deps.services,
            reports: deps.reports,
            evidence: deps.evidence,
            rollup,
            aggregator,
            sink,
            metrics: EngineMetrics::new(),
        }
    }

    /// Creates an engine wired to fresh in-memory stores, for tests and
    /// development. Returns the store handle for seeding and inspection.
    #[must_use]
    pub fn with_memory_stores(
        sink: SharedSink,
    ) -> (Self, Arc<crate::store::memory::InMemoryStores>) {
        let stores = Arc::new(crate::store::memory::InMemoryStores::new());
        let deps = EngineDeps {
            indicators: Arc::clone(&stores) as Arc<dyn IndicatorStore>,
            checks: Arc::clone(&stores) as Arc<dyn CheckStore>,
            incidents: Arc::clone(&stores) as Arc<dyn IncidentStore>,
            changes: Arc::clone(&stores) as Arc<dyn ChangeStore>,
            services: Arc::clone(&stores) as Arc<dyn AuthorizationStore>,
            reports: Arc::clone(&stores) as Arc<dyn ReportStore>,
            evidence: Arc::clone(&stores) as Arc<dyn EvidenceStore>,
            vulnerabilities: Arc::clone(&stores) as Arc<dyn VulnerabilityFeed>,
        };
        (Self::new(deps, sink), stores)
    }

    /// Returns the rollup handle, for wiring into a scheduler.
    #[must_use]
    pub fn rollup(&self) -> Arc<AuthorizationRollup> {
        Arc::clone(&self.rollup)
    }

    fn emit_event(&self, service_id: Option<ServiceId>, data: EngineEventData) {
        self.metrics.record_event(data.event_name());
        emit(&self.sink, EventEnvelope::new(service_id, data));
    }

    async fn require_service(&self, service_id: &ServiceId) -> Result<ServiceAuthorization> {
        self.services
            .get_service(service_id)
            .await?
            .ok_or_else(|| Error::not_found("service", service_id))
    }

    // --- Service authorization ---

    /// Registers a new protected service in draft.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the save fails.
    pub async fn register_service(
        &self,
        name: impl Into<String> + Send,
        impact_tier: ImpactTier,
    ) -> Result<ServiceAuthorization> {
        let service = ServiceAuthorization::new(name, impact_tier, Utc::now());
        self.services.save_service(&service).await?;
        self.metrics.record_transition("service", "register");
        Ok(service)
    }

    /// Gets a service authorization record.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown service.
    pub async fn get_service(&self, service_id: &ServiceId) -> Result<ServiceAuthorization> {
        self.require_service(service_id).await
    }

    async fn update_service<F>(
        &self,
        service_id: &ServiceId,
        operation: &'static str,
        apply: F,
    ) -> Result<ServiceAuthorization>
    where
        F: FnOnce(&mut ServiceAuthorization, DateTime<Utc>) -> Result<()> + Send,
    {
        let now = Utc::now();
        let mut service = self.require_service(service_id).await?;
        apply(&mut service, now)?;
        match self.services.cas_save_service(&service).await? {
            CasResult::Success => {
                service.version += 1;
                self.metrics.record_transition("service", operation);
                Ok(service)
            }
            CasResult::NotFound => Err(Error::not_found("service", service_id)),
            CasResult::VersionConflict { .. } => Err(Error::VersionConflict {
                resource_type: "service",
                id: service_id.to_string(),
                expected: service.version,
            }),
        }
    }

    /// Marks a draft service's package ready for submission.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the service is a draft.
    pub async fn mark_ready(&self, service_id: &ServiceId) -> Result<ServiceAuthorization> {
        self.update_service(service_id, "mark_ready", |s, now| s.mark_ready(now))
            .await
    }

    /// Submits a ready service for authorization.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the service is ready.
    pub async fn submit_for_authorization(
        &self,
        service_id: &ServiceId,
    ) -> Result<ServiceAuthorization> {
        self.update_service(service_id, "submit_for_authorization", |s, now| {
            s.submit_for_authorization(now)
        })
        .await
    }

    /// Grants authorization to an in-process service.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the service is in process.
    pub async fn grant_authorization(
        &self,
        service_id: &ServiceId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ServiceAuthorization> {
        self.update_service(service_id, "grant_authorization", |s, now| {
            s.grant_authorization(expires_at, now)
        })
        .await
    }

    /// Revokes an active authorization.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the service is authorized.
    pub async fn revoke_authorization(
        &self,
        service_id: &ServiceId,
    ) -> Result<ServiceAuthorization> {
        self.update_service(service_id, "revoke_authorization", |s, now| {
            s.revoke_authorization(now)
        })
        .await
    }

    /// Withdraws an unauthorized service.
    ///
    /// # Errors
    ///
    /// Returns a precondition error once the service is authorized.
    pub async fn withdraw_service(&self, service_id: &ServiceId) -> Result<ServiceAuthorization> {
        self.update_service(service_id, "withdraw", |s, now| s.withdraw(now))
            .await
    }

    /// Recounts a service's compliance metrics by full recount over the
    /// indicator ledger.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown service.
    pub async fn recount_metrics(&self, service_id: &ServiceId) -> Result<ComplianceMetrics> {
        self.rollup.recount_metrics(service_id).await
    }

    // --- Indicator ledger ---

    /// Scopes a service to one catalogue indicator, creating its ledger
    /// record.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown service.
    pub async fn scope_indicator(
        &self,
        service_id: &ServiceId,
        indicator_ref: impl Into<String> + Send,
        category: impl Into<String> + Send,
        applicability: TierApplicability,
    ) -> Result<IndicatorRecord> {
        self.require_service(service_id).await?;
        let record = IndicatorRecord::new(
            *service_id,
            indicator_ref,
            category,
            applicability,
            Utc::now(),
        );
        self.indicators.save_indicator(&record).await?;
        self.metrics.record_transition("indicator", "scope");
        Ok(record)
    }

    /// Lists a service's indicator records.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub async fn list_indicators(&self, service_id: &ServiceId) -> Result<Vec<IndicatorRecord>> {
        self.indicators.list_indicators(service_id).await
    }

    async fn update_indicator<F>(
        &self,
        indicator_id: &IndicatorId,
        operation: &'static str,
        apply: F,
    ) -> Result<IndicatorRecord>
    where
        F: FnOnce(&mut IndicatorRecord, DateTime<Utc>) -> Result<()> + Send,
    {
        let now = Utc::now();
        let mut record = self
            .indicators
            .get_indicator(indicator_id)
            .await?
            .ok_or_else(|| Error::not_found("indicator", indicator_id))?;
        apply(&mut record, now)?;
        match self.indicators.cas_save_indicator(&record).await? {
            CasResult::Success => {
                record.version += 1;
                self.metrics.record_transition("indicator", operation);
                // Underlying counts may have changed; refresh the rollup.
                if let Err(err) = self.rollup.recount_metrics(&record.service_id).await {
                    tracing::warn!(
                        service_id = %record.service_id,
                        %err,
                        "rollup recount after indicator update failed"
                    );
                }
                Ok(record)
            }
            CasResult::NotFound => Err(Error::not_found("indicator", indicator_id)),
            CasResult::VersionConflict { .. } => Err(Error::VersionConflict {
                resource_type: "indicator",
                id: indicator_id.to_string(),
                expected: record.version,
            }),
        }
    }

    /// Records a manual compliance review of one indicator.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the review would mark a
    /// never-validated record compliant.
    pub async fn record_manual_review(
        &self,
        indicator_id: &IndicatorId,
        status: ComplianceStatus,
    ) -> Result<IndicatorRecord> {
        self.update_indicator(indicator_id, "manual_review", |r, now| {
            r.record_manual_review(status, now)
        })
        .await
    }

    /// Updates an indicator's implementation progress.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when the record is retired.
    pub async fn set_implementation_status(
        &self,
        indicator_id: &IndicatorId,
        status: ImplementationStatus,
    ) -> Result<IndicatorRecord> {
        self.update_indicator(indicator_id, "set_implementation_status", |r, now| {
            r.set_implementation_status(status, now)
        })
        .await
    }

    /// Retires an indicator record. Records are never deleted.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown indicator.
    pub async fn mark_indicator_not_applicable(
        &self,
        indicator_id: &IndicatorId,
    ) -> Result<IndicatorRecord> {
        self.update_indicator(indicator_id, "mark_not_applicable", |r, now| {
            r.mark_not_applicable(now);
            Ok(())
        })
        .await
    }

    /// Attaches evidence to an indicator after resolving it in the
    /// evidence store.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the evidence does not exist.
    pub async fn attach_evidence(
        &self,
        indicator_id: &IndicatorId,
        evidence_id: EvidenceId,
    ) -> Result<IndicatorRecord> {
        if !self.evidence.evidence_exists(&evidence_id).await? {
            return Err(Error::validation(format!(
                "evidence {evidence_id} does not exist"
            )));
        }
        self.update_indicator(indicator_id, "attach_evidence", |r, now| {
            r.attach_evidence(evidence_id, now);
            Ok(())
        })
        .await
    }

    // --- Checks ---

    /// Defines a new automated check in draft.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty name or indicator list, or a
    /// not-found error when the owning service is unknown.
    pub async fn define_check(
        &self,
        service_id: Option<ServiceId>,
        name: impl Into<String> + Send,
        config: CheckConfig,
        indicator_refs: Vec<String>,
        frequency: Frequency,
    ) -> Result<CheckDefinition> {
        if let Some(service_id) = &service_id {
            self.require_service(service_id).await?;
        }
        let check =
            CheckDefinition::new(service_id, name, config, indicator_refs, frequency, Utc::now())?;
        self.checks.save_check(&check).await?;
        self.metrics.record_transition("check", "define");
        Ok(check)
    }

    /// Gets a check definition.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown check.
    pub async fn get_check(&self, check_id: &CheckId) -> Result<CheckDefinition> {
        self.checks
            .get_check(check_id)
            .await?
            .ok_or_else(|| Error::not_found("check", check_id))
    }

    async fn update_check<F>(
        &self,
        check_id: &CheckId,
        operation: &'static str,
        apply: F,
    ) -> Result<CheckDefinition>
    where
        F: FnOnce(&mut CheckDefinition, DateTime<Utc>) -> Result<Option<EngineEventData>> + Send,
    {
        let now = Utc::now();
        let mut check = self.get_check(check_id).await?;
        let event = apply(&mut check, now)?;
        match self.checks.cas_save_check(&check).await? {
            CasResult::Success => {
                check.version += 1;
                self.metrics.record_transition("check", operation);
                if let Some(data) = event {
                    self.emit_event(check.service_id, data);
                }
                Ok(check)
            }
            CasResult::NotFound => Err(Error::not_found("check", check_id)),
            CasResult::VersionConflict { .. } => Err(Error::VersionConflict {
                resource_type: "check",
                id: check_id.to_string(),
                expected: check.version,
            }),
        }
    }

    /// Activates a draft or paused rule, scheduling its first run.
    ///
    /// # Errors
    ///
    /// Returns a precondition error from active, deprecated, or error
    /// status.
    pub async fn activate_rule(&self, check_id: &CheckId) -> Result<CheckDefinition> {
        self.update_check(check_id, "activate", |check, now| {
            check.activate(now)?;
            Ok(Some(EngineEventData::RuleActivated {
                check_id: check.id,
                next_due_at: check.next_due_at,
            }))
        })
        .await
    }

    /// Pauses an active or errored rule.
    ///
    /// # Errors
    ///
    /// Returns a precondition error from any other status.
    pub async fn pause_rule(&self, check_id: &CheckId) -> Result<CheckDefinition> {
        self.update_check(check_id, "pause", |check, now| {
            let from = check.status;
            check.pause(now)?;
            Ok(Some(EngineEventData::RuleStatusChanged {
                check_id: check.id,
                from,
                to: check.status,
                consecutive_failures: check.consecutive_failures,
            }))
        })
        .await
    }

    /// Permanently retires a rule.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when already deprecated.
    pub async fn deprecate_rule(&self, check_id: &CheckId) -> Result<CheckDefinition> {
        self.update_check(check_id, "deprecate", |check, now| {
            let from = check.status;
            check.deprecate(now)?;
            Ok(Some(EngineEventData::RuleStatusChanged {
                check_id: check.id,
                from,
                to: check.status,
                consecutive_failures: check.consecutive_failures,
            }))
        })
        .await
    }

    /// Records an externally produced execution outcome against a rule.
    ///
    /// Always legal while the rule exists; this is the manual-recording
    /// path of the same operation the scheduler workers use.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown check.
    pub async fn record_execution(
        &self,
        check_id: &CheckId,
        outcome: &ExecutionOutcome,
    ) -> Result<ExecutionRecord> {
        record_outcome(
            &self.checks,
            &self.indicators,
            Some(&*self.rollup),
            &self.sink,
            self.metrics,
            check_id,
            outcome,
            Utc::now(),
        )
        .await
    }

    /// Returns a rule's lifetime pass rate.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown check.
    pub async fn pass_rate(&self, check_id: &CheckId) -> Result<f64> {
        Ok(self.get_check(check_id).await?.pass_rate())
    }

    /// Lists a rule's most recent executions.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub async fn list_executions(
        &self,
        check_id: &CheckId,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        self.checks.list_executions(check_id, limit).await
    }

    // --- Incidents ---

    /// Opens a new incident at detection time.
    ///
    /// # Errors
    ///
    /// Returns a not-found error when the service is unknown.
    pub async fn open_incident(
        &self,
        service_id: &ServiceId,
        title: impl Into<String> + Send,
        description: impl Into<String> + Send,
        category: IncidentCategory,
        severity: IncidentSeverity,
    ) -> Result<Incident> {
        self.require_service(service_id).await?;
        let incident = Incident::open(
            *service_id,
            title,
            description,
            category,
            severity,
            Utc::now(),
        );
        self.incidents.save_incident(&incident).await?;
        self.metrics.record_transition("incident", "open");
        Ok(incident)
    }

    /// Gets an incident.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown incident.
    pub async fn get_incident(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.incidents
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| Error::not_found("incident", incident_id))
    }

    async fn update_incident<F>(
        &self,
        incident_id: &IncidentId,
        operation: &'static str,
        apply: F,
    ) -> Result<Incident>
    where
        F: FnOnce(&mut Incident, DateTime<Utc>) -> Result<Option<EngineEventData>> + Send,
    {
        let now = Utc::now();
        let mut incident = self.get_incident(incident_id).await?;
        let event = apply(&mut incident, now)?;
        match self.incidents.cas_save_incident(&incident).await? {
            CasResult::Success => {
                incident.version += 1;
                self.metrics.record_transition("incident", operation);
                if let Some(data) = event {
                    self.emit_event(Some(incident.service_id), data);
                }
                Ok(incident)
            }
            CasResult::NotFound => Err(Error::not_found("incident", incident_id)),
            CasResult::VersionConflict { .. } => Err(Error::VersionConflict {
                resource_type: "incident",
                id: incident_id.to_string(),
                expected: incident.version,
            }),
        }
    }

    /// Begins incident analysis.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the incident is detected or
    /// reported.
    pub async fn begin_analysis(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "begin_analysis", |incident, now| {
            incident.begin_analysis(now)?;
            Ok(Some(EngineEventData::IncidentAnalysisStarted {
                incident_id: incident.id,
                severity: incident.severity,
            }))
        })
        .await
    }

    /// Records containment.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the incident is detected,
    /// reported, or analyzing.
    pub async fn record_containment(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "record_containment", |incident, now| {
            incident.record_containment(now)?;
            Ok(Some(EngineEventData::IncidentContained {
                incident_id: incident.id,
                contained_at: now,
            }))
        })
        .await
    }

    /// Begins eradication.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the incident is contained.
    pub async fn begin_eradication(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "begin_eradication", |incident, now| {
            incident.begin_eradication(now)?;
            Ok(None)
        })
        .await
    }

    /// Records completed eradication.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless eradication is underway.
    pub async fn complete_eradication(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "complete_eradication", |incident, now| {
            incident.complete_eradication(now)?;
            Ok(Some(EngineEventData::IncidentEradicated {
                incident_id: incident.id,
            }))
        })
        .await
    }

    /// Begins recovery.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the threat is eradicated.
    pub async fn begin_recovery(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "begin_recovery", |incident, now| {
            incident.begin_recovery(now)?;
            Ok(None)
        })
        .await
    }

    /// Records recovery.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the threat is eradicated or
    /// recovery is underway.
    pub async fn record_recovery(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "record_recovery", |incident, now| {
            incident.record_recovery(now)?;
            Ok(Some(EngineEventData::IncidentRecovered {
                incident_id: incident.id,
            }))
        })
        .await
    }

    /// Records the post-incident review.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the service has recovered.
    pub async fn record_lessons_learned(
        &self,
        incident_id: &IncidentId,
        summary: impl Into<String> + Send,
    ) -> Result<Incident> {
        let summary = summary.into();
        self.update_incident(incident_id, "record_lessons_learned", move |incident, now| {
            incident.record_lessons_learned(summary, now)?;
            Ok(None)
        })
        .await
    }

    /// Closes an incident.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the lifecycle has reached
    /// recovered or lessons-learned and the reporting obligation is
    /// terminal.
    pub async fn close_incident(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "close", |incident, now| {
            incident.close(now)?;
            Ok(Some(EngineEventData::IncidentClosed {
                incident_id: incident.id,
                closed_at: now,
            }))
        })
        .await
    }

    /// Revises an incident's severity, recomputing the reporting deadline
    /// while the obligation is still pending.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when the incident is closed.
    pub async fn update_severity(
        &self,
        incident_id: &IncidentId,
        severity: IncidentSeverity,
    ) -> Result<Incident> {
        self.update_incident(incident_id, "update_severity", move |incident, now| {
            incident.update_severity(severity, now)?;
            Ok(None)
        })
        .await
    }

    /// Submits the initial external report.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless reporting is pending.
    pub async fn submit_incident_report(
        &self,
        incident_id: &IncidentId,
        case_number: impl Into<String> + Send,
    ) -> Result<Incident> {
        let case_number = case_number.into();
        self.update_incident(incident_id, "submit_report", move |incident, now| {
            incident.submit_report(case_number.clone(), now)?;
            Ok(Some(EngineEventData::IncidentReportSubmitted {
                incident_id: incident.id,
                case_number,
            }))
        })
        .await
    }

    /// Records that the authority requested a report update.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless a report or update was
    /// submitted.
    pub async fn require_report_update(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "require_report_update", |incident, now| {
            incident.require_report_update(now)?;
            Ok(None)
        })
        .await
    }

    /// Submits a requested report update.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless an update is required.
    pub async fn submit_report_update(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "submit_report_update", |incident, now| {
            incident.submit_report_update(now)?;
            Ok(None)
        })
        .await
    }

    /// Submits the final external report.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless a report or update was
    /// submitted.
    pub async fn submit_final_report(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "submit_final_report", |incident, now| {
            incident.submit_final_report(now)?;
            Ok(None)
        })
        .await
    }

    /// Records closure of the external reporting case.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the final report was submitted.
    pub async fn close_reporting(&self, incident_id: &IncidentId) -> Result<Incident> {
        self.update_incident(incident_id, "close_reporting", |incident, now| {
            incident.close_reporting(now)?;
            Ok(None)
        })
        .await
    }

    /// Updates an incident's impact assessment.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown incident.
    pub async fn record_incident_impact(
        &self,
        incident_id: &IncidentId,
        impact: IncidentImpact,
    ) -> Result<Incident> {
        self.update_incident(incident_id, "record_impact", move |incident, now| {
            incident.record_impact(impact, now);
            Ok(None)
        })
        .await
    }

    /// Appends an operator note to an incident timeline.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown incident.
    pub async fn add_incident_note(
        &self,
        incident_id: &IncidentId,
        note: impl Into<String> + Send,
        detail: Option<serde_json::Value>,
    ) -> Result<Incident> {
        let note = note.into();
        self.update_incident(incident_id, "add_note", move |incident, now| {
            incident.add_note(note, detail, now);
            Ok(None)
        })
        .await
    }

    // --- Change control ---

    /// Opens a change request in draft.
    ///
    /// # Errors
    ///
    /// Returns a not-found error when the service is unknown.
    pub async fn open_change_request(
        &self,
        service_id: &ServiceId,
        title: impl Into<String> + Send,
        description: impl Into<String> + Send,
        change_type: ChangeType,
    ) -> Result<ChangeRequest> {
        self.require_service(service_id).await?;
        let change = ChangeRequest::open(*service_id, title, description, change_type, Utc::now());
        self.changes.save_change(&change).await?;
        self.metrics.record_transition("change", "open");
        Ok(change)
    }

    /// Gets a change request.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown change request.
    pub async fn get_change(&self, change_id: &ChangeRequestId) -> Result<ChangeRequest> {
        self.changes
            .get_change(change_id)
            .await?
            .ok_or_else(|| Error::not_found("change request", change_id))
    }

    async fn update_change<F>(
        &self,
        change_id: &ChangeRequestId,
        operation: &'static str,
        apply: F,
    ) -> Result<ChangeRequest>
    where
        F: FnOnce(&mut ChangeRequest, DateTime<Utc>) -> Result<Option<EngineEventData>> + Send,
    {
        let now = Utc::now();
        let mut change = self.get_change(change_id).await?;
        let event = apply(&mut change, now)?;
        match self.changes.cas_save_change(&change).await? {
            CasResult::Success => {
                change.version += 1;
                self.metrics.record_transition("change", operation);
                if let Some(data) = event {
                    self.emit_event(Some(change.service_id), data);
                }
                Ok(change)
            }
            CasResult::NotFound => Err(Error::not_found("change request", change_id)),
            CasResult::VersionConflict { .. } => Err(Error::VersionConflict {
                resource_type: "change request",
                id: change_id.to_string(),
                expected: change.version,
            }),
        }
    }

    /// Submits a drafted change.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the change is a draft.
    pub async fn submit_change(&self, change_id: &ChangeRequestId) -> Result<ChangeRequest> {
        self.update_change(change_id, "submit", |change, now| {
            change.submit(now)?;
            Ok(None)
        })
        .await
    }

    /// Begins impact analysis.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the change was submitted.
    pub async fn begin_impact_analysis(
        &self,
        change_id: &ChangeRequestId,
    ) -> Result<ChangeRequest> {
        self.update_change(change_id, "begin_impact_analysis", |change, now| {
            change.begin_impact_analysis(now)?;
            Ok(None)
        })
        .await
    }

    /// Records the completed impact analysis.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless impact analysis is underway.
    pub async fn complete_impact_analysis(
        &self,
        change_id: &ChangeRequestId,
        analysis: ImpactAnalysis,
    ) -> Result<ChangeRequest> {
        self.update_change(change_id, "complete_impact_analysis", move |change, now| {
            change.complete_impact_analysis(analysis, now)?;
            Ok(None)
        })
        .await
    }

    /// Determines the notification requirement and branches the lifecycle.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the impact has been assessed.
    pub async fn determine_notification(
        &self,
        change_id: &ChangeRequestId,
        required: bool,
        category: Option<String>,
        rationale: impl Into<String> + Send,
    ) -> Result<ChangeRequest> {
        let rationale = rationale.into();
        self.update_change(change_id, "determine_notification", move |change, now| {
            change.determine_notification(required, category, rationale, now)?;
            Ok(None)
        })
        .await
    }

    /// Files the significant change notification.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless a notification is required and
    /// unfiled.
    pub async fn submit_notification(&self, change_id: &ChangeRequestId) -> Result<ChangeRequest> {
        self.update_change(change_id, "submit_notification", |change, now| {
            change.submit_notification(now)?;
            Ok(Some(EngineEventData::ChangeNotificationSubmitted {
                change_id: change.id,
            }))
        })
        .await
    }

    /// Records acknowledgement of the filed notification.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the notification was filed.
    pub async fn acknowledge_notification(
        &self,
        change_id: &ChangeRequestId,
    ) -> Result<ChangeRequest> {
        self.update_change(change_id, "acknowledge_notification", |change, now| {
            change.acknowledge_notification(now)?;
            Ok(None)
        })
        .await
    }

    /// Records completion of the required security review.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown change request.
    pub async fn complete_security_review(
        &self,
        change_id: &ChangeRequestId,
        reviewer: impl Into<String> + Send,
    ) -> Result<ChangeRequest> {
        let reviewer = reviewer.into();
        self.update_change(change_id, "complete_security_review", move |change, now| {
            change.complete_security_review(reviewer, now);
            Ok(None)
        })
        .await
    }

    /// Approves a change.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the notification gate has
    /// resolved and any required security review is complete.
    pub async fn approve_change(
        &self,
        change_id: &ChangeRequestId,
        approved_by: impl Into<String> + Send,
    ) -> Result<ChangeRequest> {
        let approved_by = approved_by.into();
        self.update_change(change_id, "approve", move |change, now| {
            change.approve(approved_by.clone(), now)?;
            Ok(Some(EngineEventData::ChangeApproved {
                change_id: change.id,
                approved_by,
            }))
        })
        .await
    }

    /// Records implementation of an approved change.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the change is approved.
    pub async fn mark_change_implemented(
        &self,
        change_id: &ChangeRequestId,
    ) -> Result<ChangeRequest> {
        self.update_change(change_id, "mark_implemented", |change, now| {
            change.mark_implemented(now)?;
            Ok(Some(EngineEventData::ChangeImplemented {
                change_id: change.id,
            }))
        })
        .await
    }

    /// Rejects a change.
    ///
    /// # Errors
    ///
    /// Returns a precondition error once the change is terminal.
    pub async fn reject_change(
        &self,
        change_id: &ChangeRequestId,
        reason: impl Into<String> + Send,
    ) -> Result<ChangeRequest> {
        let reason = reason.into();
        self.update_change(change_id, "reject", move |change, now| {
            change.reject(reason, now)?;
            Ok(None)
        })
        .await
    }

    /// Withdraws a change.
    ///
    /// # Errors
    ///
    /// Returns a precondition error once the change is terminal.
    pub async fn withdraw_change(
        &self,
        change_id: &ChangeRequestId,
        reason: impl Into<String> + Send,
    ) -> Result<ChangeRequest> {
        let reason = reason.into();
        self.update_change(change_id, "withdraw", move |change, now| {
            change.withdraw(reason, now)?;
            Ok(None)
        })
        .await
    }

    // --- Reports ---

    /// Generates the draft quarterly report for a service.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid quarter or an existing
    /// report, or a not-found error for an unknown service.
    pub async fn generate_report(
        &self,
        service_id: &ServiceId,
        year: i32,
        quarter: u8,
    ) -> Result<AuthorizationReport> {
        self.require_service(service_id).await?;
        let report = self
            .aggregator
            .generate(service_id, year, quarter, Utc::now())
            .await?;
        self.metrics.record_report_generated();
        self.emit_event(
            Some(*service_id),
            EngineEventData::ReportGenerated {
                report_id: report.id,
                year,
                quarter,
            },
        );
        Ok(report)
    }

    /// Gets a report.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown report.
    pub async fn get_report(&self, report_id: &ReportId) -> Result<AuthorizationReport> {
        self.reports
            .get_report(report_id)
            .await?
            .ok_or_else(|| Error::not_found("report", report_id))
    }

    async fn update_report<F>(
        &self,
        report_id: &ReportId,
        operation: &'static str,
        apply: F,
    ) -> Result<AuthorizationReport>
    where
        F: FnOnce(&mut AuthorizationReport, DateTime<Utc>) -> Result<Option<EngineEventData>>
            + Send,
    {
        let now = Utc::now();
        let mut report = self.get_report(report_id).await?;
        let event = apply(&mut report, now)?;
        match self.reports.cas_save_report(&report).await? {
            CasResult::Success => {
                report.version += 1;
                self.metrics.record_transition("report", operation);
                if let Some(data) = event {
                    self.emit_event(Some(report.service_id), data);
                }
                Ok(report)
            }
            CasResult::NotFound => Err(Error::not_found("report", report_id)),
            CasResult::VersionConflict { .. } => Err(Error::VersionConflict {
                resource_type: "report",
                id: report_id.to_string(),
                expected: report.version,
            }),
        }
    }

    /// Sets a draft report's narrative.
    ///
    /// # Errors
    ///
    /// Returns a precondition error once the report is submitted.
    pub async fn set_report_narrative(
        &self,
        report_id: &ReportId,
        narrative: impl Into<String> + Send,
    ) -> Result<AuthorizationReport> {
        let narrative = narrative.into();
        self.update_report(report_id, "set_narrative", move |report, _now| {
            report.set_narrative(narrative)?;
            Ok(None)
        })
        .await
    }

    /// Records a draft report's attestation.
    ///
    /// # Errors
    ///
    /// Returns a precondition error once the report is submitted.
    pub async fn record_report_attestation(
        &self,
        report_id: &ReportId,
        attestation: Attestation,
    ) -> Result<AuthorizationReport> {
        self.update_report(report_id, "record_attestation", move |report, _now| {
            report.record_attestation(attestation)?;
            Ok(None)
        })
        .await
    }

    /// Submits a report, freezing its summaries.
    ///
    /// # Errors
    ///
    /// Returns a precondition error without a recorded attestation or when
    /// already submitted.
    pub async fn submit_report(&self, report_id: &ReportId) -> Result<AuthorizationReport> {
        self.update_report(report_id, "submit", |report, now| {
            report.submit(now)?;
            Ok(Some(EngineEventData::ReportSubmitted {
                report_id: report.id,
            }))
        })
        .await
    }

    /// Appends a reviewer annotation to a report in any status.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown report.
    pub async fn add_report_comment(
        &self,
        report_id: &ReportId,
        author: impl Into<String> + Send,
        comment: impl Into<String> + Send,
    ) -> Result<AuthorizationReport> {
        let author = author.into();
        let comment = comment.into();
        self.update_report(report_id, "add_review_comment", move |report, now| {
            report.add_review_comment(author, comment, now);
            Ok(None)
        })
        .await
    }
}
