//! In-memory store implementation for testing and development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process
//!   coordination
//! - **Single-process only**: State is not shared across process boundaries
//! - **No persistence**: All state is lost when the process exits

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use conauth_core::{
    ChangeRequestId, CheckId, EvidenceId, IncidentId, IndicatorId, ReportId, ServiceId,
};

use super::{
    AuthorizationStore, CasResult, ChangeStore, CheckStore, EvidenceMetadata, EvidenceStore,
    IncidentStore, IndicatorStore, ReportStore, VulnerabilityFeed, VulnerabilityRecord,
};
use crate::change::ChangeRequest;
use crate::check::{CheckDefinition, ExecutionRecord};
use crate::error::{Error, Result};
use crate::incident::Incident;
use crate::indicator::IndicatorRecord;
use crate::report::AuthorizationReport;
use crate::rollup::ServiceAuthorization;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// Saves `value` iff the stored version matches; bumps the stored version.
macro_rules! cas_save {
    ($map:expr, $key:expr, $value:expr) => {{
        match $map.get_mut(&$key) {
            None => CasResult::NotFound,
            Some(stored) => {
                if stored.version == $value.version {
                    let mut next = $value.clone();
                    next.version += 1;
                    *stored = next;
                    CasResult::Success
                } else {
                    CasResult::VersionConflict {
                        actual: stored.version,
                    }
                }
            }
        }
    }};
}

/// In-memory implementation of every engine store trait.
///
/// Thread-safe via `RwLock`; share one instance as `Arc<InMemoryStores>`
/// and coerce per trait.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    indicators: RwLock<HashMap<IndicatorId, IndicatorRecord>>,
    checks: RwLock<HashMap<CheckId, CheckDefinition>>,
    executions: RwLock<HashMap<CheckId, Vec<ExecutionRecord>>>,
    incidents: RwLock<HashMap<IncidentId, Incident>>,
    changes: RwLock<HashMap<ChangeRequestId, ChangeRequest>>,
    services: RwLock<HashMap<ServiceId, ServiceAuthorization>>,
    reports: RwLock<HashMap<ReportId, AuthorizationReport>>,
    evidence: RwLock<HashMap<EvidenceId, EvidenceMetadata>>,
    vulnerabilities: RwLock<HashMap<ServiceId, Vec<VulnerabilityRecord>>>,
}

impl InMemoryStores {
    /// Creates empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds evidence metadata, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn seed_evidence(&self, metadata: EvidenceMetadata) -> Result<()> {
        let mut evidence = self.evidence.write().map_err(poison_err)?;
        evidence.insert(metadata.id, metadata);
        Ok(())
    }

    /// Replaces the vulnerability feed contents for a service, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn set_vulnerabilities(
        &self,
        service_id: ServiceId,
        records: Vec<VulnerabilityRecord>,
    ) -> Result<()> {
        let mut vulnerabilities = self.vulnerabilities.write().map_err(poison_err)?;
        vulnerabilities.insert(service_id, records);
        Ok(())
    }
}

#[async_trait]
impl IndicatorStore for InMemoryStores {
    async fn get_indicator(&self, id: &IndicatorId) -> Result<Option<IndicatorRecord>> {
        let indicators = self.indicators.read().map_err(poison_err)?;
        Ok(indicators.get(id).cloned())
    }

    async fn find_indicator(
        &self,
        service_id: &ServiceId,
        indicator_ref: &str,
    ) -> Result<Option<IndicatorRecord>> {
        let indicators = self.indicators.read().map_err(poison_err)?;
        Ok(indicators
            .values()
            .find(|r| &r.service_id == service_id && r.indicator_ref == indicator_ref)
            .cloned())
    }

    async fn list_indicators(&self, service_id: &ServiceId) -> Result<Vec<IndicatorRecord>> {
        let indicators = self.indicators.read().map_err(poison_err)?;
        let mut records: Vec<_> = indicators
            .values()
            .filter(|r| &r.service_id == service_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.indicator_ref.cmp(&b.indicator_ref));
        Ok(records)
    }

    async fn save_indicator(&self, record: &IndicatorRecord) -> Result<()> {
        let mut indicators = self.indicators.write().map_err(poison_err)?;
        indicators.insert(record.id, record.clone());
        Ok(())
    }

    async fn cas_save_indicator(&self, record: &IndicatorRecord) -> Result<CasResult> {
        let mut indicators = self.indicators.write().map_err(poison_err)?;
        Ok(cas_save!(indicators, record.id, record))
    }
}

#[async_trait]
impl CheckStore for InMemoryStores {
    async fn get_check(&self, id: &CheckId) -> Result<Option<CheckDefinition>> {
        let checks = self.checks.read().map_err(poison_err)?;
        Ok(checks.get(id).cloned())
    }

    async fn list_checks(&self, service_id: Option<&ServiceId>) -> Result<Vec<CheckDefinition>> {
        let checks = self.checks.read().map_err(poison_err)?;
        let mut result: Vec<_> = checks
            .values()
            .filter(|c| match service_id {
                Some(service_id) => {
                    c.service_id.is_none() || c.service_id.as_ref() == Some(service_id)
                }
                None => true,
            })
            .cloned()
            .collect();
        result.sort_by_key(|c| c.id);
        Ok(result)
    }

    async fn list_due_checks(&self, now: DateTime<Utc>) -> Result<Vec<CheckDefinition>> {
        let checks = self.checks.read().map_err(poison_err)?;
        let mut due: Vec<_> = checks.values().filter(|c| c.is_due(now)).cloned().collect();
        due.sort_by_key(|c| c.next_due_at);
        Ok(due)
    }

    async fn save_check(&self, check: &CheckDefinition) -> Result<()> {
        let mut checks = self.checks.write().map_err(poison_err)?;
        checks.insert(check.id, check.clone());
        Ok(())
    }

    async fn cas_save_check(&self, check: &CheckDefinition) -> Result<CasResult> {
        let mut checks = self.checks.write().map_err(poison_err)?;
        Ok(cas_save!(checks, check.id, check))
    }

    async fn append_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let mut executions = self.executions.write().map_err(poison_err)?;
        executions
            .entry(record.check_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_executions(
        &self,
        check_id: &CheckId,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        let executions = self.executions.read().map_err(poison_err)?;
        let mut records = executions.get(check_id).cloned().unwrap_or_default();
        records.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[async_trait]
impl IncidentStore for InMemoryStores {
    async fn get_incident(&self, id: &IncidentId) -> Result<Option<Incident>> {
        let incidents = self.incidents.read().map_err(poison_err)?;
        Ok(incidents.get(id).cloned())
    }

    async fn list_incidents(&self, service_id: &ServiceId) -> Result<Vec<Incident>> {
        let incidents = self.incidents.read().map_err(poison_err)?;
        let mut result: Vec<_> = incidents
            .values()
            .filter(|i| &i.service_id == service_id)
            .cloned()
            .collect();
        result.sort_by_key(|i| i.detected_at);
        Ok(result)
    }

    async fn list_incidents_in_period(
        &self,
        service_id: &ServiceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Incident>> {
        let incidents = self.incidents.read().map_err(poison_err)?;
        let mut result: Vec<_> = incidents
            .values()
            .filter(|i| &i.service_id == service_id && i.detected_at >= start && i.detected_at < end)
            .cloned()
            .collect();
        result.sort_by_key(|i| i.detected_at);
        Ok(result)
    }

    async fn save_incident(&self, incident: &Incident) -> Result<()> {
        let mut incidents = self.incidents.write().map_err(poison_err)?;
        incidents.insert(incident.id, incident.clone());
        Ok(())
    }

    async fn cas_save_incident(&self, incident: &Incident) -> Result<CasResult> {
        let mut incidents = self.incidents.write().map_err(poison_err)?;
        Ok(cas_save!(incidents, incident.id, incident))
    }
}

#[async_trait]
impl ChangeStore for InMemoryStores {
    async fn get_change(&self, id: &ChangeRequestId) -> Result<Option<ChangeRequest>> {
        let changes = self.changes.read().map_err(poison_err)?;
        Ok(changes.get(id).cloned())
    }

    async fn list_changes(&self, service_id: &ServiceId) -> Result<Vec<ChangeRequest>> {
        let changes = self.changes.read().map_err(poison_err)?;
        let mut result: Vec<_> = changes
            .values()
            .filter(|c| &c.service_id == service_id)
            .cloned()
            .collect();
        result.sort_by_key(|c| c.requested_at);
        Ok(result)
    }

    async fn list_changes_in_period(
        &self,
        service_id: &ServiceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChangeRequest>> {
        let changes = self.changes.read().map_err(poison_err)?;
        let mut result: Vec<_> = changes
            .values()
            .filter(|c| {
                &c.service_id == service_id && c.requested_at >= start && c.requested_at < end
            })
            .cloned()
            .collect();
        result.sort_by_key(|c| c.requested_at);
        Ok(result)
    }

    async fn save_change(&self, change: &ChangeRequest) -> Result<()> {
        let mut changes = self.changes.write().map_err(poison_err)?;
        changes.insert(change.id, change.clone());
        Ok(())
    }

    async fn cas_save_change(&self, change: &ChangeRequest) -> Result<CasResult> {
        let mut changes = self.changes.write().map_err(poison_err)?;
        Ok(cas_save!(changes, change.id, change))
    }
}

#[async_trait]
impl AuthorizationStore for InMemoryStores {
    async fn get_service(&self, id: &ServiceId) -> Result<Option<ServiceAuthorization>> {
        let services = self.services.read().map_err(poison_err)?;
        Ok(services.get(id).cloned())
    }

    async fn save_service(&self, service: &ServiceAuthorization) -> Result<()> {
        let mut services = self.services.write().map_err(poison_err)?;
        services.insert(service.id, service.clone());
        Ok(())
    }

    async fn cas_save_service(&self, service: &ServiceAuthorization) -> Result<CasResult> {
        let mut services = self.services.write().map_err(poison_err)?;
        Ok(cas_save!(services, service.id, service))
    }
}

#[async_trait]
impl ReportStore for InMemoryStores {
    async fn get_report(&self, id: &ReportId) -> Result<Option<AuthorizationReport>> {
        let reports = self.reports.read().map_err(poison_err)?;
        Ok(reports.get(id).cloned())
    }

    async fn find_report(
        &self,
        service_id: &ServiceId,
        year: i32,
        quarter: u8,
    ) -> Result<Option<AuthorizationReport>> {
        let reports = self.reports.read().map_err(poison_err)?;
        Ok(reports
            .values()
            .find(|r| {
                &r.service_id == service_id && r.period.year == year && r.period.quarter == quarter
            })
            .cloned())
    }

    async fn save_report(&self, report: &AuthorizationReport) -> Result<()> {
        let mut reports = self.reports.write().map_err(poison_err)?;
        reports.insert(report.id, report.clone());
        Ok(())
    }

    async fn cas_save_report(&self, report: &AuthorizationReport) -> Result<CasResult> {
        let mut reports = self.reports.write().map_err(poison_err)?;
        Ok(cas_save!(reports, report.id, report))
    }
}

#[async_trait]
impl EvidenceStore for InMemoryStores {
    async fn evidence_exists(&self, id: &EvidenceId) -> Result<bool> {
        let evidence = self.evidence.read().map_err(poison_err)?;
        Ok(evidence.contains_key(id))
    }

    async fn get_evidence(&self, id: &EvidenceId) -> Result<Option<EvidenceMetadata>> {
        let evidence = self.evidence.read().map_err(poison_err)?;
        Ok(evidence.get(id).cloned())
    }
}

#[async_trait]
impl VulnerabilityFeed for InMemoryStores {
    async fn list_vulnerabilities(
        &self,
        service_id: &ServiceId,
    ) -> Result<Vec<VulnerabilityRecord>> {
        let vulnerabilities = self.vulnerabilities.read().map_err(poison_err)?;
        Ok(vulnerabilities.get(service_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckConfig, Frequency};
    use crate::indicator::TierApplicability;

    fn check(now: DateTime<Utc>) -> CheckDefinition {
        CheckDefinition::new(
            None,
            "probe",
            CheckConfig::ApiProbe {
                url: "https://svc.example/health".into(),
                method: "GET".into(),
                expected_status: 200,
            },
            vec!["KSI-SVC-01".into()],
            Frequency::Hourly,
            now,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn cas_save_detects_stale_versions() {
        let stores = InMemoryStores::new();
        let now = Utc::now();
        let mut c = check(now);
        stores.save_check(&c).await.unwrap();

        // First CAS save at version 0 succeeds and bumps to 1.
        assert!(stores.cas_save_check(&c).await.unwrap().is_success());

        // A second save from the same stale copy conflicts.
        let result = stores.cas_save_check(&c).await.unwrap();
        assert_eq!(result, CasResult::VersionConflict { actual: 1 });

        // Reloading picks up the new version and succeeds.
        c = stores.get_check(&c.id).await.unwrap().unwrap();
        assert_eq!(c.version, 1);
        assert!(stores.cas_save_check(&c).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn cas_save_missing_aggregate_is_not_found() {
        let stores = InMemoryStores::new();
        let c = check(Utc::now());
        assert_eq!(
            stores.cas_save_check(&c).await.unwrap(),
            CasResult::NotFound
        );
    }

    #[tokio::test]
    async fn due_checks_are_filtered_and_ordered() {
        let stores = InMemoryStores::new();
        let now = Utc::now();

        let mut due_late = check(now);
        due_late.activate(now - chrono::Duration::hours(2)).unwrap();
        let mut due_early = check(now);
        due_early.activate(now - chrono::Duration::hours(5)).unwrap();
        let mut not_due = check(now);
        not_due.activate(now).unwrap();
        let draft = check(now);

        for c in [&due_late, &due_early, &not_due, &draft] {
            stores.save_check(c).await.unwrap();
        }

        let due = stores.list_due_checks(now).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, due_early.id);
        assert_eq!(due[1].id, due_late.id);
    }

    #[tokio::test]
    async fn executions_are_listed_most_recent_first() {
        let stores = InMemoryStores::new();
        let now = Utc::now();
        let mut c = check(now);
        c.activate(now).unwrap();

        for minutes in [30, 10, 20] {
            let record = c.record_execution(
                &crate::check::ExecutionOutcome::passed(vec![]),
                now - chrono::Duration::minutes(minutes),
            );
            stores.append_execution(&record).await.unwrap();
        }

        let listed = stores.list_executions(&c.id, 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].executed_at > listed[1].executed_at);
    }

    #[tokio::test]
    async fn indicators_filtered_by_service() {
        let stores = InMemoryStores::new();
        let now = Utc::now();
        let service_a = ServiceId::generate();
        let service_b = ServiceId::generate();

        for (service, reference) in [(service_a, "KSI-IAM-01"), (service_b, "KSI-IAM-01")] {
            let record = IndicatorRecord::new(
                service,
                reference,
                "identity_and_access",
                TierApplicability::default(),
                now,
            );
            stores.save_indicator(&record).await.unwrap();
        }

        assert_eq!(stores.list_indicators(&service_a).await.unwrap().len(), 1);
        let found = stores
            .find_indicator(&service_a, "KSI-IAM-01")
            .await
            .unwrap();
        assert_eq!(found.unwrap().service_id, service_a);
    }
}
