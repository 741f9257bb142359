//! Per-service authorization records and compliance rollups.
//!
//! The rollup holds denormalized compliance counters refreshed by the
//! indicator ledger and the scheduler. Recomputation is always a full
//! recount over the ledger, never an incremental delta, so the counters
//! cannot drift.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use conauth_core::ServiceId;

use crate::error::{Error, Result};
use crate::indicator::{ComplianceStatus, IndicatorRecord};
use crate::store::{AuthorizationStore, CasResult, IndicatorStore};

/// Bounded retries for compare-and-swap saves that lost a race.
const CAS_RETRIES: usize = 4;

/// Authorization status of a protected service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    /// Authorization package being assembled.
    Draft,
    /// Package complete, ready to submit.
    Ready,
    /// Under review by the authorizing official.
    InProcess,
    /// Authorized to operate.
    Authorized,
    /// Authorization revoked.
    Revoked,
    /// Withdrawn before authorization.
    Withdrawn,
}

impl AuthorizationStatus {
    /// Returns true if the status permits no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoked | Self::Withdrawn)
    }
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::InProcess => "in_process",
            Self::Authorized => "authorized",
            Self::Revoked => "revoked",
            Self::Withdrawn => "withdrawn",
        };
        write!(f, "{label}")
    }
}

/// FIPS-199-style impact tier of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactTier {
    /// Low impact.
    Low,
    /// Moderate impact.
    Moderate,
    /// High impact.
    High,
}

impl std::fmt::Display for ImpactTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Denormalized compliance counters for one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceMetrics {
    /// Indicator records counted (not-applicable records excluded).
    pub total_indicators: u64,
    /// Records currently compliant.
    pub compliant_indicators: u64,
    /// Records with automated validation coverage.
    pub automated_indicators: u64,
    /// Compliant / total, as a percentage. Zero when there are no records.
    pub compliance_pct: f64,
    /// Automated / total, as a percentage. Zero when there are no records.
    pub automation_pct: f64,
}

impl ComplianceMetrics {
    /// Computes metrics by full recount over the given ledger records.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_records(records: &[IndicatorRecord]) -> Self {
        let counted: Vec<_> = records
            .iter()
            .filter(|r| r.counts_toward_rollup())
            .collect();
        let total = counted.len() as u64;
        let compliant = counted
            .iter()
            .filter(|r| r.compliance_status == ComplianceStatus::Compliant)
            .count() as u64;
        let automated = counted.iter().filter(|r| r.is_automated()).count() as u64;

        let pct = |part: u64| {
            if total == 0 {
                0.0
            } else {
                part as f64 / total as f64 * 100.0
            }
        };

        Self {
            total_indicators: total,
            compliant_indicators: compliant,
            automated_indicators: automated,
            compliance_pct: pct(compliant),
            automation_pct: pct(automated),
        }
    }
}

/// The authorization record for one protected service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAuthorization {
    /// Service identifier.
    pub id: ServiceId,
    /// Service name.
    pub name: String,
    /// Authorization status.
    pub status: AuthorizationStatus,
    /// Impact tier.
    pub impact_tier: ImpactTier,
    /// When the service was authorized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_at: Option<DateTime<Utc>>,
    /// When the authorization expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// When the next assessment is due.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_assessment_at: Option<DateTime<Utc>>,
    /// Denormalized compliance counters.
    #[serde(default)]
    pub metrics: ComplianceMetrics,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version.
    #[serde(default)]
    pub version: u64,
}

impl ServiceAuthorization {
    /// Registers a new service in draft.
    #[must_use]
    pub fn new(name: impl Into<String>, impact_tier: ImpactTier, now: DateTime<Utc>) -> Self {
        Self {
            id: ServiceId::generate(),
            name: name.into(),
            status: AuthorizationStatus::Draft,
            impact_tier,
            authorized_at: None,
            expires_at: None,
            next_assessment_at: None,
            metrics: ComplianceMetrics::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn guard(&self, operation: &'static str, required: AuthorizationStatus) -> Result<()> {
        if self.status == required {
            Ok(())
        } else {
            Err(Error::precondition(
                operation,
                self.status.to_string(),
                required.to_string(),
            ))
        }
    }

    /// Marks the authorization package ready for submission.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the record is a draft.
    pub fn mark_ready(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("mark_ready", AuthorizationStatus::Draft)?;
        self.status = AuthorizationStatus::Ready;
        self.updated_at = now;
        Ok(())
    }

    /// Submits the package for authorization.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the record is ready.
    pub fn submit_for_authorization(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("submit_for_authorization", AuthorizationStatus::Ready)?;
        self.status = AuthorizationStatus::InProcess;
        self.updated_at = now;
        Ok(())
    }

    /// Grants authorization.
    ///
    /// The next assessment is due one year after the authorization date.
    /// The expiration date is supplied by the authorizing official.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the record is in process.
    pub fn grant_authorization(
        &mut self,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.guard("grant_authorization", AuthorizationStatus::InProcess)?;
        self.status = AuthorizationStatus::Authorized;
        self.authorized_at = Some(now);
        self.expires_at = expires_at;
        self.next_assessment_at = Some(now + Duration::days(365));
        self.updated_at = now;
        Ok(())
    }

    /// Revokes an active authorization.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the service is authorized.
    pub fn revoke_authorization(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("revoke_authorization", AuthorizationStatus::Authorized)?;
        self.status = AuthorizationStatus::Revoked;
        self.updated_at = now;
        Ok(())
    }

    /// Withdraws a service that has not been authorized.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when the service is authorized or
    /// already terminal.
    pub fn withdraw(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !matches!(
            self.status,
            AuthorizationStatus::Draft | AuthorizationStatus::Ready | AuthorizationStatus::InProcess
        ) {
            return Err(Error::precondition(
                "withdraw",
                self.status.to_string(),
                "draft | ready | in_process",
            ));
        }
        self.status = AuthorizationStatus::Withdrawn;
        self.updated_at = now;
        Ok(())
    }

    /// Overwrites the denormalized counters.
    pub fn apply_metrics(&mut self, metrics: ComplianceMetrics, now: DateTime<Utc>) {
        self.metrics = metrics;
        self.updated_at = now;
    }
}

/// Recomputes a service's denormalized compliance counters.
pub struct AuthorizationRollup {
    indicators: Arc<dyn IndicatorStore>,
    services: Arc<dyn AuthorizationStore>,
}

impl AuthorizationRollup {
    /// Creates a rollup over the given stores.
    #[must_use]
    pub fn new(indicators: Arc<dyn IndicatorStore>, services: Arc<dyn AuthorizationStore>) -> Self {
        Self {
            indicators,
            services,
        }
    }

    /// Recounts compliance metrics for a service and overwrites its
    /// counters atomically.
    ///
    /// Always a full recount over the indicator ledger. Idempotent: two
    /// recounts with no intervening ledger changes yield identical
    /// counters.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown service, or a
    /// version-conflict error if concurrent writers exhaust the CAS
    /// retries.
    #[tracing::instrument(skip(self), fields(service_id = %service_id))]
    pub async fn recount_metrics(&self, service_id: &ServiceId) -> Result<ComplianceMetrics> {
        for _ in 0..=CAS_RETRIES {
            let mut service = self
                .services
                .get_service(service_id)
                .await?
                .ok_or_else(|| Error::not_found("service", service_id))?;

            let records = self.indicators.list_indicators(service_id).await?;
            let metrics = ComplianceMetrics::from_records(&records);
            service.apply_metrics(metrics, Utc::now());

            match self.services.cas_save_service(&service).await? {
                CasResult::Success => return Ok(metrics),
                CasResult::NotFound => {
                    return Err(Error::not_found("service", service_id));
                }
                CasResult::VersionConflict { .. } => {
                    tracing::debug!(service_id = %service_id, "recount lost CAS race, retrying");
                }
            }
        }
        Err(Error::VersionConflict {
            resource_type: "service",
            id: service_id.to_string(),
            expected: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::TierApplicability;

    fn indicator(
        service_id: ServiceId,
        reference: &str,
        compliant: bool,
        automated: bool,
    ) -> IndicatorRecord {
        let now = Utc::now();
        let mut rec = IndicatorRecord::new(
            service_id,
            reference,
            "identity_and_access",
            TierApplicability::default(),
            now,
        );
        if automated {
            rec.record_automated_result(compliant, now);
        } else if compliant {
            rec.record_manual_review(ComplianceStatus::NonCompliant, now)
                .unwrap();
            rec.record_manual_review(ComplianceStatus::Compliant, now)
                .unwrap();
        }
        rec
    }

    #[test]
    fn metrics_from_records_computes_percentages() {
        let service_id = ServiceId::generate();
        let mut records = Vec::new();
        // 6 compliant (4 automated among them), 4 non-compliant manual.
        for i in 0..4 {
            records.push(indicator(service_id, &format!("KSI-IAM-{i:02}"), true, true));
        }
        for i in 4..6 {
            records.push(indicator(service_id, &format!("KSI-IAM-{i:02}"), true, false));
        }
        for i in 6..10 {
            records.push(indicator(service_id, &format!("KSI-IAM-{i:02}"), false, false));
        }

        let metrics = ComplianceMetrics::from_records(&records);
        assert_eq!(metrics.total_indicators, 10);
        assert_eq!(metrics.compliant_indicators, 6);
        assert_eq!(metrics.automated_indicators, 4);
        assert!((metrics.compliance_pct - 60.0).abs() < f64::EPSILON);
        assert!((metrics.automation_pct - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_with_no_records_are_zero() {
        let metrics = ComplianceMetrics::from_records(&[]);
        assert_eq!(metrics.total_indicators, 0);
        assert!((metrics.compliance_pct - 0.0).abs() < f64::EPSILON);
        assert!((metrics.automation_pct - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn not_applicable_records_are_excluded() {
        let service_id = ServiceId::generate();
        let now = Utc::now();
        let mut retired = indicator(service_id, "KSI-PIY-01", true, true);
        retired.mark_not_applicable(now);
        let active = indicator(service_id, "KSI-PIY-02", true, true);

        let metrics = ComplianceMetrics::from_records(&[retired, active]);
        assert_eq!(metrics.total_indicators, 1);
        assert_eq!(metrics.compliant_indicators, 1);
    }

    #[test]
    fn authorization_status_machine() {
        let now = Utc::now();
        let mut svc = ServiceAuthorization::new("payments-api", ImpactTier::Moderate, now);

        // Cannot skip straight to authorization.
        assert!(svc.submit_for_authorization(now).unwrap_err().is_precondition());
        assert!(svc.grant_authorization(None, now).unwrap_err().is_precondition());

        svc.mark_ready(now).unwrap();
        svc.submit_for_authorization(now).unwrap();
        svc.grant_authorization(None, now).unwrap();
        assert_eq!(svc.status, AuthorizationStatus::Authorized);
        assert_eq!(svc.next_assessment_at, Some(now + Duration::days(365)));

        svc.revoke_authorization(now).unwrap();
        assert!(svc.status.is_terminal());
    }

    #[test]
    fn withdraw_only_before_authorization() {
        let now = Utc::now();
        let mut svc = ServiceAuthorization::new("billing", ImpactTier::Low, now);
        svc.mark_ready(now).unwrap();
        svc.submit_for_authorization(now).unwrap();
        svc.grant_authorization(None, now).unwrap();
        assert!(svc.withdraw(now).unwrap_err().is_precondition());
    }
}
