//! Indicator ledger: one compliance record per (service, indicator) pair.
//!
//! Records are created when a service is scoped to an indicator catalogue,
//! mutated by manual review or by the validation scheduler, and never
//! physically deleted — retirement is expressed by marking the record
//! not-applicable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conauth_core::{EvidenceId, IndicatorId, ServiceId};

use crate::error::{Error, Result};

/// Implementation progress for one indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationStatus {
    /// No implementation work has begun.
    NotStarted,
    /// Implementation is underway.
    InProgress,
    /// Fully implemented.
    Implemented,
    /// The indicator does not apply to this service.
    NotApplicable,
    /// Partially implemented.
    Partial,
}

impl std::fmt::Display for ImplementationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Implemented => write!(f, "implemented"),
            Self::NotApplicable => write!(f, "not_applicable"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// Compliance determination for one indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    /// The indicator's requirement is met.
    Compliant,
    /// The indicator's requirement is not met.
    NonCompliant,
    /// Determination pending.
    Pending,
    /// No determination possible.
    Unknown,
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compliant => write!(f, "compliant"),
            Self::NonCompliant => write!(f, "non_compliant"),
            Self::Pending => write!(f, "pending"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// How an indicator is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMethod {
    /// No validation of any kind has been performed.
    NotValidated,
    /// Validated by manual evidence review only.
    Manual,
    /// Validated by automated checks only.
    Automated,
    /// Validated by both manual review and automated checks.
    Hybrid,
}

impl ValidationMethod {
    /// Returns true if automated validation contributes to this indicator.
    #[must_use]
    pub const fn is_automated(&self) -> bool {
        matches!(self, Self::Automated | Self::Hybrid)
    }
}

impl std::fmt::Display for ValidationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotValidated => write!(f, "not_validated"),
            Self::Manual => write!(f, "manual"),
            Self::Automated => write!(f, "automated"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Applicability of an indicator per service impact tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierApplicability {
    /// Applies at the low impact tier.
    pub low: bool,
    /// Applies at the moderate impact tier.
    pub moderate: bool,
    /// Applies at the high impact tier.
    pub high: bool,
}

impl Default for TierApplicability {
    fn default() -> Self {
        Self {
            low: true,
            moderate: true,
            high: true,
        }
    }
}

/// One Key Security Indicator tracked for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorRecord {
    /// Unique record identifier.
    pub id: IndicatorId,
    /// Service this record belongs to.
    pub service_id: ServiceId,
    /// Catalogue reference code, e.g. `KSI-CNA-01`.
    pub indicator_ref: String,
    /// Catalogue category, e.g. `cloud_native_architecture`.
    pub category: String,
    /// Which impact tiers the indicator applies at.
    pub applicability: TierApplicability,
    /// Implementation progress.
    pub implementation_status: ImplementationStatus,
    /// Current compliance determination.
    pub compliance_status: ComplianceStatus,
    /// How the indicator is validated.
    pub validation_method: ValidationMethod,
    /// Share of the indicator's validation that is automated, 0-100.
    pub automation_pct: u8,
    /// When the indicator was last validated, by any method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<DateTime<Utc>>,
    /// Outcome of the most recent validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validation_passed: Option<bool>,
    /// First time any validation passed. Set once, never cleared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_passed_at: Option<DateTime<Utc>>,
    /// Attached evidence identifiers.
    #[serde(default)]
    pub evidence_ids: Vec<EvidenceId>,
    /// Remediation plan identifier, if a plan is open for this indicator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_plan_id: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version.
    #[serde(default)]
    pub version: u64,
}

impl IndicatorRecord {
    /// Creates a new record in the pending/not-validated state.
    #[must_use]
    pub fn new(
        service_id: ServiceId,
        indicator_ref: impl Into<String>,
        category: impl Into<String>,
        applicability: TierApplicability,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: IndicatorId::generate(),
            service_id,
            indicator_ref: indicator_ref.into(),
            category: category.into(),
            applicability,
            implementation_status: ImplementationStatus::NotStarted,
            compliance_status: ComplianceStatus::Pending,
            validation_method: ValidationMethod::NotValidated,
            automation_pct: 0,
            last_validated_at: None,
            last_validation_passed: None,
            first_passed_at: None,
            evidence_ids: Vec::new(),
            remediation_plan_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Records a manual compliance review.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the review would mark the record
    /// compliant while it has never been validated: compliance requires at
    /// least one validation of any kind on record.
    pub fn record_manual_review(
        &mut self,
        status: ComplianceStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if status == ComplianceStatus::Compliant
            && self.validation_method == ValidationMethod::NotValidated
            && self.first_passed_at.is_none()
        {
            return Err(Error::validation(format!(
                "indicator {} cannot be marked compliant without any recorded validation",
                self.indicator_ref
            )));
        }

        self.compliance_status = status;
        self.last_validated_at = Some(now);
        self.last_validation_passed = Some(status == ComplianceStatus::Compliant);
        if status == ComplianceStatus::Compliant && self.first_passed_at.is_none() {
            self.first_passed_at = Some(now);
        }
        self.validation_method = match self.validation_method {
            ValidationMethod::NotValidated | ValidationMethod::Manual => ValidationMethod::Manual,
            ValidationMethod::Automated | ValidationMethod::Hybrid => ValidationMethod::Hybrid,
        };
        self.updated_at = now;
        Ok(())
    }

    /// Records the outcome of an automated check against this indicator.
    ///
    /// Called by the validation scheduler; always legal.
    pub fn record_automated_result(&mut self, passed: bool, now: DateTime<Utc>) {
        self.compliance_status = if passed {
            ComplianceStatus::Compliant
        } else {
            ComplianceStatus::NonCompliant
        };
        self.last_validated_at = Some(now);
        self.last_validation_passed = Some(passed);
        if passed && self.first_passed_at.is_none() {
            self.first_passed_at = Some(now);
        }
        self.validation_method = match self.validation_method {
            ValidationMethod::NotValidated | ValidationMethod::Automated => {
                ValidationMethod::Automated
            }
            ValidationMethod::Manual | ValidationMethod::Hybrid => ValidationMethod::Hybrid,
        };
        self.updated_at = now;
    }

    /// Updates implementation progress.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when the record is already marked
    /// not-applicable; use [`Self::mark_not_applicable`] semantics — a
    /// retired record stays retired.
    pub fn set_implementation_status(
        &mut self,
        status: ImplementationStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.implementation_status == ImplementationStatus::NotApplicable {
            return Err(Error::precondition(
                "set_implementation_status",
                self.implementation_status.to_string(),
                "any status except not_applicable",
            ));
        }
        self.implementation_status = status;
        self.updated_at = now;
        Ok(())
    }

    /// Retires the record. Records are never deleted.
    pub fn mark_not_applicable(&mut self, now: DateTime<Utc>) {
        self.implementation_status = ImplementationStatus::NotApplicable;
        self.updated_at = now;
    }

    /// Attaches a piece of evidence. Duplicate attachments are ignored.
    pub fn attach_evidence(&mut self, evidence_id: EvidenceId, now: DateTime<Utc>) {
        if !self.evidence_ids.contains(&evidence_id) {
            self.evidence_ids.push(evidence_id);
            self.updated_at = now;
        }
    }

    /// Detaches a piece of evidence if attached.
    pub fn detach_evidence(&mut self, evidence_id: &EvidenceId, now: DateTime<Utc>) {
        let before = self.evidence_ids.len();
        self.evidence_ids.retain(|id| id != evidence_id);
        if self.evidence_ids.len() != before {
            self.updated_at = now;
        }
    }

    /// Links a remediation plan to this indicator.
    pub fn set_remediation_plan(&mut self, plan_id: impl Into<String>, now: DateTime<Utc>) {
        self.remediation_plan_id = Some(plan_id.into());
        self.updated_at = now;
    }

    /// Returns true if automated validation contributes to this indicator.
    #[must_use]
    pub const fn is_automated(&self) -> bool {
        self.validation_method.is_automated()
    }

    /// Returns true if this record counts toward rollup metrics.
    ///
    /// Not-applicable records stay in the ledger but are excluded from
    /// compliance and automation percentages.
    #[must_use]
    pub fn counts_toward_rollup(&self) -> bool {
        self.implementation_status != ImplementationStatus::NotApplicable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> IndicatorRecord {
        IndicatorRecord::new(
            ServiceId::generate(),
            "KSI-CNA-01",
            "cloud_native_architecture",
            TierApplicability::default(),
            Utc::now(),
        )
    }

    #[test]
    fn new_record_is_pending_and_unvalidated() {
        let rec = record();
        assert_eq!(rec.compliance_status, ComplianceStatus::Pending);
        assert_eq!(rec.validation_method, ValidationMethod::NotValidated);
        assert!(!rec.is_automated());
    }

    #[test]
    fn manual_compliant_requires_prior_validation() {
        let mut rec = record();
        let err = rec
            .record_manual_review(ComplianceStatus::Compliant, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        // Non-compliant reviews are always legal and establish manual validation.
        rec.record_manual_review(ComplianceStatus::NonCompliant, Utc::now())
            .unwrap();
        assert_eq!(rec.validation_method, ValidationMethod::Manual);

        // Once validated, a compliant review is accepted.
        rec.record_manual_review(ComplianceStatus::Compliant, Utc::now())
            .unwrap();
        assert_eq!(rec.compliance_status, ComplianceStatus::Compliant);
    }

    #[test]
    fn automated_result_sets_method_and_status() {
        let mut rec = record();
        rec.record_automated_result(true, Utc::now());
        assert_eq!(rec.compliance_status, ComplianceStatus::Compliant);
        assert_eq!(rec.validation_method, ValidationMethod::Automated);
        assert!(rec.first_passed_at.is_some());

        // A manual review on top of automated validation makes it hybrid.
        rec.record_manual_review(ComplianceStatus::Compliant, Utc::now())
            .unwrap();
        assert_eq!(rec.validation_method, ValidationMethod::Hybrid);
    }

    #[test]
    fn first_passed_at_is_sticky() {
        let mut rec = record();
        let t1 = Utc::now();
        rec.record_automated_result(true, t1);
        rec.record_automated_result(false, Utc::now());
        rec.record_automated_result(true, Utc::now());
        assert_eq!(rec.first_passed_at, Some(t1));
    }

    #[test]
    fn not_applicable_is_terminal_for_implementation() {
        let mut rec = record();
        rec.mark_not_applicable(Utc::now());
        assert!(!rec.counts_toward_rollup());
        let err = rec
            .set_implementation_status(ImplementationStatus::InProgress, Utc::now())
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn evidence_attach_is_idempotent() {
        let mut rec = record();
        let ev = EvidenceId::generate();
        rec.attach_evidence(ev, Utc::now());
        rec.attach_evidence(ev, Utc::now());
        assert_eq!(rec.evidence_ids.len(), 1);
        rec.detach_evidence(&ev, Utc::now());
        assert!(rec.evidence_ids.is_empty());
    }
}
