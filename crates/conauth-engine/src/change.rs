//! Change-control lifecycle management.
//!
//! A [`ChangeRequest`] moves through a two-stage gate that encodes a real
//! compliance ordering constraint: impact analysis must complete before the
//! notification requirement can even be determined, and the notification
//! must resolve (acknowledged or not required) before approval. Skipping a
//! stage is a correctness bug, not a convenience shortcut.
//!
//! ```text
//! DRAFT → SUBMITTED → IMPACT_ANALYSIS → IMPACT_ASSESSED ─┬─► SCN_NOT_REQUIRED ─┐
//!                                                        │                     ├─► APPROVED → IMPLEMENTED
//!                                                        └─► SCN_REQUIRED      │
//!                                                              │               │
//!                                                              ▼               │
//!                                                        SCN_SUBMITTED         │
//!                                                              │               │
//!                                                              ▼               │
//!                                                        SCN_ACKNOWLEDGED ─────┘
//! ```
//!
//! Rejected and withdrawn are terminal side-states reachable from every
//! non-terminal state. Every transition appends one entry to the audit
//! trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conauth_core::{ChangeRequestId, ServiceId};

use crate::error::{Error, Result};
use crate::timeline::Timeline;

/// Classification of a proposed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Infrastructure topology or capacity.
    Infrastructure,
    /// Application code or dependencies.
    Application,
    /// Configuration values.
    Configuration,
    /// Security control implementation.
    SecurityControl,
    /// Operational process.
    Process,
    /// Expedited emergency change.
    Emergency,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Infrastructure => "infrastructure",
            Self::Application => "application",
            Self::Configuration => "configuration",
            Self::SecurityControl => "security_control",
            Self::Process => "process",
            Self::Emergency => "emergency",
        };
        write!(f, "{label}")
    }
}

/// Change lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    /// Being drafted.
    Draft,
    /// Submitted for processing.
    Submitted,
    /// Impact analysis underway.
    ImpactAnalysis,
    /// Impact analysis complete.
    ImpactAssessed,
    /// A significant change notification must be filed.
    ScnRequired,
    /// No notification required.
    ScnNotRequired,
    /// Notification filed, awaiting acknowledgement.
    ScnSubmitted,
    /// Notification acknowledged.
    ScnAcknowledged,
    /// Approved for implementation.
    Approved,
    /// Implemented.
    Implemented,
    /// Rejected.
    Rejected,
    /// Withdrawn by the requester.
    Withdrawn,
}

impl ChangeStatus {
    /// Returns true if the change can no longer transition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Implemented | Self::Rejected | Self::Withdrawn)
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::ImpactAnalysis => "impact_analysis",
            Self::ImpactAssessed => "impact_assessed",
            Self::ScnRequired => "scn_required",
            Self::ScnNotRequired => "scn_not_required",
            Self::ScnSubmitted => "scn_submitted",
            Self::ScnAcknowledged => "scn_acknowledged",
            Self::Approved => "approved",
            Self::Implemented => "implemented",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        };
        write!(f, "{label}")
    }
}

/// Assessed impact level of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    /// Negligible security impact.
    Low,
    /// Bounded security impact.
    Moderate,
    /// Broad security impact.
    High,
}

impl std::fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Direction of the risk change introduced by a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDelta {
    /// Risk posture improves.
    Reduced,
    /// Risk posture is unchanged.
    Unchanged,
    /// Risk posture worsens.
    Increased,
}

impl std::fmt::Display for RiskDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reduced => write!(f, "reduced"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Increased => write!(f, "increased"),
        }
    }
}

/// Completed impact-analysis payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAnalysis {
    /// Assessed impact level.
    pub impact_level: ImpactLevel,
    /// Components the change touches.
    pub affected_components: Vec<String>,
    /// Indicator reference codes affected by the change.
    pub affected_indicators: Vec<String>,
    /// Security control references affected by the change.
    pub affected_controls: Vec<String>,
    /// Risk posture narrative before the change.
    pub risk_before: String,
    /// Risk posture narrative after the change.
    pub risk_after: String,
    /// Direction of the risk change.
    pub risk_delta: RiskDelta,
    /// When the analysis was completed.
    pub analyzed_at: DateTime<Utc>,
}

/// Outcome of the notification-requirement determination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDetermination {
    /// Whether a significant change notification is required.
    pub required: bool,
    /// Notification category, when required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Rationale for the determination.
    pub rationale: String,
    /// When the determination was made.
    pub determined_at: DateTime<Utc>,
}

/// Approval metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    /// Who approved the change.
    pub approved_by: String,
    /// When it was approved.
    pub approved_at: DateTime<Utc>,
}

/// A proposed change to a protected service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    /// Unique change identifier.
    pub id: ChangeRequestId,
    /// Service the change applies to.
    pub service_id: ServiceId,
    /// Short title.
    pub title: String,
    /// Free-text description.
    pub description: String,
    /// Change classification.
    pub change_type: ChangeType,
    /// Lifecycle status.
    pub status: ChangeStatus,
    /// When the change was requested.
    pub requested_at: DateTime<Utc>,
    /// Planned implementation date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_for: Option<DateTime<Utc>>,
    /// Actual implementation date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implemented_at: Option<DateTime<Utc>>,
    /// Completed impact analysis, once recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_analysis: Option<ImpactAnalysis>,
    /// Notification determination, once made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationDetermination>,
    /// When the notification was filed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scn_submitted_at: Option<DateTime<Utc>>,
    /// When the notification was acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scn_acknowledged_at: Option<DateTime<Utc>>,
    /// Whether a security review gates approval.
    pub security_review_required: bool,
    /// When the security review completed, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_review_completed_at: Option<DateTime<Utc>>,
    /// Approval metadata, once approved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,
    /// Append-only audit trail.
    #[serde(default)]
    pub audit_trail: Timeline,
    /// Optimistic-concurrency version.
    #[serde(default)]
    pub version: u64,
}

impl ChangeRequest {
    /// Opens a new change request in draft.
    ///
    /// Security-control and emergency changes always require a security
    /// review before approval; other types may have one required later.
    #[must_use]
    pub fn open(
        service_id: ServiceId,
        title: impl Into<String>,
        description: impl Into<String>,
        change_type: ChangeType,
        now: DateTime<Utc>,
    ) -> Self {
        let security_review_required = matches!(
            change_type,
            ChangeType::SecurityControl | ChangeType::Emergency
        );
        let mut change = Self {
            id: ChangeRequestId::generate(),
            service_id,
            title: title.into(),
            description: description.into(),
            change_type,
            status: ChangeStatus::Draft,
            requested_at: now,
            planned_for: None,
            implemented_at: None,
            impact_analysis: None,
            notification: None,
            scn_submitted_at: None,
            scn_acknowledged_at: None,
            security_review_required,
            security_review_completed_at: None,
            approval: None,
            audit_trail: Timeline::new(),
            version: 0,
        };
        change.record(
            "drafted",
            "Change request drafted",
            Some(serde_json::json!({ "changeType": change_type.to_string() })),
            now,
        );
        change
    }

    fn record(
        &mut self,
        kind: &str,
        description: &str,
        detail: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        let status = self.status.to_string();
        self.audit_trail
            .append(kind, description, detail, now, status);
    }

    fn guard(&self, operation: &'static str, allowed: &[ChangeStatus]) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(Error::precondition(
                operation,
                self.status.to_string(),
                allowed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" | "),
            ))
        }
    }

    /// Submits the change for processing.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the change is a draft.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("submit", &[ChangeStatus::Draft])?;
        self.status = ChangeStatus::Submitted;
        self.record("submitted", "Change request submitted", None, now);
        Ok(())
    }

    /// Begins impact analysis.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the change was submitted.
    pub fn begin_impact_analysis(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("begin_impact_analysis", &[ChangeStatus::Submitted])?;
        self.status = ChangeStatus::ImpactAnalysis;
        self.record("impact_analysis_started", "Impact analysis started", None, now);
        Ok(())
    }

    /// Records the completed impact analysis and advances to assessed.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless impact analysis is underway.
    pub fn complete_impact_analysis(
        &mut self,
        analysis: ImpactAnalysis,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.guard("complete_impact_analysis", &[ChangeStatus::ImpactAnalysis])?;
        self.status = ChangeStatus::ImpactAssessed;
        self.record(
            "impact_assessed",
            "Impact analysis complete",
            Some(serde_json::json!({
                "impactLevel": analysis.impact_level.to_string(),
                "riskDelta": analysis.risk_delta.to_string(),
                "affectedIndicators": analysis.affected_indicators.clone(),
            })),
            now,
        );
        self.impact_analysis = Some(analysis);
        Ok(())
    }

    /// Determines whether a significant change notification is required and
    /// branches the lifecycle accordingly.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the impact has been assessed, or
    /// a validation error when a required notification has no category.
    pub fn determine_notification(
        &mut self,
        required: bool,
        category: Option<String>,
        rationale: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.guard("determine_notification", &[ChangeStatus::ImpactAssessed])?;
        if required && category.is_none() {
            return Err(Error::validation(
                "a required notification must carry a category",
            ));
        }
        self.status = if required {
            ChangeStatus::ScnRequired
        } else {
            ChangeStatus::ScnNotRequired
        };
        self.record(
            "notification_determined",
            "Notification requirement determined",
            Some(serde_json::json!({ "required": required, "category": category.clone() })),
            now,
        );
        self.notification = Some(NotificationDetermination {
            required,
            category,
            rationale: rationale.into(),
            determined_at: now,
        });
        Ok(())
    }

    /// Files the significant change notification.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless a notification is required and
    /// unfiled.
    pub fn submit_notification(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("submit_notification", &[ChangeStatus::ScnRequired])?;
        self.status = ChangeStatus::ScnSubmitted;
        self.scn_submitted_at = Some(now);
        self.record("notification_submitted", "Notification submitted", None, now);
        Ok(())
    }

    /// Records acknowledgement of the filed notification.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the notification was filed.
    pub fn acknowledge_notification(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("acknowledge_notification", &[ChangeStatus::ScnSubmitted])?;
        self.status = ChangeStatus::ScnAcknowledged;
        self.scn_acknowledged_at = Some(now);
        self.record(
            "notification_acknowledged",
            "Notification acknowledged",
            None,
            now,
        );
        Ok(())
    }

    /// Flags that approval requires a completed security review.
    pub fn require_security_review(&mut self, now: DateTime<Utc>) {
        if !self.security_review_required {
            self.security_review_required = true;
            self.record("security_review_required", "Security review required", None, now);
        }
    }

    /// Records completion of the required security review.
    pub fn complete_security_review(&mut self, reviewer: impl Into<String>, now: DateTime<Utc>) {
        self.security_review_completed_at = Some(now);
        self.record(
            "security_review_completed",
            "Security review completed",
            Some(serde_json::json!({ "reviewer": reviewer.into() })),
            now,
        );
    }

    /// Approves the change.
    ///
    /// Legal from scn-not-required, scn-acknowledged, or impact-assessed
    /// (the last covers changes low-impact enough to skip formal
    /// notification but still needing sign-off) — and only once any
    /// required security review is complete.
    ///
    /// # Errors
    ///
    /// Returns a precondition error from any other status, or when a
    /// required security review is incomplete.
    pub fn approve(&mut self, approved_by: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.guard(
            "approve",
            &[
                ChangeStatus::ScnNotRequired,
                ChangeStatus::ScnAcknowledged,
                ChangeStatus::ImpactAssessed,
            ],
        )?;
        if self.security_review_required && self.security_review_completed_at.is_none() {
            return Err(Error::precondition(
                "approve",
                "security review incomplete",
                "security review complete",
            ));
        }
        let approved_by = approved_by.into();
        self.status = ChangeStatus::Approved;
        self.record(
            "approved",
            "Change approved",
            Some(serde_json::json!({ "approvedBy": approved_by.clone() })),
            now,
        );
        self.approval = Some(Approval {
            approved_by,
            approved_at: now,
        });
        Ok(())
    }

    /// Records implementation of an approved change.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the change is approved.
    pub fn mark_implemented(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("mark_implemented", &[ChangeStatus::Approved])?;
        self.status = ChangeStatus::Implemented;
        self.implemented_at = Some(now);
        self.record("implemented", "Change implemented", None, now);
        Ok(())
    }

    /// Rejects the change.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the change already reached a
    /// terminal state.
    pub fn reject(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::precondition(
                "reject",
                self.status.to_string(),
                "any non-terminal status",
            ));
        }
        self.status = ChangeStatus::Rejected;
        self.record(
            "rejected",
            "Change rejected",
            Some(serde_json::json!({ "reason": reason.into() })),
            now,
        );
        Ok(())
    }

    /// Withdraws the change.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the change already reached a
    /// terminal state.
    pub fn withdraw(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::precondition(
                "withdraw",
                self.status.to_string(),
                "any non-terminal status",
            ));
        }
        self.status = ChangeStatus::Withdrawn;
        self.record(
            "withdrawn",
            "Change withdrawn",
            Some(serde_json::json!({ "reason": reason.into() })),
            now,
        );
        Ok(())
    }

    /// Appends an operator note to the audit trail. Always legal.
    pub fn add_note(
        &mut self,
        note: impl Into<String>,
        detail: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        let note = note.into();
        self.record("note", &note, detail, now);
    }

    /// Returns true if the change is waiting on approval.
    #[must_use]
    pub const fn is_pending_approval(&self) -> bool {
        matches!(
            self.status,
            ChangeStatus::ScnNotRequired
                | ChangeStatus::ScnAcknowledged
                | ChangeStatus::ScnSubmitted
                | ChangeStatus::ScnRequired
                | ChangeStatus::ImpactAssessed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn low_impact_analysis(now: DateTime<Utc>) -> ImpactAnalysis {
        ImpactAnalysis {
            impact_level: ImpactLevel::Low,
            affected_components: vec!["api-gateway".into()],
            affected_indicators: vec!["KSI-CMT-01".into()],
            affected_controls: vec!["CM-3".into()],
            risk_before: "Single AZ deployment".into(),
            risk_after: "Multi AZ deployment".into(),
            risk_delta: RiskDelta::Reduced,
            analyzed_at: now,
        }
    }

    fn change(now: DateTime<Utc>) -> ChangeRequest {
        ChangeRequest::open(
            ServiceId::generate(),
            "enable multi-AZ",
            "Spread the API tier across availability zones",
            ChangeType::Infrastructure,
            now,
        )
    }

    #[test]
    fn approve_before_analysis_fails() {
        let now = Utc::now();
        let mut cr = change(now);
        assert!(cr.approve("ciso", now).unwrap_err().is_precondition());

        cr.submit(now).unwrap();
        assert!(cr.approve("ciso", now).unwrap_err().is_precondition());
    }

    #[test]
    fn happy_path_without_notification() {
        let now = Utc::now();
        let mut cr = change(now);
        cr.submit(now).unwrap();
        cr.begin_impact_analysis(now).unwrap();
        cr.complete_impact_analysis(low_impact_analysis(now), now)
            .unwrap();
        cr.determine_notification(false, None, "low impact, no boundary change", now)
            .unwrap();
        assert_eq!(cr.status, ChangeStatus::ScnNotRequired);
        cr.approve("ciso", now).unwrap();
        assert_eq!(cr.status, ChangeStatus::Approved);
        cr.mark_implemented(now).unwrap();
        assert_eq!(cr.status, ChangeStatus::Implemented);
    }

    #[test]
    fn notification_branch_gates_approval() {
        let now = Utc::now();
        let mut cr = change(now);
        cr.submit(now).unwrap();
        cr.begin_impact_analysis(now).unwrap();
        cr.complete_impact_analysis(low_impact_analysis(now), now)
            .unwrap();
        cr.determine_notification(true, Some("boundary_change".into()), "new region", now)
            .unwrap();
        assert_eq!(cr.status, ChangeStatus::ScnRequired);

        // Approval is blocked until the notification is acknowledged.
        assert!(cr.approve("ciso", now).unwrap_err().is_precondition());

        cr.submit_notification(now).unwrap();
        assert!(cr.approve("ciso", now).unwrap_err().is_precondition());

        cr.acknowledge_notification(now).unwrap();
        cr.approve("ciso", now).unwrap();
        assert_eq!(cr.approval.as_ref().unwrap().approved_by, "ciso");
    }

    #[test]
    fn required_notification_needs_category() {
        let now = Utc::now();
        let mut cr = change(now);
        cr.submit(now).unwrap();
        cr.begin_impact_analysis(now).unwrap();
        cr.complete_impact_analysis(low_impact_analysis(now), now)
            .unwrap();
        let err = cr
            .determine_notification(true, None, "missing category", now)
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn security_review_blocks_approval_in_every_eligible_status() {
        let now = Utc::now();
        let mut cr = ChangeRequest::open(
            ServiceId::generate(),
            "rotate signing keys",
            "Replace the KMS signing key",
            ChangeType::SecurityControl,
            now,
        );
        assert!(cr.security_review_required);

        cr.submit(now).unwrap();
        cr.begin_impact_analysis(now).unwrap();
        cr.complete_impact_analysis(low_impact_analysis(now), now)
            .unwrap();

        // Approval from impact-assessed: blocked by the open review.
        assert!(cr.approve("ciso", now).unwrap_err().is_precondition());

        cr.determine_notification(false, None, "no external impact", now)
            .unwrap();
        assert!(cr.approve("ciso", now).unwrap_err().is_precondition());

        cr.complete_security_review("secops", now);
        cr.approve("ciso", now).unwrap();
        assert_eq!(cr.status, ChangeStatus::Approved);
    }

    #[test]
    fn approve_directly_from_impact_assessed() {
        let now = Utc::now();
        let mut cr = change(now);
        cr.submit(now).unwrap();
        cr.begin_impact_analysis(now).unwrap();
        cr.complete_impact_analysis(low_impact_analysis(now), now)
            .unwrap();
        // Low-impact changes may be signed off without a formal determination.
        cr.approve("ciso", now).unwrap();
        assert_eq!(cr.status, ChangeStatus::Approved);
    }

    #[test]
    fn terminal_states_are_final() {
        let now = Utc::now();
        let mut cr = change(now);
        cr.submit(now).unwrap();
        cr.withdraw("superseded", now).unwrap();
        assert!(cr.reject("x", now).unwrap_err().is_precondition());
        assert!(cr.submit(now).unwrap_err().is_precondition());
    }

    #[test]
    fn audit_trail_captures_every_transition() {
        let now = Utc::now();
        let mut cr = change(now);
        cr.submit(now).unwrap();
        cr.begin_impact_analysis(now).unwrap();
        cr.complete_impact_analysis(low_impact_analysis(now), now)
            .unwrap();
        // drafted + submitted + analysis started + assessed
        assert_eq!(cr.audit_trail.len(), 4);
        let last = cr.audit_trail.last().unwrap();
        assert_eq!(last.kind, "impact_assessed");
        assert_eq!(last.status_at, "impact_assessed");
    }
}
