//! Security-incident lifecycle management.
//!
//! An [`Incident`] carries two machines: the response lifecycle
//! (detected through closed) and an independent external-reporting
//! sub-state with a regulation-driven deadline computed from severity at
//! detection time.
//!
//! ```text
//! DETECTED → REPORTED → ANALYZING → CONTAINED → ERADICATING → ERADICATED
//!                                                                 │
//!        CLOSED ← LESSONS_LEARNED ← RECOVERED ← RECOVERING ◄──────┘
//! ```
//!
//! Closing requires the reporting sub-state to be terminal
//! (not-required, final-submitted, or closed). Every state-changing method
//! appends one self-describing entry to the incident timeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use conauth_core::{IncidentId, ServiceId};

use crate::error::{Error, Result};
use crate::timeline::Timeline;

/// Incident severity, which drives the external-reporting deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSeverity {
    /// Severe impact; report within one hour.
    Critical,
    /// Major impact; report within twenty-four hours.
    High,
    /// Limited impact; report within seventy-two hours.
    Moderate,
    /// Minor impact; report within one week.
    Low,
    /// No reportable impact.
    Informational,
}

impl IncidentSeverity {
    /// Returns the reporting deadline offset from detection time, or `None`
    /// when no external report is required.
    ///
    /// The table is fixed regulatory policy, not configuration.
    #[must_use]
    pub fn report_deadline(&self) -> Option<Duration> {
        match self {
            Self::Critical => Some(Duration::hours(1)),
            Self::High => Some(Duration::hours(24)),
            Self::Moderate => Some(Duration::hours(72)),
            Self::Low => Some(Duration::hours(168)),
            Self::Informational => None,
        }
    }
}

impl std::fmt::Display for IncidentSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Moderate => write!(f, "moderate"),
            Self::Low => write!(f, "low"),
            Self::Informational => write!(f, "informational"),
        }
    }
}

/// Closed set of incident categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentCategory {
    /// Credential-harvesting or lure campaigns.
    Phishing,
    /// Malicious software on a covered asset.
    Malware,
    /// Encryption or extortion attack.
    Ransomware,
    /// Availability attack.
    DenialOfService,
    /// Access without authorization.
    UnauthorizedAccess,
    /// Confirmed exposure of covered data.
    DataBreach,
    /// Malicious or negligent insider activity.
    InsiderThreat,
    /// Compromise introduced through a supplier.
    SupplyChain,
    /// Security-relevant misconfiguration.
    Misconfiguration,
    /// Non-attack service failure with security impact.
    ServiceFailure,
}

impl std::fmt::Display for IncidentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Phishing => "phishing",
            Self::Malware => "malware",
            Self::Ransomware => "ransomware",
            Self::DenialOfService => "denial_of_service",
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::DataBreach => "data_breach",
            Self::InsiderThreat => "insider_threat",
            Self::SupplyChain => "supply_chain",
            Self::Misconfiguration => "misconfiguration",
            Self::ServiceFailure => "service_failure",
        };
        write!(f, "{label}")
    }
}

/// Incident response lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Detected, response not yet underway.
    Detected,
    /// Reported to the external authority.
    Reported,
    /// Under active analysis.
    Analyzing,
    /// Threat contained.
    Contained,
    /// Eradication underway.
    Eradicating,
    /// Threat eradicated.
    Eradicated,
    /// Service recovery underway.
    Recovering,
    /// Service recovered.
    Recovered,
    /// Post-incident review complete.
    LessonsLearned,
    /// Closed.
    Closed,
}

impl IncidentStatus {
    /// Returns true if the incident can no longer transition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Detected => "detected",
            Self::Reported => "reported",
            Self::Analyzing => "analyzing",
            Self::Contained => "contained",
            Self::Eradicating => "eradicating",
            Self::Eradicated => "eradicated",
            Self::Recovering => "recovering",
            Self::Recovered => "recovered",
            Self::LessonsLearned => "lessons_learned",
            Self::Closed => "closed",
        };
        write!(f, "{label}")
    }
}

/// External-reporting sub-states, independent of the response lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingStatus {
    /// No external report is required (informational severity).
    NotRequired,
    /// An initial report is owed by the deadline.
    Pending,
    /// Initial report submitted.
    Submitted,
    /// The authority requested an update.
    UpdateRequired,
    /// Update submitted.
    UpdateSubmitted,
    /// Final report submitted.
    FinalSubmitted,
    /// Reporting case closed by the authority.
    Closed,
}

impl ReportingStatus {
    /// Returns true if the reporting obligation no longer blocks incident
    /// closure.
    #[must_use]
    pub const fn permits_close(&self) -> bool {
        matches!(self, Self::NotRequired | Self::FinalSubmitted | Self::Closed)
    }
}

impl std::fmt::Display for ReportingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NotRequired => "not_required",
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::UpdateRequired => "update_required",
            Self::UpdateSubmitted => "update_submitted",
            Self::FinalSubmitted => "final_submitted",
            Self::Closed => "closed",
        };
        write!(f, "{label}")
    }
}

/// Optional milestone timestamps set as the lifecycle advances.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestones {
    /// When the incident was reported externally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
    /// When analysis began.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_started_at: Option<DateTime<Utc>>,
    /// When the threat was contained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contained_at: Option<DateTime<Utc>>,
    /// When the threat was eradicated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eradicated_at: Option<DateTime<Utc>>,
    /// When recovery began.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_started_at: Option<DateTime<Utc>>,
    /// When the service recovered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<DateTime<Utc>>,
    /// When the incident closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Impact assessment fields.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentImpact {
    /// Number of affected users.
    pub affected_users: u64,
    /// Number of affected records.
    pub affected_records: u64,
    /// Whether data left the authorization boundary.
    pub data_exfiltration: bool,
    /// Whether the service was disrupted.
    pub service_disruption: bool,
    /// Disruption duration in minutes, when disrupted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disruption_minutes: Option<u64>,
}

/// Attack-technical detail fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackDetails {
    /// Initial attack vector, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<String>,
    /// Suspected threat actor, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Indicators of compromise observed so far.
    #[serde(default)]
    pub indicators_of_compromise: Vec<String>,
}

/// A security incident aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Unique incident identifier.
    pub id: IncidentId,
    /// Affected service.
    pub service_id: ServiceId,
    /// Short title.
    pub title: String,
    /// Free-text description.
    pub description: String,
    /// Incident category.
    pub category: IncidentCategory,
    /// Current severity.
    pub severity: IncidentSeverity,
    /// Response lifecycle status.
    pub status: IncidentStatus,
    /// When the incident was detected.
    pub detected_at: DateTime<Utc>,
    /// How the incident was detected, e.g. `siem-alert`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_source: Option<String>,
    /// Milestone timestamps.
    #[serde(default)]
    pub milestones: Milestones,
    /// Impact assessment.
    #[serde(default)]
    pub impact: IncidentImpact,
    /// Attack-technical details.
    #[serde(default)]
    pub attack: AttackDetails,
    /// External-reporting sub-state.
    pub reporting_status: ReportingStatus,
    /// External-reporting deadline. Fixed once computed unless severity
    /// changes while reporting is still pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_due_at: Option<DateTime<Utc>>,
    /// Case number assigned by the external authority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_number: Option<String>,
    /// Append-only narrative timeline.
    #[serde(default)]
    pub timeline: Timeline,
    /// Optimistic-concurrency version.
    #[serde(default)]
    pub version: u64,
}

impl Incident {
    /// Opens a new incident at detection time.
    ///
    /// Informational incidents require no external report; all other
    /// severities start with a pending report due at
    /// `detected_at + severity deadline`.
    #[must_use]
    pub fn open(
        service_id: ServiceId,
        title: impl Into<String>,
        description: impl Into<String>,
        category: IncidentCategory,
        severity: IncidentSeverity,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let (reporting_status, report_due_at) = match severity.report_deadline() {
            Some(offset) => (ReportingStatus::Pending, Some(detected_at + offset)),
            None => (ReportingStatus::NotRequired, None),
        };

        let mut incident = Self {
            id: IncidentId::generate(),
            service_id,
            title: title.into(),
            description: description.into(),
            category,
            severity,
            status: IncidentStatus::Detected,
            detected_at,
            detection_source: None,
            milestones: Milestones::default(),
            impact: IncidentImpact::default(),
            attack: AttackDetails::default(),
            reporting_status,
            report_due_at,
            case_number: None,
            timeline: Timeline::new(),
            version: 0,
        };
        incident.record(
            "detected",
            "Incident detected",
            Some(serde_json::json!({
                "severity": severity.to_string(),
                "category": category.to_string(),
            })),
            detected_at,
        );
        incident
    }

    fn record(
        &mut self,
        kind: &str,
        description: &str,
        detail: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        let status = self.status.to_string();
        self.timeline.append(kind, description, detail, now, status);
    }

    fn guard(&self, operation: &'static str, allowed: &[IncidentStatus]) -> Result<()> {
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

    // --- Response lifecycle ---

    /// Begins analysis.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the incident is detected or
    /// reported.
    pub fn begin_analysis(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(
            "begin_analysis",
            &[IncidentStatus::Detected, IncidentStatus::Reported],
        )?;
        self.status = IncidentStatus::Analyzing;
        self.milestones.analysis_started_at = Some(now);
        self.record("analysis_started", "Analysis started", None, now);
        Ok(())
    }

    /// Records containment of the threat.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the incident is detected,
    /// reported, or analyzing.
    pub fn record_containment(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(
            "record_containment",
            &[
                IncidentStatus::Detected,
                IncidentStatus::Reported,
                IncidentStatus::Analyzing,
            ],
        )?;
        self.status = IncidentStatus::Contained;
        self.milestones.contained_at = Some(now);
        self.record("contained", "Threat contained", None, now);
        Ok(())
    }

    /// Begins eradication. Requires containment first.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the incident is contained.
    pub fn begin_eradication(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("begin_eradication", &[IncidentStatus::Contained])?;
        self.status = IncidentStatus::Eradicating;
        self.record("eradication_started", "Eradication started", None, now);
        Ok(())
    }

    /// Records that eradication completed.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless eradication is underway.
    pub fn complete_eradication(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("complete_eradication", &[IncidentStatus::Eradicating])?;
        self.status = IncidentStatus::Eradicated;
        self.milestones.eradicated_at = Some(now);
        self.record("eradicated", "Threat eradicated", None, now);
        Ok(())
    }

    /// Begins service recovery.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the threat is eradicated.
    pub fn begin_recovery(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard("begin_recovery", &[IncidentStatus::Eradicated])?;
        self.status = IncidentStatus::Recovering;
        self.milestones.recovery_started_at = Some(now);
        self.record("recovery_started", "Recovery started", None, now);
        Ok(())
    }

    /// Records that the service recovered.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the threat is eradicated or
    /// recovery is underway.
    pub fn record_recovery(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(
            "record_recovery",
            &[IncidentStatus::Eradicated, IncidentStatus::Recovering],
        )?;
        self.status = IncidentStatus::Recovered;
        self.milestones.recovered_at = Some(now);
        self.record("recovered", "Service recovered", None, now);
        Ok(())
    }

    /// Records completion of the post-incident review.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the service has recovered.
    pub fn record_lessons_learned(
        &mut self,
        summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.guard("record_lessons_learned", &[IncidentStatus::Recovered])?;
        self.status = IncidentStatus::LessonsLearned;
        self.record(
            "lessons_learned",
            "Post-incident review complete",
            Some(serde_json::json!({ "summary": summary.into() })),
            now,
        );
        Ok(())
    }

    /// Closes the incident.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the lifecycle has reached
    /// recovered or lessons-learned AND the reporting sub-state is
    /// not-required, final-submitted, or closed.
    pub fn close(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(
            "close",
            &[IncidentStatus::Recovered, IncidentStatus::LessonsLearned],
        )?;
        if !self.reporting_status.permits_close() {
            return Err(Error::precondition(
                "close",
                format!("reporting {}", self.reporting_status),
                "reporting not_required | final_submitted | closed",
            ));
        }
        self.status = IncidentStatus::Closed;
        self.milestones.closed_at = Some(now);
        self.record("closed", "Incident closed", None, now);
        Ok(())
    }

    /// Revises severity.
    ///
    /// The reporting deadline is recomputed (still relative to the original
    /// detection time) only while the reporting sub-state is pending; an
    /// incident already reported keeps its original deadline even if
    /// severity is revised upward afterward. Raising an informational
    /// incident to a reportable severity while nothing has been submitted
    /// opens a pending reporting obligation.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the incident is closed.
    pub fn update_severity(
        &mut self,
        severity: IncidentSeverity,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::precondition(
                "update_severity",
                self.status.to_string(),
                "any status except closed",
            ));
        }
        let previous = self.severity;
        self.severity = severity;

        match self.reporting_status {
            ReportingStatus::Pending => match severity.report_deadline() {
                Some(offset) => self.report_due_at = Some(self.detected_at + offset),
                None => {
                    self.reporting_status = ReportingStatus::NotRequired;
                    self.report_due_at = None;
                }
            },
            ReportingStatus::NotRequired => {
                if let Some(offset) = severity.report_deadline() {
                    self.reporting_status = ReportingStatus::Pending;
                    self.report_due_at = Some(self.detected_at + offset);
                }
            }
            _ => {
                tracing::debug!(
                    incident_id = %self.id,
                    reporting = %self.reporting_status,
                    "severity revised after report submission, keeping original deadline"
                );
            }
        }

        self.record(
            "severity_updated",
            "Severity revised",
            Some(serde_json::json!({
                "from": previous.to_string(),
                "to": severity.to_string(),
            })),
            now,
        );
        Ok(())
    }

    // --- External reporting sub-machine ---

    /// Submits the initial external report and records the assigned case
    /// number. Also advances a still-detected incident to reported.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless reporting is pending.
    pub fn submit_report(&mut self, case_number: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if self.reporting_status != ReportingStatus::Pending {
            return Err(Error::precondition(
                "submit_report",
                format!("reporting {}", self.reporting_status),
                "reporting pending",
            ));
        }
        self.reporting_status = ReportingStatus::Submitted;
        self.case_number = Some(case_number.into());
        if self.status == IncidentStatus::Detected {
            self.status = IncidentStatus::Reported;
            self.milestones.reported_at = Some(now);
        }
        self.record(
            "report_submitted",
            "External report submitted",
            Some(serde_json::json!({ "caseNumber": self.case_number.clone() })),
            now,
        );
        Ok(())
    }

    /// Records that the authority requested an update.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless a report or update was submitted.
    pub fn require_report_update(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !matches!(
            self.reporting_status,
            ReportingStatus::Submitted | ReportingStatus::UpdateSubmitted
        ) {
            return Err(Error::precondition(
                "require_report_update",
                format!("reporting {}", self.reporting_status),
                "reporting submitted | update_submitted",
            ));
        }
        self.reporting_status = ReportingStatus::UpdateRequired;
        self.record("report_update_required", "Report update requested", None, now);
        Ok(())
    }

    /// Submits a requested update.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless an update is required.
    pub fn submit_report_update(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.reporting_status != ReportingStatus::UpdateRequired {
            return Err(Error::precondition(
                "submit_report_update",
                format!("reporting {}", self.reporting_status),
                "reporting update_required",
            ));
        }
        self.reporting_status = ReportingStatus::UpdateSubmitted;
        self.record("report_update_submitted", "Report update submitted", None, now);
        Ok(())
    }

    /// Submits the final report.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless a report or update was submitted.
    pub fn submit_final_report(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !matches!(
            self.reporting_status,
            ReportingStatus::Submitted | ReportingStatus::UpdateSubmitted
        ) {
            return Err(Error::precondition(
                "submit_final_report",
                format!("reporting {}", self.reporting_status),
                "reporting submitted | update_submitted",
            ));
        }
        self.reporting_status = ReportingStatus::FinalSubmitted;
        self.record("final_report_submitted", "Final report submitted", None, now);
        Ok(())
    }

    /// Records closure of the reporting case by the authority.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the final report was submitted.
    pub fn close_reporting(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.reporting_status != ReportingStatus::FinalSubmitted {
            return Err(Error::precondition(
                "close_reporting",
                format!("reporting {}", self.reporting_status),
                "reporting final_submitted",
            ));
        }
        self.reporting_status = ReportingStatus::Closed;
        self.record("reporting_closed", "Reporting case closed", None, now);
        Ok(())
    }

    // --- Annotations ---

    /// Appends an operator note to the timeline. Always legal.
    pub fn add_note(
        &mut self,
        note: impl Into<String>,
        detail: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        let note = note.into();
        self.record("note", &note, detail, now);
    }

    /// Records an observed indicator of compromise. Duplicates are ignored.
    pub fn add_ioc(&mut self, ioc: impl Into<String>, now: DateTime<Utc>) {
        let ioc = ioc.into();
        if !self.attack.indicators_of_compromise.contains(&ioc) {
            self.record(
                "ioc_observed",
                "Indicator of compromise observed",
                Some(serde_json::json!({ "ioc": ioc.clone() })),
                now,
            );
            self.attack.indicators_of_compromise.push(ioc);
        }
    }

    /// Updates the impact assessment.
    pub fn record_impact(&mut self, impact: IncidentImpact, now: DateTime<Utc>) {
        self.impact = impact;
        self.record(
            "impact_assessed",
            "Impact assessment updated",
            Some(serde_json::json!({
                "affectedUsers": impact.affected_users,
                "affectedRecords": impact.affected_records,
                "dataExfiltration": impact.data_exfiltration,
                "serviceDisruption": impact.service_disruption,
            })),
            now,
        );
    }

    /// Returns the time from detection to containment, when both are known.
    #[must_use]
    pub fn containment_duration(&self) -> Option<Duration> {
        self.milestones
            .contained_at
            .map(|contained| contained - self.detected_at)
    }

    /// Returns the time from detection to closure, when closed.
    #[must_use]
    pub fn resolution_duration(&self) -> Option<Duration> {
        self.milestones
            .closed_at
            .map(|closed| closed - self.detected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn high_incident(detected_at: DateTime<Utc>) -> Incident {
        Incident::open(
            ServiceId::generate(),
            "suspicious sign-ins",
            "Burst of failed logins followed by success from new ASN",
            IncidentCategory::UnauthorizedAccess,
            IncidentSeverity::High,
            detected_at,
        )
    }

    #[test]
    fn deadline_follows_severity_table() {
        let t0 = Utc::now();
        let cases = [
            (IncidentSeverity::Critical, Some(Duration::hours(1))),
            (IncidentSeverity::High, Some(Duration::hours(24))),
            (IncidentSeverity::Moderate, Some(Duration::hours(72))),
            (IncidentSeverity::Low, Some(Duration::hours(168))),
            (IncidentSeverity::Informational, None),
        ];
        for (severity, offset) in cases {
            let incident = Incident::open(
                ServiceId::generate(),
                "t",
                "d",
                IncidentCategory::Malware,
                severity,
                t0,
            );
            match offset {
                Some(offset) => {
                    assert_eq!(incident.reporting_status, ReportingStatus::Pending);
                    assert_eq!(incident.report_due_at, Some(t0 + offset));
                }
                None => {
                    assert_eq!(incident.reporting_status, ReportingStatus::NotRequired);
                    assert_eq!(incident.report_due_at, None);
                }
            }
        }
    }

    #[test]
    fn open_appends_detected_timeline_entry() {
        let incident = high_incident(Utc::now());
        assert_eq!(incident.timeline.len(), 1);
        assert_eq!(incident.timeline.entries()[0].kind, "detected");
        assert_eq!(incident.timeline.entries()[0].status_at, "detected");
    }

    #[test]
    fn milestones_gate_each_other() {
        let t0 = Utc::now();
        let mut incident = high_incident(t0);

        // Eradication requires containment first.
        assert!(incident.begin_eradication(t0).unwrap_err().is_precondition());

        incident.begin_analysis(t0).unwrap();
        incident.record_containment(t0).unwrap();
        incident.begin_eradication(t0).unwrap();
        incident.complete_eradication(t0).unwrap();
        incident.begin_recovery(t0).unwrap();
        incident.record_recovery(t0).unwrap();
        assert_eq!(incident.status, IncidentStatus::Recovered);

        // Analysis cannot restart after containment.
        assert!(incident.begin_analysis(t0).unwrap_err().is_precondition());
    }

    #[test]
    fn close_blocked_until_reporting_terminal() {
        let t0 = Utc::now();
        let mut incident = high_incident(t0);
        incident.record_containment(t0).unwrap();
        incident.begin_eradication(t0).unwrap();
        incident.complete_eradication(t0).unwrap();
        incident.record_recovery(t0).unwrap();

        // Reporting still pending.
        let err = incident.close(t0).unwrap_err();
        assert!(err.is_precondition());

        incident.submit_report("US-CERT-4411", t0).unwrap();
        // Submitted is not terminal either.
        assert!(incident.close(t0).unwrap_err().is_precondition());

        incident.submit_final_report(t0).unwrap();
        incident.close(t0).unwrap();
        assert_eq!(incident.status, IncidentStatus::Closed);
        assert!(incident.milestones.closed_at.is_some());
    }

    #[test]
    fn informational_incident_closes_without_reporting() {
        let t0 = Utc::now();
        let mut incident = Incident::open(
            ServiceId::generate(),
            "t",
            "d",
            IncidentCategory::Misconfiguration,
            IncidentSeverity::Informational,
            t0,
        );
        incident.record_containment(t0).unwrap();
        incident.begin_eradication(t0).unwrap();
        incident.complete_eradication(t0).unwrap();
        incident.record_recovery(t0).unwrap();
        incident.close(t0).unwrap();
        assert_eq!(incident.status, IncidentStatus::Closed);
    }

    #[test]
    fn severity_change_recomputes_deadline_only_while_pending() {
        let t0 = Utc::now();
        let mut incident = high_incident(t0);
        assert_eq!(incident.report_due_at, Some(t0 + Duration::hours(24)));

        // Pending: escalation tightens the deadline, still from detection time.
        incident
            .update_severity(IncidentSeverity::Critical, t0 + Duration::minutes(10))
            .unwrap();
        assert_eq!(incident.report_due_at, Some(t0 + Duration::hours(1)));

        // After submission the original deadline is kept.
        incident.submit_report("CASE-1", t0).unwrap();
        incident
            .update_severity(IncidentSeverity::Low, t0 + Duration::hours(2))
            .unwrap();
        assert_eq!(incident.report_due_at, Some(t0 + Duration::hours(1)));
    }

    #[test]
    fn raising_informational_severity_opens_reporting() {
        let t0 = Utc::now();
        let mut incident = Incident::open(
            ServiceId::generate(),
            "t",
            "d",
            IncidentCategory::ServiceFailure,
            IncidentSeverity::Informational,
            t0,
        );
        incident
            .update_severity(IncidentSeverity::Moderate, t0 + Duration::hours(1))
            .unwrap();
        assert_eq!(incident.reporting_status, ReportingStatus::Pending);
        assert_eq!(incident.report_due_at, Some(t0 + Duration::hours(72)));
    }

    #[test]
    fn downgrade_to_informational_while_pending_clears_obligation() {
        let t0 = Utc::now();
        let mut incident = high_incident(t0);
        incident
            .update_severity(IncidentSeverity::Informational, t0)
            .unwrap();
        assert_eq!(incident.reporting_status, ReportingStatus::NotRequired);
        assert_eq!(incident.report_due_at, None);
    }

    #[test]
    fn reporting_update_cycle() {
        let t0 = Utc::now();
        let mut incident = high_incident(t0);
        incident.submit_report("CASE-9", t0).unwrap();
        incident.require_report_update(t0).unwrap();
        incident.submit_report_update(t0).unwrap();
        incident.submit_final_report(t0).unwrap();
        incident.close_reporting(t0).unwrap();
        assert_eq!(incident.reporting_status, ReportingStatus::Closed);

        // Timeline captured each reporting step plus detection.
        assert_eq!(incident.timeline.len(), 6);
    }

    #[test]
    fn submit_report_marks_incident_reported() {
        let t0 = Utc::now();
        let mut incident = high_incident(t0);
        incident.submit_report("CASE-2", t0).unwrap();
        assert_eq!(incident.status, IncidentStatus::Reported);
        assert_eq!(incident.milestones.reported_at, Some(t0));
        assert_eq!(incident.case_number.as_deref(), Some("CASE-2"));
    }

    #[test]
    fn ioc_append_is_deduplicated() {
        let t0 = Utc::now();
        let mut incident = high_incident(t0);
        incident.add_ioc("185.220.101.3", t0);
        incident.add_ioc("185.220.101.3", t0);
        assert_eq!(incident.attack.indicators_of_compromise.len(), 1);
    }

    #[test]
    fn timeline_is_self_describing() {
        let t0 = Utc::now();
        let mut incident = high_incident(t0);
        incident.begin_analysis(t0).unwrap();
        let last = incident.timeline.last().unwrap();
        assert_eq!(last.kind, "analysis_started");
        assert_eq!(last.status_at, "analyzing");
    }
}
