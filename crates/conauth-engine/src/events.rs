//! Outbound events for side-effecting transitions.
//!
//! Every side-effecting transition in the engine produces a
//! `CloudEvents`-compatible envelope pushed to an [`crate::outbox::EventSink`].
//! Emission is decoupled from delivery: the notification sink consumes the
//! envelopes on its own schedule, and delivery failure never rolls back the
//! state transition that produced the event.
//!
//! ## Envelope attributes
//!
//! - `id`: Unique event identifier (ULID, lexicographically sortable)
//! - `source`: Event origin URI (`/conauth/engine/{service}` or
//!   `/conauth/engine/global`)
//! - `specversion`: `CloudEvents` spec version ("1.0")
//! - `type`: Event type (`conauth.engine.{event_name}`)
//! - `time`: Event timestamp
//! - `idempotency_key`: Deterministic key for the same logical event, so
//!   consumers can deduplicate redelivery

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use conauth_core::{ChangeRequestId, CheckId, ExecutionId, IncidentId, ReportId, ServiceId};

use crate::check::{ExecutionStatus, RuleStatus};
use crate::incident::IncidentSeverity;

/// `CloudEvents`-compatible envelope for engine events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique event identifier (ULID).
    pub id: String,
    /// Event origin URI.
    pub source: String,
    /// `CloudEvents` specification version.
    pub specversion: String,
    /// Event type, e.g. `conauth.engine.incident_contained`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Content type of the data field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    /// Service scope, when the event is service-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    /// Idempotency key for deduplication.
    pub idempotency_key: String,
    /// Event payload.
    pub data: EngineEventData,
}

impl EventEnvelope {
    /// Creates a new envelope with auto-generated ID and timestamp.
    #[must_use]
    pub fn new(service_id: Option<ServiceId>, data: EngineEventData) -> Self {
        let scope = service_id
            .as_ref()
            .map_or_else(|| "global".to_string(), ToString::to_string);
        let id = Ulid::new().to_string();
        let idempotency_key = data.idempotency_key();

        Self {
            id,
            source: format!("/conauth/engine/{scope}"),
            specversion: "1.0".into(),
            event_type: format!("conauth.engine.{}", data.event_name()),
            time: Some(Utc::now()),
            datacontenttype: Some("application/json".into()),
            service_id,
            idempotency_key,
            data,
        }
    }
}

/// Typed payloads for every side-effecting transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEventData {
    /// A rule was activated and scheduled.
    RuleActivated {
        /// The activated rule.
        check_id: CheckId,
        /// First due time, absent for on-demand rules.
        #[serde(skip_serializing_if = "Option::is_none")]
        next_due_at: Option<DateTime<Utc>>,
    },
    /// A rule's operational status changed outside normal activation.
    RuleStatusChanged {
        /// The rule whose status changed.
        check_id: CheckId,
        /// Previous status.
        from: RuleStatus,
        /// New status.
        to: RuleStatus,
        /// Consecutive failures at the time of the change.
        consecutive_failures: u32,
    },
    /// An execution outcome was recorded.
    ExecutionRecorded {
        /// The executed rule.
        check_id: CheckId,
        /// The new execution record.
        execution_id: ExecutionId,
        /// Outcome status.
        status: ExecutionStatus,
        /// Convenience pass flag.
        passed: bool,
    },
    /// Incident analysis started.
    IncidentAnalysisStarted {
        /// The incident.
        incident_id: IncidentId,
        /// Severity at the time.
        severity: IncidentSeverity,
    },
    /// Incident threat contained.
    IncidentContained {
        /// The incident.
        incident_id: IncidentId,
        /// When containment was recorded.
        contained_at: DateTime<Utc>,
    },
    /// Incident threat eradicated.
    IncidentEradicated {
        /// The incident.
        incident_id: IncidentId,
    },
    /// Incident service recovered.
    IncidentRecovered {
        /// The incident.
        incident_id: IncidentId,
    },
    /// Incident closed.
    IncidentClosed {
        /// The incident.
        incident_id: IncidentId,
        /// When it closed.
        closed_at: DateTime<Utc>,
    },
    /// External incident report submitted.
    IncidentReportSubmitted {
        /// The incident.
        incident_id: IncidentId,
        /// Case number assigned by the authority.
        case_number: String,
    },
    /// Significant change notification submitted.
    ChangeNotificationSubmitted {
        /// The change request.
        change_id: ChangeRequestId,
    },
    /// Change approved.
    ChangeApproved {
        /// The change request.
        change_id: ChangeRequestId,
        /// Who approved it.
        approved_by: String,
    },
    /// Change implemented.
    ChangeImplemented {
        /// The change request.
        change_id: ChangeRequestId,
    },
    /// A quarterly report was generated.
    ReportGenerated {
        /// The report.
        report_id: ReportId,
        /// Reporting year.
        year: i32,
        /// Reporting quarter, 1-4.
        quarter: u8,
    },
    /// A quarterly report was submitted and frozen.
    ReportSubmitted {
        /// The report.
        report_id: ReportId,
    },
}

impl EngineEventData {
    /// Returns the event name used in the envelope `type` attribute.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::RuleActivated { .. } => "rule_activated",
            Self::RuleStatusChanged { .. } => "rule_status_changed",
            Self::ExecutionRecorded { .. } => "execution_recorded",
            Self::IncidentAnalysisStarted { .. } => "incident_analysis_started",
            Self::IncidentContained { .. } => "incident_contained",
            Self::IncidentEradicated { .. } => "incident_eradicated",
            Self::IncidentRecovered { .. } => "incident_recovered",
            Self::IncidentClosed { .. } => "incident_closed",
            Self::IncidentReportSubmitted { .. } => "incident_report_submitted",
            Self::ChangeNotificationSubmitted { .. } => "change_notification_submitted",
            Self::ChangeApproved { .. } => "change_approved",
            Self::ChangeImplemented { .. } => "change_implemented",
            Self::ReportGenerated { .. } => "report_generated",
            Self::ReportSubmitted { .. } => "report_submitted",
        }
    }

    /// Returns a deterministic idempotency key for the logical event.
    ///
    /// Different envelope instances with the same key represent the same
    /// logical event.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        match self {
            Self::RuleActivated { check_id, .. } => format!("rule:{check_id}:activated"),
            Self::RuleStatusChanged {
                check_id, from, to, ..
            } => format!("rule:{check_id}:{from}->{to}"),
            Self::ExecutionRecorded { execution_id, .. } => format!("execution:{execution_id}"),
            Self::IncidentAnalysisStarted { incident_id, .. } => {
                format!("incident:{incident_id}:analysis_started")
            }
            Self::IncidentContained { incident_id, .. } => {
                format!("incident:{incident_id}:contained")
            }
            Self::IncidentEradicated { incident_id } => {
                format!("incident:{incident_id}:eradicated")
            }
            Self::IncidentRecovered { incident_id } => {
                format!("incident:{incident_id}:recovered")
            }
            Self::IncidentClosed { incident_id, .. } => format!("incident:{incident_id}:closed"),
            Self::IncidentReportSubmitted { incident_id, .. } => {
                format!("incident:{incident_id}:report_submitted")
            }
            Self::ChangeNotificationSubmitted { change_id } => {
                format!("change:{change_id}:notification_submitted")
            }
            Self::ChangeApproved { change_id, .. } => format!("change:{change_id}:approved"),
            Self::ChangeImplemented { change_id } => format!("change:{change_id}:implemented"),
            Self::ReportGenerated { report_id, .. } => format!("report:{report_id}:generated"),
            Self::ReportSubmitted { report_id } => format!("report:{report_id}:submitted"),
        }
    }
}
