//! Pluggable storage for engine state.
//!
//! Each aggregate type has a narrow store trait; the engine receives its
//! stores at construction and never touches ambient global state.
//!
//! ## Design Principles
//!
//! - **CAS semantics**: Mutable aggregates are saved with compare-and-swap
//!   on a version counter, so two concurrent transitions on the same
//!   aggregate cannot both succeed from the same precondition
//! - **Append-only history**: Execution records are inserted, never updated
//! - **Testability**: In-memory implementation for tests and development

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conauth_core::{
    ChangeRequestId, CheckId, EvidenceId, IncidentId, IndicatorId, ReportId, ServiceId,
};

use crate::change::ChangeRequest;
use crate::check::{CheckDefinition, ExecutionRecord};
use crate::error::Result;
use crate::incident::Incident;
use crate::indicator::IndicatorRecord;
use crate::report::AuthorizationReport;
use crate::rollup::ServiceAuthorization;

/// Result of a compare-and-swap save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The save was applied; the stored version is now one higher.
    Success,
    /// The aggregate does not exist.
    NotFound,
    /// The stored version did not match the caller's copy.
    VersionConflict {
        /// The version actually stored.
        actual: u64,
    },
}

impl CasResult {
    /// Returns true if the save was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Storage for indicator records.
#[async_trait]
pub trait IndicatorStore: Send + Sync {
    /// Gets a record by ID. Returns `None` if it does not exist.
    async fn get_indicator(&self, id: &IndicatorId) -> Result<Option<IndicatorRecord>>;

    /// Finds the record for a (service, indicator reference) pair.
    async fn find_indicator(
        &self,
        service_id: &ServiceId,
        indicator_ref: &str,
    ) -> Result<Option<IndicatorRecord>>;

    /// Lists all records belonging to a service.
    async fn list_indicators(&self, service_id: &ServiceId) -> Result<Vec<IndicatorRecord>>;

    /// Inserts or replaces a record unconditionally. Used at creation; use
    /// [`Self::cas_save_indicator`] for guarded updates.
    async fn save_indicator(&self, record: &IndicatorRecord) -> Result<()>;

    /// Saves a record iff the stored version matches `record.version`.
    async fn cas_save_indicator(&self, record: &IndicatorRecord) -> Result<CasResult>;
}

/// Storage for check definitions and their execution history.
#[async_trait]
pub trait CheckStore: Send + Sync {
    /// Gets a check by ID. Returns `None` if it does not exist.
    async fn get_check(&self, id: &CheckId) -> Result<Option<CheckDefinition>>;

    /// Lists all checks, optionally restricted to one service.
    /// Global checks (no owning service) are included either way.
    async fn list_checks(&self, service_id: Option<&ServiceId>) -> Result<Vec<CheckDefinition>>;

    /// Lists checks that are due at `now`: schedulable status and
    /// `next_due_at <= now`.
    async fn list_due_checks(&self, now: DateTime<Utc>) -> Result<Vec<CheckDefinition>>;

    /// Inserts or replaces a check unconditionally. Used at creation; use
    /// [`Self::cas_save_check`] for guarded updates.
    async fn save_check(&self, check: &CheckDefinition) -> Result<()>;

    /// Saves a check iff the stored version matches `check.version`.
    ///
    /// This is the primitive that serializes history updates per rule: two
    /// overlapping executions of the same rule cannot both apply.
    async fn cas_save_check(&self, check: &CheckDefinition) -> Result<CasResult>;

    /// Appends one immutable execution record.
    async fn append_execution(&self, record: &ExecutionRecord) -> Result<()>;

    /// Lists up to `limit` execution records for a check, most recent first.
    async fn list_executions(&self, check_id: &CheckId, limit: usize)
        -> Result<Vec<ExecutionRecord>>;
}

/// Storage for incidents.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Gets an incident by ID. Returns `None` if it does not exist.
    async fn get_incident(&self, id: &IncidentId) -> Result<Option<Incident>>;

    /// Lists all incidents for a service.
    async fn list_incidents(&self, service_id: &ServiceId) -> Result<Vec<Incident>>;

    /// Lists incidents for a service detected within `[start, end)`.
    async fn list_incidents_in_period(
        &self,
        service_id: &ServiceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Incident>>;

    /// Inserts or replaces an incident unconditionally. Used at creation;
    /// use [`Self::cas_save_incident`] for guarded updates.
    async fn save_incident(&self, incident: &Incident) -> Result<()>;

    /// Saves an incident iff the stored version matches `incident.version`.
    async fn cas_save_incident(&self, incident: &Incident) -> Result<CasResult>;
}

/// Storage for change requests.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Gets a change request by ID. Returns `None` if it does not exist.
    async fn get_change(&self, id: &ChangeRequestId) -> Result<Option<ChangeRequest>>;

    /// Lists all change requests for a service.
    async fn list_changes(&self, service_id: &ServiceId) -> Result<Vec<ChangeRequest>>;

    /// Lists change requests for a service requested within `[start, end)`.
    async fn list_changes_in_period(
        &self,
        service_id: &ServiceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChangeRequest>>;

    /// Inserts or replaces a change request unconditionally. Used at
    /// creation; use [`Self::cas_save_change`] for guarded updates.
    async fn save_change(&self, change: &ChangeRequest) -> Result<()>;

    /// Saves a change request iff the stored version matches
    /// `change.version`.
    async fn cas_save_change(&self, change: &ChangeRequest) -> Result<CasResult>;
}

/// Storage for service authorization records.
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Gets a service record by ID. Returns `None` if it does not exist.
    async fn get_service(&self, id: &ServiceId) -> Result<Option<ServiceAuthorization>>;

    /// Inserts or replaces a service record unconditionally. Used at
    /// creation; use [`Self::cas_save_service`] for guarded updates.
    async fn save_service(&self, service: &ServiceAuthorization) -> Result<()>;

    /// Saves a service record iff the stored version matches
    /// `service.version`.
    async fn cas_save_service(&self, service: &ServiceAuthorization) -> Result<CasResult>;
}

/// Storage for quarterly authorization reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Gets a report by ID. Returns `None` if it does not exist.
    async fn get_report(&self, id: &ReportId) -> Result<Option<AuthorizationReport>>;

    /// Finds the report for a (service, year, quarter) triple.
    async fn find_report(
        &self,
        service_id: &ServiceId,
        year: i32,
        quarter: u8,
    ) -> Result<Option<AuthorizationReport>>;

    /// Inserts or replaces a report unconditionally. Used at creation; use
    /// [`Self::cas_save_report`] for guarded updates.
    async fn save_report(&self, report: &AuthorizationReport) -> Result<()>;

    /// Saves a report iff the stored version matches `report.version`.
    async fn cas_save_report(&self, report: &AuthorizationReport) -> Result<CasResult>;
}

/// Metadata describing one stored piece of evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceMetadata {
    /// Evidence identifier.
    pub id: EvidenceId,
    /// Human-readable description.
    pub description: String,
    /// When the evidence was collected.
    pub collected_at: DateTime<Utc>,
}

/// Read-only resolver for evidence identifiers.
///
/// The evidence store itself is an external collaborator; the engine never
/// mutates it.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Returns true if the evidence exists.
    async fn evidence_exists(&self, id: &EvidenceId) -> Result<bool>;

    /// Resolves evidence metadata. Returns `None` if it does not exist.
    async fn get_evidence(&self, id: &EvidenceId) -> Result<Option<EvidenceMetadata>>;
}

/// Severity of a vulnerability reported by the external register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilitySeverity {
    /// Critical severity.
    Critical,
    /// High severity.
    High,
    /// Moderate severity.
    Moderate,
    /// Low severity.
    Low,
}

impl std::fmt::Display for VulnerabilitySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Moderate => write!(f, "moderate"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// One vulnerability as reported by the external register.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityRecord {
    /// Severity.
    pub severity: VulnerabilitySeverity,
    /// Whether the vulnerability is still open.
    pub open: bool,
    /// Whether remediation is past its due date.
    pub overdue: bool,
}

/// Read-only feed from the external vulnerability register.
///
/// The register itself is out of scope; reports only need per-service
/// counts at snapshot time.
#[async_trait]
pub trait VulnerabilityFeed: Send + Sync {
    /// Lists current vulnerabilities for a service.
    async fn list_vulnerabilities(&self, service_id: &ServiceId)
        -> Result<Vec<VulnerabilityRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_result_is_success() {
        assert!(CasResult::Success.is_success());
        assert!(!CasResult::NotFound.is_success());
        assert!(!CasResult::VersionConflict { actual: 2 }.is_success());
    }
}
