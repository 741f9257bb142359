//! Quarterly authorization reports.
//!
//! At each period boundary the aggregator pulls point-in-time snapshots
//! from the indicator ledger, the vulnerability feed, and the incident and
//! change lifecycles, and freezes them into one report per
//! (service, year, quarter). Snapshot captures are independent: a failing
//! collaborator degrades that snapshot to zero-valued defaults instead of
//! aborting the whole report — availability over completeness, by contract.
//!
//! Reports are mutable while in draft and frozen at submission; only
//! reviewer annotations may be added afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use conauth_core::{ReportId, ServiceId};

use crate::change::ChangeRequest;
use crate::error::{Error, Result};
use crate::incident::Incident;
use crate::rollup::ComplianceMetrics;
use crate::store::{
    ChangeStore, IncidentStore, IndicatorStore, ReportStore, VulnerabilityFeed,
};

/// One calendar quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPeriod {
    /// Calendar year.
    pub year: i32,
    /// Quarter within the year, 1-4.
    pub quarter: u8,
    /// Inclusive period start.
    pub start: DateTime<Utc>,
    /// Exclusive period end.
    pub end: DateTime<Utc>,
}

impl ReportPeriod {
    /// Computes the calendar period for a quarter.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the quarter is outside 1-4 or the
    /// year is not representable.
    pub fn new(year: i32, quarter: u8) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(Error::validation(format!(
                "quarter must be 1-4, got {quarter}"
            )));
        }
        let start_month = u32::from(quarter - 1) * 3 + 1;
        let (end_year, end_month) = if quarter == 4 {
            (year + 1, 1)
        } else {
            (year, start_month + 3)
        };

        let at_midnight = |y: i32, m: u32| {
            Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0)
                .single()
                .ok_or_else(|| Error::validation(format!("invalid period boundary {y}-{m:02}")))
        };

        Ok(Self {
            year,
            quarter,
            start: at_midnight(year, start_month)?,
            end: at_midnight(end_year, end_month)?,
        })
    }

    /// Returns true if the timestamp falls within the period.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Frozen indicator-compliance summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSnapshot {
    /// Records counted.
    pub total: u64,
    /// Record counts by compliance status.
    pub by_status: BTreeMap<String, u64>,
    /// Record counts by catalogue category.
    pub by_category: BTreeMap<String, u64>,
    /// Compliance percentage at capture time.
    pub compliance_pct: f64,
    /// Automated-validation coverage percentage at capture time.
    pub automation_pct: f64,
}

/// Frozen vulnerability summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilitySnapshot {
    /// Vulnerability counts by severity.
    pub by_severity: BTreeMap<String, u64>,
    /// Open vulnerabilities.
    pub open: u64,
    /// Vulnerabilities past their remediation due date.
    pub overdue: u64,
}

/// Frozen incident summary for the period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSnapshot {
    /// Incidents detected in the period.
    pub total: u64,
    /// Incident counts by severity.
    pub by_severity: BTreeMap<String, u64>,
    /// Incident counts by category.
    pub by_category: BTreeMap<String, u64>,
    /// Mean detection-to-containment time in minutes, over incidents with a
    /// containment milestone.
    pub avg_containment_minutes: f64,
    /// Mean detection-to-closure time in minutes, over closed incidents.
    pub avg_resolution_minutes: f64,
    /// Incidents involving data exfiltration.
    pub data_exfiltration_count: u64,
    /// Incidents involving service disruption.
    pub service_disruption_count: u64,
}

/// Frozen change-request summary for the period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSnapshot {
    /// Change requests opened in the period.
    pub total: u64,
    /// Counts by assessed impact level.
    pub by_impact: BTreeMap<String, u64>,
    /// Counts by lifecycle status.
    pub by_status: BTreeMap<String, u64>,
    /// Counts by change type.
    pub by_type: BTreeMap<String, u64>,
    /// Changes still waiting on approval.
    pub pending_approval: u64,
}

/// The attestation recorded before a report may be submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// Who attested.
    pub attested_by: String,
    /// Attester's role.
    pub role: String,
    /// Attestation statement.
    pub statement: String,
    /// When the attestation was recorded.
    pub attested_at: DateTime<Utc>,
}

/// A reviewer annotation, recordable before and after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewComment {
    /// Comment author.
    pub author: String,
    /// Comment body.
    pub comment: String,
    /// When the comment was recorded.
    pub created_at: DateTime<Utc>,
}

/// Report lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Mutable working copy.
    Draft,
    /// Submitted; summary data frozen.
    Submitted,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Submitted => write!(f, "submitted"),
        }
    }
}

/// One quarterly authorization report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationReport {
    /// Unique report identifier.
    pub id: ReportId,
    /// Service the report covers.
    pub service_id: ServiceId,
    /// Reporting period.
    pub period: ReportPeriod,
    /// Lifecycle status.
    pub status: ReportStatus,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Frozen indicator summary.
    pub indicator_summary: IndicatorSnapshot,
    /// Frozen vulnerability summary.
    pub vulnerability_summary: VulnerabilitySnapshot,
    /// Frozen incident summary.
    pub incident_summary: IncidentSnapshot,
    /// Frozen change summary.
    pub change_summary: ChangeSnapshot,
    /// Narrative commentary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    /// Attestation record, required before submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
    /// When the report was submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    /// Reviewer annotations.
    #[serde(default)]
    pub review_comments: Vec<ReviewComment>,
    /// Optimistic-concurrency version.
    #[serde(default)]
    pub version: u64,
}

impl AuthorizationReport {
    fn require_draft(&self, operation: &'static str) -> Result<()> {
        if self.status == ReportStatus::Draft {
            Ok(())
        } else {
            Err(Error::precondition(
                operation,
                self.status.to_string(),
                "draft",
            ))
        }
    }

    /// Sets the narrative commentary.
    ///
    /// # Errors
    ///
    /// Returns a precondition error once the report is submitted.
    pub fn set_narrative(&mut self, narrative: impl Into<String>) -> Result<()> {
        self.require_draft("set_narrative")?;
        self.narrative = Some(narrative.into());
        Ok(())
    }

    /// Records the attestation.
    ///
    /// # Errors
    ///
    /// Returns a precondition error once the report is submitted.
    pub fn record_attestation(&mut self, attestation: Attestation) -> Result<()> {
        self.require_draft("record_attestation")?;
        self.attestation = Some(attestation);
        Ok(())
    }

    /// Submits the report, freezing all summary data.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when the report is already submitted or
    /// no attestation has been recorded.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.require_draft("submit")?;
        if self.attestation.is_none() {
            return Err(Error::precondition(
                "submit",
                "no attestation recorded",
                "attestation recorded",
            ));
        }
        self.status = ReportStatus::Submitted;
        self.submitted_at = Some(now);
        Ok(())
    }

    /// Appends a reviewer annotation. Legal in every status.
    pub fn add_review_comment(
        &mut self,
        author: impl Into<String>,
        comment: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.review_comments.push(ReviewComment {
            author: author.into(),
            comment: comment.into(),
            created_at: now,
        });
    }
}

fn bump(map: &mut BTreeMap<String, u64>, key: impl Into<String>) {
    *map.entry(key.into()).or_insert(0) += 1;
}

#[allow(clippy::cast_precision_loss)]
fn mean_minutes(samples: &[i64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<i64>() as f64 / samples.len() as f64
    }
}

/// Builds quarterly reports from point-in-time snapshots.
pub struct ReportAggregator {
    indicators: Arc<dyn IndicatorStore>,
    incidents: Arc<dyn IncidentStore>,
    changes: Arc<dyn ChangeStore>,
    vulnerabilities: Arc<dyn VulnerabilityFeed>,
    reports: Arc<dyn ReportStore>,
}

impl ReportAggregator {
    /// Creates an aggregator over the given stores.
    #[must_use]
    pub fn new(
        indicators: Arc<dyn IndicatorStore>,
        incidents: Arc<dyn IncidentStore>,
        changes: Arc<dyn ChangeStore>,
        vulnerabilities: Arc<dyn VulnerabilityFeed>,
        reports: Arc<dyn ReportStore>,
    ) -> Self {
        Self {
            indicators,
            incidents,
            changes,
            vulnerabilities,
            reports,
        }
    }

    /// Generates the draft report for one (service, year, quarter).
    ///
    /// The four snapshot captures run concurrently and independently; a
    /// failing collaborator degrades its snapshot to defaults rather than
    /// failing the report.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid quarter or when the report
    /// already exists, or a storage error if the final write fails.
    #[tracing::instrument(skip(self), fields(service_id = %service_id, year, quarter))]
    pub async fn generate(
        &self,
        service_id: &ServiceId,
        year: i32,
        quarter: u8,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationReport> {
        let period = ReportPeriod::new(year, quarter)?;

        if self
            .reports
            .find_report(service_id, year, quarter)
            .await?
            .is_some()
        {
            return Err(Error::validation(format!(
                "report for {service_id} {year}-Q{quarter} already exists"
            )));
        }

        let (indicator_summary, vulnerability_summary, incident_summary, change_summary) = tokio::join!(
            self.capture_indicators(service_id),
            self.capture_vulnerabilities(service_id),
            self.capture_incidents(service_id, period),
            self.capture_changes(service_id, period),
        );

        let report = AuthorizationReport {
            id: ReportId::generate(),
            service_id: *service_id,
            period,
            status: ReportStatus::Draft,
            generated_at: now,
            indicator_summary: indicator_summary.unwrap_or_else(|err| {
                tracing::warn!(%err, "indicator snapshot degraded to defaults");
                IndicatorSnapshot::default()
            }),
            vulnerability_summary: vulnerability_summary.unwrap_or_else(|err| {
                tracing::warn!(%err, "vulnerability snapshot degraded to defaults");
                VulnerabilitySnapshot::default()
            }),
            incident_summary: incident_summary.unwrap_or_else(|err| {
                tracing::warn!(%err, "incident snapshot degraded to defaults");
                IncidentSnapshot::default()
            }),
            change_summary: change_summary.unwrap_or_else(|err| {
                tracing::warn!(%err, "change snapshot degraded to defaults");
                ChangeSnapshot::default()
            }),
            narrative: None,
            attestation: None,
            submitted_at: None,
            review_comments: Vec::new(),
            version: 0,
        };

        self.reports.save_report(&report).await?;
        Ok(report)
    }

    async fn capture_indicators(&self, service_id: &ServiceId) -> Result<IndicatorSnapshot> {
        let records = self.indicators.list_indicators(service_id).await?;
        let metrics = ComplianceMetrics::from_records(&records);

        let mut snapshot = IndicatorSnapshot {
            total: records.len() as u64,
            compliance_pct: metrics.compliance_pct,
            automation_pct: metrics.automation_pct,
            ..IndicatorSnapshot::default()
        };
        for record in &records {
            bump(&mut snapshot.by_status, record.compliance_status.to_string());
            bump(&mut snapshot.by_category, record.category.clone());
        }
        Ok(snapshot)
    }

    async fn capture_vulnerabilities(
        &self,
        service_id: &ServiceId,
    ) -> Result<VulnerabilitySnapshot> {
        let records = self.vulnerabilities.list_vulnerabilities(service_id).await?;
        let mut snapshot = VulnerabilitySnapshot::default();
        for record in &records {
            bump(&mut snapshot.by_severity, record.severity.to_string());
            if record.open {
                snapshot.open += 1;
            }
            if record.overdue {
                snapshot.overdue += 1;
            }
        }
        Ok(snapshot)
    }

    async fn capture_incidents(
        &self,
        service_id: &ServiceId,
        period: ReportPeriod,
    ) -> Result<IncidentSnapshot> {
        let incidents: Vec<Incident> = self
            .incidents
            .list_incidents_in_period(service_id, period.start, period.end)
            .await?;

        let mut snapshot = IncidentSnapshot {
            total: incidents.len() as u64,
            ..IncidentSnapshot::default()
        };
        let mut containment = Vec::new();
        let mut resolution = Vec::new();
        for incident in &incidents {
            bump(&mut snapshot.by_severity, incident.severity.to_string());
            bump(&mut snapshot.by_category, incident.category.to_string());
            if incident.impact.data_exfiltration {
                snapshot.data_exfiltration_count += 1;
            }
            if incident.impact.service_disruption {
                snapshot.service_disruption_count += 1;
            }
            if let Some(duration) = incident.containment_duration() {
                containment.push(duration.num_minutes());
            }
            if let Some(duration) = incident.resolution_duration() {
                resolution.push(duration.num_minutes());
            }
        }
        snapshot.avg_containment_minutes = mean_minutes(&containment);
        snapshot.avg_resolution_minutes = mean_minutes(&resolution);
        Ok(snapshot)
    }

    async fn capture_changes(
        &self,
        service_id: &ServiceId,
        period: ReportPeriod,
    ) -> Result<ChangeSnapshot> {
        let changes: Vec<ChangeRequest> = self
            .changes
            .list_changes_in_period(service_id, period.start, period.end)
            .await?;

        let mut snapshot = ChangeSnapshot {
            total: changes.len() as u64,
            ..ChangeSnapshot::default()
        };
        for change in &changes {
            bump(&mut snapshot.by_status, change.status.to_string());
            bump(&mut snapshot.by_type, change.change_type.to_string());
            if let Some(analysis) = &change.impact_analysis {
                bump(&mut snapshot.by_impact, analysis.impact_level.to_string());
            }
            if change.is_pending_approval() {
                snapshot.pending_approval += 1;
            }
        }
        Ok(snapshot)
    }
}
