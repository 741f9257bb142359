//! Incident lifecycle and external-reporting regression tests.

use chrono::{Duration, Utc};

use conauth_engine::engine::Engine;
use conauth_engine::incident::{
    Incident, IncidentCategory, IncidentImpact, IncidentSeverity, IncidentStatus, ReportingStatus,
};
use conauth_engine::outbox::{shared, SharedMemoryOutbox};
use conauth_engine::rollup::ImpactTier;
use conauth_core::ServiceId;

fn test_engine() -> (Engine, SharedMemoryOutbox) {
    let outbox = SharedMemoryOutbox::new();
    let (engine, _stores) = Engine::with_memory_stores(shared(outbox.clone()));
    (engine, outbox)
}

async fn service(engine: &Engine) -> ServiceId {
    engine
        .register_service("payments-api", ImpactTier::Moderate)
        .await
        .unwrap()
        .id
}

/// Scenario: a high-severity incident gets a 24-hour reporting deadline,
/// cannot close while reporting is unresolved, and closes after the full
/// response and reporting path.
#[tokio::test]
async fn high_severity_incident_full_path() {
    let (engine, outbox) = test_engine();
    let service_id = service(&engine).await;

    let incident = engine
        .open_incident(
            &service_id,
            "credential stuffing burst",
            "Successful logins from a flagged ASN after a failed-login burst",
            IncidentCategory::UnauthorizedAccess,
            IncidentSeverity::High,
        )
        .await
        .unwrap();
    assert_eq!(incident.reporting_status, ReportingStatus::Pending);
    assert_eq!(
        incident.report_due_at,
        Some(incident.detected_at + Duration::hours(24))
    );

    // Closing immediately fails: lifecycle and reporting both block it.
    let err = engine.close_incident(&incident.id).await.unwrap_err();
    assert!(err.is_precondition());

    engine.begin_analysis(&incident.id).await.unwrap();
    engine.record_containment(&incident.id).await.unwrap();
    engine.begin_eradication(&incident.id).await.unwrap();
    engine.complete_eradication(&incident.id).await.unwrap();
    engine.begin_recovery(&incident.id).await.unwrap();
    engine.record_recovery(&incident.id).await.unwrap();

    // Lifecycle is satisfied, but reporting is still pending.
    let err = engine.close_incident(&incident.id).await.unwrap_err();
    assert!(err.is_precondition());

    engine
        .submit_incident_report(&incident.id, "US-CERT-80412")
        .await
        .unwrap();
    // Submitted is not a terminal reporting state either.
    let err = engine.close_incident(&incident.id).await.unwrap_err();
    assert!(err.is_precondition());

    engine.submit_final_report(&incident.id).await.unwrap();
    let closed = engine.close_incident(&incident.id).await.unwrap();
    assert_eq!(closed.status, IncidentStatus::Closed);
    assert!(closed.milestones.closed_at.is_some());

    // Side-effecting transitions reached the sink.
    let kinds: Vec<String> = outbox.events().iter().map(|e| e.event_type.clone()).collect();
    for expected in [
        "conauth.engine.incident_analysis_started",
        "conauth.engine.incident_contained",
        "conauth.engine.incident_eradicated",
        "conauth.engine.incident_recovered",
        "conauth.engine.incident_report_submitted",
        "conauth.engine.incident_closed",
    ] {
        assert!(kinds.iter().any(|k| k == expected), "missing {expected}");
    }
}

/// Deadlines follow the fixed severity table at creation.
#[tokio::test]
async fn reporting_deadline_table() {
    let (engine, _outbox) = test_engine();
    let service_id = service(&engine).await;

    let cases = [
        (IncidentSeverity::Critical, Some(1)),
        (IncidentSeverity::High, Some(24)),
        (IncidentSeverity::Moderate, Some(72)),
        (IncidentSeverity::Low, Some(168)),
        (IncidentSeverity::Informational, None),
    ];
    for (severity, hours) in cases {
        let incident = engine
            .open_incident(
                &service_id,
                "probe",
                "detection-path probe",
                IncidentCategory::Malware,
                severity,
            )
            .await
            .unwrap();
        match hours {
            Some(hours) => {
                assert_eq!(incident.reporting_status, ReportingStatus::Pending);
                assert_eq!(
                    incident.report_due_at,
                    Some(incident.detected_at + Duration::hours(hours)),
                    "severity {severity}"
                );
            }
            None => {
                assert_eq!(incident.reporting_status, ReportingStatus::NotRequired);
                assert_eq!(incident.report_due_at, None);
            }
        }
    }
}

/// Close is rejected from every lifecycle status while the reporting
/// sub-state is non-terminal.
#[tokio::test]
async fn close_always_blocked_by_unresolved_reporting() {
    let now = Utc::now();
    let service_id = ServiceId::generate();

    // Walk the lifecycle one milestone at a time; after each step, a close
    // attempt must fail because reporting never leaves pending/submitted.
    let steps: Vec<fn(&mut Incident) -> conauth_engine::error::Result<()>> = vec![
        |i| i.begin_analysis(Utc::now()),
        |i| i.record_containment(Utc::now()),
        |i| i.begin_eradication(Utc::now()),
        |i| i.complete_eradication(Utc::now()),
        |i| i.begin_recovery(Utc::now()),
        |i| i.record_recovery(Utc::now()),
        |i| i.record_lessons_learned("tabletop scheduled", Utc::now()),
    ];

    let mut incident = Incident::open(
        service_id,
        "exfil attempt",
        "Blocked outbound transfer to unknown host",
        IncidentCategory::DataBreach,
        IncidentSeverity::Critical,
        now,
    );
    assert!(incident.close(now).unwrap_err().is_precondition());
    for step in steps {
        step(&mut incident).unwrap();
        assert!(
            incident.close(Utc::now()).unwrap_err().is_precondition(),
            "close must fail at status {} with reporting {}",
            incident.status,
            incident.reporting_status
        );
    }

    // Resolving the obligation unlocks the close.
    incident.submit_report("CASE-100", Utc::now()).unwrap();
    incident.submit_final_report(Utc::now()).unwrap();
    incident.close(Utc::now()).unwrap();
    assert_eq!(incident.status, IncidentStatus::Closed);
}

/// Severity revisions only move the deadline while reporting is pending.
#[tokio::test]
async fn severity_revision_deadline_rules() {
    let (engine, _outbox) = test_engine();
    let service_id = service(&engine).await;

    let incident = engine
        .open_incident(
            &service_id,
            "suspicious lateral movement",
            "East-west traffic to a jump host outside change window",
            IncidentCategory::UnauthorizedAccess,
            IncidentSeverity::Moderate,
        )
        .await
        .unwrap();
    let detected_at = incident.detected_at;

    // Escalation while pending tightens the deadline, still anchored at
    // detection time.
    let escalated = engine
        .update_severity(&incident.id, IncidentSeverity::Critical)
        .await
        .unwrap();
    assert_eq!(escalated.report_due_at, Some(detected_at + Duration::hours(1)));

    // Once submitted, later revisions keep the original deadline.
    engine
        .submit_incident_report(&incident.id, "CASE-7")
        .await
        .unwrap();
    let revised = engine
        .update_severity(&incident.id, IncidentSeverity::Low)
        .await
        .unwrap();
    assert_eq!(revised.report_due_at, Some(detected_at + Duration::hours(1)));
    assert_eq!(revised.severity, IncidentSeverity::Low);
}

#[tokio::test]
async fn timeline_records_impact_and_notes() {
    let (engine, _outbox) = test_engine();
    let service_id = service(&engine).await;

    let incident = engine
        .open_incident(
            &service_id,
            "ransomware on build agent",
            "Encryption activity detected on ephemeral CI agent",
            IncidentCategory::Ransomware,
            IncidentSeverity::High,
        )
        .await
        .unwrap();

    engine
        .record_incident_impact(
            &incident.id,
            IncidentImpact {
                affected_users: 0,
                affected_records: 0,
                data_exfiltration: false,
                service_disruption: true,
                disruption_minutes: Some(45),
            },
        )
        .await
        .unwrap();
    let noted = engine
        .add_incident_note(
            &incident.id,
            "agent pool drained and reimaged",
            Some(serde_json::json!({"pool": "ci-linux"})),
        )
        .await
        .unwrap();

    assert_eq!(noted.impact.disruption_minutes, Some(45));
    // detected + impact_assessed + note
    assert_eq!(noted.timeline.len(), 3);
    let kinds: Vec<&str> = noted.timeline.entries().iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(kinds, vec!["detected", "impact_assessed", "note"]);
}

#[tokio::test]
async fn version_conflicts_surface_to_the_loser() {
    let (engine, _outbox) = test_engine();
    let service_id = service(&engine).await;
    let incident = engine
        .open_incident(
            &service_id,
            "phish campaign",
            "Payroll-themed credential lure",
            IncidentCategory::Phishing,
            IncidentSeverity::Low,
        )
        .await
        .unwrap();

    // Two operators race the same first transition; exactly one wins.
    let (a, b) = tokio::join!(
        engine.begin_analysis(&incident.id),
        engine.begin_analysis(&incident.id),
    );
    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);

    let stored = engine.get_incident(&incident.id).await.unwrap();
    assert_eq!(stored.status, IncidentStatus::Analyzing);
    assert!(stored.milestones.analysis_started_at.is_some());
}
