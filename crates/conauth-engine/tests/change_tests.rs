//! Change-control lifecycle regression tests.

use chrono::Utc;

use conauth_engine::change::{ChangeStatus, ChangeType, ImpactAnalysis, ImpactLevel, RiskDelta};
use conauth_engine::engine::Engine;
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

fn low_impact() -> ImpactAnalysis {
    ImpactAnalysis {
        impact_level: ImpactLevel::Low,
        affected_components: vec!["api-gateway".into()],
        affected_indicators: vec!["KSI-CMT-01".into()],
        affected_controls: vec!["CM-3".into()],
        risk_before: "Single NAT gateway".into(),
        risk_after: "Redundant NAT gateways".into(),
        risk_delta: RiskDelta::Reduced,
        analyzed_at: Utc::now(),
    }
}

/// Scenario: approval before impact analysis fails; the happy path with
/// notification-not-required lands in approved.
#[tokio::test]
async fn approval_gate_and_happy_path() {
    let (engine, _outbox) = test_engine();
    let service_id = service(&engine).await;

    let change = engine
        .open_change_request(
            &service_id,
            "add NAT redundancy",
            "Second NAT gateway in each AZ",
            ChangeType::Infrastructure,
        )
        .await
        .unwrap();

    // Approve straight out of draft: precondition violation.
    let err = engine.approve_change(&change.id, "ciso").await.unwrap_err();
    assert!(err.is_precondition());

    engine.submit_change(&change.id).await.unwrap();
    engine.begin_impact_analysis(&change.id).await.unwrap();
    engine
        .complete_impact_analysis(&change.id, low_impact())
        .await
        .unwrap();
    engine
        .determine_notification(&change.id, false, None, "no boundary or data-flow change")
        .await
        .unwrap();

    let approved = engine.approve_change(&change.id, "ciso").await.unwrap();
    assert_eq!(approved.status, ChangeStatus::Approved);
    assert_eq!(approved.approval.as_ref().unwrap().approved_by, "ciso");

    let implemented = engine.mark_change_implemented(&change.id).await.unwrap();
    assert_eq!(implemented.status, ChangeStatus::Implemented);
    assert!(implemented.implemented_at.is_some());
}

/// The two-stage gate cannot be skipped: notification determination
/// requires completed impact analysis, and filing requires the required
/// branch.
#[tokio::test]
async fn two_stage_gate_ordering() {
    let (engine, _outbox) = test_engine();
    let service_id = service(&engine).await;
    let change = engine
        .open_change_request(
            &service_id,
            "rotate TLS certs",
            "Replace the edge certificates",
            ChangeType::Configuration,
        )
        .await
        .unwrap();
    engine.submit_change(&change.id).await.unwrap();

    // Determination before analysis completes: rejected.
    let err = engine
        .determine_notification(&change.id, true, Some("boundary_change".into()), "x")
        .await
        .unwrap_err();
    assert!(err.is_precondition());

    engine.begin_impact_analysis(&change.id).await.unwrap();

    // Notification filing before determination: rejected.
    let err = engine.submit_notification(&change.id).await.unwrap_err();
    assert!(err.is_precondition());

    engine
        .complete_impact_analysis(&change.id, low_impact())
        .await
        .unwrap();
    engine
        .determine_notification(
            &change.id,
            true,
            Some("new_external_service".into()),
            "adds an external dependency",
        )
        .await
        .unwrap();

    let filed = engine.submit_notification(&change.id).await.unwrap();
    assert_eq!(filed.status, ChangeStatus::ScnSubmitted);

    // Approval blocked until acknowledgement arrives.
    let err = engine.approve_change(&change.id, "ciso").await.unwrap_err();
    assert!(err.is_precondition());

    engine.acknowledge_notification(&change.id).await.unwrap();
    let approved = engine.approve_change(&change.id, "ciso").await.unwrap();
    assert_eq!(approved.status, ChangeStatus::Approved);
}

/// Security review gates approval regardless of lifecycle status.
#[tokio::test]
async fn security_review_gate() {
    let (engine, _outbox) = test_engine();
    let service_id = service(&engine).await;

    // Security-control changes require review from the start.
    let change = engine
        .open_change_request(
            &service_id,
            "swap KMS signing key",
            "Rotate the primary signing key",
            ChangeType::SecurityControl,
        )
        .await
        .unwrap();
    assert!(change.security_review_required);

    engine.submit_change(&change.id).await.unwrap();
    engine.begin_impact_analysis(&change.id).await.unwrap();
    engine
        .complete_impact_analysis(&change.id, low_impact())
        .await
        .unwrap();
    engine
        .determine_notification(&change.id, false, None, "internal only")
        .await
        .unwrap();

    let err = engine.approve_change(&change.id, "ciso").await.unwrap_err();
    assert!(err.is_precondition());

    engine
        .complete_security_review(&change.id, "secops")
        .await
        .unwrap();
    let approved = engine.approve_change(&change.id, "ciso").await.unwrap();
    assert_eq!(approved.status, ChangeStatus::Approved);
}

#[tokio::test]
async fn withdrawal_is_terminal() {
    let (engine, _outbox) = test_engine();
    let service_id = service(&engine).await;
    let change = engine
        .open_change_request(
            &service_id,
            "retire legacy queue",
            "Remove the deprecated message broker",
            ChangeType::Application,
        )
        .await
        .unwrap();

    engine.submit_change(&change.id).await.unwrap();
    let withdrawn = engine
        .withdraw_change(&change.id, "superseded by managed broker migration")
        .await
        .unwrap();
    assert_eq!(withdrawn.status, ChangeStatus::Withdrawn);

    assert!(engine
        .submit_change(&change.id)
        .await
        .unwrap_err()
        .is_precondition());
    assert!(engine
        .reject_change(&change.id, "x")
        .await
        .unwrap_err()
        .is_precondition());
}

#[tokio::test]
async fn notification_and_approval_events_emitted() {
    let (engine, outbox) = test_engine();
    let service_id = service(&engine).await;
    let change = engine
        .open_change_request(
            &service_id,
            "open new region",
            "Serve EU traffic from a second region",
            ChangeType::Infrastructure,
        )
        .await
        .unwrap();

    engine.submit_change(&change.id).await.unwrap();
    engine.begin_impact_analysis(&change.id).await.unwrap();
    engine
        .complete_impact_analysis(&change.id, low_impact())
        .await
        .unwrap();
    engine
        .determine_notification(
            &change.id,
            true,
            Some("boundary_change".into()),
            "new region extends the boundary",
        )
        .await
        .unwrap();
    engine.submit_notification(&change.id).await.unwrap();
    engine.acknowledge_notification(&change.id).await.unwrap();
    engine.approve_change(&change.id, "ao").await.unwrap();
    engine.mark_change_implemented(&change.id).await.unwrap();

    let kinds: Vec<String> = outbox.events().iter().map(|e| e.event_type.clone()).collect();
    for expected in [
        "conauth.engine.change_notification_submitted",
        "conauth.engine.change_approved",
        "conauth.engine.change_implemented",
    ] {
        assert!(kinds.iter().any(|k| k == expected), "missing {expected}");
    }

    // Audit trail captured every step with self-describing statuses.
    let stored = engine.get_change(&change.id).await.unwrap();
    assert_eq!(stored.audit_trail.len(), 9);
    assert_eq!(stored.audit_trail.last().unwrap().status_at, "implemented");
}
