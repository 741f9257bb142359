//! Property-based tests for engine invariants.
//!
//! These tests use proptest to verify invariants hold across randomly
//! generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use conauth_core::ServiceId;
use conauth_engine::check::{
    CheckConfig, CheckDefinition, ExecutionOutcome, Frequency, RuleStatus, FAILURE_THRESHOLD,
};
use conauth_engine::incident::{Incident, IncidentCategory, IncidentSeverity};

#[derive(Debug, Clone, Copy)]
enum Step {
    Pass,
    Fail,
    Err,
    Skip,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop::sample::select(vec![Step::Pass, Step::Fail, Step::Err, Step::Skip])
}

fn arb_severity() -> impl Strategy<Value = IncidentSeverity> {
    prop::sample::select(vec![
        IncidentSeverity::Critical,
        IncidentSeverity::High,
        IncidentSeverity::Moderate,
        IncidentSeverity::Low,
        IncidentSeverity::Informational,
    ])
}

fn arb_detection_time() -> impl Strategy<Value = DateTime<Utc>> {
    // 2020-01-01 through late 2033.
    (1_577_836_800i64..2_000_000_000i64)
        .prop_map(|secs| DateTime::from_timestamp(secs, 0).expect("valid timestamp"))
}

fn active_check(now: DateTime<Utc>) -> CheckDefinition {
    let mut check = CheckDefinition::new(
        Some(ServiceId::generate()),
        "generated-rule",
        CheckConfig::CustomScript {
            command: "verify".into(),
            args: vec![],
        },
        vec!["KSI-GEN-01".into()],
        Frequency::Daily,
        now,
    )
    .expect("valid check");
    check.activate(now).expect("fresh check activates");
    check
}

proptest! {
    /// Inductive invariant: across ANY execution sequence, the rule is in
    /// error status exactly when its consecutive-failure count has reached
    /// the threshold.
    #[test]
    fn error_status_iff_failure_threshold(steps in prop::collection::vec(arb_step(), 0..48)) {
        let now = Utc::now();
        let mut check = active_check(now);

        for (i, step) in steps.iter().enumerate() {
            let outcome = match step {
                Step::Pass => ExecutionOutcome::passed(vec![]),
                Step::Fail => ExecutionOutcome::failed(vec![], "criteria not met"),
                Step::Err => ExecutionOutcome::errored("executor unreachable"),
                Step::Skip => ExecutionOutcome::skipped("nothing to evaluate"),
            };
            let at = now + Duration::minutes(i64::try_from(i).unwrap());
            check.record_execution(&outcome, at);

            let in_error = check.status == RuleStatus::Error;
            let over_threshold = check.consecutive_failures >= FAILURE_THRESHOLD;
            prop_assert_eq!(
                in_error,
                over_threshold,
                "after step {} ({:?}): status {} with {} consecutive failures",
                i,
                step,
                check.status,
                check.consecutive_failures
            );
        }
    }

    /// Lifetime counters and pass rate stay consistent over any sequence.
    #[test]
    fn pass_rate_matches_lifetime_counters(steps in prop::collection::vec(arb_step(), 0..48)) {
        let now = Utc::now();
        let mut check = active_check(now);

        for step in &steps {
            let outcome = match step {
                Step::Pass => ExecutionOutcome::passed(vec![]),
                Step::Fail => ExecutionOutcome::failed(vec![], "x"),
                Step::Err => ExecutionOutcome::errored("x"),
                Step::Skip => ExecutionOutcome::skipped("x"),
            };
            check.record_execution(&outcome, now);
        }

        prop_assert_eq!(check.total_executions, steps.len() as u64);
        let expected_passes = steps.iter().filter(|s| matches!(s, Step::Pass)).count() as u64;
        prop_assert_eq!(check.total_passes, expected_passes);

        let rate = check.pass_rate();
        prop_assert!((0.0..=1.0).contains(&rate));
        if check.total_executions > 0 {
            let expected = expected_passes as f64 / steps.len() as f64;
            prop_assert!((rate - expected).abs() < f64::EPSILON);
        } else {
            prop_assert!((rate - 0.0).abs() < f64::EPSILON);
        }
    }

    /// The reporting deadline follows the severity table exactly, anchored
    /// at detection time; informational incidents carry no obligation.
    #[test]
    fn reporting_deadline_matches_severity_table(
        severity in arb_severity(),
        detected_at in arb_detection_time(),
    ) {
        let incident = Incident::open(
            ServiceId::generate(),
            "generated",
            "generated incident",
            IncidentCategory::Malware,
            severity,
            detected_at,
        );

        let expected_hours = match severity {
            IncidentSeverity::Critical => Some(1),
            IncidentSeverity::High => Some(24),
            IncidentSeverity::Moderate => Some(72),
            IncidentSeverity::Low => Some(168),
            IncidentSeverity::Informational => None,
        };
        match expected_hours {
            Some(hours) => {
                prop_assert_eq!(
                    incident.report_due_at,
                    Some(detected_at + Duration::hours(hours))
                );
            }
            None => prop_assert_eq!(incident.report_due_at, None),
        }
    }

    /// Closing is impossible while the reporting sub-state is unresolved,
    /// no matter how severity is revised along the way.
    #[test]
    fn close_blocked_while_reporting_unresolved(
        initial in arb_severity(),
        revised in arb_severity(),
        detected_at in arb_detection_time(),
    ) {
        let mut incident = Incident::open(
            ServiceId::generate(),
            "generated",
            "generated incident",
            IncidentCategory::UnauthorizedAccess,
            initial,
            detected_at,
        );
        let now = detected_at + Duration::hours(1);
        incident.record_containment(now).unwrap();
        incident.begin_eradication(now).unwrap();
        incident.complete_eradication(now).unwrap();
        incident.record_recovery(now).unwrap();
        incident.update_severity(revised, now).unwrap();

        let close_result = incident.close(now + Duration::hours(1));
        if incident.reporting_status.permits_close() {
            prop_assert!(close_result.is_ok());
        } else {
            prop_assert!(close_result.unwrap_err().is_precondition());
        }
    }
}
