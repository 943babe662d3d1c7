// tests/ledger_test.rs — Integration test: ledger lifecycle, ordering and persistence

use pretty_assertions::assert_eq;

use kaizen::core::ledger::{
    DefectId, DefectStatus, ImprovementPriority, Ledger, LedgerSnapshot, NewDefect,
    NewImprovement, Severity,
};
use kaizen::core::types::Component;
use kaizen::infra::errors::KaizenError;

fn page(name: &str) -> Component {
    Component::Frontend(name.into())
}

#[test]
fn test_every_illegal_transition_is_rejected() {
    use DefectStatus::*;
    let all = [Open, InProgress, Resolved, Verified];
    let legal = [
        (Open, InProgress),
        (InProgress, Resolved),
        (InProgress, Open),
        (Resolved, Verified),
        (Resolved, Open),
        (Verified, Open),
    ];
    for from in all {
        for to in all {
            assert_eq!(
                from.can_transition_to(to),
                legal.contains(&(from, to)),
                "{} -> {}",
                from,
                to
            );
        }
    }
}

#[test]
fn test_high_then_critical_orders_critical_first() {
    let mut ledger = Ledger::new();
    let high = ledger.add_defect(NewDefect::new("slow", page("A"), Severity::High, "v"));
    let critical = ledger.add_defect(NewDefect::new("crash", page("B"), Severity::Critical, "v"));
    let ids: Vec<DefectId> = ledger.open_defects(None).iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![critical, high]);
}

#[test]
fn test_verified_can_be_reopened_and_fixed_again() {
    let mut ledger = Ledger::new();
    let id = ledger.add_defect(NewDefect::new("flaky", page("A"), Severity::Low, "v"));
    for status in [
        DefectStatus::InProgress,
        DefectStatus::Resolved,
        DefectStatus::Verified,
        DefectStatus::Open,
        DefectStatus::InProgress,
        DefectStatus::Resolved,
    ] {
        ledger.update_status(id, status, "tester", Some("step")).unwrap();
    }
    let d = ledger.defect(id).unwrap();
    assert_eq!(d.status, DefectStatus::Resolved);
    assert_eq!(d.notes.len(), 6);
    assert_eq!(d.notes[3].status, DefectStatus::Open);
}

#[test]
fn test_invalid_transition_message() {
    let mut ledger = Ledger::new();
    let id = ledger.add_defect(NewDefect::new("x", page("A"), Severity::Minor, "v"));
    let err = ledger
        .update_status(id, DefectStatus::Resolved, "act", None)
        .unwrap_err();
    assert!(matches!(err, KaizenError::InvalidTransition { .. }));
    assert_eq!(
        err.to_string(),
        format!("Invalid transition for defect #{}: OPEN -> RESOLVED", id)
    );
}

#[test]
fn test_snapshot_json_roundtrip_is_lossless() {
    let mut ledger = Ledger::new();
    let a = ledger.add_defect(
        NewDefect::new("xss in search", page("Search"), Severity::Critical, "verifier-1")
            .category("security")
            .meta("cycle", serde_json::json!(1)),
    );
    ledger.add_defect(NewDefect::new(
        "missing index",
        Component::Backend("/api/search".into()),
        Severity::Medium,
        "integration-validator",
    ));
    ledger
        .update_status(a, DefectStatus::InProgress, "act", None)
        .unwrap();
    ledger.add_improvement(
        NewImprovement::new(
            "debounce input",
            page("Search"),
            "consolidator",
            ImprovementPriority::Medium,
        )
        .meta("source_phase", serde_json::json!("DO")),
    );
    ledger.record_waste("redundant_verification", "nothing changed", "CHECK", None);

    let json = serde_json::to_string_pretty(&ledger.snapshot()).unwrap();
    let snapshot: LedgerSnapshot = serde_json::from_str(&json).unwrap();
    let restored = Ledger::from_snapshot(snapshot);

    assert_eq!(restored.snapshot(), ledger.snapshot());
    assert_eq!(restored.statistics(), ledger.statistics());
    assert!(json.contains("\"IN_PROGRESS\""));
    assert!(json.contains("\"frontend/Search\""));
    assert_eq!(
        restored.pending_improvements()[0].metadata["source_phase"],
        serde_json::json!("DO")
    );
}

#[test]
fn test_resolution_rate_counts_resolved_and_verified() {
    let mut ledger = Ledger::new();
    assert_eq!(ledger.statistics().resolution_rate, 0.0);
    let ids: Vec<DefectId> = (0..4)
        .map(|i| ledger.add_defect(NewDefect::new(format!("d{}", i), page("A"), Severity::Low, "v")))
        .collect();
    for id in &ids[..2] {
        ledger.update_status(*id, DefectStatus::InProgress, "act", None).unwrap();
        ledger.update_status(*id, DefectStatus::Resolved, "act", None).unwrap();
    }
    ledger
        .update_status(ids[0], DefectStatus::Verified, "check", None)
        .unwrap();
    let stats = ledger.statistics();
    assert!((stats.resolution_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(stats.verified_defects, 1);
    assert_eq!(stats.resolved_defects, 1);
    assert_eq!(stats.open_defects, 2);
}
