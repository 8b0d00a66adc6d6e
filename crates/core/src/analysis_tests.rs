// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn pipeline_order_is_monotonic() {
    use AnalysisState::*;
    assert!(Untracked.can_transition(PendingIdentification));
    assert!(PendingIdentification.can_transition(PendingPre));
    assert!(PendingIdentification.can_transition(WaitingManual));
    assert!(WaitingManual.can_transition(PendingPre));
    assert!(PendingPre.can_transition(TasksPending));
    assert!(TasksPending.can_transition(Finished));

    // No going backwards.
    assert!(!PendingPre.can_transition(PendingIdentification));
    assert!(!TasksPending.can_transition(PendingPre));
}

#[parameterized(
    untracked = { AnalysisState::Untracked },
    identification = { AnalysisState::PendingIdentification },
    manual = { AnalysisState::WaitingManual },
    pre = { AnalysisState::PendingPre },
    tasks = { AnalysisState::TasksPending },
)]
fn any_live_state_may_regress_to_fatal(state: AnalysisState) {
    assert!(state.can_transition(AnalysisState::FatalError));
}

#[test]
fn terminal_states_do_not_transition() {
    assert!(!AnalysisState::Finished.can_transition(AnalysisState::FatalError));
    assert!(!AnalysisState::FatalError.can_transition(AnalysisState::Finished));
}

#[test]
fn new_analysis_is_untracked() {
    let a = crate::test_support::analysis("20260801-A1B2C3");
    assert_eq!(a.state, AnalysisState::Untracked);
    assert_eq!(a.category(), Category::File);
    assert!(a.task_ids.is_empty());
}

#[test]
fn record_fault_lands_in_errors_map() {
    let mut a = crate::test_support::analysis("20260801-A1B2C3");
    a.record_fault(
        "identification",
        &Fault::new(crate::fault::ErrorKind::StageTimeout, "killed after 30s"),
    );
    assert_eq!(a.errors["identification"], vec!["stage_timeout: killed after 30s"]);
}

#[test]
fn target_serde_tags_by_category() {
    let url = TargetDescriptor::Url {
        url: "http://example.com".to_string(),
    };
    let json = serde_json::to_value(&url).unwrap();
    assert_eq!(json["category"], "url");

    let a = crate::test_support::analysis("20260801-A1B2C3");
    let json = serde_json::to_value(&a.target).unwrap();
    assert_eq!(json["category"], "file");
    assert_eq!(json["size"], 4096);
}
