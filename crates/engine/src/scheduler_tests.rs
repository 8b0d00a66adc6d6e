// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cuckoo_core::test_support;

fn task() -> Task {
    test_support::task("20260801-AAAAAA", 1)
}

fn node(machines: Vec<Machine>, connected: bool) -> NodeStatus {
    NodeStatus {
        connected,
        last_seen_ms: 0,
        machines,
    }
}

#[test]
fn remote_candidate_requires_connected_node() {
    let mut nodes = HashMap::new();
    nodes.insert(
        NodeName::new("node1"),
        node(vec![test_support::machine("remote-1")], false),
    );

    assert!(remote_candidate(&task(), &nodes, &HashMap::new()).is_none());

    nodes.insert(
        NodeName::new("node1"),
        node(vec![test_support::machine("remote-1")], true),
    );
    let candidate = remote_candidate(&task(), &nodes, &HashMap::new()).unwrap();
    assert_eq!(candidate.node, "node1");
    assert_eq!(candidate.machine.name, "remote-1");
}

#[test]
fn remote_candidate_respects_platform_and_state() {
    let mut wrong_platform = test_support::machine("remote-linux");
    wrong_platform.platform = "linux".to_string();
    let mut busy = test_support::machine("remote-busy");
    busy.state = MachineState::Running;
    let mut reserved = test_support::machine("remote-reserved");
    reserved.reserved_by = Some(TaskId::new("20260801-ZZZZZZ_1"));

    let mut nodes = HashMap::new();
    nodes.insert(
        NodeName::new("node1"),
        node(vec![wrong_platform, busy, reserved], true),
    );

    assert!(remote_candidate(&task(), &nodes, &HashMap::new()).is_none());
}

#[test]
fn in_flight_dispatches_consume_free_slots() {
    let mut nodes = HashMap::new();
    nodes.insert(
        NodeName::new("node1"),
        node(vec![test_support::machine("remote-1")], true),
    );

    // One machine, one task already dispatched there: no slots left.
    let mut node_tasks = HashMap::new();
    node_tasks.insert(TaskId::new("20260801-BBBBBB_1"), NodeName::new("node1"));

    assert!(remote_candidate(&task(), &nodes, &node_tasks).is_none());
}

#[test]
fn node_with_most_free_slots_wins() {
    let mut nodes = HashMap::new();
    nodes.insert(
        NodeName::new("small"),
        node(vec![test_support::machine("s-1")], true),
    );
    nodes.insert(
        NodeName::new("big"),
        node(
            vec![
                test_support::machine("b-1"),
                test_support::machine("b-2"),
                test_support::machine("b-3"),
            ],
            true,
        ),
    );

    let candidate = remote_candidate(&task(), &nodes, &HashMap::new()).unwrap();
    assert_eq!(candidate.node, "big");
}

#[test]
fn machine_tie_break_is_lru_then_name() {
    let mut fresh = test_support::machine("remote-a");
    fresh.last_used_ms = 500;
    let mut stale = test_support::machine("remote-b");
    stale.last_used_ms = 100;

    let mut nodes = HashMap::new();
    nodes.insert(NodeName::new("node1"), node(vec![fresh, stale], true));

    let candidate = remote_candidate(&task(), &nodes, &HashMap::new()).unwrap();
    assert_eq!(candidate.machine.name, "remote-b");
}

#[test]
fn any_remote_matches_ignores_connection_and_state() {
    let mut machine = test_support::machine("remote-1");
    machine.state = MachineState::Running;
    let mut nodes = HashMap::new();
    nodes.insert(NodeName::new("node1"), node(vec![machine], false));

    // Disconnected and busy still count as "could ever satisfy".
    assert!(any_remote_matches(&task(), &nodes));

    let mut other = task();
    other.platform = "linux".to_string();
    assert!(!any_remote_matches(&other, &nodes));
}
