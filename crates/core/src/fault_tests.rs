// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn display_includes_kind_and_message() {
    let fault = Fault::new(ErrorKind::RouteError, "rooter socket missing");
    assert_eq!(fault.to_string(), "route_error: rooter socket missing");
}

#[test]
fn transient_classification() {
    assert!(Fault::new(ErrorKind::MachineryTransient, "").is_transient());
    assert!(Fault::new(ErrorKind::NodeUnreachable, "").is_transient());
    assert!(!Fault::new(ErrorKind::MachineryFatal, "").is_transient());
    assert!(!Fault::new(ErrorKind::ConfigInvalid, "").is_transient());
}

#[test]
fn serde_round_trip() {
    let fault = Fault::new(ErrorKind::NoMatchingMachine, "linux/22.04");
    let json = serde_json::to_string(&fault).unwrap();
    assert!(json.contains("no_matching_machine"));
    let back: Fault = serde_json::from_str(&json).unwrap();
    assert_eq!(back, fault);
}
