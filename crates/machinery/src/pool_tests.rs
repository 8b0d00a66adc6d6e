// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cuckoo_core::test_support::{machine, machine_with};

fn task(n: u32) -> TaskId {
    TaskId::new(format!("20260801-AAAAAA_{n}"))
}

fn pool_with(machines: Vec<Machine>) -> MachinePool {
    let pool = MachinePool::new();
    pool.register(machines);
    pool
}

#[test]
fn acquire_reserves_exactly_one_machine() {
    let pool = pool_with(vec![machine("win10-1")]);
    let tags = BTreeSet::new();

    let first = pool.acquire("windows", "10", &tags, &task(1));
    assert_eq!(first.unwrap().name, "win10-1");

    // Second task cannot take the same machine.
    assert!(pool.acquire("windows", "10", &tags, &task(2)).is_none());
}

#[test]
fn acquire_is_idempotent_for_the_reservation_holder() {
    let pool = pool_with(vec![machine("win10-1")]);
    let tags = BTreeSet::new();

    assert!(pool.acquire("windows", "10", &tags, &task(1)).is_some());
    // The holder sees its own reservation as eligible.
    assert!(pool.acquire("windows", "10", &tags, &task(1)).is_some());
}

#[test]
fn acquire_prefers_least_recently_used_then_name() {
    let mut a = machine("win10-a");
    a.last_used_ms = 200;
    let mut b = machine("win10-b");
    b.last_used_ms = 100;
    let mut c = machine("win10-c");
    c.last_used_ms = 100;
    let pool = pool_with(vec![a, b, c]);
    let tags = BTreeSet::new();

    let got = pool.acquire("windows", "10", &tags, &task(1)).unwrap();
    assert_eq!(got.name, "win10-b", "lowest last_used_ms, then name");
}

#[test]
fn acquire_honors_platform_and_tags() {
    let pool = pool_with(vec![
        machine_with("win7", "windows", "7", &[]),
        machine_with("win10-dotnet", "windows", "10", &["dotnet"]),
    ]);

    let dotnet: BTreeSet<String> = ["dotnet".to_string()].into();
    let got = pool.acquire("windows", "10", &dotnet, &task(1)).unwrap();
    assert_eq!(got.name, "win10-dotnet");

    // No windows/10 machine with a missing tag.
    let pdf: BTreeSet<String> = ["adobepdf".to_string()].into();
    assert!(pool.acquire("windows", "10", &pdf, &task(2)).is_none());
}

#[test]
fn lock_requires_reservation() {
    let pool = pool_with(vec![machine("win10-1")]);
    let name = MachineName::new("win10-1");

    let err = pool.lock(&name, &task(1)).unwrap_err();
    assert!(matches!(err, PoolError::NotReservedBy { .. }));

    pool.reserve(&name, &task(1)).unwrap();
    pool.lock(&name, &task(1)).unwrap();

    // While locked, nobody else can reserve.
    let err = pool.reserve(&name, &task(2)).unwrap_err();
    assert!(matches!(err, PoolError::Locked { .. }));
}

#[test]
fn release_returns_machine_to_poweroff_and_updates_lru() {
    let pool = pool_with(vec![machine("win10-1")]);
    let name = MachineName::new("win10-1");

    pool.reserve(&name, &task(1)).unwrap();
    pool.lock(&name, &task(1)).unwrap();
    pool.mark_state(&name, MachineState::Running);

    pool.release(&name, 5_000, None);

    let m = pool.get(&name).unwrap();
    assert_eq!(m.state, MachineState::Poweroff);
    assert_eq!(m.reserved_by, None);
    assert_eq!(m.locked_by, None);
    assert_eq!(m.last_used_ms, 5_000);

    // Immediately acquirable again.
    assert!(pool.acquire("windows", "10", &BTreeSet::new(), &task(2)).is_some());
}

#[test]
fn release_with_error_disables() {
    let pool = pool_with(vec![machine("win10-1")]);
    let name = MachineName::new("win10-1");
    pool.reserve(&name, &task(1)).unwrap();

    pool.release(&name, 5_000, Some("restore failed twice"));

    let m = pool.get(&name).unwrap();
    assert_eq!(m.state, MachineState::Disabled);
    assert_eq!(m.disabled_reason.as_deref(), Some("restore failed twice"));
    assert!(pool.acquire("windows", "10", &BTreeSet::new(), &task(2)).is_none());
}

#[test]
fn any_machine_matches_ignores_availability() {
    let pool = pool_with(vec![machine("win10-1")]);
    let tags = BTreeSet::new();
    pool.disable(&MachineName::new("win10-1"), "broken");

    // Disabled machines still count for requirement satisfiability...
    assert!(pool.any_machine_matches("windows", "10", &tags));
    // ...but an unsatisfiable platform never matches.
    assert!(!pool.any_machine_matches("linux", "22.04", &tags));
}

#[test]
fn register_preserves_runtime_state_of_existing_machines() {
    let pool = pool_with(vec![machine("win10-1")]);
    let name = MachineName::new("win10-1");
    pool.reserve(&name, &task(1)).unwrap();

    // Config reload re-registers the same machine.
    pool.register(vec![machine("win10-1")]);

    assert_eq!(pool.get(&name).unwrap().reserved_by, Some(task(1)));
}
