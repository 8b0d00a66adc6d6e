// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use yare::parameterized;

#[test]
fn analysis_id_has_date_and_six_base36_chars() {
    let clock = FakeClock::new();
    clock.set_date("20260801");
    let id = AnalysisId::generate(&clock);

    assert!(AnalysisId::is_valid(id.as_str()), "{id}");
    assert_eq!(id.date_segment(), "20260801");
    assert_eq!(id.as_str().len(), 8 + 1 + 6);
}

#[parameterized(
    ok = { "20260801-A1B2C3", true },
    digits_only = { "20260801-000000", true },
    lowercase = { "20260801-a1b2c3", false },
    short_suffix = { "20260801-A1B2", false },
    no_dash = { "20260801A1B2C3", false },
    short_date = { "2026081-A1B2C3", false },
    alpha_date = { "2026O801-A1B2C3", false },
)]
fn analysis_id_validation(input: &str, expected: bool) {
    assert_eq!(AnalysisId::is_valid(input), expected);
}

#[test]
fn task_id_round_trips_analysis_and_number() {
    let analysis = AnalysisId::new("20260801-A1B2C3");
    let task = TaskId::for_analysis(&analysis, 2);

    assert_eq!(task.as_str(), "20260801-A1B2C3_2");
    assert_eq!(task.analysis_id(), analysis);
    assert_eq!(task.number(), Some(2));
}

#[test]
fn short_truncates_only_when_longer() {
    assert_eq!("abcdef".short(4), "abcd");
    assert_eq!("ab".short(4), "ab");
}

#[test]
fn generated_ids_differ() {
    let clock = FakeClock::new();
    let a = AnalysisId::generate(&clock);
    let b = AnalysisId::generate(&clock);
    // Six base-36 chars; a collision here would be a broken RNG.
    assert_ne!(a, b);
}
