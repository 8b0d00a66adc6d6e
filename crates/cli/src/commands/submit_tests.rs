// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn common(target: &str) -> SubmitCommon {
    SubmitCommon {
        target: target.to_string(),
        timeout: None,
        priority: None,
        platforms: vec![],
        route: None,
        country: None,
        manual: false,
    }
}

#[parameterized(
    simple = { "windows/10", "windows", "10" },
    dotted = { "linux/22.04", "linux", "22.04" },
)]
fn platform_parsing(raw: &str, platform: &str, os_version: &str) {
    let parsed = parse_platform(raw).unwrap();
    assert_eq!(parsed.platform, platform);
    assert_eq!(parsed.os_version, os_version);
}

#[test]
fn malformed_platform_is_rejected() {
    assert!(parse_platform("windows10").is_err());
}

#[test]
fn settings_assemble_from_flags() {
    let mut c = common("sample.exe");
    c.timeout = Some(60);
    c.priority = Some(5);
    c.platforms = vec!["windows/10".to_string(), "windows/7".to_string()];
    c.route = Some("vpn".to_string());
    c.country = Some("ee".to_string());
    c.manual = true;

    let settings = build_settings(&c).unwrap();
    assert_eq!(settings.timeout, 60);
    assert_eq!(settings.priority, 5);
    assert_eq!(settings.platforms.len(), 2);
    assert_eq!(settings.route.kind, RouteKind::Vpn);
    assert_eq!(settings.route.country.as_deref(), Some("ee"));
    assert!(settings.manual);
}

#[test]
fn unknown_route_is_rejected() {
    let mut c = common("sample.exe");
    c.route = Some("tor".to_string());
    let err = build_settings(&c).unwrap_err();
    assert!(err.to_string().contains("unknown route"));
}

#[test]
fn defaults_apply_when_flags_are_absent() {
    let settings = build_settings(&common("sample.exe")).unwrap();
    assert_eq!(settings.timeout, Settings::default().timeout);
    assert_eq!(settings.priority, 1);
    assert!(settings.platforms.is_empty());
    assert_eq!(settings.route.kind, RouteKind::None);
}

#[test]
fn end_to_end_file_submission_into_a_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let cwd_path = dir.path().join("cwd");
    crate::commands::createcwd::run(
        None,
        crate::commands::createcwd::CreatecwdArgs {
            path: Some(cwd_path.clone()),
            regen_configs: false,
        },
    )
    .unwrap();

    let sample = dir.path().join("sample.exe");
    std::fs::write(&sample, vec![b'M'; 200]).unwrap();

    run(
        Some(cwd_path.clone()),
        SubmitArgs {
            target: SubmitTarget::File(common(sample.to_str().unwrap())),
        },
    )
    .unwrap();

    // Exactly one untracked sentinel exists.
    let markers: Vec<_> = std::fs::read_dir(cwd_path.join("storage/untracked"))
        .unwrap()
        .collect();
    assert_eq!(markers.len(), 1);
}
