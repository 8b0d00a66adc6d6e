// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn creates_tree_and_default_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cwd");

    run(
        None,
        CreatecwdArgs {
            path: Some(path.clone()),
            regen_configs: false,
        },
    )
    .unwrap();

    assert!(path.join("conf/cuckoo.toml").is_file());
    assert!(path.join("storage/analyses").is_dir());
    assert!(path.join("storage/binaries").is_dir());
    assert!(path.join("storage/untracked").is_dir());
    assert!(path.join("operational").is_dir());
    assert!(path.join("logs").is_dir());
}

#[test]
fn refuses_existing_cwd_without_regen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cwd");
    let args = || CreatecwdArgs {
        path: Some(path.clone()),
        regen_configs: false,
    };

    run(None, args()).unwrap();
    let err = run(None, args()).unwrap_err();
    assert!(err.to_string().contains("already"));

    // --regen-configs rewrites in place.
    run(
        None,
        CreatecwdArgs {
            path: Some(path.clone()),
            regen_configs: true,
        },
    )
    .unwrap();
}

#[test]
fn needs_a_target_directory() {
    // No path, no global cwd; CUCKOO_CWD may be set by the environment,
    // in which case this test is vacuous.
    if std::env::var_os(cuckoo_core::cwd::CWD_ENV).is_none() {
        let err = run(
            None,
            CreatecwdArgs {
                path: None,
                regen_configs: false,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("no directory"));
    }
}
