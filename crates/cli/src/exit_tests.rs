// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn config_errors_exit_one() {
    let err = anyhow::Error::new(ConfigError::Missing("conf/cuckoo.toml".to_string()));
    assert_eq!(code_for(&err), 1);

    let err = anyhow::Error::new(LifecycleError::Config(ConfigError::Invalid(
        "bad".to_string(),
    )));
    assert_eq!(code_for(&err), 1);
}

#[test]
fn cwd_errors_exit_one() {
    let err = anyhow::Error::new(cuckoo_core::CwdError::Missing("/nope".into()));
    assert_eq!(code_for(&err), 1);
}

#[test]
fn machinery_config_errors_exit_one() {
    let err = anyhow::Error::new(cuckoo_machinery::MachineryConfError::UnknownMachinery(
        "vmware".to_string(),
    ));
    assert_eq!(code_for(&err), 1);
}

#[test]
fn runtime_errors_exit_two() {
    let err = anyhow::anyhow!("the hypervisor caught fire");
    assert_eq!(code_for(&err), 2);

    let err = anyhow::Error::new(LifecycleError::LockFailed("pid".to_string()));
    assert_eq!(code_for(&err), 2);
}

#[test]
fn wrapped_config_errors_are_still_found() {
    let err = anyhow::Error::new(ConfigError::Invalid("x".to_string()))
        .context("while starting the daemon");
    assert_eq!(code_for(&err), 1);
}
