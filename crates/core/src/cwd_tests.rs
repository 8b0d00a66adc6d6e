// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn create_tree_builds_the_expected_layout() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = CuckooCwd::at(dir.path());
    cwd.create_tree().unwrap();

    for sub in [
        "conf",
        "conf/machineries",
        "storage/analyses",
        "storage/binaries",
        "storage/untracked",
        "operational",
        "logs",
        "monitor",
    ] {
        assert!(dir.path().join(sub).is_dir(), "missing {sub}");
    }
}

#[test]
fn resolve_requires_conf_dir() {
    let dir = tempfile::tempdir().unwrap();
    let err = CuckooCwd::resolve(Some(dir.path().to_path_buf())).unwrap_err();
    assert!(matches!(err, CwdError::NotACwd(_, "conf/")));

    std::fs::create_dir(dir.path().join("conf")).unwrap();
    let cwd = CuckooCwd::resolve(Some(dir.path().to_path_buf())).unwrap();
    assert_eq!(cwd.root(), dir.path());
}

#[test]
fn analysis_and_task_paths_nest_by_date() {
    let cwd = CuckooCwd::at("/srv/cuckoo");
    let analysis = AnalysisId::new("20260801-A1B2C3");
    let task = TaskId::new("20260801-A1B2C3_1");

    assert_eq!(
        cwd.analysis_dir(&analysis),
        PathBuf::from("/srv/cuckoo/storage/analyses/20260801/20260801-A1B2C3")
    );
    assert_eq!(
        cwd.task_dir(&task),
        PathBuf::from("/srv/cuckoo/storage/analyses/20260801/20260801-A1B2C3/20260801-A1B2C3_1")
    );
    assert_eq!(
        cwd.untracked_marker(&analysis),
        PathBuf::from("/srv/cuckoo/storage/untracked/20260801-A1B2C3")
    );
}

#[test]
fn operational_paths() {
    let cwd = CuckooCwd::at("/srv/cuckoo");
    assert_eq!(
        cwd.state_db_path(),
        PathBuf::from("/srv/cuckoo/operational/taskqueue.db")
    );
    assert_eq!(
        cwd.state_wal_path(),
        PathBuf::from("/srv/cuckoo/operational/taskqueue.wal")
    );
    assert_eq!(
        cwd.rooter_socket(),
        PathBuf::from("/srv/cuckoo/operational/rooter.sock")
    );
}
