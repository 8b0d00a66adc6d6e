// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sha2::{Digest, Sha256};

fn store(dir: &Path) -> BinaryStore {
    BinaryStore::new(dir.join("binaries")).with_size_limits(4, 1024)
}

#[test]
fn put_file_is_content_addressed_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let sample = dir.path().join("sample.bin");
    std::fs::write(&sample, b"hello cuckoo").unwrap();

    let digest = store.put_file(&sample).unwrap();
    let expected = format!("{:x}", Sha256::digest(b"hello cuckoo"));
    assert_eq!(digest, expected);

    // Second put returns the same digest and leaves exactly one blob.
    let again = store.put_file(&sample).unwrap();
    assert_eq!(again, digest);

    let blob = store.path_of(&digest);
    assert!(blob.exists());
    assert_eq!(
        blob.parent().unwrap().file_name().unwrap().to_str().unwrap(),
        &digest[1..2]
    );
    let count = walk_files(&dir.path().join("binaries"));
    assert_eq!(count, 1);
}

#[test]
fn size_limits_are_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let tiny = dir.path().join("tiny");
    std::fs::write(&tiny, b"ab").unwrap();
    assert!(matches!(
        store.put_file(&tiny),
        Err(BinaryStoreError::TooSmall { got: 2, min: 4 })
    ));

    let huge = dir.path().join("huge");
    std::fs::write(&huge, vec![0u8; 2048]).unwrap();
    assert!(matches!(
        store.put_file(&huge),
        Err(BinaryStoreError::TooLarge { got: 2048, .. })
    ));
}

#[test]
fn put_bytes_matches_put_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let digest = store.put_bytes(b"some payload").unwrap();
    assert!(store.contains(&digest));

    let mut content = String::new();
    use std::io::Read as _;
    store.open(&digest).unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "some payload");
}

#[test]
fn open_missing_blob_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let missing = "0".repeat(64);
    assert!(matches!(
        store.open(&missing),
        Err(BinaryStoreError::NotFound(_))
    ));
}

fn walk_files(root: &Path) -> usize {
    let mut count = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            if entry.path().is_dir() {
                stack.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    count
}
