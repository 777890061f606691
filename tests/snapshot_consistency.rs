//! Integration tests for publishing and resyncing snapshots.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use launch_server::state::{DigestAlgorithm, DigestNode, ServerKeyPair, SnapshotStore};
use launch_server::ServerError;

fn store(root: &Path) -> SnapshotStore {
    fs::create_dir_all(root.join("updates")).unwrap();
    fs::create_dir_all(root.join("profiles")).unwrap();
    SnapshotStore::new(
        root.join("updates"),
        root.join("profiles"),
        DigestAlgorithm::Sha256,
        Arc::new(ServerKeyPair::from_seed(&[42; 32])),
    )
}

fn write(root: &Path, rel: &str, data: &[u8]) {
    let path = root.join("updates").join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

fn names(set: &[&str]) -> HashSet<String> {
    set.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_empty_changed_set_reuses_every_envelope() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    write(tmp.path(), "A/file.bin", b"alpha");
    write(tmp.path(), "B/file.bin", b"beta");

    let first = store.resync(None).unwrap();
    assert_eq!(first.rehashed, vec!["A", "B"]);
    let before = store.current();

    let second = store.resync(Some(&HashSet::new())).unwrap();
    assert!(second.rehashed.is_empty());
    assert_eq!(second.reused, vec!["A", "B"]);
    assert_eq!(second.generation, first.generation + 1);

    let after = store.current();
    for name in ["A", "B"] {
        assert!(Arc::ptr_eq(
            before.update(name).unwrap(),
            after.update(name).unwrap()
        ));
    }
}

#[test]
fn test_full_resync_picks_up_content_changes() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    write(tmp.path(), "A/file.bin", b"v1");
    store.resync(None).unwrap();
    let keys = store.keys().clone();
    let old: DigestNode = store.current().update("A").unwrap().open(keys.verifying_key()).unwrap();

    write(tmp.path(), "A/file.bin", b"v2");

    // Listed as unchanged: the stale tree is kept.
    store.resync(Some(&names(&["B"]))).unwrap();
    let kept: DigestNode = store.current().update("A").unwrap().open(keys.verifying_key()).unwrap();
    assert_eq!(kept.digest, old.digest);

    store.resync(None).unwrap();
    let fresh: DigestNode = store.current().update("A").unwrap().open(keys.verifying_key()).unwrap();
    assert_ne!(fresh.digest, old.digest);
    assert_eq!(fresh.find("file.bin").unwrap().size, 2);
}

#[test]
fn test_deleted_set_disappears_even_when_not_listed() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    write(tmp.path(), "A/a.txt", b"a");
    write(tmp.path(), "B/b.txt", b"b");
    store.resync(None).unwrap();

    fs::remove_dir_all(tmp.path().join("updates/B")).unwrap();
    let report = store.resync(Some(&HashSet::new())).unwrap();

    assert_eq!(report.removed, vec!["B"]);
    assert_eq!(report.reused, vec!["A"]);
    let snapshot = store.current();
    assert!(snapshot.update("B").is_none());
    assert_eq!(snapshot.update_names().collect::<Vec<_>>(), vec!["A"]);
}

#[test]
fn test_new_set_is_hashed_even_when_not_listed() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    write(tmp.path(), "A/a.txt", b"a");
    store.resync(None).unwrap();

    write(tmp.path(), "C/c.txt", b"c");
    let report = store.resync(Some(&HashSet::new())).unwrap();
    assert_eq!(report.rehashed, vec!["C"]);
    assert!(store.current().update("C").is_some());
}

#[test]
fn test_failed_resync_keeps_previous_generation() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    write(tmp.path(), "A/a.txt", b"a");
    let published = store.resync(None).unwrap().generation;

    fs::write(tmp.path().join("profiles/broken.toml"), "title = ").unwrap();
    write(tmp.path(), "A/a.txt", b"changed");
    assert!(matches!(store.resync(None), Err(ServerError::ConfigError(_))));

    let snapshot = store.current();
    assert_eq!(snapshot.generation(), published);
    let tree: DigestNode = snapshot
        .update("A")
        .unwrap()
        .open(store.keys().verifying_key())
        .unwrap();
    assert_eq!(tree.find("a.txt").unwrap().size, 1);
}

#[test]
fn test_readers_never_observe_mixed_generations() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(store(tmp.path()));
    write(tmp.path(), "A/a.txt", b"0");
    store.resync(None).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        readers.push(std::thread::spawn(move || {
            let key = *store.keys().verifying_key();
            let mut last = 0;
            let mut reads = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let snapshot = store.current();
                assert!(snapshot.generation() >= last);
                last = snapshot.generation();

                // Every set in one snapshot holds the same round number.
                let sizes: HashSet<u64> = snapshot
                    .updates()
                    .values()
                    .map(|e| e.open(&key).unwrap().total_size())
                    .collect();
                assert!(sizes.len() <= 1, "mixed snapshot: {sizes:?}");
                reads += 1;
            }
            reads
        }));
    }

    for round in 1..=20usize {
        let content = vec![b'x'; round];
        write(tmp.path(), "A/a.txt", &content);
        write(tmp.path(), "B/b.txt", &content);
        store.resync(None).unwrap();
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(store.current().generation(), 21);
}

#[test]
fn test_signature_covers_published_tree() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    write(tmp.path(), "A/a.txt", b"a");
    store.resync(None).unwrap();

    let stranger = ServerKeyPair::from_seed(&[7; 32]);
    let envelope = store.current().update("A").unwrap().clone();
    assert!(matches!(
        envelope.open(stranger.verifying_key()),
        Err(ServerError::VerificationFailure)
    ));
    assert!(envelope.verify(store.keys().verifying_key()));
}
