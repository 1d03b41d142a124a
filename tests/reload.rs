// tests/reload.rs

//! Reload reconciliation tests: picking up out-of-band changes to a local
//! repository's source directory.

mod common;

use common::write_module_archive;
use modrepo::{
    AnyQuery, LocalRepository, LocalRepositoryOptions, ModuleRepository, NameQuery, Platform,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn new_repository(root: &Path) -> LocalRepository {
    LocalRepository::with_options(
        "test",
        root.join("source"),
        root.join("cache"),
        LocalRepositoryOptions {
            platform: Platform::new("linux", "x86"),
            ..LocalRepositoryOptions::default()
        },
    )
}

#[test]
fn test_reload_picks_up_new_archives() {
    let root = TempDir::new().unwrap();
    let source = root.path().join("source");
    fs::create_dir_all(&source).unwrap();
    write_module_archive(&source, "logging", "1.0.0", None);

    let repo = new_repository(root.path());
    repo.initialize().unwrap();
    assert_eq!(repo.list().unwrap().len(), 1);

    write_module_archive(&source, "net", "2.0.0", None);
    let report = repo.reload().unwrap();
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.added[0].identity().name(), "net");
    assert!(report.removed.is_empty());
    assert!(report.is_clean());
    assert_eq!(repo.list().unwrap().len(), 2);
}

#[test]
fn test_reload_drops_deleted_archives() {
    let root = TempDir::new().unwrap();
    let source = root.path().join("source");
    fs::create_dir_all(&source).unwrap();
    let kept = write_module_archive(&source, "logging", "1.0.0", None);
    let doomed = write_module_archive(&source, "net", "2.0.0", None);

    let repo = new_repository(root.path());
    repo.initialize().unwrap();

    fs::remove_file(&doomed).unwrap();
    let report = repo.reload().unwrap();
    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.removed[0].name(), "net");

    let records = repo.list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identity().name(), "logging");
    assert!(kept.is_file());
}

#[test]
fn test_reload_detects_modified_archives() {
    let root = TempDir::new().unwrap();
    let source = root.path().join("source");
    fs::create_dir_all(&source).unwrap();
    let path = write_module_archive(&source, "logging", "1.0.0", None);

    let repo = new_repository(root.path());
    repo.initialize().unwrap();
    let before = repo.list().unwrap()[0].last_modified();

    // Rewrite with a different mtime stamp
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, bytes).unwrap();

    let report = repo.reload().unwrap();
    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.added.len(), 1);
    assert_ne!(repo.list().unwrap()[0].last_modified(), before);
}

#[test]
fn test_reload_noop_when_nothing_changed() {
    let root = TempDir::new().unwrap();
    let source = root.path().join("source");
    fs::create_dir_all(&source).unwrap();
    write_module_archive(&source, "logging", "1.0.0", None);

    let repo = new_repository(root.path());
    repo.initialize().unwrap();

    let report = repo.reload().unwrap();
    assert!(report.added.is_empty());
    assert!(report.removed.is_empty());
    assert!(report.is_clean());
}

#[test]
fn test_reload_tolerates_unreadable_archive() {
    let root = TempDir::new().unwrap();
    let source = root.path().join("source");
    fs::create_dir_all(&source).unwrap();
    write_module_archive(&source, "logging", "1.0.0", None);

    let repo = new_repository(root.path());
    repo.initialize().unwrap();

    // One garbage file must not poison the scan
    fs::write(source.join("broken-0.1.0.mar"), b"definitely not a tar").unwrap();
    write_module_archive(&source, "net", "2.0.0", None);

    let report = repo.reload().unwrap();
    assert_eq!(report.added.len(), 1);
    assert!(!report.is_clean());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].subject.contains("broken"));
    assert_eq!(repo.list().unwrap().len(), 2);
}

#[test]
fn test_reload_promotes_portable_fallback() {
    let root = TempDir::new().unwrap();
    let source = root.path().join("source");
    fs::create_dir_all(&source).unwrap();
    write_module_archive(&source, "net", "1.0.0", None);
    let bound = write_module_archive(&source, "net", "1.0.0", Some(("linux", "x86")));

    let repo = new_repository(root.path());
    repo.initialize().unwrap();

    // Platform-bound variant wins while it exists
    let defs = repo.find(&NameQuery::new("net")).unwrap();
    assert_eq!(defs.len(), 1);
    assert!(!defs[0].identity().is_portable());

    // Once it disappears, reload falls back to the portable variant
    fs::remove_file(&bound).unwrap();
    let report = repo.reload().unwrap();
    assert_eq!(report.removed.len(), 1);

    let defs = repo.find(&NameQuery::new("net")).unwrap();
    assert_eq!(defs.len(), 1);
    assert!(defs[0].identity().is_portable());
}

#[test]
fn test_reload_respects_distinct_versions() {
    let root = TempDir::new().unwrap();
    let source = root.path().join("source");
    fs::create_dir_all(&source).unwrap();
    write_module_archive(&source, "net", "1.0.0", None);
    write_module_archive(&source, "net", "2.0.0", None);

    let repo = new_repository(root.path());
    repo.initialize().unwrap();

    // Different versions are different release groups; both stay visible
    let defs = repo.find(&AnyQuery).unwrap();
    assert_eq!(defs.len(), 2);
}
