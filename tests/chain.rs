// tests/chain.rs

//! End-to-end repository chain construction and parent delegation.

mod common;

use common::write_module_archive;
use modrepo::{
    ChainConfig, Error, LocalRepository, LocalRepositoryOptions, ModuleRepository, NameQuery,
    Platform, RepositoryEntry, RepositoryFactory, ROOT_PARENT,
};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn linux_x86() -> Platform {
    Platform::new("linux", "x86")
}

fn local_entry(name: &str, parent: &str, source: &std::path::Path, cache: &std::path::Path) -> RepositoryEntry {
    RepositoryEntry {
        name: name.to_string(),
        parent: parent.to_string(),
        source: source.to_string_lossy().into_owned(),
        kind: "local".to_string(),
        cache_dir: Some(cache.to_string_lossy().into_owned()),
        must_exist: false,
    }
}

#[test]
fn test_build_two_repository_chain() {
    let root = TempDir::new().unwrap();
    let system_src = root.path().join("system");
    let user_src = root.path().join("user");
    fs::create_dir_all(&system_src).unwrap();
    fs::create_dir_all(&user_src).unwrap();
    write_module_archive(&system_src, "base", "1.0.0", None);
    write_module_archive(&user_src, "extra", "0.1.0", None);

    let config = ChainConfig::new(vec![
        local_entry("user", "system", &user_src, &root.path().join("user-cache")),
        local_entry("system", ROOT_PARENT, &system_src, &root.path().join("sys-cache")),
    ]);
    let chain = config.build_with(linux_x86(), &HashMap::new()).unwrap();

    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].name(), "system");
    assert_eq!(chain[1].name(), "user");
    assert_eq!(chain[1].parent().unwrap().name(), "system");
}

#[test]
fn test_find_delegates_to_parent_chain() {
    let root = TempDir::new().unwrap();
    let system_src = root.path().join("system");
    let user_src = root.path().join("user");
    fs::create_dir_all(&system_src).unwrap();
    fs::create_dir_all(&user_src).unwrap();
    write_module_archive(&system_src, "base", "1.0.0", None);
    write_module_archive(&user_src, "extra", "0.1.0", None);

    let config = ChainConfig::new(vec![
        local_entry("system", ROOT_PARENT, &system_src, &root.path().join("sys-cache")),
        local_entry("user", "system", &user_src, &root.path().join("user-cache")),
    ]);
    let chain = config.build_with(linux_x86(), &HashMap::new()).unwrap();
    let user = &chain[1];

    // A query against the outermost repository sees the whole chain
    let defs = user.find(&NameQuery::new("base")).unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].repository(), "system");

    let defs = user.find(&NameQuery::new("extra")).unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].repository(), "user");

    // The root repository knows nothing of its children
    assert!(chain[0].find(&NameQuery::new("extra")).unwrap().is_empty());
}

#[test]
fn test_chain_aborts_on_first_failure() {
    let root = TempDir::new().unwrap();
    let system_src = root.path().join("system");
    fs::create_dir_all(&system_src).unwrap();

    let mut broken = local_entry(
        "user",
        "system",
        &root.path().join("does-not-exist"),
        &root.path().join("user-cache"),
    );
    broken.must_exist = true;

    let config = ChainConfig::new(vec![
        local_entry("system", ROOT_PARENT, &system_src, &root.path().join("sys-cache")),
        broken,
    ]);
    match config.build_with(linux_x86(), &HashMap::new()) {
        Err(Error::SourceUnavailableError(_)) => {}
        Err(other) => panic!("expected SourceUnavailableError, got {other:?}"),
        Ok(_) => panic!("expected SourceUnavailableError, got a built chain"),
    }
}

#[test]
fn test_unknown_kind_without_factory_rejected() {
    let root = TempDir::new().unwrap();
    let mut entry = local_entry(
        "exotic",
        ROOT_PARENT,
        root.path(),
        &root.path().join("cache"),
    );
    entry.kind = "carrier-pigeon".to_string();

    let config = ChainConfig::new(vec![entry]);
    assert!(matches!(
        config.build_with(linux_x86(), &HashMap::new()),
        Err(Error::MalformedConfigError(_))
    ));
}

#[test]
fn test_custom_factory_kind() {
    struct MirrorFactory;

    impl RepositoryFactory for MirrorFactory {
        fn create(
            &self,
            entry: &RepositoryEntry,
            parent: Option<Arc<dyn ModuleRepository>>,
            platform: &Platform,
        ) -> modrepo::Result<Arc<dyn ModuleRepository>> {
            let options = LocalRepositoryOptions {
                platform: platform.clone(),
                parent,
                force_read_only: true,
                ..LocalRepositoryOptions::default()
            };
            Ok(Arc::new(LocalRepository::with_options(
                entry.name.clone(),
                &entry.source,
                std::env::temp_dir().join(format!("mirror-{}", entry.name)),
                options,
            )))
        }
    }

    let root = TempDir::new().unwrap();
    let source = root.path().join("mirror");
    fs::create_dir_all(&source).unwrap();
    write_module_archive(&source, "base", "1.0.0", None);

    let mut entry = local_entry("mirror", ROOT_PARENT, &source, &root.path().join("cache"));
    entry.kind = "mirror".to_string();

    let mut factories: HashMap<String, Arc<dyn RepositoryFactory>> = HashMap::new();
    factories.insert("mirror".to_string(), Arc::new(MirrorFactory));

    let chain = ChainConfig::new(vec![entry])
        .build_with(linux_x86(), &factories)
        .unwrap();
    assert_eq!(chain.len(), 1);
    assert!(chain[0].is_read_only());
    assert_eq!(chain[0].find(&NameQuery::new("base")).unwrap().len(), 1);
}

#[test]
fn test_toml_chain_end_to_end() {
    let root = TempDir::new().unwrap();
    let source = root.path().join("system");
    fs::create_dir_all(&source).unwrap();
    write_module_archive(&source, "base", "1.0.0", None);

    let toml = format!(
        r#"
        [[repository]]
        name = "system"
        parent = "root"
        source = "{}"
        kind = "local"
        cache_dir = "{}"
        "#,
        source.display(),
        root.path().join("cache").display()
    );
    let chain = ChainConfig::from_toml(&toml)
        .unwrap()
        .build_with(linux_x86(), &HashMap::new())
        .unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].list().unwrap().len(), 1);
}
