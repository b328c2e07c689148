//! Integration tests for component and source discovery

use cryptid_harness::config::HarnessConfig;
use cryptid_harness::discovery::{
    discover_component_names, discover_components, library_sources, locate_component,
    resolve_components,
};
use cryptid_harness::error::HarnessError;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "").unwrap();
}

#[test]
fn test_discover_in_file_name_order() {
    let temp = TempDir::new().unwrap();
    for name in ["Pairing", "Hash", "CryptID", "Complex"] {
        write(temp.path(), &format!("test/src/{}.test.c", name));
    }
    let config = HarnessConfig::with_root(temp.path());

    assert_eq!(
        discover_component_names(&config).unwrap(),
        vec!["Complex", "CryptID", "Hash", "Pairing"]
    );
}

#[test]
fn test_discover_ignores_non_test_files() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "test/src/Hash.test.c");
    write(temp.path(), "test/src/helpers.c");
    write(temp.path(), "test/src/README.md");
    write(temp.path(), "test/src/Hash.test.c.orig");
    let config = HarnessConfig::with_root(temp.path());

    let components = discover_components(&config).unwrap();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].name, "Hash");
    assert_eq!(components[0].source, temp.path().join("test/src/Hash.test.c"));
}

#[test]
fn test_discover_missing_test_directory_is_empty() {
    let temp = TempDir::new().unwrap();
    let config = HarnessConfig::with_root(temp.path());
    assert!(discover_components(&config).unwrap().is_empty());
}

#[test]
fn test_duplicate_names_are_rejected() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "test/src/Hash.test.c");
    write(temp.path(), "test/src/legacy/Hash.test.c");
    let config = HarnessConfig::with_root(temp.path());

    let err = discover_components(&config).unwrap_err();
    assert!(matches!(err, HarnessError::DuplicateComponent { ref name, .. } if name == "Hash"));
}

#[test]
fn test_nested_component_is_located() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "test/src/Hash.test.c");
    write(temp.path(), "test/src/ibe/SignID.test.c");
    let config = HarnessConfig::with_root(temp.path());

    assert_eq!(
        locate_component(&config, "SignID").unwrap(),
        Some(temp.path().join("test/src/ibe/SignID.test.c"))
    );
    assert_eq!(
        locate_component(&config, "Hash").unwrap(),
        Some(temp.path().join("test/src/Hash.test.c"))
    );
    assert_eq!(locate_component(&config, "Ghost").unwrap(), None);
}

#[test]
fn test_custom_test_extension() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "tests/Hash_test.c");
    let mut config = HarnessConfig::parse(
        "[paths]\ntest_source_dir = \"tests\"\ntest_extension = \"_test.c\"\n",
    )
    .unwrap();
    config.root = temp.path().to_path_buf();

    assert_eq!(discover_component_names(&config).unwrap(), vec!["Hash"]);
}

#[test]
fn test_library_sources_include_vendored_after_library() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "src/Pairing.c");
    write(temp.path(), "src/elliptic/Curve.c");
    write(temp.path(), "src/CryptID.h");
    write(temp.path(), "third-party/src/sha.c");
    let config = HarnessConfig::with_root(temp.path());

    let sources: Vec<String> = library_sources(&config)
        .unwrap()
        .iter()
        .map(|p| p.strip_prefix(temp.path()).unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        sources,
        vec!["src/Pairing.c", "src/elliptic/Curve.c", "third-party/src/sha.c"]
    );
}

#[test]
fn test_requested_components_win_over_discovery() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "test/src/Hash.test.c");
    write(temp.path(), "test/src/Pairing.test.c");
    let config = HarnessConfig::with_root(temp.path());

    let requested = vec!["Pairing".to_string()];
    assert_eq!(resolve_components(&config, &requested).unwrap(), requested);
    assert_eq!(
        resolve_components(&config, &[]).unwrap(),
        vec!["Hash", "Pairing"]
    );
}
