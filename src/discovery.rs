//! Component and source discovery
//!
//! A component is named after its test source file with the test extension
//! stripped (`Hash.test.c` -> `Hash`). Discovery order is file-name order so
//! that runs are reproducible.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A discovered test component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub source: PathBuf,
}

/// Find every component under the test source directory
pub fn discover_components(config: &HarnessConfig) -> Result<Vec<Component>> {
    let extension = &config.paths.test_extension;
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut components = Vec::new();

    for path in walk_files(&config.test_source_dir(), extension)? {
        let Some(name) = component_name(&path, extension) else {
            continue;
        };

        if let Some(first) = seen.get(&name) {
            return Err(HarnessError::DuplicateComponent {
                name,
                first: first.clone(),
                second: path,
            });
        }
        seen.insert(name.clone(), path.clone());
        components.push(Component { name, source: path });
    }

    tracing::info!(
        "Discovered {} components: {}",
        components.len(),
        components
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    );

    Ok(components)
}

/// Names of every discovered component, in discovery order
pub fn discover_component_names(config: &HarnessConfig) -> Result<Vec<String>> {
    Ok(discover_components(config)?
        .into_iter()
        .map(|c| c.name)
        .collect())
}

/// Test source of `component`: the conventional flat path when present,
/// otherwise the discovered file of that name in a subdirectory
pub fn locate_component(config: &HarnessConfig, component: &str) -> Result<Option<PathBuf>> {
    let flat = config.component_source(component);
    if flat.is_file() {
        return Ok(Some(flat));
    }
    Ok(discover_components(config)?
        .into_iter()
        .find(|c| c.name == component)
        .map(|c| c.source))
}

/// Use the requested components, or all of them when none were requested
pub fn resolve_components(config: &HarnessConfig, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        discover_component_names(config)
    } else {
        Ok(requested.to_vec())
    }
}

/// Library and vendored sources handed to the compiler, library first
pub fn library_sources(config: &HarnessConfig) -> Result<Vec<PathBuf>> {
    let extension = &config.paths.source_extension;
    let mut sources = walk_files(&config.source_dir(), extension)?;
    for dir in config.third_party_source_dirs() {
        sources.extend(walk_files(&dir, extension)?);
    }
    Ok(sources)
}

/// Files directly in `dir` whose name ends in `extension`, non-recursive
pub fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    collect(WalkDir::new(dir).min_depth(1).max_depth(1), extension)
}

fn walk_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    // A missing vendored directory simply contributes nothing
    if !dir.exists() {
        return Ok(Vec::new());
    }
    collect(WalkDir::new(dir), extension)
}

fn collect(walker: WalkDir, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walker.sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.file_name().to_string_lossy().ends_with(extension)
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn component_name(path: &Path, extension: &str) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let name = file_name.strip_suffix(extension)?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_name_strips_test_extension() {
        assert_eq!(
            component_name(Path::new("/p/test/src/TatePairing.test.c"), ".test.c"),
            Some("TatePairing".to_string())
        );
        assert_eq!(component_name(Path::new("/p/.test.c"), ".test.c"), None);
        assert_eq!(component_name(Path::new("/p/Helper.c"), ".test.c"), None);
    }

    #[test]
    fn test_resolve_keeps_requested_order() {
        let config = HarnessConfig::with_root("/does/not/matter");
        let requested = vec!["Pairing".to_string(), "Hash".to_string()];
        assert_eq!(resolve_components(&config, &requested).unwrap(), requested);
    }
}
