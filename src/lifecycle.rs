//! Lifecycle Management for Transient Artifacts
//!
//! Object files, test executables and coverage counters only live for the
//! duration of one command. `ArtifactGuard` removes them on Drop, so cleanup
//! runs on every exit path (return, early `?`, panic).
//!
//! Removal inside a guard is best-effort: a failure is logged and swallowed
//! so it never masks the outcome of the pipeline it protects.

use crate::config::HarnessConfig;
use crate::discovery::discover_component_names;
use crate::error::{HarnessError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Artifacts produced while compiling and linking in the project root
pub const OBJECT_GLOBS: &[&str] = &["*.o"];
/// Coverage counters written next to the objects
pub const COUNTER_GLOBS: &[&str] = &["*.gcda", "*.gcno"];
/// Objects and counters `clean` removes from the file tree. Executables
/// follow the configured extension, see `clean`.
pub const CLEAN_GLOBS: &[&str] = &["**/*.o", "*.gcno", "*.gcda"];

/// Removes files matching glob patterns (relative to a root) and explicit
/// paths when dropped
pub struct ArtifactGuard {
    root: PathBuf,
    patterns: Vec<String>,
    paths: Vec<PathBuf>,
    label: &'static str,
}

impl ArtifactGuard {
    pub fn new(root: &Path, label: &'static str) -> Self {
        Self {
            root: root.to_path_buf(),
            patterns: Vec::new(),
            paths: Vec::new(),
            label,
        }
    }

    /// Guard over glob patterns evaluated relative to `root`
    pub fn for_patterns(root: &Path, label: &'static str, patterns: &[&str]) -> Self {
        let mut guard = Self::new(root, label);
        guard.patterns = patterns.iter().map(|p| p.to_string()).collect();
        guard
    }

    /// Guard over a single file
    pub fn for_path(path: &Path, label: &'static str) -> Self {
        let root = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let mut guard = Self::new(&root, label);
        guard.paths.push(path.to_path_buf());
        guard
    }

    pub fn track_pattern(&mut self, pattern: impl Into<String>) {
        self.patterns.push(pattern.into());
    }

    pub fn track_path(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Remove everything now; Drop repeats this and finds nothing left
    pub fn release(&mut self) -> usize {
        let mut removed = 0;

        for path in &self.paths {
            match remove_file_if_exists(path) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("[{}] {}", self.label, e),
            }
        }

        if !self.patterns.is_empty() {
            let patterns: Vec<&str> = self.patterns.iter().map(String::as_str).collect();
            match matching_files(&self.root, &patterns) {
                Ok(files) => {
                    let sweep = remove_each(&files);
                    for e in &sweep.failures {
                        warn!("[{}] {}", self.label, e);
                    }
                    removed += sweep.removed;
                }
                Err(e) => warn!("[{}] cleanup failed: {}", self.label, e),
            }
        }

        removed
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Files under `root` matching any of `patterns`, sorted and de-duplicated
pub fn matching_files(root: &Path, patterns: &[&str]) -> Result<Vec<PathBuf>> {
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let mut files = Vec::new();

    for pattern in patterns {
        let full = format!("{}/{}", escaped_root, pattern);
        let paths = glob::glob(&full).map_err(|e| HarnessError::Pattern {
            pattern: pattern.to_string(),
            message: e.msg.to_string(),
        })?;
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!("unreadable path while matching {}: {}", pattern, e),
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Outcome of removing a list of files
#[derive(Debug, Default)]
pub struct Sweep {
    pub removed: usize,
    pub failures: Vec<HarnessError>,
}

/// Try every file; one that cannot be removed does not stop the rest
pub fn remove_each(files: &[PathBuf]) -> Sweep {
    let mut sweep = Sweep::default();
    for file in files {
        match remove_file_if_exists(file) {
            Ok(true) => sweep.removed += 1,
            Ok(false) => {}
            Err(e) => sweep.failures.push(e),
        }
    }
    sweep
}

/// Delete every file under `root` matching `patterns`; returns the count.
///
/// Every match is attempted. The first removal failure is returned after
/// the others were logged.
pub fn remove_files(root: &Path, patterns: &[&str]) -> Result<usize> {
    info!("Removing files using globs: {}", patterns.join(", "));

    let files = matching_files(root, patterns)?;
    info!("\t{} file(s) matched", files.len());

    let mut failures = remove_each(&files).failures.into_iter();
    match failures.next() {
        Some(first) => {
            for e in failures {
                warn!("{}", e);
            }
            Err(first)
        }
        None => Ok(files.len()),
    }
}

/// Returns whether a file was actually removed
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(HarnessError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Returns whether a directory was actually removed
pub fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(HarnessError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Replace `dir` with a fresh empty directory
pub fn recreate_dir(dir: &Path) -> Result<()> {
    remove_dir_if_exists(dir)?;
    fs::create_dir_all(dir)?;
    Ok(())
}

/// What `clean` removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanSummary {
    pub files: usize,
    pub directories: usize,
}

impl CleanSummary {
    pub fn is_empty(&self) -> bool {
        self.files == 0 && self.directories == 0
    }
}

/// Remove all generated build, coverage, result and transient artifacts.
/// Running it again immediately is a no-op that reports zero.
pub fn clean(config: &HarnessConfig) -> Result<CleanSummary> {
    let mut patterns: Vec<String> = CLEAN_GLOBS.iter().map(|p| p.to_string()).collect();
    let extension = &config.paths.executable_extension;
    // an empty extension would match every file; fall back to exact paths
    if !extension.is_empty() {
        patterns.push(format!("**/*{}", glob::Pattern::escape(extension)));
    }
    let patterns: Vec<&str> = patterns.iter().map(String::as_str).collect();

    let mut summary = CleanSummary {
        files: remove_files(&config.root, &patterns)?,
        directories: 0,
    };

    if extension.is_empty() {
        let components = discover_component_names(config).unwrap_or_else(|e| {
            warn!("cannot list components for cleanup: {}", e);
            Vec::new()
        });
        let executables: Vec<PathBuf> = components
            .iter()
            .map(|c| config.executable_path(c))
            .filter(|p| p.is_file())
            .collect();
        let sweep = remove_each(&executables);
        summary.files += sweep.removed;
        if let Some(first) = sweep.failures.into_iter().next() {
            return Err(first);
        }
    }

    for dir in config.output_directories() {
        if remove_dir_if_exists(&dir)? {
            info!("Removed {}", dir.display());
            summary.directories += 1;
        }
    }

    Ok(summary)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_guard_removes_matching_files_on_drop() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("a.o"));
        touch(&temp.path().join("b.o"));
        touch(&temp.path().join("keep.c"));

        {
            let _guard = ArtifactGuard::for_patterns(temp.path(), "objects", OBJECT_GLOBS);
        }

        assert!(!temp.path().join("a.o").exists());
        assert!(!temp.path().join("b.o").exists());
        assert!(temp.path().join("keep.c").exists());
    }

    #[test]
    fn test_guard_runs_on_panic() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("Hash.out");
        touch(&exe);

        let result = std::panic::catch_unwind(|| {
            let _guard = ArtifactGuard::for_path(&exe, "executable");
            panic!("mid-pipeline failure");
        });

        assert!(result.is_err());
        assert!(!exe.exists());
    }

    #[test]
    fn test_release_counts_and_drop_is_idempotent() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("x.gcda"));
        touch(&temp.path().join("x.gcno"));

        let mut guard = ArtifactGuard::for_patterns(temp.path(), "counters", COUNTER_GLOBS);
        assert_eq!(guard.release(), 2);
        assert_eq!(guard.release(), 0);
    }

    #[test]
    fn test_tracked_paths_and_patterns_combine() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("one.o"));
        touch(&temp.path().join("lonely.info"));

        let mut guard = ArtifactGuard::new(temp.path(), "mixed");
        guard.track_pattern("*.o");
        guard.track_path(temp.path().join("lonely.info"));
        assert_eq!(guard.release(), 2);
    }

    #[test]
    fn test_matching_files_recurses_with_double_star() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("top.o"));
        touch(&temp.path().join("nested/deep/inner.o"));

        let flat = matching_files(temp.path(), &["*.o"]).unwrap();
        assert_eq!(flat.len(), 1);

        let deep = matching_files(temp.path(), &["**/*.o"]).unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn test_matching_files_escapes_root() {
        let temp = TempDir::new().unwrap();
        let odd_root = temp.path().join("we[ir]d");
        touch(&odd_root.join("a.o"));

        assert_eq!(matching_files(&odd_root, &["*.o"]).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let temp = TempDir::new().unwrap();
        let err = matching_files(temp.path(), &["***"]).unwrap_err();
        assert!(matches!(err, HarnessError::Pattern { .. }));
    }

    #[test]
    fn test_clean_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let config = HarnessConfig::with_root(temp.path());
        touch(&temp.path().join("a.o"));
        touch(&temp.path().join("Hash.out"));
        touch(&temp.path().join("a.gcno"));
        touch(&config.results_dir().join("Hash.xml"));
        touch(&config.merged_coverage_file());

        let first = clean(&config).unwrap();
        assert_eq!(first.files, 3);
        assert_eq!(first.directories, 2);

        let second = clean(&config).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_remove_each_continues_past_failures() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.o");
        let b = temp.path().join("b.o");
        // unlinking a directory fails even for root
        let stuck = temp.path().join("stuck.o");
        touch(&a);
        touch(&b);
        fs::create_dir(&stuck).unwrap();

        let sweep = remove_each(&[a.clone(), stuck.clone(), b.clone()]);
        assert_eq!(sweep.removed, 2);
        assert_eq!(sweep.failures.len(), 1);
        assert!(matches!(sweep.failures[0], HarnessError::Cleanup { ref path, .. } if path == &stuck));
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn test_guard_removes_remaining_paths_after_failure() {
        let temp = TempDir::new().unwrap();
        let stuck = temp.path().join("Hash.out");
        fs::create_dir(&stuck).unwrap();
        let exe = temp.path().join("Pairing.out");
        touch(&exe);

        let mut guard = ArtifactGuard::new(temp.path(), "executables");
        guard.track_path(stuck);
        guard.track_path(exe.clone());
        assert_eq!(guard.release(), 1);
        assert!(!exe.exists());
    }

    #[test]
    fn test_clean_follows_configured_extension() {
        let temp = TempDir::new().unwrap();
        let mut config = HarnessConfig::with_root(temp.path());
        config.paths.executable_extension = ".exe".to_string();
        touch(&temp.path().join("Hash.exe"));
        touch(&temp.path().join("notes.out"));

        assert_eq!(clean(&config).unwrap().files, 1);
        assert!(!temp.path().join("Hash.exe").exists());
        assert!(temp.path().join("notes.out").exists());
    }

    #[test]
    fn test_clean_without_extension_removes_only_component_executables() {
        let temp = TempDir::new().unwrap();
        let mut config = HarnessConfig::with_root(temp.path());
        config.paths.executable_extension = String::new();
        touch(&config.component_source("Hash"));
        touch(&temp.path().join("Hash"));
        touch(&temp.path().join("VERSION"));
        touch(&temp.path().join("Makefile"));

        assert_eq!(clean(&config).unwrap().files, 1);
        assert!(!temp.path().join("Hash").exists());
        assert!(temp.path().join("VERSION").exists());
        assert!(temp.path().join("Makefile").exists());
        assert!(config.component_source("Hash").exists());
    }

    #[test]
    fn test_recreate_dir_empties_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("memcheck");
        touch(&dir.join("stale.xml"));

        recreate_dir(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }
}
