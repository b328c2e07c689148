//! Static library packaging
//!
//! `build` compiles every library source once and archives the objects into
//! `<build>/lib<name>-<version>.a` (or `lib<name>.a` when unversioned). The
//! objects are removed afterwards whether archiving worked or not.

use crate::compiler::{BuildMode, SourceCompiler};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::invoker::{Invocation, ToolRunner};
use crate::lifecycle::{ArtifactGuard, OBJECT_GLOBS};
use std::fs;
use std::path::PathBuf;
use tracing::info;

pub struct ArtifactPackager<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn ToolRunner,
    compiler: Option<String>,
}

impl<'a> ArtifactPackager<'a> {
    pub fn new(config: &'a HarnessConfig, runner: &'a dyn ToolRunner) -> Self {
        Self {
            config,
            runner,
            compiler: None,
        }
    }

    pub fn with_compiler(mut self, compiler: Option<String>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Version-of-record, trimmed
    pub fn read_version(&self) -> Result<String> {
        let path = self.config.version_file();
        let version = fs::read_to_string(&path).map_err(|e| {
            HarnessError::Config(format!("version file {}: {}", path.display(), e))
        })?;
        let version = version.trim();
        if version.is_empty() {
            return Err(HarnessError::Config(format!(
                "version file {} is empty",
                path.display()
            )));
        }
        Ok(version.to_string())
    }

    pub fn artifact_path(&self) -> Result<PathBuf> {
        let settings = &self.config.build;
        let file_name = if settings.versioned {
            format!("lib{}-{}.a", settings.library_name, self.read_version()?)
        } else {
            format!("lib{}.a", settings.library_name)
        };
        Ok(self.config.build_dir().join(file_name))
    }

    /// Compile with `flags` and archive the objects
    pub fn build(&self, flags: Vec<String>) -> Result<PathBuf> {
        let _objects = ArtifactGuard::for_patterns(&self.config.root, "objects", OBJECT_GLOBS);

        // resolve the name before compiling so a bad version file fails fast
        let artifact = self.artifact_path()?;

        let mut compiler = SourceCompiler::new(self.config, self.runner);
        if let Some(name) = &self.compiler {
            compiler = compiler.with_compiler(name.clone());
        }
        compiler.compile_all(&BuildMode::release(flags))?;

        fs::create_dir_all(self.config.build_dir())?;
        let objects = compiler.object_files()?;
        info!("Archiving {} object(s) into {}", objects.len(), artifact.display());

        let mut invocation = Invocation::new(&self.config.toolchain.archiver)
            .arg("rcs")
            .arg_path(&artifact);
        for object in &objects {
            invocation = invocation.arg_path(object);
        }
        self.runner
            .invoke(&invocation.current_dir(&self.config.root))
            .map_err(HarnessError::into_archive)?;

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolOutput;
    use tempfile::TempDir;

    struct Refuse;

    impl ToolRunner for Refuse {
        fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput> {
            panic!("unexpected invocation {}", invocation);
        }
    }

    #[test]
    fn test_versioned_artifact_name() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("VERSION"), "1.2.0\n").unwrap();
        let config = HarnessConfig::with_root(temp.path());

        let path = ArtifactPackager::new(&config, &Refuse).artifact_path().unwrap();
        assert_eq!(path, config.build_dir().join("libcryptid-1.2.0.a"));
    }

    #[test]
    fn test_unversioned_artifact_name_ignores_version_file() {
        let temp = TempDir::new().unwrap();
        let mut config = HarnessConfig::with_root(temp.path());
        config.build.versioned = false;

        let path = ArtifactPackager::new(&config, &Refuse).artifact_path().unwrap();
        assert_eq!(path, config.build_dir().join("libcryptid.a"));
    }

    #[test]
    fn test_missing_version_fails_before_compiling() {
        let temp = TempDir::new().unwrap();
        let config = HarnessConfig::with_root(temp.path());

        let err = ArtifactPackager::new(&config, &Refuse).build(Vec::new()).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_blank_version_is_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("VERSION"), "  \n").unwrap();
        let config = HarnessConfig::with_root(temp.path());

        assert!(ArtifactPackager::new(&config, &Refuse).read_version().is_err());
    }
}
