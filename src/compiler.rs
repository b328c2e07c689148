//! Compilation and linking
//!
//! `SourceCompiler` turns every library and vendored source into an object
//! file in the project root with a single compiler invocation.
//! `TestExecutableBuilder` links one component's test source against all
//! objects currently present. Both consume the same `BuildMode`, so plain,
//! coverage and memcheck runs differ only in data, not in code path.

use crate::config::HarnessConfig;
use crate::discovery::{files_with_extension, library_sources, locate_component};
use crate::error::{HarnessError, Result};
use crate::invoker::{Invocation, ToolRunner};
use std::path::PathBuf;
use tracing::info;

/// Flags that make executables emit gcov counters
pub const INSTRUMENTATION_FLAGS: &[&str] = &["-fprofile-arcs", "-ftest-coverage"];
pub const DEBUG_FLAG: &str = "-g";

/// How sources are compiled and executables linked for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildMode {
    pub debug_symbols: bool,
    pub instrumented: bool,
    /// Feature defines, without the `-D` prefix
    pub extra_defines: Vec<String>,
    /// Raw flags appended last, able to override anything before them
    pub extra_flags: Vec<String>,
}

impl BuildMode {
    /// Plain test run: debug symbols, no instrumentation
    pub fn test() -> Self {
        Self {
            debug_symbols: true,
            ..Self::default()
        }
    }

    /// Coverage run: debug symbols plus gcov instrumentation
    pub fn coverage() -> Self {
        Self {
            debug_symbols: true,
            instrumented: true,
            ..Self::default()
        }
    }

    /// Memory-check run: debug symbols so the analyzer can attribute frames
    pub fn memcheck() -> Self {
        Self::test()
    }

    /// Library build with caller-supplied compiler flags
    pub fn release(flags: Vec<String>) -> Self {
        Self {
            extra_flags: flags,
            ..Self::default()
        }
    }

    pub fn with_defines(mut self, defines: Vec<String>) -> Self {
        self.extra_defines.extend(defines);
        self
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.extra_flags.extend(flags);
        self
    }

    /// Flags appended to the library compilation
    pub fn compile_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.debug_symbols {
            flags.push(DEBUG_FLAG.to_string());
        }
        if self.instrumented {
            flags.extend(INSTRUMENTATION_FLAGS.iter().map(|f| f.to_string()));
        }
        flags.extend(self.extra_defines.iter().map(|d| format!("-D{}", d)));
        flags.extend(self.extra_flags.iter().cloned());
        flags
    }

    /// Flags appended when linking a test executable
    pub fn link_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.instrumented {
            flags.extend(INSTRUMENTATION_FLAGS.iter().map(|f| f.to_string()));
        }
        flags.extend(self.extra_defines.iter().map(|d| format!("-D{}", d)));
        flags
    }
}

/// Compiles all library sources to objects in the project root
pub struct SourceCompiler<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn ToolRunner,
    compiler: String,
}

impl<'a> SourceCompiler<'a> {
    pub fn new(config: &'a HarnessConfig, runner: &'a dyn ToolRunner) -> Self {
        Self {
            config,
            runner,
            compiler: config.toolchain.compiler.clone(),
        }
    }

    /// Use a different compiler executable for this compiler only
    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = compiler.into();
        self
    }

    /// One compiler invocation over every source, `-c` so nothing is linked.
    ///
    /// The fixed strictness flags come before `mode`'s flags so callers can
    /// override them.
    pub fn compile_all(&self, mode: &BuildMode) -> Result<()> {
        let sources = library_sources(self.config)?;
        info!("Compiling {} source file(s)", sources.len());

        let toolchain = &self.config.toolchain;
        let mut invocation = Invocation::new(&self.compiler).current_dir(&self.config.root);
        for source in &sources {
            invocation = invocation.arg_path(source);
        }
        let invocation = invocation
            .args(self.config.compile_include_flags())
            .args(toolchain.defines.iter().map(|d| format!("-D{}", d)))
            .arg(format!("-std={}", toolchain.c_standard))
            .args(toolchain.strict_flags.iter().cloned())
            .args(mode.compile_flags())
            .arg("-c");

        self.runner
            .invoke(&invocation)
            .map(|_| ())
            .map_err(HarnessError::into_compilation)
    }

    /// Object files currently in the project root
    pub fn object_files(&self) -> Result<Vec<PathBuf>> {
        files_with_extension(&self.config.root, ".o")
    }
}

/// Links test executables, one per component
pub struct TestExecutableBuilder<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn ToolRunner,
}

impl<'a> TestExecutableBuilder<'a> {
    pub fn new(config: &'a HarnessConfig, runner: &'a dyn ToolRunner) -> Self {
        Self { config, runner }
    }

    /// Link every object in the root with the component's test source into
    /// `<root>/<component><executable extension>`.
    pub fn build_executable(&self, component: &str, mode: &BuildMode) -> Result<PathBuf> {
        let Some(source) = locate_component(self.config, component)? else {
            return Err(HarnessError::MissingComponentSource {
                component: component.to_string(),
                path: self.config.component_source(component),
            });
        };

        let executable = self.config.executable_path(component);
        let toolchain = &self.config.toolchain;

        let mut invocation =
            Invocation::new(&toolchain.compiler).current_dir(&self.config.root);
        for object in files_with_extension(&self.config.root, ".o")? {
            invocation = invocation.arg_path(&object);
        }
        let invocation = invocation
            .arg_path(&source)
            .args(self.config.link_include_flags())
            .arg(DEBUG_FLAG)
            .arg(format!("-std={}", toolchain.c_standard))
            .arg("-o")
            .arg_path(&executable)
            .args(toolchain.link_libraries.iter().map(|l| format!("-l{}", l)))
            .args(mode.link_flags());

        self.runner
            .invoke(&invocation)
            .map_err(HarnessError::into_compilation)?;

        Ok(executable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_compile_flags_order() {
        let mode = BuildMode::coverage()
            .with_defines(vec!["FEATURE_X".into()])
            .with_flags(vec!["-Wno-error".into()]);
        assert_eq!(
            mode.compile_flags(),
            vec![
                "-g",
                "-fprofile-arcs",
                "-ftest-coverage",
                "-DFEATURE_X",
                "-Wno-error"
            ]
        );
    }

    #[test]
    fn test_plain_test_mode_links_without_instrumentation() {
        assert!(BuildMode::test().link_flags().is_empty());
        assert_eq!(BuildMode::test().compile_flags(), vec!["-g"]);
    }

    #[test]
    fn test_coverage_mode_instruments_link() {
        assert_eq!(
            BuildMode::coverage().link_flags(),
            vec!["-fprofile-arcs", "-ftest-coverage"]
        );
    }

    #[test]
    fn test_release_mode_only_passes_user_flags() {
        let mode = BuildMode::release(vec!["-O2".into()]);
        assert_eq!(mode.compile_flags(), vec!["-O2"]);
    }

    #[test]
    fn test_memcheck_mode_has_debug_symbols_only() {
        let mode = BuildMode::memcheck();
        assert!(mode.debug_symbols);
        assert!(!mode.instrumented);
    }
}
