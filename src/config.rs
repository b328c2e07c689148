//! Configuration Loader
//! - Provides CLI argument parsing with clap
//! - Reads harness.toml for path layout and toolchain overrides
//!
//! The resulting `HarnessConfig` is built once in `main` and handed to every
//! pipeline stage by reference.

use crate::error::{HarnessError, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the optional per-project configuration file
pub const CONFIG_FILE_NAME: &str = "harness.toml";

// =============================================================================
// CLI Configuration
// =============================================================================

/// Output format for progress and results
#[derive(ValueEnum, Clone, Debug, Default, PartialEq)]
pub enum OutputFormat {
    /// Human-readable progress on stdout
    #[default]
    Human,
    /// Machine-readable NDJSON on stdout
    Json,
}

/// Build, test and verification harness for the CryptID library
#[derive(Parser, Debug)]
#[command(name = "cryptid-harness", version, about = "Build and verification harness")]
pub struct Cli {
    /// Project root containing sources, tests and harness.toml
    #[arg(long, default_value = ".", env = "CRYPTID_HARNESS_ROOT", global = true)]
    pub root: PathBuf,

    /// Output format (also: CRYPTID_HARNESS_FORMAT env var)
    #[arg(
        long,
        value_enum,
        default_value_t = OutputFormat::Human,
        env = "CRYPTID_HARNESS_FORMAT",
        global = true
    )]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum Commands {
    /// Builds the static library. Extra args are passed to the compiler
    Build {
        /// Compiler to use instead of the configured one
        #[arg(long)]
        compiler: Option<String>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        flags: Vec<String>,
    },
    /// Builds the static library. Extra args are passed to the compiler
    BuildStatic {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        flags: Vec<String>,
    },
    /// Runs the tests of the given components (all when none are given)
    Test {
        components: Vec<String>,
        /// Collect gcov counters while testing
        #[arg(long)]
        coverage: bool,
    },
    /// Runs the tests and renders LCOV data plus an HTML report
    Coverage {
        components: Vec<String>,
        /// Upload the merged data to the coverage service afterwards
        #[arg(long)]
        report: bool,
    },
    /// Runs the tests and keeps the raw gcov counters only
    GcovCoverage { components: Vec<String> },
    /// Runs the tests and renders an HTML coverage report
    HtmlCoverage { components: Vec<String> },
    /// Runs the tests under the memory-safety analyzer
    #[command(alias = "memory-check")]
    Memcheck {
        components: Vec<String>,
        /// Write one analyzer XML file per component
        #[arg(long = "xml-output", alias = "xmlOutput")]
        xml_output: bool,
    },
    /// Uploads previously merged coverage data
    ReportCoverage,
    /// Removes every generated artifact
    Clean,
}

// =============================================================================
// Harness Configuration
// =============================================================================

/// Directory layout, relative to the project root
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PathLayout {
    pub source_dir: PathBuf,
    pub source_extension: String,
    pub include_dir: PathBuf,
    pub third_party_source_dirs: Vec<PathBuf>,
    pub third_party_include_dirs: Vec<PathBuf>,
    pub test_source_dir: PathBuf,
    pub test_extension: String,
    /// Extra include dirs for linking tests (test framework headers)
    pub test_include_dirs: Vec<PathBuf>,
    pub executable_extension: String,
    pub results_dir: PathBuf,
    pub build_dir: PathBuf,
    pub coverage_dir: PathBuf,
    pub memcheck_dir: PathBuf,
    pub version_file: PathBuf,
}

impl Default for PathLayout {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("src"),
            source_extension: ".c".to_string(),
            include_dir: PathBuf::from("include"),
            third_party_source_dirs: vec![PathBuf::from("third-party/src")],
            third_party_include_dirs: vec![PathBuf::from("third-party/include")],
            test_source_dir: PathBuf::from("test/src"),
            test_extension: ".test.c".to_string(),
            test_include_dirs: Vec::new(),
            executable_extension: ".out".to_string(),
            results_dir: PathBuf::from("test-results"),
            build_dir: PathBuf::from("build"),
            coverage_dir: PathBuf::from("coverage"),
            memcheck_dir: PathBuf::from("memcheck"),
            version_file: PathBuf::from("VERSION"),
        }
    }
}

/// External programs and the fixed flag sets handed to them
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Toolchain {
    pub compiler: String,
    pub archiver: String,
    pub analyzer: String,
    pub merger: String,
    pub renderer: String,
    pub uploader: String,
    pub c_standard: String,
    /// Warnings-as-errors set applied to library compilation
    pub strict_flags: Vec<String>,
    pub link_libraries: Vec<String>,
    /// Feature-selection defines, without the `-D` prefix
    pub defines: Vec<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            compiler: "gcc".to_string(),
            archiver: "ar".to_string(),
            analyzer: "valgrind".to_string(),
            merger: "lcov".to_string(),
            renderer: "genhtml".to_string(),
            uploader: "coveralls-lcov".to_string(),
            c_standard: "c99".to_string(),
            strict_flags: vec!["-Wall".into(), "-Wextra".into(), "-Werror".into()],
            link_libraries: vec!["m".into(), "gmp".into()],
            defines: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSettings {
    pub library_name: String,
    /// Embed the version-of-record in the archive name
    pub versioned: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            library_name: "cryptid".to_string(),
            versioned: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CoverageSettings {
    /// Counter files dropped before merging (test framework, vendored hash)
    pub exclude: Vec<String>,
    pub merged_file: String,
    pub raw_subdir: PathBuf,
    pub merged_subdir: PathBuf,
    pub html_subdir: PathBuf,
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            exclude: vec![
                "*.test.gcda".into(),
                "*.test.gcno".into(),
                "sha.gcno".into(),
                "sha.gcda".into(),
            ],
            merged_file: "cryptid.info".to_string(),
            raw_subdir: PathBuf::from("gcov"),
            merged_subdir: PathBuf::from("lcov"),
            html_subdir: PathBuf::from("html"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MemcheckSettings {
    pub analyzer_args: Vec<String>,
    /// Components that get `quick_check_args` appended to bound analysis time
    pub quick_check_components: Vec<String>,
    pub quick_check_args: Vec<String>,
}

impl Default for MemcheckSettings {
    fn default() -> Self {
        Self {
            analyzer_args: vec![
                "--leak-check=full".into(),
                "--show-reachable=yes".into(),
                "--error-exitcode=1".into(),
            ],
            quick_check_components: vec!["CryptID".into(), "SignID".into()],
            quick_check_args: vec!["--".into(), "--lowest-quick-check".into()],
        }
    }
}

/// Complete harness configuration, rooted at one project directory
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(skip)]
    pub root: PathBuf,
    pub paths: PathLayout,
    pub toolchain: Toolchain,
    pub build: BuildSettings,
    pub coverage: CoverageSettings,
    pub memcheck: MemcheckSettings,
}

impl HarnessConfig {
    /// Defaults rooted at `root`, ignoring any harness.toml
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration for the project at `root`.
    ///
    /// The root is made absolute so that every path handed to external
    /// tools stays valid regardless of their working directory. A missing
    /// harness.toml means defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let root = root.canonicalize().map_err(|e| {
            HarnessError::Config(format!("project root {}: {}", root.display(), e))
        })?;

        let config_path = root.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            tracing::debug!("no {} in {}, using defaults", CONFIG_FILE_NAME, root.display());
            return Ok(Self::with_root(root));
        }

        let contents = fs::read_to_string(&config_path)?;
        let mut config = Self::parse(&contents)?;
        config.root = root;
        tracing::debug!("loaded {}", config_path.display());
        Ok(config)
    }

    /// Parse a harness.toml document. The root is left empty.
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| HarnessError::Config(format!("{}: {}", CONFIG_FILE_NAME, e)))
    }

    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.resolve(&self.paths.source_dir)
    }

    pub fn third_party_source_dirs(&self) -> Vec<PathBuf> {
        self.paths
            .third_party_source_dirs
            .iter()
            .map(|d| self.resolve(d))
            .collect()
    }

    pub fn test_source_dir(&self) -> PathBuf {
        self.resolve(&self.paths.test_source_dir)
    }

    /// Test source file of a component: `<test dir>/<name><test extension>`
    pub fn component_source(&self, component: &str) -> PathBuf {
        self.test_source_dir()
            .join(format!("{}{}", component, self.paths.test_extension))
    }

    /// Executable linked for a component, placed in the project root
    pub fn executable_path(&self, component: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", component, self.paths.executable_extension))
    }

    pub fn results_dir(&self) -> PathBuf {
        self.resolve(&self.paths.results_dir)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.resolve(&self.paths.build_dir)
    }

    pub fn coverage_dir(&self) -> PathBuf {
        self.resolve(&self.paths.coverage_dir)
    }

    pub fn coverage_raw_dir(&self) -> PathBuf {
        self.coverage_dir().join(&self.coverage.raw_subdir)
    }

    pub fn coverage_merged_dir(&self) -> PathBuf {
        self.coverage_dir().join(&self.coverage.merged_subdir)
    }

    /// Merged LCOV tracefile
    pub fn merged_coverage_file(&self) -> PathBuf {
        self.coverage_merged_dir().join(&self.coverage.merged_file)
    }

    pub fn coverage_html_dir(&self) -> PathBuf {
        self.coverage_dir().join(&self.coverage.html_subdir)
    }

    pub fn memcheck_dir(&self) -> PathBuf {
        self.resolve(&self.paths.memcheck_dir)
    }

    pub fn version_file(&self) -> PathBuf {
        self.resolve(&self.paths.version_file)
    }

    /// `-I` flags for compiling library sources
    pub fn compile_include_flags(&self) -> Vec<String> {
        std::iter::once(&self.paths.include_dir)
            .chain(&self.paths.third_party_include_dirs)
            .map(|dir| include_flag(&self.resolve(dir)))
            .collect()
    }

    /// `-I` flags for linking a test executable (adds the test framework)
    pub fn link_include_flags(&self) -> Vec<String> {
        let mut flags = self.compile_include_flags();
        flags.extend(
            self.paths
                .test_include_dirs
                .iter()
                .map(|dir| include_flag(&self.resolve(dir))),
        );
        flags
    }

    /// Generated directories removed by `clean`
    pub fn output_directories(&self) -> Vec<PathBuf> {
        vec![
            self.results_dir(),
            self.coverage_dir(),
            self.build_dir(),
            self.memcheck_dir(),
        ]
    }
}

fn include_flag(dir: &Path) -> String {
    format!("-I{}", dir.display())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_empty_config_gives_defaults() {
        let config = HarnessConfig::parse("").unwrap();
        assert_eq!(config.paths, PathLayout::default());
        assert_eq!(config.toolchain.compiler, "gcc");
        assert_eq!(config.memcheck.quick_check_components, vec!["CryptID", "SignID"]);
    }

    #[test]
    fn test_parse_partial_toolchain_override() {
        let toml_content = r#"
[toolchain]
compiler = "clang"
defines = ["__CRYPTID_EXTERN_RANDOM"]
"#;
        let config = HarnessConfig::parse(toml_content).unwrap();
        assert_eq!(config.toolchain.compiler, "clang");
        assert_eq!(config.toolchain.defines, vec!["__CRYPTID_EXTERN_RANDOM"]);
        // untouched keys keep defaults
        assert_eq!(config.toolchain.archiver, "ar");
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        let toml_content = r#"
[paths]
sorce_dir = "lib"
"#;
        let err = HarnessConfig::parse(toml_content).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_load_without_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = HarnessConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.root, temp_dir.path().canonicalize().unwrap());
        assert_eq!(config.build, BuildSettings::default());
    }

    #[test]
    fn test_load_reads_config_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            "[build]\nlibrary_name = \"ibe\"\nversioned = false\n",
        )
        .unwrap();

        let config = HarnessConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.build.library_name, "ibe");
        assert!(!config.build.versioned);
        assert!(config.root.is_absolute());
    }

    #[test]
    fn test_load_missing_root_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = HarnessConfig::load(&temp_dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_component_paths() {
        let config = HarnessConfig::with_root("/project");
        assert_eq!(
            config.component_source("Hash"),
            PathBuf::from("/project/test/src/Hash.test.c")
        );
        assert_eq!(config.executable_path("Hash"), PathBuf::from("/project/Hash.out"));
        assert_eq!(
            config.merged_coverage_file(),
            PathBuf::from("/project/coverage/lcov/cryptid.info")
        );
    }

    #[test]
    fn test_link_includes_extend_compile_includes() {
        let mut config = HarnessConfig::with_root("/project");
        config.paths.test_include_dirs = vec![PathBuf::from("third-party/greatest")];

        let compile = config.compile_include_flags();
        let link = config.link_include_flags();
        assert_eq!(compile[0], "-I/project/include");
        assert_eq!(link.len(), compile.len() + 1);
        assert_eq!(link.last().unwrap(), "-I/project/third-party/greatest");
    }

    #[test]
    fn test_cli_parses_memcheck_alias_and_xml_flag() {
        let cli = Cli::parse_from(["cryptid-harness", "memory-check", "Hash", "--xmlOutput"]);
        assert_eq!(
            cli.command,
            Commands::Memcheck {
                components: vec!["Hash".into()],
                xml_output: true
            }
        );
    }

    #[test]
    fn test_cli_build_passes_hyphen_flags_through() {
        let cli = Cli::parse_from(["cryptid-harness", "build", "--compiler", "clang", "-O2", "-fPIC"]);
        assert_eq!(
            cli.command,
            Commands::Build {
                compiler: Some("clang".into()),
                flags: vec!["-O2".into(), "-fPIC".into()]
            }
        );
    }

    #[test]
    fn test_cli_format_default() {
        let cli = Cli::parse_from(["cryptid-harness", "clean"]);
        assert_eq!(cli.format, OutputFormat::Human);
        assert_eq!(cli.root, PathBuf::from("."));
    }
}
