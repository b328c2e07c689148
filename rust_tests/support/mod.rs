//! Scripted toolchain shared by the integration tests
//!
//! `FakeToolchain` implements `ToolRunner` without spawning anything. Each
//! simulated tool creates the files the real one would (objects, counters,
//! executables, tracefiles, analyzer XML) so cleanup and report behavior can
//! be checked on a real temporary directory.

#![allow(dead_code)]

use cryptid_harness::config::HarnessConfig;
use cryptid_harness::error::{HarnessError, Result, ToolFailure, ToolOutput};
use cryptid_harness::invoker::{Invocation, ToolRunner};
use cryptid_harness::orchestrator::ExecutionResult;
use cryptid_harness::reporter::Reporter;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const TRACEFILE: &str = "TN:\nSF:/project/src/Hash.c\nLF:10\nLH:7\nBRF:4\nBRH:2\nend_of_record\n";

#[derive(Debug, Clone)]
struct Script {
    exit: i32,
    stdout: String,
}

#[derive(Default)]
pub struct FakeToolchain {
    calls: RefCell<Vec<Invocation>>,
    scripts: HashMap<String, Script>,
    analyzer_failures: HashSet<String>,
    failing_tools: HashSet<String>,
    fail_compile: bool,
    /// Number of object files present at each link, in link order
    objects_at_link: RefCell<Vec<usize>>,
    /// Counter files present when the merger ran
    counters_at_merge: RefCell<Vec<String>>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Component executable exits with `exit` after printing `stdout`
    pub fn script(mut self, component: &str, exit: i32, stdout: &str) -> Self {
        self.scripts.insert(
            component.to_string(),
            Script {
                exit,
                stdout: stdout.to_string(),
            },
        );
        self
    }

    /// Analyzer reports errors for `component`
    pub fn analyzer_fails(mut self, component: &str) -> Self {
        self.analyzer_failures.insert(component.to_string());
        self
    }

    /// Every invocation of `program` exits 1
    pub fn tool_fails(mut self, program: &str) -> Self {
        self.failing_tools.insert(program.to_string());
        self
    }

    pub fn compile_fails(mut self) -> Self {
        self.fail_compile = true;
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.program_name() == program)
            .collect()
    }

    /// Components whose executables were run, in order
    pub fn executed(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.program_name().strip_suffix(".out").map(str::to_string))
            .collect()
    }

    pub fn objects_at_link(&self) -> Vec<usize> {
        self.objects_at_link.borrow().clone()
    }

    pub fn counters_at_merge(&self) -> Vec<String> {
        self.counters_at_merge.borrow().clone()
    }

    fn cwd(invocation: &Invocation) -> PathBuf {
        invocation.cwd.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    fn compile(&self, invocation: &Invocation) -> Result<ToolOutput> {
        if self.fail_compile {
            return failure(invocation, 1, "src/Hash.c:3:1: error: expected ';'");
        }
        let cwd = Self::cwd(invocation);
        let instrumented = invocation.has_arg("-fprofile-arcs");
        for source in invocation.args.iter().filter(|a| a.ends_with(".c")) {
            let stem = file_stem(source, ".c");
            touch(&cwd.join(format!("{}.o", stem)));
            if instrumented {
                touch(&cwd.join(format!("{}.gcno", stem)));
            }
        }
        Ok(ok(""))
    }

    fn link(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let cwd = Self::cwd(invocation);
        let objects = invocation.args.iter().filter(|a| a.ends_with(".o")).count();
        self.objects_at_link.borrow_mut().push(objects);

        let Some(executable) = invocation.value_after("-o") else {
            return failure(invocation, 1, "no output file");
        };
        touch(Path::new(executable));

        if invocation.has_arg("-fprofile-arcs") {
            for source in invocation.args.iter().filter(|a| a.ends_with(".test.c")) {
                touch(&cwd.join(format!("{}.gcno", file_stem(source, ".c"))));
            }
        }
        Ok(ok(""))
    }

    fn run_executable(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let path = Path::new(&invocation.program);
        if !path.is_file() {
            return Err(HarnessError::Spawn {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }

        // Instrumented executables write counters next to their notes files
        let cwd = Self::cwd(invocation);
        for notes in files_in(&cwd, ".gcno") {
            touch(&cwd.join(format!("{}.gcda", file_stem(&notes, ".gcno"))));
        }

        let component = file_stem(invocation.program_name(), ".out");
        let script = self.scripts.get(&component).cloned().unwrap_or(Script {
            exit: 0,
            stdout: String::new(),
        });
        if script.exit == 0 {
            Ok(ok(&script.stdout))
        } else {
            Err(HarnessError::ToolInvocation(ToolFailure {
                command: invocation.to_string(),
                output: ToolOutput {
                    status: Some(script.exit),
                    stdout: script.stdout,
                    stderr: String::new(),
                },
            }))
        }
    }

    fn analyze(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let Some(executable) = invocation.args.iter().find(|a| a.ends_with(".out")) else {
            return failure(invocation, 1, "no program given");
        };
        let component = file_stem(executable, ".out");
        let fails = self.analyzer_failures.contains(&component);

        let xml_file = invocation
            .args
            .iter()
            .find_map(|a| a.strip_prefix("--xml-file="));
        if let Some(xml_file) = xml_file {
            let errors = if fails {
                "<error><unique>0x0</unique><kind>Leak_DefinitelyLost</kind></error>"
            } else {
                ""
            };
            fs::write(
                xml_file,
                format!(
                    "<?xml version=\"1.0\"?>\n<valgrindoutput><tool>memcheck</tool>{}<errorcounts/></valgrindoutput>\n",
                    errors
                ),
            )
            .unwrap();
        }

        if fails {
            failure(invocation, 1, "definitely lost: 16 bytes in 1 blocks")
        } else {
            Ok(ok(""))
        }
    }

    fn merge(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let Some(directory) = invocation.value_after("--directory") else {
            return failure(invocation, 1, "no directory");
        };
        let mut counters = files_in(Path::new(directory), ".gcda");
        counters.extend(files_in(Path::new(directory), ".gcno"));
        counters.sort();
        *self.counters_at_merge.borrow_mut() = counters;

        let Some(output) = invocation.value_after("--output-file") else {
            return failure(invocation, 1, "no output file");
        };
        fs::write(output, TRACEFILE).unwrap();
        Ok(ok(""))
    }

    fn render(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let Some(dir) = invocation.value_after("-o") else {
            return failure(invocation, 1, "no output directory");
        };
        touch(&Path::new(dir).join("index.html"));
        Ok(ok(""))
    }

    fn archive(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let Some(archive) = invocation.args.get(1) else {
            return failure(invocation, 1, "no archive");
        };
        let members: Vec<&str> = invocation.args[2..].iter().map(String::as_str).collect();
        fs::write(archive, members.join("\n")).unwrap();
        Ok(ok(""))
    }
}

impl ToolRunner for FakeToolchain {
    fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.calls.borrow_mut().push(invocation.clone());

        let program = invocation.program_name().to_string();
        if self.failing_tools.contains(&program) {
            return failure(invocation, 1, &format!("{}: simulated failure", program));
        }

        match program.as_str() {
            "gcc" | "clang" if invocation.has_arg("-c") => self.compile(invocation),
            "gcc" | "clang" => self.link(invocation),
            "valgrind" => self.analyze(invocation),
            "lcov" => self.merge(invocation),
            "genhtml" => self.render(invocation),
            "ar" => self.archive(invocation),
            "coveralls-lcov" => Ok(ok("uploaded")),
            name if name.ends_with(".out") || Path::new(&invocation.program).is_absolute() => {
                self.run_executable(invocation)
            }
            other => panic!("unexpected tool {}", other),
        }
    }
}

fn ok(stdout: &str) -> ToolOutput {
    ToolOutput {
        status: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn failure(invocation: &Invocation, code: i32, stderr: &str) -> Result<ToolOutput> {
    Err(HarnessError::ToolInvocation(ToolFailure {
        command: invocation.to_string(),
        output: ToolOutput {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        },
    }))
}

fn file_stem(path: &str, extension: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(extension).unwrap_or(&name).to_string()
}

fn files_in(dir: &Path, extension: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(extension))
        .collect()
}

pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"").unwrap();
}

/// Reporter keeping notices and errors for assertions
#[derive(Default)]
pub struct RecordingReporter {
    pub notices: Vec<String>,
    pub errors: Vec<String>,
}

impl Reporter for RecordingReporter {
    fn on_run_start(&mut self, _stage: &str, _count: usize) {}
    fn on_component_start(&mut self, _component: &str) {}
    fn on_component_finished(&mut self, _result: &ExecutionResult) {}
    fn on_run_finished(&mut self, _stage: &str, _passed: usize, _failed: usize, _duration_ms: u64) {}

    fn on_notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }

    fn on_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}

// =============================================================================
// Project fixtures
// =============================================================================

/// A project with two library sources, a vendored hash and one test source
/// per component
pub fn project(components: &[&str]) -> (TempDir, HarnessConfig) {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    for source in ["src/CryptID.c", "src/Pairing.c", "third-party/src/sha.c"] {
        fs::create_dir_all(root.join(source).parent().unwrap()).unwrap();
        fs::write(root.join(source), "int f(void) { return 0; }\n").unwrap();
    }
    for component in components {
        let test_source = root.join("test/src").join(format!("{}.test.c", component));
        fs::create_dir_all(test_source.parent().unwrap()).unwrap();
        fs::write(test_source, "int main(void) { return 0; }\n").unwrap();
    }
    fs::write(root.join("VERSION"), "0.4.1\n").unwrap();

    let config = HarnessConfig::load(root).unwrap();
    (temp, config)
}

pub fn names(components: &[&str]) -> Vec<String> {
    components.iter().map(|c| c.to_string()).collect()
}

/// Objects, executables and counters left in the project root
pub fn stray_artifacts(root: &Path) -> Vec<String> {
    let mut stray = Vec::new();
    for extension in [".o", ".out", ".gcda", ".gcno"] {
        stray.extend(files_in(root, extension));
    }
    stray.sort();
    stray
}

/// greatest verbose output for one suite
pub fn greatest_output(suite: &str, passes: &[&str], fails: &[&str]) -> String {
    let mut out = format!("* Suite {}:\n", suite);
    for name in passes {
        out.push_str(&format!("PASS {}: \n", name));
    }
    for name in fails {
        out.push_str(&format!("FAIL {}: expected 1, got 0 ({}.test.c:12)\n", name, suite));
    }
    out.push_str(&format!(
        "\n{} tests - {} passed, {} failed, 0 skipped (3 ticks, 0.000 sec)\n",
        passes.len() + fails.len(),
        passes.len(),
        fails.len()
    ));
    out
}
