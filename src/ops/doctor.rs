//! Environment and toolchain health checks.
//!
//! ## Checks Performed
//!
//! - Host platform
//! - Every compiler family relevant to the platform, with its standards
//! - Conan, CMake and CTest availability
//! - MSYS2 bash and Visual Studio (Windows only)
//! - The project's CMake sources and manifest
//! - Profiles missing for the configured build matrix

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::builder::cmake::is_cmake_project;
use crate::builder::toolchain::{msvc_installation, Detector};
use crate::deps::{resolve_profile, validate_profile_exists};
use crate::terminal::TerminalEnvironment;
use crate::util::config::Config;
use crate::util::process::{find_executable, ProcessBuilder};

/// Result of a single health check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,

    /// Whether the check passed
    pub passed: bool,

    /// Human-readable status message
    pub message: String,

    /// Path to the tool (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Version string (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// How long the check took
    #[serde(skip)]
    pub duration: Duration,

    /// Whether this check is required or optional
    pub required: bool,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        CheckResult {
            name: name.into(),
            passed: true,
            message: message.into(),
            path: None,
            version: None,
            duration: Duration::ZERO,
            required: true,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        CheckResult {
            passed: false,
            ..CheckResult::pass(name, message)
        }
    }

    /// Mark this check as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Summary of all health checks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DoctorReport {
    pub platform: String,
    pub checks: Vec<CheckResult>,
    /// Profiles the configured matrix needs but the profiles directory lacks
    pub missing_profiles: Vec<String>,
    #[serde(skip)]
    pub total_duration: Duration,
}

impl DoctorReport {
    pub fn add(&mut self, check: CheckResult) {
        self.checks.push(check);
    }

    /// Check if all required checks passed.
    pub fn all_required_passed(&self) -> bool {
        self.checks.iter().filter(|c| c.required).all(|c| c.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    pub fn required_failed_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.required && !c.passed)
            .count()
    }
}

/// Run every check.
///
/// `root` is the project root, when there is one; the profile check needs
/// it.
pub fn doctor(config: &Config, root: Option<&Path>, detector: &Detector) -> DoctorReport {
    let start = Instant::now();
    let platform = detector.platform().clone();
    let mut report = DoctorReport {
        platform: platform.to_string(),
        ..Default::default()
    };

    check_compilers(detector, &mut report);

    report.add(check_tool("Conan", &config.tools.conan_program(), true));
    report.add(check_tool("CMake", &config.tools.cmake_program(), true));
    report.add(check_tool("CTest", &config.tools.ctest_program(), false));

    if platform.is_windows() {
        report.add(check_msys2(config));
        report.add(check_visual_studio(detector));
    }

    if let Some(root) = root {
        report.add(check_project(config, root));
        let (check, missing) = check_profiles(config, root);
        report.add(check);
        report.missing_profiles = missing;
    }

    report.total_duration = start.elapsed();
    report
}

/// One check per compiler family; at least one must be usable.
fn check_compilers(detector: &Detector, report: &mut DoctorReport) {
    let survey = detector.survey();
    let any_usable = survey.iter().any(|(_, result)| result.is_ok());

    for (family, result) in survey {
        let name = format!("Compiler {}", family);
        let check = match result {
            Ok(info) => {
                let standards: Vec<String> =
                    info.standards.iter().map(|s| s.to_string()).collect();
                CheckResult::pass(name, format!("supports {}", standards.join(", ")))
                    .with_path(info.path.clone())
                    .with_version(info.version.clone())
            }
            Err(reason) => CheckResult::fail(name, reason),
        };
        // Individual families are optional as long as one of them works.
        report.add(check.optional());
    }

    if !any_usable {
        report.add(CheckResult::fail(
            "Compiler",
            format!("no usable compiler on {}", detector.platform()),
        ));
    }
}

/// Check that a tool runs and report the first line of `--version`.
fn check_tool(name: &str, program: &Path, required: bool) -> CheckResult {
    let start = Instant::now();

    let resolved = if program.components().count() > 1 {
        Some(program.to_path_buf()).filter(|p| p.exists())
    } else {
        find_executable(&program.to_string_lossy())
    };

    let check = match resolved {
        None => CheckResult::fail(name, format!("`{}` not found", program.display())),
        Some(path) => match ProcessBuilder::new(&path).arg("--version").exec() {
            Ok(output) if output.success() => {
                let version = first_line(&output.stdout)
                    .or_else(|| first_line(&output.stderr))
                    .unwrap_or_else(|| "unknown version".to_string());
                CheckResult::pass(name, format!("{} is available", name))
                    .with_path(path)
                    .with_version(version)
            }
            Ok(output) => CheckResult::fail(
                name,
                format!("`{} --version` failed with {}", path.display(), output.status_display()),
            )
            .with_path(path),
            Err(e) => CheckResult::fail(name, format!("failed to run {}: {}", path.display(), e))
                .with_path(path),
        },
    };

    let check = check.with_duration(start.elapsed());
    if required {
        check
    } else {
        check.optional()
    }
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

fn check_msys2(config: &Config) -> CheckResult {
    let root = config.environment.msys2_root();
    let bash = TerminalEnvironment::bash_path(&root);
    if bash.exists() {
        CheckResult::pass(
            "MSYS2",
            format!("bash found ({})", config.environment.msystem),
        )
        .with_path(bash)
        .optional()
    } else {
        CheckResult::fail(
            "MSYS2",
            format!("no bash at {}; MinGW builds are unavailable", bash.display()),
        )
        .optional()
    }
}

fn check_visual_studio(detector: &Detector) -> CheckResult {
    match msvc_installation(detector.options()) {
        Ok(install) => CheckResult::pass("Visual Studio", "installation found")
            .with_path(install)
            .optional(),
        Err(reason) => CheckResult::fail("Visual Studio", reason).optional(),
    }
}

/// The source directory has a CMakeLists.txt and the Conan manifest exists.
fn check_project(config: &Config, root: &Path) -> CheckResult {
    let source_dir = config.source_dir(root);
    let manifest = config.manifest_path(root);

    if !is_cmake_project(&source_dir) {
        return CheckResult::fail(
            "Project",
            format!("no CMakeLists.txt in {}", source_dir.display()),
        )
        .with_path(source_dir);
    }
    if !manifest.is_file() {
        return CheckResult::fail("Project", format!("{} not found", manifest.display()))
            .with_path(manifest);
    }

    CheckResult::pass("Project", format!("CMake project with {}", manifest.display()))
        .with_path(source_dir)
}

/// Profiles needed by `[project] compilers x configurations`.
fn check_profiles(config: &Config, root: &Path) -> (CheckResult, Vec<String>) {
    let dir = config.profiles_dir(root);
    let mut missing = Vec::new();
    let mut needed = 0;

    for compiler in &config.project.compilers {
        for &configuration in &config.project.configurations {
            needed += 1;
            match resolve_profile(compiler, configuration) {
                Ok(id) => {
                    if validate_profile_exists(&id, &dir).is_err() {
                        missing.push(id.to_string());
                    }
                }
                Err(_) => missing.push(format!("{}-{}", compiler, configuration)),
            }
        }
    }

    let check = if missing.is_empty() {
        CheckResult::pass("Profiles", format!("{} profile(s) present in {}", needed, dir.display()))
    } else {
        CheckResult::fail(
            "Profiles",
            format!("missing in {}: {}", dir.display(), missing.join(", ")),
        )
    };

    (check.with_path(dir).optional(), missing)
}

/// Format the doctor report for display.
pub fn format_report(report: &DoctorReport, verbose: bool) -> String {
    use std::fmt::Write;

    let mut output = String::new();

    writeln!(output, "buildrig doctor").unwrap();
    writeln!(output, "===============\n").unwrap();
    writeln!(output, "Platform: {}\n", report.platform).unwrap();

    writeln!(output, "Checks:").unwrap();
    for check in &report.checks {
        let status = if check.passed { "[OK]" } else { "[!!]" };
        let required = if check.required { "" } else { " (optional)" };

        writeln!(output, "  {} {}{}", status, check.name, required).unwrap();

        if verbose || !check.passed {
            writeln!(output, "      {}", check.message).unwrap();
        }
        if verbose {
            if let Some(path) = &check.path {
                writeln!(output, "      Path: {}", path.display()).unwrap();
            }
            if let Some(version) = &check.version {
                writeln!(output, "      Version: {}", version).unwrap();
            }
        }
    }

    writeln!(output).unwrap();

    let failed = report.failed_count();
    let required_failed = report.required_failed_count();

    writeln!(
        output,
        "Summary: {} passed, {} failed",
        report.passed_count(),
        failed
    )
    .unwrap();

    if required_failed > 0 {
        writeln!(
            output,
            "\nWarning: {} required check(s) failed. Pipelines will not run.",
            required_failed
        )
        .unwrap();
    } else if failed > 0 {
        writeln!(
            output,
            "\nAll required checks passed. {} optional check(s) failed.",
            failed
        )
        .unwrap();
    } else {
        writeln!(output, "\nAll checks passed.").unwrap();
    }

    output
}

/// Group checks by pass/fail for JSON consumers.
pub fn summarize(report: &DoctorReport) -> BTreeMap<&'static str, usize> {
    BTreeMap::from([
        ("passed", report.passed_count()),
        ("failed", report.failed_count()),
        ("required_failed", report.required_failed_count()),
    ])
}
