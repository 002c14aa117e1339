//! CMake, CTest and CPack driving.
//!
//! Every step runs through a [`TerminalEnvironment`] and layers a
//! post-condition check on top of the exit code: a tool that exits 0 without
//! producing its expected output still fails the step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::builder::toolchain::CommandSpec;
use crate::core::context::BuildConfiguration;
use crate::core::errors::{Error, StepFailureKind};
use crate::core::platform::OsFamily;
use crate::terminal::{ExecOptions, TerminalEnvironment};
use crate::util::process::ProcessOutput;

/// File whose presence marks a configured build directory.
pub const CACHE_MARKER: &str = "CMakeCache.txt";

/// Lines of build output kept on failure.
pub const BUILD_TAIL_LINES: usize = 40;

const CPACK_CONFIG: &str = "CPackConfig.cmake";

const ARTIFACT_SEARCH_DEPTH: usize = 6;

// "75% tests passed, 1 tests failed out of 4"
static CTEST_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+% tests passed, \d+ tests? failed out of \d+").unwrap());

/// Inputs to `cmake` configure beyond the directories.
#[derive(Debug, Clone, Default)]
pub struct ConfigureOptions {
    /// `-G`
    pub generator: Option<String>,
    /// `-DCMAKE_TOOLCHAIN_FILE=`
    pub toolchain_file: Option<PathBuf>,
    /// `--preset`
    pub preset: Option<String>,
    /// `-DBUILD_SHARED_LIBS=`
    pub shared: bool,
    /// Extra `-D` definitions
    pub defines: BTreeMap<String, String>,
}

/// Executables for the CMake family of tools.
#[derive(Debug, Clone)]
pub struct CMakeTools {
    pub cmake: PathBuf,
    pub ctest: PathBuf,
    pub cpack: PathBuf,
}

impl Default for CMakeTools {
    fn default() -> Self {
        CMakeTools {
            cmake: PathBuf::from("cmake"),
            ctest: PathBuf::from("ctest"),
            cpack: PathBuf::from("cpack"),
        }
    }
}

/// Kind of file a build produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Executable,
    StaticLibrary,
    SharedLibrary,
}

/// A built output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub target: String,
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// CMake step runner bound to one shell.
pub struct CMakeBuilder<'a> {
    env: &'a TerminalEnvironment,
    tools: CMakeTools,
    opts: ExecOptions,
}

impl<'a> CMakeBuilder<'a> {
    /// Create a runner that executes in `env`.
    pub fn new(env: &'a TerminalEnvironment) -> Self {
        CMakeBuilder {
            env,
            tools: CMakeTools::default(),
            opts: ExecOptions::captured(),
        }
    }

    /// Use specific tool executables.
    pub fn tools(mut self, tools: CMakeTools) -> Self {
        self.tools = tools;
        self
    }

    /// Execution options (streaming, cancellation). Output is always captured.
    pub fn exec_options(mut self, opts: ExecOptions) -> Self {
        self.opts = opts;
        self.opts.capture = true;
        self
    }

    fn path(&self, path: &Path) -> Result<String, Error> {
        self.env.translate_path(path)
    }

    /// `cmake -S <src> -B <build>` command line.
    pub fn configure_command(
        &self,
        source_dir: &Path,
        build_dir: &Path,
        configuration: BuildConfiguration,
        options: &ConfigureOptions,
    ) -> Result<CommandSpec, Error> {
        let mut cmd = CommandSpec::new(&self.tools.cmake)
            .arg("-S")
            .arg(self.path(source_dir)?)
            .arg("-B")
            .arg(self.path(build_dir)?)
            .arg(format!("-DCMAKE_BUILD_TYPE={}", configuration.build_type()));

        if let Some(generator) = &options.generator {
            cmd = cmd.arg("-G").arg(generator.as_str());
        }
        if let Some(toolchain) = &options.toolchain_file {
            cmd = cmd.arg(format!("-DCMAKE_TOOLCHAIN_FILE={}", self.path(toolchain)?));
        }
        if let Some(preset) = &options.preset {
            cmd = cmd.arg("--preset").arg(preset.as_str());
        }

        cmd = cmd.arg(format!(
            "-DBUILD_SHARED_LIBS={}",
            if options.shared { "ON" } else { "OFF" }
        ));

        for (key, value) in &options.defines {
            cmd = cmd.arg(format!("-D{}={}", key, value));
        }

        Ok(cmd)
    }

    /// Configure `build_dir` from `source_dir`.
    pub fn configure(
        &self,
        source_dir: &Path,
        build_dir: &Path,
        configuration: BuildConfiguration,
        options: &ConfigureOptions,
    ) -> Result<ProcessOutput, Error> {
        tracing::info!("configuring {}", build_dir.display());

        let cmd = self.configure_command(source_dir, build_dir, configuration, options)?;
        let output = self.env.execute(&cmd, build_dir, &self.opts)?;

        if !output.success() {
            return Err(Error::Configure {
                kind: StepFailureKind::ToolFailed,
                build_dir: build_dir.to_path_buf(),
                output,
            });
        }

        if !build_dir.join(CACHE_MARKER).is_file() {
            return Err(Error::Configure {
                kind: StepFailureKind::ValidationFailed,
                build_dir: build_dir.to_path_buf(),
                output,
            });
        }

        Ok(output)
    }

    /// Build one target.
    pub fn build(
        &self,
        build_dir: &Path,
        target: &str,
        configuration: BuildConfiguration,
        parallel: Option<usize>,
    ) -> Result<ProcessOutput, Error> {
        tracing::info!("building target `{}`", target);

        let mut cmd = CommandSpec::new(&self.tools.cmake)
            .arg("--build")
            .arg(self.path(build_dir)?)
            .arg("--target")
            .arg(target)
            .arg("--config")
            .arg(configuration.build_type());

        if let Some(jobs) = parallel {
            cmd = cmd.arg("--parallel").arg(jobs.to_string());
        }

        let output = self.env.execute(&cmd, build_dir, &self.opts)?;

        if !output.success() {
            return Err(Error::Build {
                target: target.to_string(),
                kind: StepFailureKind::ToolFailed,
                tail: output.tail(BUILD_TAIL_LINES),
                output,
            });
        }

        Ok(output)
    }

    /// `cmake --install`. With a prefix, the prefix must be non-empty
    /// afterwards.
    pub fn install_artifacts(
        &self,
        build_dir: &Path,
        configuration: BuildConfiguration,
        prefix: Option<&Path>,
    ) -> Result<ProcessOutput, Error> {
        let mut cmd = CommandSpec::new(&self.tools.cmake)
            .arg("--install")
            .arg(self.path(build_dir)?)
            .arg("--config")
            .arg(configuration.build_type());

        if let Some(prefix) = prefix {
            cmd = cmd.arg("--prefix").arg(self.path(prefix)?);
        }

        let output = self.env.execute(&cmd, build_dir, &self.opts)?;

        if !output.success() {
            return Err(Error::Install {
                kind: StepFailureKind::ToolFailed,
                message: format!("cmake --install exited with {}", output.status_display()),
                output,
            });
        }

        if let Some(prefix) = prefix {
            let populated = std::fs::read_dir(prefix)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
            if !populated {
                return Err(Error::Install {
                    kind: StepFailureKind::ValidationFailed,
                    message: format!("nothing was installed into {}", prefix.display()),
                    output,
                });
            }
        }

        Ok(output)
    }

    /// Run the test suite with CTest.
    pub fn run_tests(
        &self,
        build_dir: &Path,
        configuration: BuildConfiguration,
        parallel: Option<usize>,
    ) -> Result<ProcessOutput, Error> {
        tracing::info!("running tests in {}", build_dir.display());

        let mut cmd = CommandSpec::new(&self.tools.ctest)
            .arg("--test-dir")
            .arg(self.path(build_dir)?)
            .arg("-C")
            .arg(configuration.build_type())
            .arg("--output-on-failure");

        if let Some(jobs) = parallel {
            cmd = cmd.arg("--parallel").arg(jobs.to_string());
        }

        let output = self.env.execute(&cmd, build_dir, &self.opts)?;

        if !output.success() {
            return Err(Error::TestFailure {
                summary: test_summary(&output),
                output,
            });
        }

        Ok(output)
    }

    /// Package with CPack into `output_dir` and return the files it wrote.
    pub fn create_package(
        &self,
        build_dir: &Path,
        configuration: BuildConfiguration,
        generator: Option<&str>,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, Error> {
        let config = build_dir.join(CPACK_CONFIG);
        if !config.is_file() {
            return Err(Error::Package {
                kind: StepFailureKind::ValidationFailed,
                message: format!("{} not found; is CPack included by the project?", config.display()),
                output: ProcessOutput::default(),
            });
        }

        crate::util::fs::ensure_dir(output_dir)?;
        let before = snapshot(output_dir);

        let mut cmd = CommandSpec::new(&self.tools.cpack)
            .arg("--config")
            .arg(self.path(&config)?)
            .arg("-C")
            .arg(configuration.build_type())
            .arg("-B")
            .arg(self.path(output_dir)?);

        if let Some(generator) = generator {
            cmd = cmd.arg("-G").arg(generator);
        }

        let output = self.env.execute(&cmd, build_dir, &self.opts)?;

        if !output.success() {
            return Err(Error::Package {
                kind: StepFailureKind::ToolFailed,
                message: format!("cpack exited with {}", output.status_display()),
                output,
            });
        }

        let written: Vec<PathBuf> = snapshot(output_dir)
            .into_iter()
            .filter(|(path, modified)| before.get(path) != Some(modified))
            .map(|(path, _)| path)
            .collect();

        if written.is_empty() {
            return Err(Error::Package {
                kind: StepFailureKind::ValidationFailed,
                message: format!("cpack wrote no package into {}", output_dir.display()),
                output,
            });
        }

        Ok(written)
    }
}

/// Files directly in `dir` with their modification times.
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Option<SystemTime>> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return BTreeMap::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok();
            (e.path(), modified)
        })
        .collect()
}

/// CTest's "N% tests passed" line, or the exit status.
fn test_summary(output: &ProcessOutput) -> String {
    CTEST_SUMMARY
        .find(&output.stdout)
        .or_else(|| CTEST_SUMMARY.find(&output.stderr))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| format!("ctest exited with {}", output.status_display()))
}

/// File names a target may produce on `os`.
fn artifact_names(target: &str, os: &OsFamily) -> Vec<(String, ArtifactKind)> {
    match os {
        OsFamily::Windows => vec![
            (format!("{}.exe", target), ArtifactKind::Executable),
            (format!("{}.lib", target), ArtifactKind::StaticLibrary),
            (format!("lib{}.a", target), ArtifactKind::StaticLibrary),
            (format!("{}.dll", target), ArtifactKind::SharedLibrary),
            (format!("lib{}.dll", target), ArtifactKind::SharedLibrary),
        ],
        OsFamily::Macos => vec![
            (target.to_string(), ArtifactKind::Executable),
            (format!("lib{}.a", target), ArtifactKind::StaticLibrary),
            (format!("lib{}.dylib", target), ArtifactKind::SharedLibrary),
        ],
        _ => vec![
            (target.to_string(), ArtifactKind::Executable),
            (format!("lib{}.a", target), ArtifactKind::StaticLibrary),
            (format!("lib{}.so", target), ArtifactKind::SharedLibrary),
        ],
    }
}

fn classify(file_name: &str, names: &[(String, ArtifactKind)]) -> Option<ArtifactKind> {
    names.iter().find_map(|(name, kind)| {
        let versioned_so = *kind == ArtifactKind::SharedLibrary
            && name.ends_with(".so")
            && file_name.starts_with(&format!("{}.", name));
        (file_name == name || versioned_so).then_some(*kind)
    })
}

/// Walk `build_dir` for the outputs of `target`, skipping CMake's own
/// bookkeeping directories.
pub fn find_artifacts(build_dir: &Path, target: &str, os: &OsFamily) -> Vec<Artifact> {
    let names = artifact_names(target, os);

    let mut artifacts: Vec<Artifact> = WalkDir::new(build_dir)
        .max_depth(ARTIFACT_SEARCH_DEPTH)
        .into_iter()
        .filter_entry(|e| e.file_name() != "CMakeFiles")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let kind = classify(e.file_name().to_str()?, &names)?;
            Some(Artifact {
                target: target.to_string(),
                kind,
                path: e.into_path(),
            })
        })
        .collect();

    artifacts.sort_by(|a, b| a.path.cmp(&b.path));
    artifacts
}

/// Check if a directory contains a CMake project.
pub fn is_cmake_project(dir: &Path) -> bool {
    dir.join("CMakeLists.txt").exists()
}
