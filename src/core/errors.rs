//! Typed failures raised by the orchestration core.
//!
//! Every component returns the most specific [`Error`] variant it can.
//! The pipeline wraps them in [`PipelineError`] with stage context but never
//! changes the variant, so callers can still tell a missing profile from a
//! failed `conan install` even though both abort the same stage.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::context::BuildConfiguration;
use crate::ops::pipeline::Stage;
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::process::ProcessOutput;

/// Taxonomy of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DetectionFailure,
    EnvironmentSetup,
    PathTranslation,
    ProfileNotFound,
    DependencyInstall,
    InstallValidation,
    Configure,
    Build,
    Install,
    TestFailure,
    Package,
    Cancelled,
    InvalidName,
    Io,
}

impl ErrorKind {
    /// Stable snake_case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DetectionFailure => "detection_failure",
            ErrorKind::EnvironmentSetup => "environment_setup",
            ErrorKind::PathTranslation => "path_translation",
            ErrorKind::ProfileNotFound => "profile_not_found",
            ErrorKind::DependencyInstall => "dependency_install",
            ErrorKind::InstallValidation => "install_validation",
            ErrorKind::Configure => "configure",
            ErrorKind::Build => "build",
            ErrorKind::Install => "install",
            ErrorKind::TestFailure => "test_failure",
            ErrorKind::Package => "package",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidName => "invalid_name",
            ErrorKind::Io => "io",
        }
    }

    /// Whether the failure stems from invalid input rather than a tool run.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::DetectionFailure
                | ErrorKind::PathTranslation
                | ErrorKind::ProfileNotFound
                | ErrorKind::InvalidName
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why `conan install` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallFailureKind {
    /// A package or exact version is not available in any remote.
    PackageNotResolved,
    /// A version range matched none of the available versions.
    RangeUnsatisfiable,
    /// Any other nonzero exit.
    ToolFailure,
}

impl InstallFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallFailureKind::PackageNotResolved => "package_not_resolved",
            InstallFailureKind::RangeUnsatisfiable => "range_unsatisfiable",
            InstallFailureKind::ToolFailure => "tool_failure",
        }
    }
}

impl fmt::Display for InstallFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a tool step failed by exit code or by a missing post-condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepFailureKind {
    /// The tool exited nonzero.
    ToolFailed,
    /// The tool exited zero but its expected output is missing.
    ValidationFailed,
}

impl StepFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepFailureKind::ToolFailed => "tool_failed",
            StepFailureKind::ValidationFailed => "validation_failed",
        }
    }
}

impl fmt::Display for StepFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised by one of the core components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("compiler `{name}` not found: {reason}")]
    CompilerNotFound { name: String, reason: String },

    #[error("no usable compiler found on {platform} (tried: {})", tried.join(", "))]
    NoCompilerFound { platform: String, tried: Vec<String> },

    #[error("unsupported compiler identifier `{compiler}`")]
    UnsupportedCompiler { compiler: String },

    #[error("failed to set up {shell} environment: {message}")]
    EnvironmentSetup { shell: String, message: String },

    #[error("cannot translate path `{path}`: {reason}")]
    PathTranslation { path: String, reason: String },

    #[error("profile `{profile}` not found in {}", searched.display())]
    ProfileNotFound { profile: String, searched: PathBuf },

    #[error("dependency installation failed ({kind}): {message}")]
    DependencyInstall {
        kind: InstallFailureKind,
        message: String,
        output: ProcessOutput,
    },

    #[error(
        "dependency installation reported success but {} is incomplete (missing: {})",
        build_dir.display(),
        display_paths(missing)
    )]
    InstallValidation {
        build_dir: PathBuf,
        missing: Vec<PathBuf>,
        output: ProcessOutput,
    },

    #[error("configure failed ({kind}) for {}", build_dir.display())]
    Configure {
        kind: StepFailureKind,
        build_dir: PathBuf,
        output: ProcessOutput,
    },

    #[error("build of target `{target}` failed ({kind})")]
    Build {
        target: String,
        kind: StepFailureKind,
        tail: String,
        output: ProcessOutput,
    },

    #[error("install failed ({kind}): {message}")]
    Install {
        kind: StepFailureKind,
        message: String,
        output: ProcessOutput,
    },

    #[error("tests failed: {summary}")]
    TestFailure {
        summary: String,
        output: ProcessOutput,
    },

    #[error("packaging failed ({kind}): {message}")]
    Package {
        kind: StepFailureKind,
        message: String,
        output: ProcessOutput,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid {field} name `{value}`: {reason}")]
    InvalidName {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CompilerNotFound { .. }
            | Error::NoCompilerFound { .. }
            | Error::UnsupportedCompiler { .. } => ErrorKind::DetectionFailure,
            Error::EnvironmentSetup { .. } => ErrorKind::EnvironmentSetup,
            Error::PathTranslation { .. } => ErrorKind::PathTranslation,
            Error::ProfileNotFound { .. } => ErrorKind::ProfileNotFound,
            Error::DependencyInstall { .. } => ErrorKind::DependencyInstall,
            Error::InstallValidation { .. } => ErrorKind::InstallValidation,
            Error::Configure { .. } => ErrorKind::Configure,
            Error::Build { .. } => ErrorKind::Build,
            Error::Install { .. } => ErrorKind::Install,
            Error::TestFailure { .. } => ErrorKind::TestFailure,
            Error::Package { .. } => ErrorKind::Package,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::InvalidName { .. } => ErrorKind::InvalidName,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::error(self.to_string());

        match self {
            Error::CompilerNotFound { .. } | Error::NoCompilerFound { .. } => {
                diag = diag.with_suggestion(suggestions::DETECT_COMPILERS);
            }
            Error::ProfileNotFound { profile, .. } => {
                diag = diag
                    .with_context(format!("expected a Conan profile named `{}`", profile))
                    .with_suggestion(suggestions::PROFILE_MISSING);
            }
            Error::DependencyInstall { kind, output, .. } => {
                if *kind == InstallFailureKind::RangeUnsatisfiable {
                    diag = diag.with_suggestion(suggestions::RANGE_UNSATISFIABLE);
                }
                diag = with_output_context(diag, output);
            }
            Error::InstallValidation { .. } => {
                diag = diag.with_context(
                    "the package manager exited successfully but did not generate its files",
                );
            }
            Error::Configure { kind, output, .. } => {
                if *kind == StepFailureKind::ValidationFailed {
                    diag = diag.with_context("CMakeCache.txt was not generated");
                }
                diag = with_output_context(diag, output);
            }
            Error::Build { tail, .. } => {
                if !tail.is_empty() {
                    diag = diag.with_context(tail.clone());
                }
                diag = diag.with_suggestion(suggestions::BUILD_FAILED);
            }
            Error::Install { output, .. }
            | Error::TestFailure { output, .. }
            | Error::Package { output, .. } => {
                diag = with_output_context(diag, output);
            }
            Error::EnvironmentSetup { .. } => {
                diag = diag.with_suggestion(suggestions::ENVIRONMENT);
            }
            Error::InvalidName { .. } => {
                diag = diag.with_context(
                    "target and compiler names become directories under build/",
                );
            }
            _ => {}
        }

        diag
    }
}

fn with_output_context(diag: Diagnostic, output: &ProcessOutput) -> Diagnostic {
    let tail = output.tail(15);
    if tail.is_empty() {
        diag.with_context(output.status_display())
    } else {
        diag.with_context(format!("{}:\n{}", output.status_display(), tail))
    }
}

/// A stage failure with the pipeline context it happened in.
#[derive(Debug, Error)]
#[error(
    "pipeline `{target}` ({compiler}, {configuration}) failed during {stage}: {cause}"
)]
pub struct PipelineError {
    pub stage: Stage,
    pub target: String,
    pub compiler: String,
    pub configuration: BuildConfiguration,
    #[source]
    pub cause: Error,
}

impl PipelineError {
    /// The taxonomy kind of the underlying cause.
    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = self.cause.to_diagnostic();
        diag.message = format!(
            "{} stage failed for `{}` ({}, {}): {}",
            self.stage, self.target, self.compiler, self.configuration, diag.message
        );
        diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct_for_install_failures() {
        let not_found = Error::ProfileNotFound {
            profile: "x-release".to_string(),
            searched: PathBuf::from("profiles"),
        };
        let install = Error::DependencyInstall {
            kind: InstallFailureKind::ToolFailure,
            message: "boom".to_string(),
            output: ProcessOutput::new(Some(1), "", "boom"),
        };

        assert_eq!(not_found.kind(), ErrorKind::ProfileNotFound);
        assert_eq!(install.kind(), ErrorKind::DependencyInstall);
        assert!(not_found.kind().is_validation());
        assert!(!install.kind().is_validation());
    }

    #[test]
    fn test_pipeline_error_keeps_cause() {
        use std::error::Error as _;

        let err = PipelineError {
            stage: Stage::InstallDependencies,
            target: "app".to_string(),
            compiler: "msvc".to_string(),
            configuration: BuildConfiguration::Release,
            cause: Error::ProfileNotFound {
                profile: "msvc-release".to_string(),
                searched: PathBuf::from("profiles"),
            },
        };

        assert_eq!(err.kind(), ErrorKind::ProfileNotFound);
        assert!(matches!(err.cause, Error::ProfileNotFound { ref profile, .. } if profile == "msvc-release"));
        assert!(err.source().is_some());

        let message = err.to_string();
        assert!(message.contains("install-dependencies"));
        assert!(message.contains("msvc-release"));
    }

    #[test]
    fn test_diagnostic_includes_output_tail() {
        let err = Error::Configure {
            kind: StepFailureKind::ToolFailed,
            build_dir: PathBuf::from("build/release/gcc/app"),
            output: ProcessOutput::new(Some(1), "", "CMake Error: no CMakeLists.txt"),
        };

        let output = err.to_diagnostic().format(false);
        assert!(output.contains("configure failed (tool_failed)"));
        assert!(output.contains("CMake Error"));
    }
}
