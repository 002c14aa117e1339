//! The clean-build pipeline.
//!
//! One [`Pipeline`] run drives a single (target, compiler, configuration)
//! tuple through a fixed sequence of stages:
//!
//! ```text
//! Created -> CleanedDirs -> DependenciesInstalled -> Configured -> Built -> Validated -> Done
//! ```
//!
//! Any stage may fail, ending the run in `Failed`. The stage error is
//! returned as a [`PipelineError`] that keeps the original [`Error`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::builder::cmake::{find_artifacts, Artifact, CMakeBuilder, CMakeTools, ConfigureOptions};
use crate::builder::toolchain::Detector;
use crate::core::compiler::{CompilerFamily, CompilerInfo};
use crate::core::context::BuildContext;
use crate::core::errors::{Error, ErrorKind, PipelineError, StepFailureKind};
use crate::core::layout;
use crate::deps::{self, resolve_profile, InstallRequest};
use crate::terminal::{build_environment, ActivationCache, ExecOptions, TerminalEnvironment};
use crate::util::config::Config;
use crate::util::fs::remove_dir_all_if_exists;
use crate::util::process::{CancellationToken, ProcessOutput};

/// A unit of work in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Compiler detection and shell setup
    Prepare,
    Clean,
    InstallDependencies,
    Configure,
    Build,
    Validate,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Prepare,
        Stage::Clean,
        Stage::InstallDependencies,
        Stage::Configure,
        Stage::Build,
        Stage::Validate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Clean => "clean",
            Stage::InstallDependencies => "install-dependencies",
            Stage::Configure => "configure",
            Stage::Build => "build",
            Stage::Validate => "validate",
        }
    }

    /// State reached when this stage completes. Preparing does not move the
    /// pipeline out of `Created`.
    pub fn completed_state(&self) -> Option<PipelineState> {
        match self {
            Stage::Prepare => None,
            Stage::Clean => Some(PipelineState::CleanedDirs),
            Stage::InstallDependencies => Some(PipelineState::DependenciesInstalled),
            Stage::Configure => Some(PipelineState::Configured),
            Stage::Build => Some(PipelineState::Built),
            Stage::Validate => Some(PipelineState::Validated),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum PipelineState {
    Created,
    CleanedDirs,
    DependenciesInstalled,
    Configured,
    Built,
    Validated,
    Done,
    /// Terminal failure; the full cause is carried by the returned error.
    Failed {
        stage: Stage,
        #[serde(serialize_with = "serialize_kind")]
        cause: ErrorKind,
    },
}

fn serialize_kind<S: serde::Serializer>(kind: &ErrorKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(kind.as_str())
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Created => f.write_str("created"),
            PipelineState::CleanedDirs => f.write_str("cleaned-dirs"),
            PipelineState::DependenciesInstalled => f.write_str("dependencies-installed"),
            PipelineState::Configured => f.write_str("configured"),
            PipelineState::Built => f.write_str("built"),
            PipelineState::Validated => f.write_str("validated"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed { stage, cause } => write!(f, "failed ({}: {})", stage, cause),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub context: BuildContext,
    pub compiler: CompilerInfo,
    /// Shell the tools ran in
    pub environment: String,
    pub build_dir: PathBuf,
    /// Every state entered, in order
    pub history: Vec<PipelineState>,
    pub artifacts: Vec<Artifact>,
    #[serde(skip)]
    pub duration: Duration,
}

/// Options for a pipeline run beyond what the configuration holds.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Echo tool output while it runs
    pub stream: bool,
    /// Run the test suite during validation, overriding `[validate]`
    pub run_tests: Option<bool>,
    /// Cancels the running tool and fails the current stage
    pub cancel: Option<CancellationToken>,
}

/// Runs pipelines for one project.
///
/// The detector and activation cache are shared; everything else a run
/// touches lives under its own build directory, so runs for different
/// tuples may proceed concurrently.
pub struct Pipeline<'a> {
    root: PathBuf,
    config: &'a Config,
    detector: &'a Detector,
    activation: &'a ActivationCache,
    options: PipelineOptions,
}

/// What one run has recorded so far.
struct Run<'c> {
    ctx: &'c BuildContext,
    history: Vec<PipelineState>,
}

impl Run<'_> {
    fn enter(&mut self, state: PipelineState) {
        tracing::info!(
            pipeline = %self.ctx.pipeline,
            target = %self.ctx.target,
            compiler = %self.ctx.compiler,
            configuration = %self.ctx.configuration,
            "-> {}",
            state
        );
        self.history.push(state);
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        config: &'a Config,
        detector: &'a Detector,
        activation: &'a ActivationCache,
    ) -> Self {
        Pipeline {
            root: root.into(),
            config,
            detector,
            activation,
            options: PipelineOptions::default(),
        }
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    /// Build directory for a context. Fails for names that would resolve
    /// outside `build/`.
    pub fn build_dir(&self, ctx: &BuildContext) -> Result<PathBuf, Error> {
        layout::context_build_dir(&self.root, ctx)
    }

    fn exec_options(&self) -> ExecOptions {
        ExecOptions::captured()
            .with_stream(self.options.stream)
            .with_cancel(self.options.cancel.clone())
    }

    fn is_cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .is_some_and(|c| c.is_cancelled())
    }

    /// Run one stage: check for cancellation, run it, and record the
    /// resulting state.
    fn stage<T>(
        &self,
        run: &mut Run<'_>,
        stage: Stage,
        action: impl FnOnce() -> Result<T, Error>,
    ) -> Result<T, PipelineError> {
        let result = if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            tracing::debug!("starting stage {}", stage);
            action()
        };

        match result {
            Ok(value) => {
                if let Some(state) = stage.completed_state() {
                    run.enter(state);
                }
                Ok(value)
            }
            Err(cause) => {
                run.enter(PipelineState::Failed {
                    stage,
                    cause: cause.kind(),
                });
                Err(PipelineError {
                    stage,
                    target: run.ctx.target.clone(),
                    compiler: run.ctx.compiler.clone(),
                    configuration: run.ctx.configuration,
                    cause,
                })
            }
        }
    }

    /// Run the whole pipeline for `ctx`.
    pub fn run(&self, ctx: &BuildContext) -> Result<PipelineReport, PipelineError> {
        let start = Instant::now();
        let mut run = Run {
            ctx,
            history: Vec::new(),
        };
        run.enter(PipelineState::Created);

        let (build_dir, compiler, env) = self.stage(&mut run, Stage::Prepare, || {
            let build_dir = self.build_dir(ctx)?;
            let (compiler, env) = self.prepare(ctx)?;
            Ok((build_dir, compiler, env))
        })?;
        tracing::info!("using {} in {}", compiler, env);

        self.stage(&mut run, Stage::Clean, || clean_build_dir(&build_dir))?;
        self.stage(&mut run, Stage::InstallDependencies, || {
            self.install_dependencies(ctx, &compiler, &env, &build_dir)
        })?;
        self.stage(&mut run, Stage::Configure, || {
            self.configure(ctx, &compiler, &env, &build_dir)
        })?;
        self.stage(&mut run, Stage::Build, || self.build(ctx, &env, &build_dir))?;
        let artifacts = self.stage(&mut run, Stage::Validate, || {
            self.validate(ctx, &env, &build_dir)
        })?;

        run.enter(PipelineState::Done);

        Ok(PipelineReport {
            context: ctx.clone(),
            compiler,
            environment: env.to_string(),
            build_dir,
            history: run.history,
            artifacts,
            duration: start.elapsed(),
        })
    }

    /// Detect the requested compiler and set up its shell.
    pub fn prepare(&self, ctx: &BuildContext) -> Result<(CompilerInfo, TerminalEnvironment), Error> {
        ctx.validate()?;
        let compiler = self.detector.detect(Some(ctx.compiler.as_str()))?;
        let env = build_environment(
            &compiler,
            self.activation,
            &self.config.environment,
            &ctx.arch,
        )?;
        Ok((compiler, env))
    }

    /// CMake driver for `env` using the configured tools.
    pub fn cmake<'e>(&self, env: &'e TerminalEnvironment) -> CMakeBuilder<'e> {
        let tools = &self.config.tools;
        CMakeBuilder::new(env)
            .tools(CMakeTools {
                cmake: tools.cmake_program(),
                ctest: tools.ctest_program(),
                cpack: tools.cpack_program(),
            })
            .exec_options(self.exec_options())
    }

    /// Resolve the profile and run `conan install` into the build directory.
    pub fn install_dependencies(
        &self,
        ctx: &BuildContext,
        compiler: &CompilerInfo,
        env: &TerminalEnvironment,
        build_dir: &Path,
    ) -> Result<ProcessOutput, Error> {
        let profile = resolve_profile(&ctx.compiler, ctx.configuration)?;

        let mut request = InstallRequest::new(
            self.config.tools.conan_program(),
            self.config.manifest_path(&self.root),
            self.config.profiles_dir(&self.root),
        );
        request.shared = Some(ctx.shared);
        request.build_missing = self.config.build.build_missing;
        request.expected_files = self.config.build.expected_files.clone();
        if ctx.static_runtime && uses_msvc_runtime(compiler.family) {
            request
                .settings
                .push(("compiler.runtime".to_string(), "static".to_string()));
        }

        deps::install(
            build_dir,
            &profile,
            ctx.configuration,
            env,
            &request,
            &self.exec_options(),
        )
    }

    /// Configure with CMake, using the Conan toolchain when it was generated.
    pub fn configure(
        &self,
        ctx: &BuildContext,
        compiler: &CompilerInfo,
        env: &TerminalEnvironment,
        build_dir: &Path,
    ) -> Result<ProcessOutput, Error> {
        let toolchain_file =
            deps::locate_generated(build_dir, "conan_toolchain.cmake", ctx.configuration);
        if toolchain_file.is_none() {
            tracing::warn!("no conan_toolchain.cmake in {}", build_dir.display());
        }

        let mut options = ConfigureOptions {
            generator: self.config.build.generator.clone(),
            toolchain_file,
            preset: self.config.build.preset.clone(),
            shared: ctx.shared,
            defines: self.config.build.cmake_defines.clone(),
        };
        if ctx.static_runtime && uses_msvc_runtime(compiler.family) {
            options.defines.insert(
                "CMAKE_MSVC_RUNTIME_LIBRARY".to_string(),
                "MultiThreaded$<$<CONFIG:Debug>:Debug>".to_string(),
            );
        }

        let source_dir = self.config.source_dir(&self.root);
        self.cmake(env)
            .configure(&source_dir, build_dir, ctx.configuration, &options)
    }

    /// Build the context's target.
    pub fn build(
        &self,
        ctx: &BuildContext,
        env: &TerminalEnvironment,
        build_dir: &Path,
    ) -> Result<ProcessOutput, Error> {
        self.cmake(env)
            .build(build_dir, &ctx.target, ctx.configuration, self.config.build.jobs)
    }

    /// Check the build produced the target and optionally run its tests.
    pub fn validate(
        &self,
        ctx: &BuildContext,
        env: &TerminalEnvironment,
        build_dir: &Path,
    ) -> Result<Vec<Artifact>, Error> {
        if !build_dir.is_dir() {
            return Err(Error::Build {
                target: ctx.target.clone(),
                kind: StepFailureKind::ValidationFailed,
                tail: format!("build directory {} is gone", build_dir.display()),
                output: ProcessOutput::default(),
            });
        }

        let artifacts = find_artifacts(build_dir, &ctx.target, &self.detector.platform().os);
        if artifacts.is_empty() {
            return Err(Error::Build {
                target: ctx.target.clone(),
                kind: StepFailureKind::ValidationFailed,
                tail: format!(
                    "no output for target `{}` under {}",
                    ctx.target,
                    build_dir.display()
                ),
                output: ProcessOutput::default(),
            });
        }
        for artifact in &artifacts {
            tracing::debug!("found {:?} {}", artifact.kind, artifact.path.display());
        }

        let run_tests = self
            .options
            .run_tests
            .unwrap_or(self.config.validate.run_tests);
        if run_tests {
            self.cmake(env)
                .run_tests(build_dir, ctx.configuration, self.config.build.jobs)?;
        }

        Ok(artifacts)
    }
}

fn uses_msvc_runtime(family: CompilerFamily) -> bool {
    matches!(family, CompilerFamily::Msvc | CompilerFamily::ClangCl)
}

/// Remove the build directory if present. Repeating it is a no-op.
pub fn clean_build_dir(build_dir: &Path) -> Result<(), Error> {
    if remove_dir_all_if_exists(build_dir)? {
        tracing::debug!("removed {}", build_dir.display());
    }
    Ok(())
}
