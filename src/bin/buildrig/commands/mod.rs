//! Command implementations

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use buildrig::builder::toolchain::{DetectOptions, Detector};
use buildrig::core::{Arch, BuildContext, Error, ErrorKind, PipelineError};
use buildrig::ops::{Pipeline, PipelineOptions};
use buildrig::terminal::ActivationCache;
use buildrig::util::diagnostic::{emit, suggestions};
use buildrig::util::process::CancellationToken;
use buildrig::util::{Config, GlobalContext, Shell};

use crate::cli::ContextArgs;

pub mod clean;
pub mod detect;
pub mod doctor;
pub mod matrix;
pub mod profile;
pub mod run;
pub mod stage;

/// Exit status for a run that failed on bad input.
pub const EXIT_VALIDATION: i32 = 2;
/// Exit status for a missing Conan profile.
pub const EXIT_PROFILE_NOT_FOUND: i32 = 3;
/// Exit status for everything else that failed.
pub const EXIT_FAILURE: i32 = 1;

/// Failures raised by the CLI itself.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("not inside a buildrig project")]
    NoProject,

    #[error("could not load configuration")]
    InvalidConfig,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{failed} of {total} pipelines failed")]
    MatrixFailed { failed: usize, total: usize, code: i32 },
}

/// Exit status for a taxonomy kind.
pub fn kind_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::ProfileNotFound => EXIT_PROFILE_NOT_FOUND,
        kind if kind.is_validation() => EXIT_VALIDATION,
        _ => EXIT_FAILURE,
    }
}

/// Map an error to the process exit status.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<PipelineError>() {
        return kind_exit_code(e.kind());
    }
    if let Some(e) = err.downcast_ref::<Error>() {
        return kind_exit_code(e.kind());
    }
    match err.downcast_ref::<CliError>() {
        Some(CliError::MatrixFailed { code, .. }) => *code,
        Some(_) => EXIT_VALIDATION,
        None => EXIT_FAILURE,
    }
}

/// Print an error the way its type wants to be shown.
pub fn report_error(shell: &Shell, err: &anyhow::Error) {
    let diagnostic = if let Some(e) = err.downcast_ref::<PipelineError>() {
        Some((e.kind(), e.to_diagnostic()))
    } else {
        err.downcast_ref::<Error>()
            .map(|e| (e.kind(), e.to_diagnostic()))
    };

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "error",
            "kind": diagnostic.as_ref().map(|(kind, _)| kind.as_str()),
            "message": format!("{:#}", err),
            "exit_code": exit_code(err),
        }));
        return;
    }

    match diagnostic {
        Some((_, diagnostic)) => emit(&diagnostic, shell.use_color()),
        None => {
            eprintln!("error: {:#}", err);
            if matches!(err.downcast_ref::<CliError>(), Some(CliError::NoProject)) {
                eprintln!("\n{}", suggestions::NO_PROJECT);
            }
        }
    }
}

/// Wire Ctrl-C to `cancel`. The running tool is killed and the current
/// stage fails with `cancelled`.
pub fn cancel_on_ctrl_c(cancel: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("buildrig-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::debug!("Ctrl-C handling unavailable: {}", e);
                    return;
                }
            };

            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted, cancelling the running stage");
                    cancel.cancel();
                }
            });
        });

    if let Err(e) = spawned {
        tracing::debug!("failed to start the signal thread: {}", e);
    }
}

/// Configuration for commands that work with or without a project.
pub fn load_optional_config() -> Result<(Option<PathBuf>, Config)> {
    let ctx = GlobalContext::new()?;
    let root = ctx.find_project_root();
    let config_dir = root.clone().unwrap_or_else(|| ctx.cwd().to_path_buf());
    let config = ctx
        .load_config(&config_dir)
        .context(CliError::InvalidConfig)?;
    Ok((root, config))
}

/// Everything a pipeline command needs.
pub struct Session {
    pub shell: Arc<Shell>,
    pub root: PathBuf,
    pub config: Config,
    pub detector: Detector,
    pub activation: ActivationCache,
    pub cancel: CancellationToken,
}

impl Session {
    /// Locate the project and load its configuration.
    pub fn load(shell: &Arc<Shell>, cancel: CancellationToken) -> Result<Self> {
        let ctx = GlobalContext::new()?;
        let root = ctx.project_root().context(CliError::NoProject)?;
        let config = ctx.load_config(&root).context(CliError::InvalidConfig)?;
        tracing::debug!("project root: {}", root.display());

        let detector = Detector::new(DetectOptions::from_config(&config));

        Ok(Session {
            shell: Arc::clone(shell),
            root,
            config,
            detector,
            activation: ActivationCache::new(),
            cancel,
        })
    }

    /// A pipeline wired to this session's cancellation and verbosity.
    pub fn pipeline(&self, options: PipelineOptions) -> Pipeline<'_> {
        Pipeline::new(
            self.root.clone(),
            &self.config,
            &self.detector,
            &self.activation,
        )
        .options(PipelineOptions {
            stream: self.shell.is_verbose(),
            cancel: Some(self.cancel.clone()),
            ..options
        })
    }

    /// The requested architecture, or the host's.
    pub fn arch(&self, arch: Option<&str>) -> Arch {
        arch.map(Arch::from_arch_str)
            .unwrap_or_else(|| self.detector.platform().arch.clone())
    }

    /// Build the context for a single-pipeline command.
    ///
    /// Without `--compiler` the first configured compiler is used, then the
    /// platform's preferred detected one.
    pub fn context(&self, args: &ContextArgs, pipeline: &str) -> Result<BuildContext> {
        let compiler = match (&args.compiler, self.config.project.compilers.first()) {
            (Some(compiler), _) => compiler.clone(),
            (None, Some(configured)) => configured.clone(),
            (None, None) => self.detector.detect(None)?.name,
        };

        Ok(BuildContext::builder(&args.target, compiler)
            .pipeline(pipeline)
            .configuration(args.configuration)
            .arch(self.arch(args.arch.as_deref()))
            .shared(args.shared || self.config.build.shared)
            .static_runtime(args.static_runtime || self.config.build.static_runtime)
            .build())
    }
}
