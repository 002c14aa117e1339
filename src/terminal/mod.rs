//! Terminal environments.
//!
//! A toolchain runs in one of three shells:
//! - `Native`: direct process spawn with the inherited environment
//! - `VsDevPrompt`: the inherited environment plus the variables captured
//!   from `vcvarsall.bat`
//! - `Msys2`: the MSYS2 login bash, with paths translated to POSIX form
//!
//! Every external tool the pipeline runs goes through
//! [`TerminalEnvironment::execute`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::builder::toolchain::CommandSpec;
use crate::core::compiler::CompilerInfo;
use crate::core::errors::Error;
use crate::core::platform::Arch;
use crate::util::config::EnvironmentConfig;
use crate::util::process::{CancellationToken, ProcessBuilder, ProcessOutput, RunOptions, RunOutcome};

pub mod activation;
pub mod path;

pub use activation::{ActivatedEnv, ActivationCache};
pub use path::{native_to_posix, posix_to_native};

/// Options for [`TerminalEnvironment::execute`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Capture stdout/stderr into the returned output
    pub capture: bool,
    /// Echo output live while it is captured
    pub stream: bool,
    /// Kill the command when cancelled
    pub cancel: Option<CancellationToken>,
}

impl ExecOptions {
    /// Capture output without echoing it.
    pub fn captured() -> Self {
        ExecOptions {
            capture: true,
            ..Default::default()
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_cancel(mut self, cancel: Option<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }
}

/// The shell a toolchain's commands run in. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEnvironment {
    /// Plain process spawn.
    Native,
    /// Visual Studio developer prompt.
    VsDevPrompt {
        /// `vcvarsall.bat`, or `None` when the process was already activated
        script: Option<PathBuf>,
        /// Variables captured from the activation
        env: Arc<ActivatedEnv>,
    },
    /// MSYS2 POSIX emulation.
    Msys2 {
        /// MSYS2 installation root
        root: PathBuf,
        /// Subsystem (MINGW64, UCRT64, ...)
        msystem: String,
    },
}

impl TerminalEnvironment {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            TerminalEnvironment::Native => "native",
            TerminalEnvironment::VsDevPrompt { .. } => "vs-dev-prompt",
            TerminalEnvironment::Msys2 { .. } => "msys2",
        }
    }

    /// Whether paths must be given in POSIX form.
    pub fn is_posix(&self) -> bool {
        matches!(self, TerminalEnvironment::Msys2 { .. })
    }

    /// Translate a native path into the form this shell expects.
    pub fn translate_path(&self, native: &Path) -> Result<String, Error> {
        let text = native.to_str().ok_or_else(|| Error::PathTranslation {
            path: native.to_string_lossy().into_owned(),
            reason: "path is not valid UTF-8".to_string(),
        })?;

        match self {
            TerminalEnvironment::Msys2 { .. } => native_to_posix(text),
            _ => Ok(text.to_string()),
        }
    }

    /// Login bash of an MSYS2 installation.
    pub fn bash_path(root: &Path) -> PathBuf {
        root.join("usr").join("bin").join("bash.exe")
    }

    /// Build the process that runs `spec` in `cwd` inside this shell.
    pub fn prepare(&self, spec: &CommandSpec, cwd: &Path) -> Result<ProcessBuilder, Error> {
        match self {
            TerminalEnvironment::Native => Ok(ProcessBuilder::new(&spec.program)
                .args(&spec.args)
                .envs(&spec.env)
                .cwd(cwd)),
            TerminalEnvironment::VsDevPrompt { env, .. } => Ok(ProcessBuilder::new(&spec.program)
                .args(&spec.args)
                .envs(env.iter())
                .envs(&spec.env)
                .cwd(cwd)),
            TerminalEnvironment::Msys2 { root, msystem } => {
                let script = self.render_script(spec, cwd)?;
                Ok(ProcessBuilder::new(Self::bash_path(root))
                    .args(["-lc", script.as_str()])
                    .env("MSYSTEM", msystem)
                    .env("CHERE_INVOKING", "1")
                    .envs(&spec.env)
                    .cwd(cwd))
            }
        }
    }

    /// Render `spec` as a single bash command line.
    fn render_script(&self, spec: &CommandSpec, cwd: &Path) -> Result<String, Error> {
        let program = spec.program.to_string_lossy();
        let program = if program.contains('\\') || program.chars().nth(1) == Some(':') {
            native_to_posix(&program)?
        } else {
            program.into_owned()
        };

        let mut script = format!(
            "cd {} && exec {}",
            path::shell_quote(&self.translate_path(cwd)?),
            path::shell_quote(&program)
        );
        for arg in &spec.args {
            script.push(' ');
            script.push_str(&path::shell_quote(arg));
        }
        Ok(script)
    }

    /// Run `spec` to completion.
    ///
    /// A nonzero exit is returned as data. Failing to start the shell (or the
    /// program, for native shells) is `EnvironmentSetup`; a cancelled run is
    /// `Cancelled`.
    pub fn execute(
        &self,
        spec: &CommandSpec,
        cwd: &Path,
        opts: &ExecOptions,
    ) -> Result<ProcessOutput, Error> {
        if opts.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(Error::Cancelled);
        }

        let process = self.prepare(spec, cwd)?;
        tracing::debug!("[{}] {}", self.kind(), spec.display());

        let outcome = process
            .run(&RunOptions {
                capture: opts.capture,
                stream: opts.stream,
                cancel: opts.cancel.clone(),
            })
            .map_err(|e| Error::EnvironmentSetup {
                shell: self.kind().to_string(),
                message: format!("failed to launch `{}`: {}", process.get_program().display(), e),
            })?;

        match outcome {
            RunOutcome::Finished(output) => Ok(output),
            RunOutcome::Cancelled(_) => Err(Error::Cancelled),
        }
    }
}

impl fmt::Display for TerminalEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalEnvironment::Native => f.write_str("native"),
            TerminalEnvironment::VsDevPrompt { script: Some(script), .. } => {
                write!(f, "vs-dev-prompt ({})", script.display())
            }
            TerminalEnvironment::VsDevPrompt { script: None, .. } => {
                f.write_str("vs-dev-prompt (pre-activated)")
            }
            TerminalEnvironment::Msys2 { root, msystem } => {
                write!(f, "msys2 {} ({})", msystem, root.display())
            }
        }
    }
}

/// Choose and prepare the shell for a compiler.
///
/// MinGW runs in MSYS2, MSVC and clang-cl in the developer prompt (activated
/// once per family through `cache`), everything else natively.
pub fn build_environment(
    compiler: &CompilerInfo,
    cache: &ActivationCache,
    settings: &EnvironmentConfig,
    arch: &Arch,
) -> Result<TerminalEnvironment, Error> {
    if compiler.family.requires_posix_shell() {
        let root = compiler
            .msys_root
            .clone()
            .unwrap_or_else(|| settings.msys2_root());
        let bash = TerminalEnvironment::bash_path(&root);
        if !bash.exists() {
            return Err(Error::EnvironmentSetup {
                shell: "msys2".to_string(),
                message: format!("bash not found at {}", bash.display()),
            });
        }
        return Ok(TerminalEnvironment::Msys2 {
            root,
            msystem: settings.msystem.clone(),
        });
    }

    if compiler.family.requires_vs_environment() {
        let Some(script) = &compiler.activation_script else {
            tracing::debug!("{} runs in an already activated prompt", compiler.family);
            return Ok(TerminalEnvironment::VsDevPrompt {
                script: None,
                env: Arc::new(Vec::new()),
            });
        };

        let env = cache.get_or_activate(compiler.family, || {
            activation::capture_vcvars(script, arch)
        })?;
        return Ok(TerminalEnvironment::VsDevPrompt {
            script: Some(script.clone()),
            env,
        });
    }

    Ok(TerminalEnvironment::Native)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compiler::CompilerFamily;
    use crate::core::errors::ErrorKind;

    fn compiler(family: CompilerFamily) -> CompilerInfo {
        CompilerInfo {
            name: family.as_str().to_string(),
            version: "13.2.0".to_string(),
            family,
            path: PathBuf::from(family.executable()),
            standards: Vec::new(),
            activation_script: None,
            msys_root: None,
        }
    }

    #[test]
    fn test_native_for_gcc() {
        let env = build_environment(
            &compiler(CompilerFamily::Gcc),
            &ActivationCache::new(),
            &EnvironmentConfig::default(),
            &Arch::X86_64,
        )
        .unwrap();
        assert_eq!(env, TerminalEnvironment::Native);
        assert_eq!(env.translate_path(Path::new("build/x")).unwrap(), "build/x");
    }

    #[test]
    fn test_msys2_requires_bash() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut mingw = compiler(CompilerFamily::MinGw);
        mingw.msys_root = Some(tmp.path().to_path_buf());

        let err = build_environment(
            &mingw,
            &ActivationCache::new(),
            &EnvironmentConfig::default(),
            &Arch::X86_64,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EnvironmentSetup);

        let bash = TerminalEnvironment::bash_path(tmp.path());
        std::fs::create_dir_all(bash.parent().unwrap()).unwrap();
        std::fs::write(&bash, "").unwrap();

        let env = build_environment(
            &mingw,
            &ActivationCache::new(),
            &EnvironmentConfig::default(),
            &Arch::X86_64,
        )
        .unwrap();
        assert!(env.is_posix());
    }

    #[test]
    fn test_pre_activated_prompt_skips_activation() {
        let cache = ActivationCache::new();
        let env = build_environment(
            &compiler(CompilerFamily::Msvc),
            &cache,
            &EnvironmentConfig::default(),
            &Arch::X86_64,
        )
        .unwrap();
        assert_eq!(env.kind(), "vs-dev-prompt");
        assert!(!cache.is_cached(CompilerFamily::Msvc));
    }

    #[test]
    fn test_msys2_script_rendering() {
        let env = TerminalEnvironment::Msys2 {
            root: PathBuf::from("C:\\msys64"),
            msystem: "MINGW64".to_string(),
        };
        let spec = CommandSpec::new("conan")
            .arg("install")
            .arg("/e/proj/conanfile.txt")
            .arg("-o")
            .arg("*:shared=False");

        let process = env.prepare(&spec, Path::new("E:\\proj\\build")).unwrap();
        assert_eq!(process.get_args()[0], "-lc");
        assert_eq!(
            process.get_args()[1],
            "cd /e/proj/build && exec conan install /e/proj/conanfile.txt -o '*:shared=False'"
        );
        assert_eq!(process.get_env().get("MSYSTEM").map(String::as_str), Some("MINGW64"));
        assert_eq!(process.get_env().get("CHERE_INVOKING").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_msys2_translates_native_program() {
        let env = TerminalEnvironment::Msys2 {
            root: PathBuf::from("C:\\msys64"),
            msystem: "UCRT64".to_string(),
        };
        let spec = CommandSpec::new("C:\\Program Files\\CMake\\bin\\cmake.exe").arg("--version");
        let process = env.prepare(&spec, Path::new("C:\\proj")).unwrap();
        assert_eq!(
            process.get_args()[1],
            "cd /c/proj && exec '/c/Program Files/CMake/bin/cmake.exe' --version"
        );
    }

    #[test]
    fn test_vs_prompt_applies_captured_env() {
        let env = TerminalEnvironment::VsDevPrompt {
            script: Some(PathBuf::from("vcvarsall.bat")),
            env: Arc::new(vec![("INCLUDE".to_string(), "C:\\VS\\include".to_string())]),
        };
        let process = env
            .prepare(&CommandSpec::new("cmake").env("X", "1"), Path::new("."))
            .unwrap();
        assert_eq!(process.get_env().get("INCLUDE").map(String::as_str), Some("C:\\VS\\include"));
        assert_eq!(process.get_env().get("X").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_execute_missing_program_is_environment_setup() {
        let err = TerminalEnvironment::Native
            .execute(
                &CommandSpec::new("definitely-not-a-real-tool-xyz"),
                Path::new("."),
                &ExecOptions::captured(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EnvironmentSetup);
    }

    #[test]
    fn test_execute_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let err = TerminalEnvironment::Native
            .execute(
                &CommandSpec::new("cmake"),
                Path::new("."),
                &ExecOptions::captured().with_cancel(Some(token)),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_returns_nonzero_exit_as_data() {
        let output = TerminalEnvironment::Native
            .execute(
                &CommandSpec::new("sh").args(["-c", "echo nope 1>&2; exit 4"]),
                Path::new("."),
                &ExecOptions::captured(),
            )
            .unwrap();
        assert_eq!(output.status, Some(4));
        assert_eq!(output.stderr.trim(), "nope");
    }
}
