//! Developer-prompt activation.
//!
//! `vcvarsall.bat` is run once per compiler family, chained with `set` in the
//! same `cmd` instance, and the variables it changed are kept for every later
//! command of that family.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use crate::core::compiler::CompilerFamily;
use crate::core::errors::Error;
use crate::core::platform::Arch;
use crate::util::process::ProcessBuilder;

/// Variables captured from an activated developer prompt.
pub type ActivatedEnv = Vec<(String, String)>;

type Slot = Arc<OnceLock<Result<Arc<ActivatedEnv>, String>>>;

/// Per-family activation results.
///
/// Slots are created under a mutex; the activation itself runs outside it, so
/// different families activate in parallel while callers for the same family
/// wait for the first one to finish.
#[derive(Debug, Default)]
pub struct ActivationCache {
    slots: Mutex<HashMap<CompilerFamily, Slot>>,
}

impl ActivationCache {
    pub fn new() -> Self {
        ActivationCache::default()
    }

    fn slot(&self, family: CompilerFamily) -> Slot {
        let mut slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(slots.entry(family).or_default())
    }

    /// Return the cached activation for `family`, running `activate` if this
    /// is the first request. Failures are cached too.
    pub fn get_or_activate<F>(&self, family: CompilerFamily, activate: F) -> Result<Arc<ActivatedEnv>, Error>
    where
        F: FnOnce() -> Result<ActivatedEnv, String>,
    {
        let slot = self.slot(family);
        let result = slot.get_or_init(|| {
            tracing::debug!("activating developer environment for {}", family);
            activate().map(Arc::new)
        });

        result.clone().map_err(|message| Error::EnvironmentSetup {
            shell: "vs-dev-prompt".to_string(),
            message,
        })
    }

    /// Whether `family` has been activated (successfully or not).
    pub fn is_cached(&self, family: CompilerFamily) -> bool {
        self.slot(family).get().is_some()
    }
}

/// Parse the output of `set` into variables, dropping cmd's hidden
/// per-drive entries (`=C:=C:\...`).
pub fn parse_set_output(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter(|line| !line.starts_with('='))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.to_string(), value.trim_end_matches('\r').to_string()))
        .collect()
}

/// Keep only variables whose value differs from the current environment.
fn changed_vars(vars: Vec<(String, String)>) -> ActivatedEnv {
    vars.into_iter()
        .filter(|(key, value)| std::env::var(key).ok().as_deref() != Some(value.as_str()))
        .collect()
}

/// Run `vcvarsall.bat <arch>` and capture the resulting environment.
pub fn capture_vcvars(script: &Path, arch: &Arch) -> Result<ActivatedEnv, String> {
    let arch_arg = arch
        .vcvars_arg()
        .ok_or_else(|| format!("vcvarsall.bat does not support architecture {}", arch))?;

    // A temporary batch file avoids cmd.exe quoting issues with the script path.
    let mut batch = tempfile::Builder::new()
        .prefix("buildrig-vcvars")
        .suffix(".bat")
        .tempfile()
        .map_err(|e| format!("failed to create temporary batch file: {}", e))?;
    write!(
        batch,
        "@echo off\r\ncall \"{}\" {} >nul 2>&1\r\nif errorlevel 1 exit /b 1\r\nset\r\n",
        script.display(),
        arch_arg
    )
    .map_err(|e| format!("failed to write temporary batch file: {}", e))?;
    let batch = batch.into_temp_path();

    let output = ProcessBuilder::new("cmd")
        .arg("/c")
        .arg(batch.as_os_str())
        .exec()
        .map_err(|e| format!("failed to launch cmd: {}", e))?;

    if !output.success() {
        return Err(format!(
            "{} {} failed with {}",
            script.display(),
            arch_arg,
            output.status_display()
        ));
    }

    let vars = parse_set_output(&output.stdout);
    let has_path = vars
        .iter()
        .any(|(key, value)| key.eq_ignore_ascii_case("PATH") && !value.is_empty());
    if !has_path {
        return Err(format!("{} produced an empty PATH", script.display()));
    }

    Ok(changed_vars(vars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parse_set_output() {
        let output = "=C:=C:\\proj\r\nINCLUDE=C:\\VS\\include;\r\nPath=C:\\VS\\bin;C:\\Windows\r\nweird line\r\n";
        let vars = parse_set_output(output);
        assert_eq!(
            vars,
            vec![
                ("INCLUDE".to_string(), "C:\\VS\\include;".to_string()),
                ("Path".to_string(), "C:\\VS\\bin;C:\\Windows".to_string()),
            ]
        );
    }

    #[test]
    fn test_activation_runs_once_per_family() {
        let cache = ActivationCache::new();
        let calls = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let env = cache
                        .get_or_activate(CompilerFamily::Msvc, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(vec![("INCLUDE".to_string(), "x".to_string())])
                        })
                        .unwrap();
                    assert_eq!(env.len(), 1);
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_cached(CompilerFamily::Msvc));
        assert!(!cache.is_cached(CompilerFamily::ClangCl));
    }

    #[test]
    fn test_failed_activation_is_cached() {
        let cache = ActivationCache::new();
        let err = cache
            .get_or_activate(CompilerFamily::ClangCl, || Err("vcvarsall exploded".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::EnvironmentSetup { .. }));

        let again = cache
            .get_or_activate(CompilerFamily::ClangCl, || Ok(Vec::new()))
            .unwrap_err();
        assert!(again.to_string().contains("vcvarsall exploded"));
    }

    #[test]
    fn test_unsupported_arch_is_rejected() {
        let err = capture_vcvars(Path::new("vcvarsall.bat"), &Arch::Other("riscv64".into()))
            .unwrap_err();
        assert!(err.contains("riscv64"));
    }
}
