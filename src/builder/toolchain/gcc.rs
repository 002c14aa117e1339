//! GCC, Clang and MinGW probing.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::compiler::{CompilerFamily, CompilerInfo};
use crate::util::process::ProcessBuilder;

use super::detect::{supported_standards, DetectOptions};

// "gcc (Ubuntu 13.2.0-4ubuntu3) 13.2.0", "gcc.exe (Rev3, Built by MSYS2 project) 13.2.0"
static GCC_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\)\s+(\d+(?:\.\d+){0,2})").unwrap());

static CLANG_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)clang version (\d+\.\d+(?:\.\d+)?)").unwrap());

static ANY_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+\.\d+(?:\.\d+)?)\b").unwrap());

/// Extract the version from the first line of `gcc --version`.
pub fn parse_gcc_version(output: &str) -> Option<String> {
    let first = output.lines().find(|l| !l.trim().is_empty())?;
    GCC_VERSION
        .captures(first)
        .or_else(|| ANY_VERSION.captures(first))
        .map(|c| c[1].to_string())
}

/// Extract the version from `clang --version` (also Apple Clang and clang-cl).
pub fn parse_clang_version(output: &str) -> Option<String> {
    CLANG_VERSION
        .captures(output)
        .map(|c| c[1].to_string())
}

/// Whether `--version` output comes from Xcode's clang.
pub fn is_apple_clang(output: &str) -> bool {
    output.contains("Apple clang") || output.contains("Apple LLVM")
}

/// Run `<compiler> --version` and return stdout and stderr combined.
pub(super) fn version_output(compiler: &Path) -> Result<String, String> {
    let output = ProcessBuilder::new(compiler)
        .arg("--version")
        .exec()
        .map_err(|e| format!("failed to run `{} --version`: {}", compiler.display(), e))?;

    if !output.success() {
        return Err(format!(
            "`{} --version` failed with {}",
            compiler.display(),
            output.status_display()
        ));
    }

    Ok(format!("{}{}", output.stdout, output.stderr))
}

fn compiler_info(family: CompilerFamily, path: PathBuf, version: String) -> CompilerInfo {
    let standards = supported_standards(family, &version);
    CompilerInfo {
        name: family.as_str().to_string(),
        version,
        family,
        path,
        standards,
        activation_script: None,
        msys_root: None,
    }
}

/// Probe a GCC executable. Rejects `gcc` shims that are really clang.
pub(super) fn probe_gcc(path: &Path) -> Result<CompilerInfo, String> {
    let output = version_output(path)?;
    if output.to_ascii_lowercase().contains("clang") {
        return Err(format!("`{}` is clang, not GCC", path.display()));
    }
    let version = parse_gcc_version(&output)
        .ok_or_else(|| format!("could not parse the version of `{}`", path.display()))?;

    Ok(compiler_info(CompilerFamily::Gcc, path.to_path_buf(), version))
}

/// Probe an LLVM clang executable. Apple's build is reported separately.
pub(super) fn probe_clang(path: &Path) -> Result<CompilerInfo, String> {
    let output = version_output(path)?;
    if is_apple_clang(&output) {
        return Err(format!(
            "`{}` is Apple Clang; request `apple-clang` instead",
            path.display()
        ));
    }
    let version = parse_clang_version(&output)
        .ok_or_else(|| format!("could not parse the version of `{}`", path.display()))?;

    Ok(compiler_info(CompilerFamily::Clang, path.to_path_buf(), version))
}

/// Probe Xcode's clang.
pub(super) fn probe_apple_clang(path: &Path) -> Result<CompilerInfo, String> {
    let output = version_output(path)?;
    if !is_apple_clang(&output) {
        return Err(format!("`{}` is not Apple Clang", path.display()));
    }
    let version = parse_clang_version(&output)
        .ok_or_else(|| format!("could not parse the version of `{}`", path.display()))?;

    Ok(compiler_info(CompilerFamily::AppleClang, path.to_path_buf(), version))
}

/// Where the MSYS2 subsystem keeps its gcc.
pub fn mingw_gcc_path(msys2_root: &Path, msystem: &str) -> PathBuf {
    msys2_root
        .join(msystem.to_ascii_lowercase())
        .join("bin")
        .join("gcc.exe")
}

/// Locate MinGW gcc under the MSYS2 root or as the cross-prefixed driver on PATH.
pub(super) fn locate_mingw(options: &DetectOptions) -> Result<PathBuf, String> {
    let under_root = mingw_gcc_path(&options.msys2_root, &options.msystem);
    if under_root.exists() {
        return Ok(under_root);
    }
    which::which("x86_64-w64-mingw32-gcc").map_err(|_| {
        format!(
            "no gcc at {} and `x86_64-w64-mingw32-gcc` is not on PATH",
            under_root.display()
        )
    })
}

/// Probe a MinGW gcc. The MSYS2 root is recorded for the POSIX shell.
pub(super) fn probe_mingw(path: &Path, options: &DetectOptions) -> Result<CompilerInfo, String> {
    let output = version_output(path)?;
    let version = parse_gcc_version(&output)
        .ok_or_else(|| format!("could not parse the version of `{}`", path.display()))?;

    let mut info = compiler_info(CompilerFamily::MinGw, path.to_path_buf(), version);
    info.msys_root = Some(options.msys2_root.clone());
    Ok(info)
}
