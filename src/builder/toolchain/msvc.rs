//! MSVC and clang-cl probing.
//!
//! Visual Studio is located with `vswhere.exe`. The developer prompt is not
//! activated here; detection only records where `vcvarsall.bat` lives so the
//! terminal layer can activate it once per family.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::compiler::{CompilerFamily, CompilerInfo};
use crate::core::platform::{Arch, PlatformInfo};
use crate::util::process::ProcessBuilder;

use super::detect::{supported_standards, DetectOptions};
use super::gcc::{parse_clang_version, version_output};

// "Microsoft (R) C/C++ Optimizing Compiler Version 19.38.33130 for x64"
static CL_BANNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Version (\d+\.\d+\.\d+(?:\.\d+)?)").unwrap());

/// Extract the compiler version from the `cl` banner.
pub fn parse_cl_banner(banner: &str) -> Option<String> {
    CL_BANNER.captures(banner).map(|c| c[1].to_string())
}

/// Location of `vcvarsall.bat` inside a Visual Studio installation.
pub fn vcvarsall_path(install: &Path) -> PathBuf {
    install
        .join("VC")
        .join("Auxiliary")
        .join("Build")
        .join("vcvarsall.bat")
}

/// Whether the current process already runs inside a developer prompt.
fn is_activated() -> bool {
    std::env::var_os("INCLUDE").is_some() && std::env::var_os("LIB").is_some()
}

/// Find vswhere.exe in its standard location or on PATH.
fn find_vswhere(options: &DetectOptions) -> Option<PathBuf> {
    if let Some(path) = &options.vswhere {
        return Some(path.clone());
    }

    let program_files_x86 = std::env::var("ProgramFiles(x86)")
        .unwrap_or_else(|_| "C:\\Program Files (x86)".to_string());

    let standard_path = PathBuf::from(&program_files_x86)
        .join("Microsoft Visual Studio")
        .join("Installer")
        .join("vswhere.exe");

    if standard_path.exists() {
        return Some(standard_path);
    }

    which::which("vswhere").ok()
}

/// Find the latest Visual Studio installation with the C++ tools.
pub fn find_installation(options: &DetectOptions) -> Result<PathBuf, String> {
    if let Some(install) = &options.vs_install {
        return Ok(install.clone());
    }

    let vswhere = find_vswhere(options).ok_or("vswhere.exe not found")?;
    tracing::debug!("found vswhere at {}", vswhere.display());

    let output = ProcessBuilder::new(&vswhere)
        .args([
            "-latest",
            "-products",
            "*",
            "-requires",
            "Microsoft.VisualStudio.Component.VC.Tools.x86.x64",
            "-property",
            "installationPath",
            "-format",
            "value",
        ])
        .exec()
        .map_err(|e| format!("failed to run vswhere: {}", e))?;

    if !output.success() {
        return Err(format!("vswhere failed: {}", output.stderr.trim()));
    }

    let path = output.stdout.lines().next().unwrap_or("").trim();
    if path.is_empty() {
        return Err("no Visual Studio installation with C++ tools".to_string());
    }
    Ok(PathBuf::from(path))
}

/// The default MSVC toolset version of an installation (e.g. "14.38.33130").
fn default_toolset(install: &Path) -> Option<String> {
    let file = install
        .join("VC")
        .join("Auxiliary")
        .join("Build")
        .join("Microsoft.VCToolsVersion.default.txt");
    std::fs::read_to_string(file)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Map a toolset version to the `cl` version it ships: 14.38 is 19.38.
pub fn cl_version_from_toolset(toolset: &str) -> Option<String> {
    let mut parts = toolset.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    if major != 14 {
        return None;
    }
    Some(format!("19.{}", minor))
}

fn host_dir(platform: &PlatformInfo) -> &'static str {
    match platform.arch {
        Arch::X86 => "Hostx86",
        Arch::Aarch64 => "Hostarm64",
        _ => "Hostx64",
    }
}

/// `cl.exe` inside an installation for the host architecture.
fn cl_in_installation(install: &Path, toolset: &str, platform: &PlatformInfo) -> PathBuf {
    let target = platform.arch.vcvars_arg().unwrap_or("x64");
    install
        .join("VC")
        .join("Tools")
        .join("MSVC")
        .join(toolset)
        .join("bin")
        .join(host_dir(platform))
        .join(target)
        .join("cl.exe")
}

/// Probe MSVC. A pinned or already-activated `cl` is asked for its banner;
/// otherwise the version comes from the installation's default toolset.
pub(super) fn probe_msvc(
    pinned: Option<&Path>,
    platform: &PlatformInfo,
    options: &DetectOptions,
) -> Result<CompilerInfo, String> {
    if let Some(cl) = pinned {
        return msvc_from_banner(cl, find_installation(options).ok());
    }

    if is_activated() {
        if let Ok(cl) = which::which("cl") {
            tracing::debug!("using activated developer prompt ({})", cl.display());
            return msvc_from_banner(&cl, None);
        }
    }

    let install = find_installation(options)?;
    let vcvarsall = vcvarsall_path(&install);
    if !vcvarsall.exists() {
        return Err(format!("vcvarsall.bat not found at {}", vcvarsall.display()));
    }

    let toolset = default_toolset(&install)
        .ok_or_else(|| format!("no default MSVC toolset in {}", install.display()))?;
    let version = cl_version_from_toolset(&toolset)
        .ok_or_else(|| format!("unrecognised MSVC toolset version `{}`", toolset))?;

    Ok(CompilerInfo {
        name: CompilerFamily::Msvc.as_str().to_string(),
        standards: supported_standards(CompilerFamily::Msvc, &version),
        version,
        family: CompilerFamily::Msvc,
        path: cl_in_installation(&install, &toolset, platform),
        activation_script: Some(vcvarsall),
        msys_root: None,
    })
}

fn msvc_from_banner(cl: &Path, install: Option<PathBuf>) -> Result<CompilerInfo, String> {
    // cl prints its banner on stderr and exits nonzero without inputs.
    let output = ProcessBuilder::new(cl)
        .exec()
        .map_err(|e| format!("failed to run `{}`: {}", cl.display(), e))?;
    let version = parse_cl_banner(&output.stderr)
        .or_else(|| parse_cl_banner(&output.stdout))
        .ok_or_else(|| format!("could not parse the banner of `{}`", cl.display()))?;

    Ok(CompilerInfo {
        name: CompilerFamily::Msvc.as_str().to_string(),
        standards: supported_standards(CompilerFamily::Msvc, &version),
        version,
        family: CompilerFamily::Msvc,
        path: cl.to_path_buf(),
        activation_script: install
            .map(|i| vcvarsall_path(&i))
            .filter(|p| p.exists()),
        msys_root: None,
    })
}

/// Probe clang-cl from PATH, a pin, or the LLVM component of Visual Studio.
pub(super) fn probe_clang_cl(
    pinned: Option<&Path>,
    options: &DetectOptions,
) -> Result<CompilerInfo, String> {
    let install = find_installation(options).ok();

    let path = match pinned {
        Some(path) => path.to_path_buf(),
        None => match which::which("clang-cl") {
            Ok(path) => path,
            Err(_) => {
                let bundled = install
                    .as_ref()
                    .map(|i| {
                        i.join("VC")
                            .join("Tools")
                            .join("Llvm")
                            .join("x64")
                            .join("bin")
                            .join("clang-cl.exe")
                    })
                    .filter(|p| p.exists());
                bundled.ok_or("clang-cl not found on PATH or in Visual Studio")?
            }
        },
    };

    let output = version_output(&path)?;
    let version = parse_clang_version(&output)
        .ok_or_else(|| format!("could not parse the version of `{}`", path.display()))?;

    Ok(CompilerInfo {
        name: CompilerFamily::ClangCl.as_str().to_string(),
        standards: supported_standards(CompilerFamily::ClangCl, &version),
        version,
        family: CompilerFamily::ClangCl,
        path,
        activation_script: install
            .map(|i| vcvarsall_path(&i))
            .filter(|p| p.exists()),
        msys_root: None,
    })
}
