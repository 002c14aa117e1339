//! `conan install` driving.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::builder::toolchain::CommandSpec;
use crate::core::context::BuildConfiguration;
use crate::core::errors::{Error, InstallFailureKind};
use crate::terminal::{ExecOptions, TerminalEnvironment};
use crate::util::fs::{ensure_dir, find_files};
use crate::util::process::ProcessOutput;

use super::manifest::{DependencyManifest, VersionSpec};
use super::profile::{validate_profile_exists, ProfileId};

// Conan 2: "Version range '~1.3' from requirement 'pkga/[~1.3]' required by
// 'conanfile' could not be resolved"
static RANGE_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)version range '([^']*)' from requirement '([^']*)'[^\n]*could not be resolved")
        .unwrap()
});

// "Package 'zlib/1.2.99' not resolved", "Unable to find 'zlib/1.2.99' in remotes"
static NOT_RESOLVED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:package '([^']*)' not resolved|unable to find '([^']*)')").unwrap()
});

// "Available versions: 1.2.9, 1.4.0" below the failing reference, or
// "Available versions for 'pkga': 1.2.9, 1.4.0"
static AVAILABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)available versions(?: for '([^']*)')?\s*:\s*(.*)").unwrap()
});

/// How far Conan searches for generated files below the output folder.
const GENERATED_SEARCH_DEPTH: usize = 4;

/// Inputs to one `conan install`.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Conan executable
    pub conan: PathBuf,
    /// conanfile.txt / conanfile.py
    pub manifest: PathBuf,
    /// Directory profiles are looked up in
    pub profiles_dir: PathBuf,
    /// `-o *:shared=...`
    pub shared: Option<bool>,
    /// `--build=missing`
    pub build_missing: bool,
    /// Files that must exist in the output folder afterwards
    pub expected_files: Vec<String>,
    /// Extra `--settings` pairs
    pub settings: Vec<(String, String)>,
}

impl InstallRequest {
    pub fn new(conan: impl Into<PathBuf>, manifest: impl Into<PathBuf>, profiles_dir: impl Into<PathBuf>) -> Self {
        InstallRequest {
            conan: conan.into(),
            manifest: manifest.into(),
            profiles_dir: profiles_dir.into(),
            shared: None,
            build_missing: true,
            expected_files: vec!["conan_toolchain.cmake".to_string()],
            settings: Vec::new(),
        }
    }
}

/// Build the `conan install` command line with paths in the shell's form.
pub fn install_command(
    build_dir: &Path,
    profile_path: &Path,
    configuration: BuildConfiguration,
    env: &TerminalEnvironment,
    request: &InstallRequest,
) -> Result<CommandSpec, Error> {
    let profile = env.translate_path(profile_path)?;

    let mut cmd = CommandSpec::new(&request.conan)
        .arg("install")
        .arg(env.translate_path(&request.manifest)?)
        .arg("--output-folder")
        .arg(env.translate_path(build_dir)?);

    if request.build_missing {
        cmd = cmd.arg("--build=missing");
    }

    cmd = cmd
        .arg("--profile:host")
        .arg(profile.as_str())
        .arg("--profile:build")
        .arg(profile)
        .arg("--settings")
        .arg(format!("build_type={}", configuration.build_type()));

    for (key, value) in &request.settings {
        cmd = cmd.arg("--settings").arg(format!("{}={}", key, value));
    }

    if let Some(shared) = request.shared {
        let value = if shared { "True" } else { "False" };
        cmd = cmd.arg("-o").arg(format!("*:shared={}", value));
    }

    Ok(cmd)
}

/// Run `conan install` into `build_dir` and verify its output.
///
/// The profile is checked before the directory is created. A nonzero exit is
/// a `DependencyInstall` error; a zero exit without the expected generated
/// files is an `InstallValidation` error.
pub fn install(
    build_dir: &Path,
    profile: &ProfileId,
    configuration: BuildConfiguration,
    env: &TerminalEnvironment,
    request: &InstallRequest,
    opts: &ExecOptions,
) -> Result<ProcessOutput, Error> {
    let profile_path = validate_profile_exists(profile, &request.profiles_dir)?;

    ensure_dir(build_dir)?;

    let cmd = install_command(build_dir, &profile_path, configuration, env, request)?;
    let mut opts = opts.clone();
    opts.capture = true;
    let output = env.execute(&cmd, build_dir, &opts)?;

    if !output.success() {
        let manifest = DependencyManifest::load(&request.manifest).ok().flatten();
        let (kind, message) = classify_install_failure(&output, manifest.as_ref());
        return Err(Error::DependencyInstall {
            kind,
            message,
            output,
        });
    }

    verify_install(build_dir, configuration, &request.expected_files, output)
}

/// Check the post-conditions of a successful `conan install`.
pub fn verify_install(
    build_dir: &Path,
    configuration: BuildConfiguration,
    expected_files: &[String],
    output: ProcessOutput,
) -> Result<ProcessOutput, Error> {
    if !build_dir.is_dir() {
        return Err(Error::InstallValidation {
            build_dir: build_dir.to_path_buf(),
            missing: vec![build_dir.to_path_buf()],
            output,
        });
    }

    let missing: Vec<PathBuf> = expected_files
        .iter()
        .filter(|file| locate_generated(build_dir, file, configuration).is_none())
        .map(|file| build_dir.join(file))
        .collect();

    if !missing.is_empty() {
        return Err(Error::InstallValidation {
            build_dir: build_dir.to_path_buf(),
            missing,
            output,
        });
    }

    Ok(output)
}

/// Find a generated file in the output folder or a layout subfolder
/// (`build/<BuildType>/generators`).
pub fn locate_generated(build_dir: &Path, file: &str, configuration: BuildConfiguration) -> Option<PathBuf> {
    let direct = build_dir.join(file);
    if direct.is_file() {
        return Some(direct);
    }

    let layout = build_dir
        .join("build")
        .join(configuration.build_type())
        .join("generators")
        .join(file);
    if layout.is_file() {
        return Some(layout);
    }

    find_files(build_dir, GENERATED_SEARCH_DEPTH, |p| {
        p.file_name().is_some_and(|name| name == file)
    })
    .into_iter()
    .next()
}

fn package_name(reference: &str) -> &str {
    reference.split('/').next().unwrap_or(reference).trim()
}

/// Version listings Conan printed next to a resolution failure, keyed by
/// package name. A listing without a name belongs to the last reference
/// Conan reported.
pub fn available_versions(text: &str) -> BTreeMap<String, Vec<String>> {
    let mut listings: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if let Some(caps) = RANGE_FAILURE.captures(line) {
            current = Some(package_name(&caps[2]).to_string());
        } else if let Some(caps) = NOT_RESOLVED.captures(line) {
            current = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| package_name(m.as_str()).to_string());
        }

        let Some(caps) = AVAILABLE.captures(line) else {
            continue;
        };
        let name = caps
            .get(1)
            .map(|m| package_name(m.as_str()).to_string())
            .or_else(|| current.clone());
        if let Some(name) = name {
            listings.entry(name).or_default().extend(
                caps[2]
                    .split([',', ' '])
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
            );
        }
    }

    listings
}

/// Classify a failed install from Conan's output.
///
/// When Conan listed the versions it considered and the manifest can be
/// read, the manifest's requirements are checked against those listings.
/// Otherwise the error lines decide, with the manifest telling a range that
/// matched nothing from a missing package.
pub fn classify_install_failure(
    output: &ProcessOutput,
    manifest: Option<&DependencyManifest>,
) -> (InstallFailureKind, String) {
    let text = format!("{}\n{}", output.stderr, output.stdout);

    let listings = available_versions(&text);
    if let Some(manifest) = manifest.filter(|_| !listings.is_empty()) {
        let unmet = manifest
            .unmet(&listings)
            .into_iter()
            .find(|u| listings.keys().any(|name| name.eq_ignore_ascii_case(&u.name)));
        if let Some(unmet) = unmet {
            let message = match unmet.kind {
                InstallFailureKind::RangeUnsatisfiable => format!(
                    "no available version of `{}` satisfies its range (available: {})",
                    unmet.requirement,
                    unmet.available.join(", ")
                ),
                _ => format!(
                    "`{}` is not among the available versions ({})",
                    unmet.requirement,
                    unmet.available.join(", ")
                ),
            };
            return (unmet.kind, message);
        }
    }

    if let Some(caps) = RANGE_FAILURE.captures(&text) {
        return (
            InstallFailureKind::RangeUnsatisfiable,
            format!(
                "no available version of `{}` satisfies range `{}`",
                &caps[2], &caps[1]
            ),
        );
    }

    if let Some(caps) = NOT_RESOLVED.captures(&text) {
        let reference = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");
        let name = reference.split('/').next().unwrap_or(reference);

        let requirement = manifest.and_then(|m| m.find(name));
        if let Some(req) = requirement {
            if let VersionSpec::Range(range) = &req.version {
                return (
                    InstallFailureKind::RangeUnsatisfiable,
                    format!("no available version of `{}` satisfies range `{}`", req.name, range.raw),
                );
            }
        }

        return (
            InstallFailureKind::PackageNotResolved,
            format!("package `{}` could not be resolved in any remote", reference),
        );
    }

    let last_error = text
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with("ERROR"))
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| format!("conan install failed with {}", output.status_display()));

    (InstallFailureKind::ToolFailure, last_error)
}
