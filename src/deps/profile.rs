//! Conan profile resolution and parsing.
//!
//! A profile is picked purely from `(compiler, configuration)`: the id is
//! `"{compiler}-{configuration}"` with the compiler in its canonical lower
//! case form (`g++` resolves like `gcc`) and the file must exist under
//! the profiles directory. There is no fallback to another profile.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::compiler::LanguageStandard;
use crate::core::context::{canonical_compiler, BuildConfiguration};
use crate::core::errors::Error;

/// Extension accepted as an alternative to the bare profile name.
pub const PROFILE_EXTENSION: &str = "profile";

/// Identifier of a Conan profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File names the profile may be stored under, in lookup order.
    pub fn file_names(&self) -> [String; 2] {
        [self.0.clone(), format!("{}.{}", self.0, PROFILE_EXTENSION)]
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the profile id for a compiler and configuration. Pure; malformed
/// compiler identifiers are rejected before any I/O.
pub fn resolve_profile(
    compiler: &str,
    configuration: BuildConfiguration,
) -> Result<ProfileId, Error> {
    let compiler = compiler.trim();
    let malformed = compiler.is_empty()
        || compiler.contains(['/', '\\', ':'])
        || compiler.contains("..")
        || compiler.chars().any(|c| c.is_whitespace() || c.is_control());

    if malformed {
        return Err(Error::UnsupportedCompiler {
            compiler: compiler.to_string(),
        });
    }

    Ok(ProfileId(format!(
        "{}-{}",
        canonical_compiler(compiler),
        configuration.as_str()
    )))
}

/// Locate the profile file. Must be called before the build directory is
/// created.
pub fn validate_profile_exists(profile: &ProfileId, profiles_dir: &Path) -> Result<PathBuf, Error> {
    for name in profile.file_names() {
        let candidate = profiles_dir.join(name);
        if candidate.is_file() {
            tracing::debug!("using profile {}", candidate.display());
            return Ok(candidate);
        }
    }

    Err(Error::ProfileNotFound {
        profile: profile.to_string(),
        searched: profiles_dir.to_path_buf(),
    })
}

/// Profile ids available in a directory.
pub fn list_profiles(profiles_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(profiles_dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let suffix = format!(".{}", PROFILE_EXTENSION);
            name.strip_suffix(&suffix).map(str::to_string).unwrap_or(name)
        })
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Parsed contents of a profile file.
///
/// Only the plain key/value sections are interpreted; Jinja blocks and
/// unknown sections are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileDefinition {
    /// `include(...)` targets, in order
    pub includes: Vec<String>,
    /// `[settings]`
    pub settings: BTreeMap<String, String>,
    /// `[options]`
    pub options: BTreeMap<String, String>,
    /// `[buildenv]`
    pub buildenv: BTreeMap<String, String>,
    /// `[conf]`
    pub conf: BTreeMap<String, String>,
    /// `[tool_requires]`
    pub tool_requires: Vec<String>,
}

impl ProfileDefinition {
    /// Parse profile text.
    pub fn parse(text: &str) -> Self {
        let mut profile = ProfileDefinition::default();
        let mut section: Option<String> = None;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("{%") || line.starts_with("{#") {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = Some(name.trim().to_string());
                continue;
            }

            if let Some(target) = line
                .strip_prefix("include(")
                .and_then(|l| l.strip_suffix(')'))
            {
                profile.includes.push(target.trim().to_string());
                continue;
            }

            let Some(section) = section.as_deref() else {
                continue;
            };

            if section == "tool_requires" {
                profile.tool_requires.push(line.to_string());
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim().to_string(), value.trim().to_string());

            match section {
                "settings" => {
                    profile.settings.insert(key, value);
                }
                "options" => {
                    profile.options.insert(key, value);
                }
                "buildenv" => {
                    profile.buildenv.insert(key, value);
                }
                "conf" => {
                    profile.conf.insert(key, value);
                }
                _ => {}
            }
        }

        profile
    }

    /// Read and parse a profile file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(ProfileDefinition::parse(&text))
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// `compiler.cppstd` as a language standard.
    pub fn cppstd(&self) -> Option<LanguageStandard> {
        self.setting("compiler.cppstd")
            .and_then(LanguageStandard::parse_cppstd)
    }

    /// `compiler.cstd` as a language standard.
    pub fn cstd(&self) -> Option<LanguageStandard> {
        self.setting("compiler.cstd")
            .and_then(LanguageStandard::parse_cstd)
    }

    /// `build_type`, if the profile pins one.
    pub fn build_type(&self) -> Option<&str> {
        self.setting("build_type")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_profile_is_deterministic() {
        let a = resolve_profile("X", BuildConfiguration::Release).unwrap();
        let b = resolve_profile("X", BuildConfiguration::Release).unwrap();
        assert_eq!(a.as_str(), "x-release");
        assert_eq!(a, b);

        let debug = resolve_profile("clang-cl", BuildConfiguration::Debug).unwrap();
        assert_eq!(debug.to_string(), "clang-cl-debug");
    }

    #[test]
    fn test_aliases_share_a_profile() {
        let alias = resolve_profile("g++", BuildConfiguration::Release).unwrap();
        let canonical = resolve_profile("gcc", BuildConfiguration::Release).unwrap();
        assert_eq!(alias, canonical);
        assert_eq!(alias.as_str(), "gcc-release");

        let msvc = resolve_profile("cl.exe", BuildConfiguration::Debug).unwrap();
        assert_eq!(msvc.as_str(), "msvc-debug");
    }

    #[test]
    fn test_malformed_compiler_rejected() {
        for bad in ["", "  ", "../msvc", "msvc/x", "c:\\gcc", "my gcc"] {
            let err = resolve_profile(bad, BuildConfiguration::Debug).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DetectionFailure, "{bad:?}");
            assert!(matches!(err, Error::UnsupportedCompiler { .. }));
        }
    }

    #[test]
    fn test_missing_profile() {
        let tmp = TempDir::new().unwrap();
        let id = resolve_profile("x", BuildConfiguration::Release).unwrap();

        let err = validate_profile_exists(&id, tmp.path()).unwrap_err();
        match err {
            Error::ProfileNotFound { profile, searched } => {
                assert_eq!(profile, "x-release");
                assert_eq!(searched, tmp.path());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_no_substitute_profile() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("x-debug"), "[settings]\n").unwrap();

        let id = resolve_profile("x", BuildConfiguration::Release).unwrap();
        assert!(validate_profile_exists(&id, tmp.path()).is_err());
    }

    #[test]
    fn test_profile_extension_accepted() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("gcc-debug.profile"), "[settings]\n").unwrap();
        std::fs::write(tmp.path().join("msvc-release"), "[settings]\n").unwrap();

        let id = resolve_profile("gcc", BuildConfiguration::Debug).unwrap();
        let path = validate_profile_exists(&id, tmp.path()).unwrap();
        assert!(path.ends_with("gcc-debug.profile"));

        assert_eq!(list_profiles(tmp.path()), vec!["gcc-debug", "msvc-release"]);
    }

    #[test]
    fn test_parse_profile() {
        let profile = ProfileDefinition::parse(
            r#"
            include(default)
            {% set compiler_version = "13" %}

            [settings]
            os=Windows
            arch=x86_64
            compiler=gcc
            compiler.version=13
            compiler.libcxx=libstdc++11
            compiler.cppstd=gnu20
            build_type=Release

            [options]
            *:shared=False

            [buildenv]
            CC=gcc
            CXX=g++

            [conf]
            tools.cmake.cmaketoolchain:generator=MinGW Makefiles

            [tool_requires]
            cmake/3.27.9
            "#,
        );

        assert_eq!(profile.includes, vec!["default"]);
        assert_eq!(profile.setting("compiler"), Some("gcc"));
        assert_eq!(profile.cppstd(), Some(LanguageStandard::Cxx20));
        assert_eq!(profile.cstd(), None);
        assert_eq!(profile.build_type(), Some("Release"));
        assert_eq!(profile.options.get("*:shared").map(String::as_str), Some("False"));
        assert_eq!(profile.buildenv.get("CXX").map(String::as_str), Some("g++"));
        assert_eq!(
            profile.conf.get("tools.cmake.cmaketoolchain:generator").map(String::as_str),
            Some("MinGW Makefiles")
        );
        assert_eq!(profile.tool_requires, vec!["cmake/3.27.9"]);
    }
}
