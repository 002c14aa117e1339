//! `conanfile.txt` parsing and version-range evaluation.
//!
//! Only used to explain failures: Conan itself resolves the graph. Ranges use
//! Conan's bracket syntax (`[~1.3]`, `[>=1.0 <2]`, `[^1.2 || 3.0]`) and are
//! evaluated with `semver`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use semver::{Version, VersionReq};
use thiserror::Error;

use crate::core::errors::InstallFailureKind;

/// Error while parsing a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid requirement `{reference}`: {reason}")]
    InvalidRequirement { reference: String, reason: String },

    #[error("invalid version range `{range}`: {source}")]
    InvalidRange {
        range: String,
        #[source]
        source: semver::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A Conan version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    /// Text between the brackets
    pub raw: String,
    /// `||`-separated alternatives
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// Parse the text between the brackets of a Conan range.
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        // Trailing `, include_prerelease` style options are ignored.
        let expr = raw.split(',').next().unwrap_or("").trim();

        let mut alternatives = Vec::new();
        for alternative in expr.split("||") {
            let comparators: Vec<String> = alternative
                .split_whitespace()
                .map(|c| {
                    if c == "*" || c.starts_with(['>', '<', '=', '~', '^']) {
                        c.to_string()
                    } else {
                        format!("={}", c)
                    }
                })
                .collect();

            let req = if comparators.is_empty() {
                VersionReq::STAR
            } else {
                VersionReq::parse(&comparators.join(", ")).map_err(|source| {
                    ManifestError::InvalidRange {
                        range: raw.to_string(),
                        source,
                    }
                })?
            };
            alternatives.push(req);
        }

        Ok(VersionRange {
            raw: raw.to_string(),
            alternatives,
        })
    }

    /// Whether `version` satisfies the range. Unparseable versions never match.
    pub fn matches(&self, version: &str) -> bool {
        match parse_loose(version) {
            Some(v) => self.alternatives.iter().any(|req| req.matches(&v)),
            None => false,
        }
    }

    /// Highest version in `available` that satisfies the range.
    pub fn best_match<'a>(&self, available: &'a [String]) -> Option<&'a str> {
        available
            .iter()
            .filter(|v| self.matches(v))
            .filter_map(|v| parse_loose(v).map(|parsed| (parsed, v.as_str())))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, v)| v)
    }
}

/// Parse a Conan version, padding `1` and `1.4` to three components.
pub fn parse_loose(version: &str) -> Option<Version> {
    let version = version.trim();
    if let Ok(v) = Version::parse(version) {
        return Some(v);
    }

    let parts: Vec<&str> = version.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || !parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    Version::parse(&padded).ok()
}

/// The version part of a requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Exact(String),
    Range(VersionRange),
}

/// One `name/version[@user/channel][#revision]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub version: VersionSpec,
    pub user_channel: Option<String>,
    pub revision: Option<String>,
}

impl Requirement {
    pub fn parse(reference: &str) -> Result<Self, ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidRequirement {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let reference_trimmed = reference.trim();
        let (rest, revision) = match reference_trimmed.split_once('#') {
            Some((rest, rev)) => (rest, Some(rev.to_string())),
            None => (reference_trimmed, None),
        };
        let (rest, user_channel) = match rest.split_once('@') {
            Some((rest, uc)) => (rest, Some(uc.to_string())),
            None => (rest, None),
        };
        let (name, version) = rest
            .split_once('/')
            .ok_or_else(|| invalid("expected `name/version`"))?;

        if name.is_empty() {
            return Err(invalid("missing package name"));
        }
        if version.is_empty() {
            return Err(invalid("missing version"));
        }

        let version = match version.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
            Some(range) => VersionSpec::Range(VersionRange::parse(range)?),
            None => VersionSpec::Exact(version.to_string()),
        };

        Ok(Requirement {
            name: name.to_string(),
            version,
            user_channel,
            revision,
        })
    }

    pub fn is_range(&self) -> bool {
        matches!(self.version, VersionSpec::Range(_))
    }

    /// Check this requirement against the versions a remote offers.
    pub fn check(&self, available: &[String]) -> Result<String, InstallFailureKind> {
        match &self.version {
            VersionSpec::Exact(version) => available
                .iter()
                .find(|v| *v == version)
                .cloned()
                .ok_or(InstallFailureKind::PackageNotResolved),
            VersionSpec::Range(_) if available.is_empty() => {
                Err(InstallFailureKind::PackageNotResolved)
            }
            VersionSpec::Range(range) => range
                .best_match(available)
                .map(str::to_string)
                .ok_or(InstallFailureKind::RangeUnsatisfiable),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            VersionSpec::Exact(v) => write!(f, "{}/{}", self.name, v)?,
            VersionSpec::Range(r) => write!(f, "{}/[{}]", self.name, r.raw)?,
        }
        if let Some(uc) = &self.user_channel {
            write!(f, "@{}", uc)?;
        }
        Ok(())
    }
}

/// A requirement that cannot be met by the available versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmetRequirement {
    /// Package name as written in the manifest
    pub name: String,
    pub requirement: String,
    pub kind: InstallFailureKind,
    pub available: Vec<String>,
}

/// Parsed `conanfile.txt`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyManifest {
    pub requires: Vec<Requirement>,
    pub tool_requires: Vec<Requirement>,
    pub generators: Vec<String>,
    pub options: BTreeMap<String, String>,
}

impl DependencyManifest {
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut manifest = DependencyManifest::default();
        let mut section = String::new();

        for raw in text.lines() {
            // `#` right after a reference is a revision; comments start a line
            // or follow whitespace.
            let line = match raw.find(" #") {
                Some(i) => &raw[..i],
                None => raw,
            }
            .trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }

            match section.as_str() {
                "requires" => manifest.requires.push(Requirement::parse(line)?),
                "tool_requires" | "build_requires" | "test_requires" => {
                    manifest.tool_requires.push(Requirement::parse(line)?)
                }
                "generators" => manifest.generators.push(line.to_string()),
                "options" => {
                    if let Some((key, value)) = line.split_once('=') {
                        manifest
                            .options
                            .insert(key.trim().to_string(), value.trim().to_string());
                    }
                }
                _ => {}
            }
        }

        Ok(manifest)
    }

    /// Read and parse a `conanfile.txt`. `conanfile.py` is not interpreted.
    pub fn load(path: &Path) -> Result<Option<Self>, ManifestError> {
        if path.extension().is_some_and(|e| e == "py") {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        DependencyManifest::parse(&text).map(Some)
    }

    /// All requirements, regular first.
    pub fn all(&self) -> impl Iterator<Item = &Requirement> {
        self.requires.iter().chain(self.tool_requires.iter())
    }

    /// Find a requirement by package name (case-insensitive).
    pub fn find(&self, name: &str) -> Option<&Requirement> {
        self.all().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// Check every requirement against remote version listings keyed by
    /// package name. Packages missing from the listing are unresolved.
    pub fn unmet(&self, available: &BTreeMap<String, Vec<String>>) -> Vec<UnmetRequirement> {
        self.all()
            .filter_map(|req| {
                let versions = available
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&req.name))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                req.check(&versions).err().map(|kind| UnmetRequirement {
                    name: req.name.clone(),
                    requirement: req.to_string(),
                    kind,
                    available: versions,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_requirements() {
        let exact = Requirement::parse("zlib/1.3.1").unwrap();
        assert_eq!(exact.name, "zlib");
        assert_eq!(exact.version, VersionSpec::Exact("1.3.1".to_string()));

        let full = Requirement::parse("fmt/10.2.1@acme/stable#a1b2c3").unwrap();
        assert_eq!(full.user_channel.as_deref(), Some("acme/stable"));
        assert_eq!(full.revision.as_deref(), Some("a1b2c3"));
        assert_eq!(full.to_string(), "fmt/10.2.1@acme/stable");

        let range = Requirement::parse("pkgA/[~1.3]").unwrap();
        assert!(range.is_range());
        assert_eq!(range.to_string(), "pkgA/[~1.3]");

        assert!(Requirement::parse("justaname").is_err());
        assert!(Requirement::parse("/1.0").is_err());
        assert!(Requirement::parse("x/[>=not.a.version]").is_err());
    }

    #[test]
    fn test_range_evaluation() {
        let tilde = VersionRange::parse("~1.3").unwrap();
        assert!(tilde.matches("1.3.0"));
        assert!(tilde.matches("1.3.7"));
        assert!(!tilde.matches("1.2.9"));
        assert!(!tilde.matches("1.4.0"));

        let window = VersionRange::parse(">=1.0 <2, include_prerelease").unwrap();
        assert!(window.matches("1.9"));
        assert!(!window.matches("2.0.0"));

        let either = VersionRange::parse("^1.2 || 3.0").unwrap();
        assert!(either.matches("1.8.0"));
        assert!(either.matches("3.0"));
        assert!(!either.matches("2.1.0"));

        let versions = vec!["1.0.0".to_string(), "1.5.2".to_string(), "1.10.0".to_string()];
        assert_eq!(window.best_match(&versions), Some("1.10.0"));
    }

    #[test]
    fn test_loose_versions() {
        assert_eq!(parse_loose("1.4"), Some(Version::new(1, 4, 0)));
        assert_eq!(parse_loose("3"), Some(Version::new(3, 0, 0)));
        assert_eq!(parse_loose("cci.20230101"), None);
        assert_eq!(parse_loose("1.2.3.4"), None);
    }

    #[test]
    fn test_range_unsatisfiable_against_remote() {
        let manifest = DependencyManifest::parse("[requires]\npkgA/[~1.3]\n").unwrap();
        let mut available = BTreeMap::new();
        available.insert(
            "pkgA".to_string(),
            vec!["1.2.9".to_string(), "1.4.0".to_string()],
        );

        let unmet = manifest.unmet(&available);
        assert_eq!(unmet.len(), 1);
        assert_eq!(unmet[0].kind, InstallFailureKind::RangeUnsatisfiable);
        assert_eq!(unmet[0].requirement, "pkgA/[~1.3]");
    }

    #[test]
    fn test_missing_package_is_not_resolved() {
        let manifest =
            DependencyManifest::parse("[requires]\nzlib/1.3.1\nboost/[>=1.80]\n").unwrap();
        let mut available = BTreeMap::new();
        available.insert("zlib".to_string(), vec!["1.2.13".to_string()]);

        let unmet = manifest.unmet(&available);
        assert_eq!(unmet.len(), 2);
        assert!(unmet
            .iter()
            .all(|u| u.kind == InstallFailureKind::PackageNotResolved));
    }

    #[test]
    fn test_parse_manifest_sections() {
        let manifest = DependencyManifest::parse(
            "# deps\n[requires]\nzlib/1.3.1#rev1\n\n[tool_requires]\ncmake/[>=3.25]\n\n\
             [generators]\nCMakeDeps\nCMakeToolchain\n\n[options]\nzlib/*:shared=False # static\n",
        )
        .unwrap();

        assert_eq!(manifest.requires.len(), 1);
        assert_eq!(manifest.requires[0].revision.as_deref(), Some("rev1"));
        assert_eq!(manifest.tool_requires[0].name, "cmake");
        assert_eq!(manifest.generators, vec!["CMakeDeps", "CMakeToolchain"]);
        assert_eq!(
            manifest.options.get("zlib/*:shared").map(String::as_str),
            Some("False")
        );
        assert!(manifest.find("CMAKE").is_some());
    }

    #[test]
    fn test_conanfile_py_is_not_interpreted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("conanfile.py");
        std::fs::write(&path, "from conan import ConanFile\n").unwrap();
        assert!(DependencyManifest::load(&path).unwrap().is_none());
    }
}
