//! Configuration file support for buildrig.
//!
//! buildrig reads two configuration files:
//! - Global: `~/.buildrig/config.toml` - user-wide tool locations and defaults
//! - Project: `buildrig.toml` at the project root
//!
//! Project config takes precedence over global config. Tables are merged key
//! by key, so a project can override a single tool path without repeating the
//! whole `[tools]` table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::context::BuildConfiguration;

/// Name of the project configuration file.
pub const PROJECT_FILE: &str = "buildrig.toml";

/// Files Conan's CMake generators leave in the output folder.
pub const DEFAULT_EXPECTED_FILES: &[&str] = &["conan_toolchain.cmake"];

/// buildrig configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project layout and build matrix
    pub project: ProjectConfig,

    /// Build settings
    pub build: BuildConfig,

    /// External tool locations
    pub tools: ToolsConfig,

    /// Developer shell locations
    pub environment: EnvironmentConfig,

    /// Validation stage settings
    pub validate: ValidateConfig,

    /// Per-compiler overrides, keyed by compiler identifier
    pub compilers: BTreeMap<String, CompilerOverride>,
}

/// Project layout and the default build matrix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// CMake source directory, relative to the project root
    pub source_dir: Option<PathBuf>,

    /// Conan manifest (conanfile.txt or conanfile.py)
    pub manifest: Option<PathBuf>,

    /// Directory holding one Conan profile per (compiler, configuration)
    pub profiles_dir: Option<PathBuf>,

    /// CMake targets built by `buildrig matrix`
    pub targets: Vec<String>,

    /// Compilers built by `buildrig matrix`
    pub compilers: Vec<String>,

    /// Configurations built by `buildrig matrix`
    pub configurations: Vec<BuildConfiguration>,
}

/// Build-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// CMake generator (e.g. "Ninja", "Visual Studio 17 2022")
    pub generator: Option<String>,

    /// CMake configure preset
    pub preset: Option<String>,

    /// Parallel jobs passed to `cmake --build --parallel`
    pub jobs: Option<usize>,

    /// Build shared libraries
    pub shared: bool,

    /// Link the runtime statically
    pub static_runtime: bool,

    /// Pass `--build=missing` to conan install
    pub build_missing: bool,

    /// Files `conan install` must generate in the build directory
    pub expected_files: Vec<String>,

    /// Extra `-D` definitions for the configure step
    pub cmake_defines: BTreeMap<String, String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            generator: None,
            preset: None,
            jobs: None,
            shared: false,
            static_runtime: false,
            build_missing: true,
            expected_files: DEFAULT_EXPECTED_FILES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cmake_defines: BTreeMap::new(),
        }
    }
}

/// External tool locations. Unset tools are looked up on PATH.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub conan: Option<PathBuf>,
    pub cmake: Option<PathBuf>,
    pub ctest: Option<PathBuf>,
    pub cpack: Option<PathBuf>,
}

impl ToolsConfig {
    pub fn conan_program(&self) -> PathBuf {
        self.conan.clone().unwrap_or_else(|| PathBuf::from("conan"))
    }

    pub fn cmake_program(&self) -> PathBuf {
        self.cmake.clone().unwrap_or_else(|| PathBuf::from("cmake"))
    }

    /// `ctest`, next to a configured `cmake` when not set explicitly.
    pub fn ctest_program(&self) -> PathBuf {
        self.ctest
            .clone()
            .unwrap_or_else(|| self.sibling_of_cmake("ctest"))
    }

    /// `cpack`, next to a configured `cmake` when not set explicitly.
    pub fn cpack_program(&self) -> PathBuf {
        self.cpack
            .clone()
            .unwrap_or_else(|| self.sibling_of_cmake("cpack"))
    }

    fn sibling_of_cmake(&self, tool: &str) -> PathBuf {
        match self.cmake.as_ref().and_then(|c| c.parent()) {
            Some(dir) if !dir.as_os_str().is_empty() => {
                let exe = if cfg!(windows) {
                    format!("{}.exe", tool)
                } else {
                    tool.to_string()
                };
                dir.join(exe)
            }
            _ => PathBuf::from(tool),
        }
    }
}

/// Locations of the developer shells.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// MSYS2 installation root
    pub msys2_root: Option<PathBuf>,

    /// MSYS2 subsystem to activate (MINGW64, UCRT64, CLANG64, ...)
    pub msystem: String,

    /// Visual Studio installation path (skips vswhere)
    pub vs_install: Option<PathBuf>,

    /// Explicit vswhere.exe location
    pub vswhere: Option<PathBuf>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            msys2_root: None,
            msystem: "MINGW64".to_string(),
            vs_install: None,
            vswhere: None,
        }
    }
}

impl EnvironmentConfig {
    /// Default MSYS2 location on Windows.
    pub const DEFAULT_MSYS2_ROOT: &'static str = "C:\\msys64";

    /// Configured MSYS2 root, `MSYS2_ROOT` from the environment, or the default.
    pub fn msys2_root(&self) -> PathBuf {
        self.msys2_root
            .clone()
            .or_else(|| std::env::var_os("MSYS2_ROOT").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_MSYS2_ROOT))
    }
}

/// Validation stage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateConfig {
    /// Run ctest as part of validation
    pub run_tests: bool,
}

/// Per-compiler overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOverride {
    /// Pinned compiler executable
    pub path: Option<PathBuf>,
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse configuration")
    }

    /// CMake source directory.
    pub fn source_dir(&self, root: &Path) -> PathBuf {
        match &self.project.source_dir {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        }
    }

    /// Conan manifest path.
    pub fn manifest_path(&self, root: &Path) -> PathBuf {
        match &self.project.manifest {
            Some(path) => root.join(path),
            None => root.join("conanfile.txt"),
        }
    }

    /// Profiles directory.
    pub fn profiles_dir(&self, root: &Path) -> PathBuf {
        match &self.project.profiles_dir {
            Some(dir) => root.join(dir),
            None => root.join("profiles"),
        }
    }
}

/// Load a TOML file as a raw value, or an empty table if it doesn't exist.
fn load_value(path: &Path) -> Result<toml::Value> {
    if !path.exists() {
        return Ok(toml::Value::Table(toml::map::Map::new()));
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;

    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config: {}", path.display()))
}

/// Merge `overlay` into `base`, recursing into tables (overlay wins).
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (buildrig.toml)
/// 2. Global config (~/.buildrig/config.toml)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Result<Config> {
    let mut merged = match global_path {
        Some(path) => load_value(path)?,
        None => toml::Value::Table(toml::map::Map::new()),
    };
    merge_values(&mut merged, load_value(project_path)?);

    merged
        .try_into()
        .with_context(|| format!("invalid configuration in {}", project_path.display()))
}

/// Get the global buildrig config directory (~/.buildrig).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".buildrig"))
}

/// Get the global config path (~/.buildrig/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.build.build_missing);
        assert_eq!(config.build.expected_files, vec!["conan_toolchain.cmake"]);
        assert_eq!(config.environment.msystem, "MINGW64");
        assert_eq!(config.tools.conan_program(), PathBuf::from("conan"));

        let root = Path::new("/proj");
        assert_eq!(config.profiles_dir(root), PathBuf::from("/proj/profiles"));
        assert_eq!(config.manifest_path(root), PathBuf::from("/proj/conanfile.txt"));
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [project]
            targets = ["app", "engine"]
            compilers = ["msvc", "mingw"]
            configurations = ["debug", "release"]
            profiles_dir = "conan/profiles"

            [build]
            generator = "Ninja"
            jobs = 8

            [tools]
            cmake = "/opt/cmake/bin/cmake"

            [compilers.mingw]
            path = "C:/msys64/mingw64/bin/gcc.exe"
            "#,
        )
        .unwrap();

        assert_eq!(config.project.targets, vec!["app", "engine"]);
        assert_eq!(
            config.project.configurations,
            vec![BuildConfiguration::Debug, BuildConfiguration::Release]
        );
        assert_eq!(config.build.generator.as_deref(), Some("Ninja"));
        assert_eq!(config.build.jobs, Some(8));
        // Unset fields keep their defaults
        assert!(config.build.build_missing);
        assert_eq!(
            config.compilers["mingw"].path.as_deref(),
            Some(Path::new("C:/msys64/mingw64/bin/gcc.exe"))
        );
        assert!(!config.compilers.contains_key("msvc"));
    }

    #[test]
    fn test_ctest_next_to_configured_cmake() {
        let tools = ToolsConfig {
            cmake: Some(PathBuf::from("/opt/cmake/bin/cmake")),
            ..Default::default()
        };
        let expected = if cfg!(windows) { "ctest.exe" } else { "ctest" };
        assert_eq!(tools.ctest_program(), PathBuf::from("/opt/cmake/bin").join(expected));

        let tools = ToolsConfig::default();
        assert_eq!(tools.cpack_program(), PathBuf::from("cpack"));
    }

    #[test]
    fn test_project_overrides_global() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        let project = tmp.path().join(PROJECT_FILE);

        std::fs::write(
            &global,
            "[tools]\nconan = \"/global/conan\"\ncmake = \"/global/cmake\"\n\n[build]\njobs = 2\n",
        )
        .unwrap();
        std::fs::write(&project, "[tools]\ncmake = \"/project/cmake\"\n").unwrap();

        let config = load_config(Some(&global), &project).unwrap();
        assert_eq!(config.tools.conan, Some(PathBuf::from("/global/conan")));
        assert_eq!(config.tools.cmake, Some(PathBuf::from("/project/cmake")));
        assert_eq!(config.build.jobs, Some(2));
    }

    #[test]
    fn test_missing_files_yield_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(None, &tmp.path().join(PROJECT_FILE)).unwrap();
        assert!(config.project.targets.is_empty());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join(PROJECT_FILE);
        std::fs::write(&project, "[build]\njobs = \"many\"\n").unwrap();

        assert!(load_config(None, &project).is_err());
    }
}
