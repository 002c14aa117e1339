//! Per-invocation build context.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::compiler::CompilerFamily;
use crate::core::errors::Error;
use crate::core::layout::validate_component;
use crate::core::platform::Arch;

/// The debug/release axis of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildConfiguration {
    #[default]
    Debug,
    Release,
}

impl BuildConfiguration {
    /// Lowercase name used in paths and profile identifiers.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildConfiguration::Debug => "debug",
            BuildConfiguration::Release => "release",
        }
    }

    /// Capitalized name used by CMake and Conan's `build_type`.
    pub fn build_type(&self) -> &'static str {
        match self {
            BuildConfiguration::Debug => "Debug",
            BuildConfiguration::Release => "Release",
        }
    }

    pub fn is_release(&self) -> bool {
        matches!(self, BuildConfiguration::Release)
    }
}

impl std::str::FromStr for BuildConfiguration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(BuildConfiguration::Debug),
            "release" => Ok(BuildConfiguration::Release),
            _ => Err(format!(
                "invalid build configuration '{}'; expected 'debug' or 'release'",
                s
            )),
        }
    }
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that identifies one pipeline run.
///
/// Built once per orchestrator invocation and passed by reference through
/// every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildContext {
    /// CMake target to build
    pub target: String,
    /// Pipeline name, used in logs
    pub pipeline: String,
    /// Compiler identifier (e.g. "msvc", "mingw")
    pub compiler: String,
    /// Build configuration
    pub configuration: BuildConfiguration,
    /// Target architecture
    pub arch: Arch,
    /// Build shared libraries
    pub shared: bool,
    /// Link the C/C++ runtime statically
    pub static_runtime: bool,
}

impl BuildContext {
    /// Start building a context for `target` with `compiler`.
    pub fn builder(target: impl Into<String>, compiler: impl Into<String>) -> BuildContextBuilder {
        BuildContextBuilder {
            target: target.into(),
            compiler: compiler.into(),
            pipeline: None,
            configuration: BuildConfiguration::default(),
            arch: None,
            shared: false,
            static_runtime: false,
        }
    }

    /// Reject target and compiler names that cannot be used as single
    /// directory names. Runs before anything touches the disk.
    pub fn validate(&self) -> Result<(), Error> {
        validate_component("target", &self.target)?;
        validate_component("compiler", &self.compiler)
    }

    /// Short `target/compiler/configuration` label.
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.target, self.compiler, self.configuration)
    }
}

/// Builder for [`BuildContext`].
#[derive(Debug, Clone)]
pub struct BuildContextBuilder {
    target: String,
    compiler: String,
    pipeline: Option<String>,
    configuration: BuildConfiguration,
    arch: Option<Arch>,
    shared: bool,
    static_runtime: bool,
}

impl BuildContextBuilder {
    pub fn pipeline(mut self, name: impl Into<String>) -> Self {
        self.pipeline = Some(name.into());
        self
    }

    pub fn configuration(mut self, configuration: BuildConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn arch(mut self, arch: Arch) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn static_runtime(mut self, static_runtime: bool) -> Self {
        self.static_runtime = static_runtime;
        self
    }

    /// Finish the context. The architecture defaults to the host's.
    ///
    /// Known compiler aliases (`g++`, `cl`, `mingw64`, ...) are replaced by
    /// their family identifier so one toolchain always maps to one build
    /// directory and one profile. Unknown names are kept for detection to
    /// report.
    pub fn build(self) -> BuildContext {
        let pipeline = self
            .pipeline
            .unwrap_or_else(|| "clean-build".to_string());
        BuildContext {
            target: self.target,
            pipeline,
            compiler: canonical_compiler(&self.compiler),
            configuration: self.configuration,
            arch: self
                .arch
                .unwrap_or_else(|| Arch::from_arch_str(std::env::consts::ARCH)),
            shared: self.shared,
            static_runtime: self.static_runtime,
        }
    }
}

/// Family identifier for a known compiler name, else the lowercased name.
pub fn canonical_compiler(name: &str) -> String {
    match CompilerFamily::parse(name) {
        Some(family) => family.as_str().to_string(),
        None => name.to_ascii_lowercase(),
    }
}
