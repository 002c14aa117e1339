//! Compiler toolchain detection.
//!
//! Detection priority for a compiler family:
//! 1. A pinned path from configuration (`[compilers.<id>] path`)
//! 2. The family's usual install location (Visual Studio via vswhere, MSYS2)
//! 3. Searching PATH
//!
//! Results are cached per process by [`Detector`].

use std::path::PathBuf;

mod detect;
mod gcc;
mod msvc;

pub use detect::{
    detect_compiler, priority_order, supported_standards, validate_language_standard,
    DetectOptions, Detector, StandardSupport,
};
pub use gcc::{parse_clang_version, parse_gcc_version};
pub use msvc::{find_installation as msvc_installation, parse_cl_banner, vcvarsall_path};

/// A command to execute, with program, arguments, and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to run (e.g., "conan", "cmake")
    pub program: PathBuf,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a new command spec.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program and arguments joined for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let cmd = CommandSpec::new("cmake")
            .arg("--build")
            .args(["out", "--target", "app"])
            .env("CLICOLOR_FORCE", "1");

        assert_eq!(cmd.program, PathBuf::from("cmake"));
        assert_eq!(cmd.args, vec!["--build", "out", "--target", "app"]);
        assert_eq!(cmd.env, vec![("CLICOLOR_FORCE".to_string(), "1".to_string())]);
        assert_eq!(cmd.display(), "cmake --build out --target app");
    }
}
