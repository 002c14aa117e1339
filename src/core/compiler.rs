//! Compiler identity and language-standard capabilities.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// The closed set of supported compiler families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompilerFamily {
    /// Microsoft Visual C++ (`cl.exe`)
    Msvc,
    /// Clang with the MSVC-compatible driver (`clang-cl.exe`)
    ClangCl,
    /// GCC from an MSYS2 MinGW environment
    MinGw,
    /// GNU Compiler Collection
    Gcc,
    /// Clang/LLVM
    Clang,
    /// Apple Clang (Xcode)
    AppleClang,
}

impl CompilerFamily {
    /// All families, in declaration order.
    pub const ALL: [CompilerFamily; 6] = [
        CompilerFamily::Msvc,
        CompilerFamily::ClangCl,
        CompilerFamily::MinGw,
        CompilerFamily::Gcc,
        CompilerFamily::Clang,
        CompilerFamily::AppleClang,
    ];

    /// Stable identifier used in profile names and build directories.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompilerFamily::Msvc => "msvc",
            CompilerFamily::ClangCl => "clang-cl",
            CompilerFamily::MinGw => "mingw",
            CompilerFamily::Gcc => "gcc",
            CompilerFamily::Clang => "clang",
            CompilerFamily::AppleClang => "apple-clang",
        }
    }

    /// Parse an identifier or one of its common aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "msvc" | "cl" | "cl.exe" | "visual-studio" | "vs" => Some(CompilerFamily::Msvc),
            "clang-cl" | "clangcl" | "clang-cl.exe" => Some(CompilerFamily::ClangCl),
            "mingw" | "mingw64" | "mingw-w64" | "msys2" => Some(CompilerFamily::MinGw),
            "gcc" | "gnu" | "g++" => Some(CompilerFamily::Gcc),
            "clang" | "llvm" | "clang++" => Some(CompilerFamily::Clang),
            "apple-clang" | "appleclang" => Some(CompilerFamily::AppleClang),
            _ => None,
        }
    }

    /// Whether this toolchain must run inside the POSIX-emulation shell.
    pub fn requires_posix_shell(&self) -> bool {
        matches!(self, CompilerFamily::MinGw)
    }

    /// Whether this toolchain needs the Visual Studio developer environment.
    pub fn requires_vs_environment(&self) -> bool {
        matches!(self, CompilerFamily::Msvc | CompilerFamily::ClangCl)
    }

    /// Value of Conan's `compiler` setting for this family.
    pub fn conan_compiler(&self) -> &'static str {
        match self {
            CompilerFamily::Msvc => "msvc",
            CompilerFamily::ClangCl | CompilerFamily::Clang => "clang",
            CompilerFamily::MinGw | CompilerFamily::Gcc => "gcc",
            CompilerFamily::AppleClang => "apple-clang",
        }
    }

    /// Executable probed for this family.
    pub fn executable(&self) -> &'static str {
        match self {
            CompilerFamily::Msvc => "cl",
            CompilerFamily::ClangCl => "clang-cl",
            CompilerFamily::MinGw => "gcc",
            CompilerFamily::Gcc => "gcc",
            CompilerFamily::Clang | CompilerFamily::AppleClang => "clang",
        }
    }
}

impl fmt::Display for CompilerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A C or C++ language standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LanguageStandard {
    C99,
    C11,
    C17,
    C23,
    Cxx11,
    Cxx14,
    Cxx17,
    Cxx20,
    Cxx23,
}

impl LanguageStandard {
    pub const ALL: [LanguageStandard; 9] = [
        LanguageStandard::C99,
        LanguageStandard::C11,
        LanguageStandard::C17,
        LanguageStandard::C23,
        LanguageStandard::Cxx11,
        LanguageStandard::Cxx14,
        LanguageStandard::Cxx17,
        LanguageStandard::Cxx20,
        LanguageStandard::Cxx23,
    ];

    /// Parse a value of Conan's `compiler.cppstd` setting (`17`, `gnu17`).
    pub fn parse_cppstd(value: &str) -> Option<Self> {
        let digits = value.trim().trim_start_matches("gnu");
        match digits {
            "11" => Some(LanguageStandard::Cxx11),
            "14" => Some(LanguageStandard::Cxx14),
            "17" => Some(LanguageStandard::Cxx17),
            "20" => Some(LanguageStandard::Cxx20),
            "23" => Some(LanguageStandard::Cxx23),
            _ => None,
        }
    }

    /// Parse a value of Conan's `compiler.cstd` setting (`11`, `gnu17`).
    pub fn parse_cstd(value: &str) -> Option<Self> {
        let digits = value.trim().trim_start_matches("gnu");
        match digits {
            "99" => Some(LanguageStandard::C99),
            "11" => Some(LanguageStandard::C11),
            "17" | "18" => Some(LanguageStandard::C17),
            "23" => Some(LanguageStandard::C23),
            _ => None,
        }
    }
}

impl std::str::FromStr for LanguageStandard {
    type Err = LanguageStandardParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let cxx = ["c++", "cpp", "cxx", "gnu++"]
            .iter()
            .find_map(|prefix| lower.strip_prefix(prefix));
        if let Some(rest) = cxx {
            return LanguageStandard::parse_cppstd(rest)
                .ok_or_else(|| LanguageStandardParseError(s.to_string()));
        }
        if let Some(rest) = lower.strip_prefix('c') {
            return LanguageStandard::parse_cstd(rest)
                .ok_or_else(|| LanguageStandardParseError(s.to_string()));
        }
        LanguageStandard::parse_cppstd(&lower)
            .ok_or_else(|| LanguageStandardParseError(s.to_string()))
    }
}

/// Error returned when parsing an invalid language standard string.
#[derive(Debug, Clone)]
pub struct LanguageStandardParseError(pub String);

impl fmt::Display for LanguageStandardParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid language standard '{}', valid values: c++11..c++23, c99, c11, c17, c23",
            self.0
        )
    }
}

impl std::error::Error for LanguageStandardParseError {}

impl fmt::Display for LanguageStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LanguageStandard::C99 => "C99",
            LanguageStandard::C11 => "C11",
            LanguageStandard::C17 => "C17",
            LanguageStandard::C23 => "C23",
            LanguageStandard::Cxx11 => "C++11",
            LanguageStandard::Cxx14 => "C++14",
            LanguageStandard::Cxx17 => "C++17",
            LanguageStandard::Cxx20 => "C++20",
            LanguageStandard::Cxx23 => "C++23",
        };
        f.write_str(name)
    }
}

/// A detected compiler toolchain.
///
/// Created by detection and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompilerInfo {
    /// Identifier used for profiles and build directories (e.g. "msvc")
    pub name: String,
    /// Version as reported by the compiler (e.g. "19.38.33130", "13.2.0")
    pub version: String,
    /// Compiler family
    pub family: CompilerFamily,
    /// Path to the compiler executable
    pub path: PathBuf,
    /// Language standards this version supports
    pub standards: Vec<LanguageStandard>,
    /// Developer-prompt initialization script (`vcvarsall.bat`), if one is needed
    pub activation_script: Option<PathBuf>,
    /// MSYS2 installation root for MinGW toolchains
    pub msys_root: Option<PathBuf>,
}

impl CompilerInfo {
    /// Whether the standard is in the declared support set.
    pub fn declares(&self, standard: LanguageStandard) -> bool {
        self.standards.contains(&standard)
    }
}

impl fmt::Display for CompilerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.path.display())
    }
}

/// Parse `major.minor` from a dotted version string; a missing minor is 0.
pub fn parse_version_tuple(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()
        .and_then(|m| m.parse().ok())
        .unwrap_or(0);
    Some((major, minor))
}
