//! Host platform identity.

use std::fmt;

use serde::Serialize;

/// Operating system family of the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Windows,
    Linux,
    Macos,
    /// Anything else, by its `std::env::consts::OS` name.
    Other(String),
}

impl OsFamily {
    /// Map a `std::env::consts::OS` value.
    pub fn from_os_str(os: &str) -> Self {
        match os {
            "windows" => OsFamily::Windows,
            "linux" => OsFamily::Linux,
            "macos" => OsFamily::Macos,
            other => OsFamily::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OsFamily::Windows => "windows",
            OsFamily::Linux => "linux",
            OsFamily::Macos => "macos",
            OsFamily::Other(name) => name,
        }
    }

    /// Name used by Conan's `os` setting.
    pub fn conan_name(&self) -> &str {
        match self {
            OsFamily::Windows => "Windows",
            OsFamily::Linux => "Linux",
            OsFamily::Macos => "Macos",
            OsFamily::Other(name) => name,
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture of the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X86,
    X86_64,
    Aarch64,
    Arm,
    Other(String),
}

impl Arch {
    /// Map a `std::env::consts::ARCH` value.
    pub fn from_arch_str(arch: &str) -> Self {
        match arch {
            "x86" | "i386" | "i686" => Arch::X86,
            "x86_64" | "amd64" | "x64" => Arch::X86_64,
            "aarch64" | "arm64" => Arch::Aarch64,
            "arm" | "armv7" => Arch::Arm,
            other => Arch::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Arm => "arm",
            Arch::Other(name) => name,
        }
    }

    /// Argument accepted by `vcvarsall.bat`.
    pub fn vcvars_arg(&self) -> Option<&'static str> {
        match self {
            Arch::X86 => Some("x86"),
            Arch::X86_64 => Some("x64"),
            Arch::Aarch64 => Some("arm64"),
            Arch::Arm => Some("arm"),
            Arch::Other(_) => None,
        }
    }

    /// Natural bit-width, if known.
    pub fn bits(&self) -> Option<u8> {
        match self {
            Arch::X86 | Arch::Arm => Some(32),
            Arch::X86_64 | Arch::Aarch64 => Some(64),
            Arch::Other(_) => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS family, architecture and bit-width of the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PlatformInfo {
    pub os: OsFamily,
    pub arch: Arch,
    pub bits: u8,
}

impl PlatformInfo {
    /// Build from raw OS/arch names. Unknown architectures fall back to the
    /// pointer width of this process.
    pub fn from_parts(os: &str, arch: &str) -> Self {
        let arch = Arch::from_arch_str(arch);
        let bits = arch
            .bits()
            .unwrap_or((std::mem::size_of::<usize>() * 8) as u8);
        PlatformInfo {
            os: OsFamily::from_os_str(os),
            arch,
            bits,
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == OsFamily::Windows
    }
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} ({}-bit)", self.os, self.arch, self.bits)
    }
}

/// Identify the host platform. Never fails.
pub fn detect_platform() -> PlatformInfo {
    let platform = PlatformInfo::from_parts(std::env::consts::OS, std::env::consts::ARCH);
    tracing::debug!("detected platform {}", platform);
    platform
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_platforms() {
        let p = PlatformInfo::from_parts("windows", "x86_64");
        assert_eq!(p.os, OsFamily::Windows);
        assert_eq!(p.arch, Arch::X86_64);
        assert_eq!(p.bits, 64);
        assert_eq!(p.arch.vcvars_arg(), Some("x64"));

        let p = PlatformInfo::from_parts("linux", "x86");
        assert_eq!(p.bits, 32);
    }

    #[test]
    fn test_unknown_platform_falls_back() {
        let p = PlatformInfo::from_parts("haiku", "riscv64");
        assert_eq!(p.os, OsFamily::Other("haiku".to_string()));
        assert_eq!(p.arch, Arch::Other("riscv64".to_string()));
        assert!(p.bits == 32 || p.bits == 64);
        assert_eq!(p.to_string(), format!("haiku-riscv64 ({}-bit)", p.bits));
    }

    #[test]
    fn test_detect_platform_matches_host() {
        let p = detect_platform();
        assert_eq!(p.os.as_str(), std::env::consts::OS);
    }
}
