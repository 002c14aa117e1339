//! Platform and compiler detection.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{OnceLock, RwLock};

use crate::core::compiler::{parse_version_tuple, CompilerFamily, CompilerInfo, LanguageStandard};
use crate::core::errors::Error;
use crate::core::platform::{detect_platform, OsFamily, PlatformInfo};
use crate::util::config::{Config, EnvironmentConfig};

use super::{gcc, msvc};

/// Inputs to detection that come from configuration.
#[derive(Debug, Clone)]
pub struct DetectOptions {
    /// Pinned compiler executables
    pub pinned: HashMap<CompilerFamily, PathBuf>,
    /// MSYS2 installation root
    pub msys2_root: PathBuf,
    /// MSYS2 subsystem holding the MinGW toolchain
    pub msystem: String,
    /// Visual Studio installation, skipping vswhere
    pub vs_install: Option<PathBuf>,
    /// Explicit vswhere.exe
    pub vswhere: Option<PathBuf>,
}

impl Default for DetectOptions {
    fn default() -> Self {
        DetectOptions::from_environment(&EnvironmentConfig::default())
    }
}

impl DetectOptions {
    fn from_environment(env: &EnvironmentConfig) -> Self {
        DetectOptions {
            pinned: HashMap::new(),
            msys2_root: env.msys2_root(),
            msystem: env.msystem.clone(),
            vs_install: env.vs_install.clone(),
            vswhere: env.vswhere.clone(),
        }
    }

    /// Build detection options from the merged configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut options = DetectOptions::from_environment(&config.environment);

        for (name, over) in &config.compilers {
            let Some(path) = &over.path else { continue };
            match CompilerFamily::parse(name) {
                Some(family) => {
                    options.pinned.insert(family, path.clone());
                }
                None => tracing::warn!("ignoring [compilers.{}]: unknown compiler", name),
            }
        }

        options
    }
}

/// Compiler families to try, in order, when none is requested.
pub fn priority_order(platform: &PlatformInfo) -> &'static [CompilerFamily] {
    match platform.os {
        OsFamily::Windows => &[
            CompilerFamily::Msvc,
            CompilerFamily::ClangCl,
            CompilerFamily::MinGw,
            CompilerFamily::Clang,
            CompilerFamily::Gcc,
        ],
        OsFamily::Macos => &[
            CompilerFamily::AppleClang,
            CompilerFamily::Clang,
            CompilerFamily::Gcc,
        ],
        _ => &[CompilerFamily::Gcc, CompilerFamily::Clang],
    }
}

/// Probe one family. `Err` carries the human-readable reason it is unusable.
fn probe_family(
    family: CompilerFamily,
    platform: &PlatformInfo,
    options: &DetectOptions,
) -> Result<CompilerInfo, String> {
    let pinned = options.pinned.get(&family).map(PathBuf::as_path);
    if let Some(path) = pinned {
        if !path.exists() {
            return Err(format!("configured path {} does not exist", path.display()));
        }
    }

    let on_path = |exe: &str| -> Result<PathBuf, String> {
        match pinned {
            Some(path) => Ok(path.to_path_buf()),
            None => which::which(exe).map_err(|_| format!("`{}` not found on PATH", exe)),
        }
    };

    match family {
        CompilerFamily::Msvc | CompilerFamily::ClangCl | CompilerFamily::MinGw
            if !platform.is_windows() =>
        {
            Err(format!("{} is only available on Windows hosts", family))
        }
        CompilerFamily::AppleClang if platform.os != OsFamily::Macos => {
            Err("apple-clang is only available on macOS".to_string())
        }
        CompilerFamily::Msvc => msvc::probe_msvc(pinned, platform, options),
        CompilerFamily::ClangCl => msvc::probe_clang_cl(pinned, options),
        CompilerFamily::MinGw => {
            let path = match pinned {
                Some(path) => path.to_path_buf(),
                None => gcc::locate_mingw(options)?,
            };
            gcc::probe_mingw(&path, options)
        }
        CompilerFamily::Gcc => gcc::probe_gcc(&on_path("gcc")?),
        CompilerFamily::Clang => gcc::probe_clang(&on_path("clang")?),
        CompilerFamily::AppleClang => gcc::probe_apple_clang(&on_path("clang")?),
    }
}

/// Detect a compiler without caching.
///
/// With `requested`, only that compiler is probed. Without it, the
/// platform's priority order is tried and the first usable one wins.
pub fn detect_compiler(
    requested: Option<&str>,
    platform: &PlatformInfo,
    options: &DetectOptions,
) -> Result<CompilerInfo, Error> {
    select(requested, platform, |family| probe_family(family, platform, options))
}

fn select(
    requested: Option<&str>,
    platform: &PlatformInfo,
    mut probe: impl FnMut(CompilerFamily) -> Result<CompilerInfo, String>,
) -> Result<CompilerInfo, Error> {
    if let Some(name) = requested {
        let family = CompilerFamily::parse(name).ok_or_else(|| Error::CompilerNotFound {
            name: name.to_string(),
            reason: "not a known compiler family".to_string(),
        })?;
        return probe(family).map_err(|reason| Error::CompilerNotFound {
            name: name.to_string(),
            reason,
        });
    }

    let order = priority_order(platform);
    for &family in order {
        match probe(family) {
            Ok(info) => {
                tracing::info!("selected compiler {}", info);
                return Ok(info);
            }
            Err(reason) => tracing::debug!("{} unusable: {}", family, reason),
        }
    }

    Err(Error::NoCompilerFound {
        platform: platform.to_string(),
        tried: order.iter().map(|f| f.as_str().to_string()).collect(),
    })
}

/// Process-wide detection cache.
///
/// The platform is detected once; each compiler family is probed at most
/// once, and its result (success or reason for failure) is reused.
#[derive(Debug)]
pub struct Detector {
    options: DetectOptions,
    platform: OnceLock<PlatformInfo>,
    probed: RwLock<HashMap<CompilerFamily, Result<CompilerInfo, String>>>,
}

impl Detector {
    pub fn new(options: DetectOptions) -> Self {
        Detector {
            options,
            platform: OnceLock::new(),
            probed: RwLock::new(HashMap::new()),
        }
    }

    /// Create a detector for a fixed platform.
    pub fn with_platform(options: DetectOptions, platform: PlatformInfo) -> Self {
        let detector = Detector::new(options);
        let _ = detector.platform.set(platform);
        detector
    }

    /// The host platform.
    pub fn platform(&self) -> &PlatformInfo {
        self.platform.get_or_init(detect_platform)
    }

    pub fn options(&self) -> &DetectOptions {
        &self.options
    }

    fn probe_cached(&self, family: CompilerFamily) -> Result<CompilerInfo, String> {
        if let Ok(probed) = self.probed.read() {
            if let Some(result) = probed.get(&family) {
                return result.clone();
            }
        }

        let result = probe_family(family, self.platform(), &self.options);
        if let Ok(mut probed) = self.probed.write() {
            probed.entry(family).or_insert_with(|| result.clone());
        }
        result
    }

    /// Detect a compiler, probing each family at most once per detector.
    pub fn detect(&self, requested: Option<&str>) -> Result<CompilerInfo, Error> {
        select(requested, self.platform(), |family| self.probe_cached(family))
    }

    /// Probe every family relevant to this platform.
    pub fn survey(&self) -> Vec<(CompilerFamily, Result<CompilerInfo, String>)> {
        priority_order(self.platform())
            .iter()
            .map(|&family| (family, self.probe_cached(family)))
            .collect()
    }
}

/// Result of checking a language standard against a compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardSupport {
    pub standard: LanguageStandard,
    pub supported: bool,
    pub warnings: Vec<String>,
}

enum Level {
    Full,
    Partial(&'static str),
    Unsupported,
}

/// `(major, minor)` threshold helper.
fn at_least(version: (u32, u32), major: u32, minor: u32) -> bool {
    version >= (major, minor)
}

fn gcc_level(v: (u32, u32), std: LanguageStandard) -> Level {
    use LanguageStandard::*;
    let full = |ok: bool| if ok { Level::Full } else { Level::Unsupported };
    match std {
        C99 => Level::Full,
        C11 => full(at_least(v, 4, 7)),
        C17 => full(at_least(v, 8, 0)),
        C23 if at_least(v, 9, 0) => Level::Partial("C23 support in GCC is incomplete"),
        C23 => Level::Unsupported,
        Cxx11 => full(at_least(v, 4, 8)),
        Cxx14 => full(at_least(v, 5, 0)),
        Cxx17 => full(at_least(v, 7, 0)),
        Cxx20 if at_least(v, 11, 0) => Level::Full,
        Cxx20 if at_least(v, 10, 0) => Level::Partial("C++20 support before GCC 11 is experimental"),
        Cxx20 => Level::Unsupported,
        Cxx23 if at_least(v, 11, 0) => Level::Partial("C++23 support in GCC is partial"),
        Cxx23 => Level::Unsupported,
    }
}

fn clang_level(v: (u32, u32), std: LanguageStandard) -> Level {
    use LanguageStandard::*;
    let full = |ok: bool| if ok { Level::Full } else { Level::Unsupported };
    match std {
        C99 => Level::Full,
        C11 => full(at_least(v, 3, 1)),
        C17 => full(at_least(v, 6, 0)),
        C23 if at_least(v, 9, 0) => Level::Partial("C23 support in Clang is incomplete"),
        C23 => Level::Unsupported,
        Cxx11 => full(at_least(v, 3, 3)),
        Cxx14 => full(at_least(v, 3, 5)),
        Cxx17 => full(at_least(v, 5, 0)),
        Cxx20 if at_least(v, 16, 0) => Level::Full,
        Cxx20 if at_least(v, 10, 0) => Level::Partial("C++20 support before Clang 16 is partial"),
        Cxx20 => Level::Unsupported,
        Cxx23 if at_least(v, 17, 0) => Level::Partial("C++23 support in Clang is partial"),
        Cxx23 => Level::Unsupported,
    }
}

fn apple_clang_level(v: (u32, u32), std: LanguageStandard) -> Level {
    use LanguageStandard::*;
    let full = |ok: bool| if ok { Level::Full } else { Level::Unsupported };
    match std {
        C99 => Level::Full,
        C11 => full(at_least(v, 6, 0)),
        C17 => full(at_least(v, 11, 0)),
        C23 if at_least(v, 15, 0) => Level::Partial("C23 support in Apple Clang is incomplete"),
        C23 => Level::Unsupported,
        Cxx11 | Cxx14 => full(at_least(v, 6, 0)),
        Cxx17 => full(at_least(v, 10, 0)),
        Cxx20 if at_least(v, 15, 0) => Level::Full,
        Cxx20 if at_least(v, 12, 0) => Level::Partial("C++20 support before Apple Clang 15 is partial"),
        Cxx20 => Level::Unsupported,
        Cxx23 if at_least(v, 15, 0) => Level::Partial("C++23 support in Apple Clang is partial"),
        Cxx23 => Level::Unsupported,
    }
}

fn msvc_level(v: (u32, u32), std: LanguageStandard) -> Level {
    use LanguageStandard::*;
    let full = |ok: bool| if ok { Level::Full } else { Level::Unsupported };
    match std {
        C99 => Level::Partial("MSVC implements only the parts of C99 required by C11"),
        C11 | C17 => full(at_least(v, 19, 28)),
        C23 => Level::Unsupported,
        Cxx11 if at_least(v, 19, 0) => Level::Partial("MSVC has no C++11 mode; /std:c++14 is used"),
        Cxx11 => Level::Unsupported,
        Cxx14 => full(at_least(v, 19, 0)),
        Cxx17 => full(at_least(v, 19, 11)),
        Cxx20 => full(at_least(v, 19, 29)),
        Cxx23 if at_least(v, 19, 30) => Level::Partial("C++23 maps to /std:c++latest on MSVC"),
        Cxx23 => Level::Unsupported,
    }
}

fn level(family: CompilerFamily, version: &str, std: LanguageStandard) -> Level {
    let Some(v) = parse_version_tuple(version) else {
        return Level::Unsupported;
    };
    match family {
        CompilerFamily::Gcc | CompilerFamily::MinGw => gcc_level(v, std),
        CompilerFamily::Clang | CompilerFamily::ClangCl => clang_level(v, std),
        CompilerFamily::AppleClang => apple_clang_level(v, std),
        CompilerFamily::Msvc => msvc_level(v, std),
    }
}

/// Standards a compiler version supports, fully or partially.
pub fn supported_standards(family: CompilerFamily, version: &str) -> Vec<LanguageStandard> {
    LanguageStandard::ALL
        .into_iter()
        .filter(|&std| !matches!(level(family, version, std), Level::Unsupported))
        .collect()
}

/// Check a language standard against a detected compiler. Never fails;
/// partial support is reported through warnings.
pub fn validate_language_standard(
    compiler: &CompilerInfo,
    standard: LanguageStandard,
) -> StandardSupport {
    let (supported, warnings) = match level(compiler.family, &compiler.version, standard) {
        Level::Full => (true, Vec::new()),
        Level::Partial(note) => (true, vec![note.to_string()]),
        Level::Unsupported => (
            false,
            vec![format!(
                "{} {} does not support {}",
                compiler.family, compiler.version, standard
            )],
        ),
    };

    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    StandardSupport {
        standard,
        supported,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(family: CompilerFamily, version: &str) -> CompilerInfo {
        CompilerInfo {
            name: family.as_str().to_string(),
            version: version.to_string(),
            family,
            path: PathBuf::from(family.executable()),
            standards: supported_standards(family, version),
            activation_script: None,
            msys_root: None,
        }
    }

    #[test]
    fn test_priority_orders() {
        let windows = PlatformInfo::from_parts("windows", "x86_64");
        assert_eq!(priority_order(&windows)[0], CompilerFamily::Msvc);
        assert_eq!(priority_order(&windows)[2], CompilerFamily::MinGw);

        let mac = PlatformInfo::from_parts("macos", "aarch64");
        assert_eq!(priority_order(&mac)[0], CompilerFamily::AppleClang);

        let linux = PlatformInfo::from_parts("linux", "x86_64");
        assert_eq!(priority_order(&linux), &[CompilerFamily::Gcc, CompilerFamily::Clang]);
    }

    #[test]
    fn test_select_first_usable() {
        let windows = PlatformInfo::from_parts("windows", "x86_64");
        let mut probed = Vec::new();
        let found = select(None, &windows, |family| {
            probed.push(family);
            if family == CompilerFamily::MinGw {
                Ok(info(family, "13.2.0"))
            } else {
                Err("missing".to_string())
            }
        })
        .unwrap();

        assert_eq!(found.family, CompilerFamily::MinGw);
        assert_eq!(
            probed,
            vec![CompilerFamily::Msvc, CompilerFamily::ClangCl, CompilerFamily::MinGw]
        );
    }

    #[test]
    fn test_select_none_usable() {
        let linux = PlatformInfo::from_parts("linux", "x86_64");
        let err = select(None, &linux, |_| Err("missing".to_string())).unwrap_err();
        match err {
            Error::NoCompilerFound { tried, .. } => assert_eq!(tried, vec!["gcc", "clang"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_select_requested_unavailable() {
        let linux = PlatformInfo::from_parts("linux", "x86_64");
        let err = select(Some("msvc"), &linux, |_| Err("not on PATH".to_string())).unwrap_err();
        assert!(matches!(err, Error::CompilerNotFound { ref name, .. } if name == "msvc"));

        let err = select(Some("icc"), &linux, |_| unreachable!()).unwrap_err();
        assert!(matches!(err, Error::CompilerNotFound { .. }));
    }

    #[test]
    fn test_msvc_on_linux_is_not_found() {
        let linux = PlatformInfo::from_parts("linux", "x86_64");
        let err = detect_compiler(Some("cl"), &linux, &DetectOptions::default()).unwrap_err();
        match err {
            Error::CompilerNotFound { reason, .. } => assert!(reason.contains("Windows")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_gcc_standards() {
        let gcc9 = info(CompilerFamily::Gcc, "9.4.0");
        assert!(validate_language_standard(&gcc9, LanguageStandard::Cxx17).supported);
        assert!(!validate_language_standard(&gcc9, LanguageStandard::Cxx20).supported);

        let gcc10 = info(CompilerFamily::Gcc, "10.5.0");
        let support = validate_language_standard(&gcc10, LanguageStandard::Cxx20);
        assert!(support.supported);
        assert_eq!(support.warnings.len(), 1);

        let gcc13 = info(CompilerFamily::MinGw, "13.2.0");
        assert!(validate_language_standard(&gcc13, LanguageStandard::Cxx20).warnings.is_empty());
        assert!(gcc13.declares(LanguageStandard::Cxx23));
    }

    #[test]
    fn test_msvc_standards() {
        let vs2017 = info(CompilerFamily::Msvc, "19.16.27045");
        assert!(validate_language_standard(&vs2017, LanguageStandard::Cxx17).supported);
        assert!(!validate_language_standard(&vs2017, LanguageStandard::Cxx20).supported);
        assert!(!validate_language_standard(&vs2017, LanguageStandard::C11).supported);

        let vs2022 = info(CompilerFamily::Msvc, "19.38");
        let latest = validate_language_standard(&vs2022, LanguageStandard::Cxx23);
        assert!(latest.supported);
        assert!(latest.warnings[0].contains("c++latest"));
        assert!(!validate_language_standard(&vs2022, LanguageStandard::C23).supported);
    }

    #[test]
    fn test_clang_cl_uses_clang_table() {
        let clang_cl = info(CompilerFamily::ClangCl, "17.0.6");
        assert_eq!(
            clang_cl.standards,
            supported_standards(CompilerFamily::Clang, "17.0.6")
        );
    }

    #[test]
    fn test_unparseable_version_supports_nothing() {
        assert!(supported_standards(CompilerFamily::Gcc, "unknown").is_empty());
    }

    #[test]
    fn test_options_from_config() {
        let config = Config::parse(
            r#"
            [environment]
            msys2_root = "D:/tools/msys64"
            msystem = "UCRT64"

            [compilers.mingw]
            path = "D:/tools/msys64/ucrt64/bin/gcc.exe"

            [compilers.borland]
            path = "C:/bc/bcc32.exe"
            "#,
        )
        .unwrap();

        let options = DetectOptions::from_config(&config);
        assert_eq!(options.msys2_root, PathBuf::from("D:/tools/msys64"));
        assert_eq!(options.msystem, "UCRT64");
        assert_eq!(options.pinned.len(), 1);
        assert_eq!(
            options.pinned.get(&CompilerFamily::MinGw),
            Some(&PathBuf::from("D:/tools/msys64/ucrt64/bin/gcc.exe"))
        );
    }

    #[test]
    fn test_pinned_path_must_exist() {
        let linux = PlatformInfo::from_parts("linux", "x86_64");
        let mut options = DetectOptions::default();
        options
            .pinned
            .insert(CompilerFamily::Gcc, PathBuf::from("/nonexistent/bin/gcc"));

        let err = detect_compiler(Some("gcc"), &linux, &options).unwrap_err();
        match err {
            Error::CompilerNotFound { reason, .. } => assert!(reason.contains("does not exist")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_detector_caches_probe_results() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let gcc = tmp.path().join("gcc");
        std::fs::write(&gcc, "#!/bin/sh\necho 'gcc (GCC) 12.2.0'\n").unwrap();
        std::fs::set_permissions(&gcc, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut options = DetectOptions::default();
        options.pinned.insert(CompilerFamily::Gcc, gcc.clone());
        let detector =
            Detector::with_platform(options, PlatformInfo::from_parts("linux", "x86_64"));

        let first = detector.detect(Some("gcc")).unwrap();
        assert_eq!(first.version, "12.2.0");
        assert_eq!(first.path, gcc);

        // A cached result survives the executable disappearing.
        std::fs::remove_file(&gcc).unwrap();
        let second = detector.detect(None).unwrap();
        assert_eq!(second, first);
    }
}
