//! On-disk build directory layout.
//!
//! `<root>/build/<configuration>/<compiler>/<target>` is the contract between
//! pipeline stages. Every stage computes it through [`build_dir`], and
//! anything that removes or creates it goes through [`checked_build_dir`].

use std::path::{Component, Path, PathBuf};

use crate::core::context::{BuildConfiguration, BuildContext};
use crate::core::errors::Error;

/// Name of the top-level build directory under the project root.
pub const BUILD_ROOT: &str = "build";

/// The top-level build directory for a project root.
pub fn build_root(root: &Path) -> PathBuf {
    root.join(BUILD_ROOT)
}

/// Check that `value` is usable as a single directory name.
///
/// Rejects empty names, separators, drive prefixes and `..`, any of which
/// would let the joined path leave the build tree.
pub fn validate_component(field: &'static str, value: &str) -> Result<(), Error> {
    let reason = if value.trim().is_empty() {
        Some("must not be empty")
    } else if value.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else if value.contains(':') {
        Some("must not contain `:`")
    } else if value.contains("..") {
        Some("must not contain `..`")
    } else if value == "." {
        Some("must not be `.`")
    } else if value.chars().any(|c| c.is_control()) {
        Some("must not contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(Error::InvalidName {
            field,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// The build directory for one (configuration, compiler, target) tuple.
///
/// Does not validate its inputs; see [`checked_build_dir`].
pub fn build_dir(
    root: &Path,
    configuration: BuildConfiguration,
    compiler: &str,
    target: &str,
) -> PathBuf {
    build_root(root)
        .join(configuration.as_str())
        .join(compiler)
        .join(target)
}

/// [`build_dir`] after validating `compiler` and `target`. The result is
/// always exactly three plain components below [`build_root`].
pub fn checked_build_dir(
    root: &Path,
    configuration: BuildConfiguration,
    compiler: &str,
    target: &str,
) -> Result<PathBuf, Error> {
    validate_component("compiler", compiler)?;
    validate_component("target", target)?;

    let dir = build_dir(root, configuration, compiler, target);
    let contained = dir
        .strip_prefix(build_root(root))
        .map(|rest| {
            rest.components().count() == 3
                && rest.components().all(|c| matches!(c, Component::Normal(_)))
        })
        .unwrap_or(false);
    if !contained {
        return Err(Error::InvalidName {
            field: "target",
            value: target.to_string(),
            reason: "resolves outside the build directory",
        });
    }
    Ok(dir)
}

/// The build directory for a context.
pub fn context_build_dir(root: &Path, ctx: &BuildContext) -> Result<PathBuf, Error> {
    checked_build_dir(root, ctx.configuration, &ctx.compiler, &ctx.target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;

    #[test]
    fn test_build_dir_layout() {
        let dir = build_dir(
            Path::new("/work/proj"),
            BuildConfiguration::Release,
            "mingw",
            "app",
        );
        assert_eq!(dir, PathBuf::from("/work/proj/build/release/mingw/app"));
    }

    #[test]
    fn test_context_build_dir_matches() {
        let ctx = BuildContext::builder("engine", "msvc")
            .configuration(BuildConfiguration::Debug)
            .build();
        assert_eq!(
            context_build_dir(Path::new("root"), &ctx).unwrap(),
            build_dir(Path::new("root"), BuildConfiguration::Debug, "msvc", "engine")
        );
    }

    #[test]
    fn test_escaping_names_rejected() {
        let root = Path::new("/work/proj");
        for target in ["", " ", "/tmp/victim", "..", "../../etc", "a/b", "a\\b", "C:x", "."] {
            let err = checked_build_dir(root, BuildConfiguration::Debug, "gcc", target).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidName, "target {:?}", target);
            assert!(err.kind().is_validation());
        }

        let err = checked_build_dir(root, BuildConfiguration::Debug, "../gcc", "app").unwrap_err();
        assert!(matches!(err, Error::InvalidName { field: "compiler", .. }));
    }

    #[test]
    fn test_plain_names_accepted() {
        let root = Path::new("/work/proj");
        for target in ["app", "my-lib_2", "core.tests"] {
            let dir = checked_build_dir(root, BuildConfiguration::Release, "clang-cl", target).unwrap();
            assert!(dir.starts_with(build_root(root)));
        }
    }
}
