//! Removing build directories.

use std::path::{Path, PathBuf};

use crate::core::context::{canonical_compiler, BuildConfiguration};
use crate::core::errors::Error;
use crate::core::layout;
use crate::util::fs::remove_dir_all_if_exists;

/// Which build directories to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanSelector {
    /// The whole `build/` tree.
    All,
    /// Everything built in one configuration.
    Configuration(BuildConfiguration),
    /// One (configuration, compiler, target) directory.
    Single {
        configuration: BuildConfiguration,
        compiler: String,
        target: String,
    },
}

impl CleanSelector {
    /// Directory the selector names under `root`. Compiler aliases resolve
    /// to their family's directory; names that would leave `build/` are
    /// rejected.
    pub fn path(&self, root: &Path) -> Result<PathBuf, Error> {
        match self {
            CleanSelector::All => Ok(layout::build_root(root)),
            CleanSelector::Configuration(cfg) => Ok(layout::build_root(root).join(cfg.as_str())),
            CleanSelector::Single {
                configuration,
                compiler,
                target,
            } => layout::checked_build_dir(
                root,
                *configuration,
                &canonical_compiler(compiler),
                target,
            ),
        }
    }
}

/// Remove the selected directory. Returns the paths actually removed; an
/// empty list means there was nothing to clean.
pub fn clean(root: &Path, selector: &CleanSelector) -> Result<Vec<PathBuf>, Error> {
    let path = selector.path(root)?;
    if remove_dir_all_if_exists(&path)? {
        tracing::info!("removed {}", path.display());
        Ok(vec![path])
    } else {
        tracing::debug!("nothing to clean at {}", path.display());
        Ok(Vec::new())
    }
}
