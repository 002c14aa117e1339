//! Global context for buildrig operations.
//!
//! Provides centralized access to the working directory, the project root
//! and the merged configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::util::config::{global_config_path, load_config, Config, PROJECT_FILE};

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Global configuration file (~/.buildrig/config.toml), if a home exists
    global_config: Option<PathBuf>,

    /// Whether to use verbose output
    verbose: bool,
}

impl GlobalContext {
    /// Create a context for the process's working directory.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        Ok(GlobalContext {
            cwd,
            global_config: global_config_path(),
            verbose: false,
        })
    }

    /// Create a context with a specific working directory.
    pub fn with_cwd(cwd: PathBuf) -> Result<Self> {
        let mut ctx = Self::new()?;
        ctx.cwd = cwd;
        Ok(ctx)
    }

    /// Use a different global configuration file, or none.
    pub fn with_global_config(mut self, path: Option<PathBuf>) -> Self {
        self.global_config = path;
        self
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn global_config_path(&self) -> Option<&Path> {
        self.global_config.as_deref()
    }

    /// Find the directory holding `buildrig.toml`, searching upward from
    /// the working directory.
    pub fn find_project_root(&self) -> Option<PathBuf> {
        self.cwd
            .ancestors()
            .find(|dir| dir.join(PROJECT_FILE).is_file())
            .map(Path::to_path_buf)
    }

    /// The project root; an error when there is no `buildrig.toml`.
    pub fn project_root(&self) -> Result<PathBuf> {
        self.find_project_root().with_context(|| {
            format!(
                "could not find `{}` in `{}` or any parent directory",
                PROJECT_FILE,
                self.cwd.display()
            )
        })
    }

    /// Load the merged global and project configuration for `root`.
    pub fn load_config(&self, root: &Path) -> Result<Config> {
        load_config(self.global_config.as_deref(), &root.join(PROJECT_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_project_root_walks_up() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(PROJECT_FILE), "[project]\n").unwrap();
        let nested = tmp.path().join("src").join("core");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = GlobalContext::with_cwd(nested).unwrap();
        assert_eq!(ctx.find_project_root(), Some(tmp.path().to_path_buf()));
    }

    #[test]
    fn test_missing_project() {
        let tmp = TempDir::new().unwrap();
        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf()).unwrap();
        if ctx.find_project_root().is_none() {
            let err = ctx.project_root().unwrap_err();
            assert!(err.to_string().contains(PROJECT_FILE));
        }
    }

    #[test]
    fn test_load_config_merges_global() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        std::fs::write(&global, "[build]\njobs = 4\ngenerator = \"Ninja\"\n").unwrap();
        std::fs::write(
            tmp.path().join(PROJECT_FILE),
            "[build]\ngenerator = \"Unix Makefiles\"\n",
        )
        .unwrap();

        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf())
            .unwrap()
            .with_global_config(Some(global));
        let config = ctx.load_config(tmp.path()).unwrap();
        assert_eq!(config.build.jobs, Some(4));
        assert_eq!(config.build.generator.as_deref(), Some("Unix Makefiles"));
    }
}
