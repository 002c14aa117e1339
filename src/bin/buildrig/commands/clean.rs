//! `buildrig clean` command

use std::sync::Arc;

use anyhow::{Context, Result};

use buildrig::core::BuildConfiguration;
use buildrig::ops::{clean, CleanSelector};
use buildrig::util::shell::{Shell, Status};
use buildrig::util::GlobalContext;

use super::CliError;
use crate::cli::CleanArgs;

pub fn execute(args: CleanArgs, shell: &Arc<Shell>) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let root = ctx.project_root().context(CliError::NoProject)?;

    let selector = selector(&args, &ctx, &root)?;
    let removed = clean(&root, &selector)?;

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "clean-finished",
            "removed": removed,
        }));
    } else if removed.is_empty() {
        shell.status(Status::Skipped, "nothing to clean");
    } else {
        for path in &removed {
            shell.status(Status::Removed, path.display());
        }
    }

    Ok(())
}

fn selector(args: &CleanArgs, ctx: &GlobalContext, root: &std::path::Path) -> Result<CleanSelector> {
    if args.all {
        return Ok(CleanSelector::All);
    }

    match (&args.target, args.configuration) {
        (Some(target), configuration) => {
            let compiler = match &args.compiler {
                Some(compiler) => compiler.clone(),
                None => {
                    let config = ctx.load_config(root).context(CliError::InvalidConfig)?;
                    config.project.compilers.first().cloned().ok_or_else(|| {
                        CliError::InvalidArgument(
                            "pass --compiler or set [project] compilers in buildrig.toml"
                                .to_string(),
                        )
                    })?
                }
            };
            Ok(CleanSelector::Single {
                configuration: configuration.unwrap_or(BuildConfiguration::Debug),
                compiler,
                target: target.clone(),
            })
        }
        (None, Some(configuration)) => Ok(CleanSelector::Configuration(configuration)),
        (None, None) => Ok(CleanSelector::All),
    }
}
