//! `buildrig profile` command

use std::sync::Arc;

use anyhow::{Context, Result};

use buildrig::builder::toolchain::{validate_language_standard, DetectOptions, Detector};
use buildrig::core::BuildConfiguration;
use buildrig::deps::{list_profiles, resolve_profile, validate_profile_exists, ProfileDefinition};
use buildrig::util::shell::{Shell, Status};
use buildrig::util::GlobalContext;

use super::CliError;
use crate::cli::{ProfileArgs, ProfileCommands};

pub fn execute(args: ProfileArgs, shell: &Arc<Shell>) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let root = ctx.project_root().context(CliError::NoProject)?;
    let config = ctx.load_config(&root).context(CliError::InvalidConfig)?;
    let profiles_dir = config.profiles_dir(&root);

    match args.command {
        ProfileCommands::List => {
            let profiles = list_profiles(&profiles_dir);
            if shell.is_json() {
                shell.json_event(&serde_json::json!({
                    "reason": "profiles",
                    "directory": profiles_dir,
                    "profiles": profiles,
                }));
            } else if profiles.is_empty() {
                shell.warn(format!("no profiles in {}", profiles_dir.display()));
            } else {
                for name in &profiles {
                    println!("{}", name);
                }
            }
            Ok(())
        }
        ProfileCommands::Show {
            compiler,
            configuration,
            check,
        } => {
            let id = resolve_profile(&compiler, configuration)?;
            let path = validate_profile_exists(&id, &profiles_dir)?;
            let definition = ProfileDefinition::load(&path)?;

            if check {
                check_standards(shell, &config, &compiler, &definition)?;
            }
            check_build_type(shell, configuration, &definition);

            if shell.is_json() {
                shell.json_event(&serde_json::json!({
                    "reason": "profile",
                    "id": id.as_str(),
                    "path": path,
                    "profile": definition,
                }));
                return Ok(());
            }

            shell.status(Status::Found, format!("{} at {}", id, path.display()));
            for include in &definition.includes {
                println!("include({})", include);
            }
            for (section, values) in [
                ("settings", &definition.settings),
                ("options", &definition.options),
                ("buildenv", &definition.buildenv),
                ("conf", &definition.conf),
            ] {
                if values.is_empty() {
                    continue;
                }
                println!("[{}]", section);
                for (key, value) in values {
                    println!("{}={}", key, value);
                }
            }
            if !definition.tool_requires.is_empty() {
                println!("[tool_requires]");
                for req in &definition.tool_requires {
                    println!("{}", req);
                }
            }
            Ok(())
        }
    }
}

fn check_standards(
    shell: &Shell,
    config: &buildrig::util::Config,
    compiler: &str,
    definition: &ProfileDefinition,
) -> Result<()> {
    let detector = Detector::new(DetectOptions::from_config(config));
    let info = detector.detect(Some(compiler))?;

    for standard in [definition.cppstd(), definition.cstd()].into_iter().flatten() {
        let support = validate_language_standard(&info, standard);
        if support.supported && support.warnings.is_empty() {
            shell.status(Status::Found, format!("{} supports {}", info.name, standard));
        }
        for warning in &support.warnings {
            shell.warn(warning);
        }
    }
    Ok(())
}

fn check_build_type(shell: &Shell, configuration: BuildConfiguration, definition: &ProfileDefinition) {
    if let Some(build_type) = definition.build_type() {
        if build_type != configuration.build_type() {
            shell.warn(format!(
                "profile sets build_type={} but the configuration is {}",
                build_type,
                configuration.build_type()
            ));
        }
    }
}
