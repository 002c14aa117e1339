//! `buildrig detect` command

use std::sync::Arc;

use anyhow::Result;

use buildrig::builder::toolchain::{DetectOptions, Detector};
use buildrig::core::CompilerInfo;
use buildrig::util::shell::{Shell, Status};

use super::load_optional_config;
use crate::cli::DetectArgs;

pub fn execute(args: DetectArgs, shell: &Arc<Shell>) -> Result<()> {
    let (_, config) = load_optional_config()?;
    let detector = Detector::new(DetectOptions::from_config(&config));
    let platform = detector.platform().clone();

    if args.all {
        let survey = detector.survey();
        if shell.is_json() {
            let compilers: Vec<_> = survey
                .iter()
                .map(|(family, result)| match result {
                    Ok(info) => serde_json::json!({ "family": family.as_str(), "compiler": info }),
                    Err(reason) => serde_json::json!({ "family": family.as_str(), "error": reason }),
                })
                .collect();
            shell.json_event(&serde_json::json!({
                "reason": "detect-finished",
                "platform": platform,
                "compilers": compilers,
            }));
            return Ok(());
        }

        shell.status(Status::Info, format!("platform {}", platform));
        for (family, result) in &survey {
            match result {
                Ok(info) => print_compiler(shell, info),
                Err(reason) => shell.status(Status::Skipped, format!("{}: {}", family, reason)),
            }
        }
        return Ok(());
    }

    let info = detector.detect(args.compiler.as_deref())?;
    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "detect-finished",
            "platform": platform,
            "compiler": info,
        }));
    } else {
        shell.status(Status::Info, format!("platform {}", platform));
        print_compiler(shell, &info);
    }

    Ok(())
}

fn print_compiler(shell: &Shell, info: &CompilerInfo) {
    shell.status(Status::Found, info);
    if shell.is_verbose() {
        let standards: Vec<String> = info.standards.iter().map(|s| s.to_string()).collect();
        shell.note(format!("standards: {}", standards.join(", ")));
        if let Some(script) = &info.activation_script {
            shell.note(format!("activation: {}", script.display()));
        }
        if let Some(root) = &info.msys_root {
            shell.note(format!("msys2: {}", root.display()));
        }
    }
}
