//! `buildrig doctor` command

use std::sync::Arc;

use anyhow::Result;

use buildrig::builder::toolchain::{DetectOptions, Detector};
use buildrig::ops::doctor::{doctor, format_report, summarize};
use buildrig::util::Shell;

use super::{load_optional_config, EXIT_FAILURE};

pub fn execute(shell: &Arc<Shell>) -> Result<()> {
    let (root, config) = load_optional_config()?;
    let detector = Detector::new(DetectOptions::from_config(&config));

    let report = doctor(&config, root.as_deref(), &detector);

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "doctor-finished",
            "summary": summarize(&report),
            "report": report,
        }));
    } else {
        print!("{}", format_report(&report, shell.is_verbose()));
    }

    // Exit with error code if required checks failed
    if !report.all_required_passed() {
        std::process::exit(EXIT_FAILURE);
    }

    Ok(())
}
