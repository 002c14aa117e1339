//! `buildrig run` command

use anyhow::Result;

use buildrig::ops::{PipelineOptions, PipelineReport};
use buildrig::util::shell::{format_duration, Shell, Status};

use super::Session;
use crate::cli::RunArgs;

pub fn execute(args: RunArgs, session: &Session) -> Result<()> {
    let ctx = session.context(&args.context, "run")?;

    let run_tests = match (args.tests, args.no_tests) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let pipeline = session.pipeline(PipelineOptions {
        run_tests,
        ..Default::default()
    });

    session.shell.status(Status::Building, ctx.label());
    let report = pipeline.run(&ctx)?;
    print_report(&session.shell, &report);

    Ok(())
}

/// Print the result of one successful pipeline.
pub fn print_report(shell: &Shell, report: &PipelineReport) {
    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "pipeline-finished",
            "report": report,
            "duration_ms": report.duration.as_millis() as u64,
        }));
        return;
    }

    shell.status(Status::Found, &report.compiler);
    for artifact in &report.artifacts {
        shell.status(Status::Info, artifact.path.display());
    }
    shell.status(
        Status::Finished,
        format!(
            "{} in {}",
            report.context.label(),
            format_duration(report.duration)
        ),
    );
}
