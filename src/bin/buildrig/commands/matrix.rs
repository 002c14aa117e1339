//! `buildrig matrix` command

use anyhow::Result;

use buildrig::core::ErrorKind;
use buildrig::ops::{expand_matrix, run_matrix, MatrixOptions, MatrixReport, PipelineOptions};
use buildrig::util::shell::Status;

use super::{kind_exit_code, CliError, Session, EXIT_FAILURE};
use crate::cli::MatrixArgs;

pub fn execute(args: MatrixArgs, session: &Session) -> Result<()> {
    let arch = session.arch(args.arch.as_deref());
    let contexts = expand_matrix(
        &session.config,
        &args.targets,
        &args.compilers,
        &args.configurations,
        &arch,
    );
    if contexts.is_empty() {
        return Err(CliError::InvalidArgument(
            "the build matrix is empty; set [project] targets and compilers or pass --target and --compiler"
                .to_string(),
        )
        .into());
    }

    let pipeline = session.pipeline(PipelineOptions::default());
    let options = MatrixOptions {
        jobs: args.jobs,
        skip_missing_profiles: args.skip_missing_profiles,
    };

    let progress = session
        .shell
        .progress(contexts.len() as u64, "Building matrix");
    let report = run_matrix(&pipeline, &contexts, &options, Some(&progress))?;

    if session.shell.is_json() {
        let entries: Vec<_> = report.entries.iter().map(|e| e.summary()).collect();
        session.shell.json_event(&serde_json::json!({
            "reason": "matrix-finished",
            "succeeded": report.succeeded(),
            "failed": report.failed(),
            "skipped": report.skipped(),
            "entries": entries,
        }));
    } else {
        for (ctx, err) in report.failures() {
            session
                .shell
                .error(format!("{}: {}", ctx.label(), err.to_diagnostic().format(false).trim_end()));
        }
        session.shell.status(
            Status::Finished,
            format!(
                "{} succeeded, {} failed, {} skipped",
                report.succeeded(),
                report.failed(),
                report.skipped()
            ),
        );
    }

    match matrix_exit_code(&report) {
        0 => Ok(()),
        code => Err(CliError::MatrixFailed {
            failed: report.failed(),
            total: report.entries.len(),
            code,
        }
        .into()),
    }
}

/// The most severe exit status among failed entries: an execution failure
/// outranks invalid input, which outranks a missing profile.
fn matrix_exit_code(report: &MatrixReport) -> i32 {
    let kinds: Vec<ErrorKind> = report.failures().map(|(_, err)| err.kind()).collect();
    if kinds.is_empty() {
        return 0;
    }
    let codes: Vec<i32> = kinds.into_iter().map(kind_exit_code).collect();
    if codes.contains(&EXIT_FAILURE) {
        EXIT_FAILURE
    } else {
        codes.into_iter().min().unwrap_or(EXIT_FAILURE)
    }
}
