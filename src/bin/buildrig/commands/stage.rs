//! Single-stage commands: `install`, `configure`, `build`, `test`, `package`,
//! `deploy`.
//!
//! Each one detects the compiler and prepares its shell like a full run,
//! then performs one step against the existing build directory.

use std::path::PathBuf;

use anyhow::Result;

use buildrig::core::{BuildContext, CompilerInfo};
use buildrig::ops::{Pipeline, PipelineOptions};
use buildrig::terminal::TerminalEnvironment;
use buildrig::util::shell::Status;

use super::Session;
use crate::cli::{DeployArgs, PackageArgs, StageArgs};

struct Prepared<'s> {
    pipeline: Pipeline<'s>,
    ctx: BuildContext,
    compiler: CompilerInfo,
    env: TerminalEnvironment,
    build_dir: PathBuf,
}

fn prepare<'s>(session: &'s Session, args: &StageArgs, name: &str) -> Result<Prepared<'s>> {
    let ctx = session.context(&args.context, name)?;
    let pipeline = session.pipeline(PipelineOptions::default());
    let (compiler, env) = pipeline.prepare(&ctx)?;
    let build_dir = pipeline.build_dir(&ctx)?;
    tracing::debug!("using {} in {}", compiler, env);

    Ok(Prepared {
        pipeline,
        ctx,
        compiler,
        env,
        build_dir,
    })
}

pub fn install(args: StageArgs, session: &Session) -> Result<()> {
    let p = prepare(session, &args, "install")?;
    let span = session.shell.span(Status::Installing, p.ctx.label());
    p.pipeline
        .install_dependencies(&p.ctx, &p.compiler, &p.env, &p.build_dir)?;
    span.finish_with_message(format!("dependencies into {}", p.build_dir.display()));
    Ok(())
}

pub fn configure(args: StageArgs, session: &Session) -> Result<()> {
    let p = prepare(session, &args, "configure")?;
    let span = session.shell.span(Status::Configuring, p.ctx.label());
    p.pipeline
        .configure(&p.ctx, &p.compiler, &p.env, &p.build_dir)?;
    span.finish_with_message(p.build_dir.display());
    Ok(())
}

pub fn build(args: StageArgs, session: &Session) -> Result<()> {
    let p = prepare(session, &args, "build")?;
    let span = session.shell.span(Status::Building, p.ctx.label());
    p.pipeline.build(&p.ctx, &p.env, &p.build_dir)?;
    span.finish_with_message(format!("target `{}`", p.ctx.target));
    Ok(())
}

pub fn test(args: StageArgs, session: &Session) -> Result<()> {
    let p = prepare(session, &args, "test")?;
    let span = session.shell.span(Status::Testing, p.ctx.label());
    p.pipeline.cmake(&p.env).run_tests(
        &p.build_dir,
        p.ctx.configuration,
        session.config.build.jobs,
    )?;
    span.finish_with_message("tests");
    Ok(())
}

pub fn package(args: PackageArgs, session: &Session) -> Result<()> {
    let stage_args = StageArgs {
        context: args.context,
    };
    let p = prepare(session, &stage_args, "package")?;
    let output_dir = session.root.join(&args.output);

    let span = session.shell.span(Status::Packaging, p.ctx.label());
    let files = p.pipeline.cmake(&p.env).create_package(
        &p.build_dir,
        p.ctx.configuration,
        args.generator.as_deref(),
        &output_dir,
    )?;

    if session.shell.is_json() {
        session.shell.json_event(&serde_json::json!({
            "reason": "package-finished",
            "files": files,
        }));
    } else {
        for file in &files {
            session.shell.status(Status::Info, file.display());
        }
    }
    span.finish_with_message(format!("{} package(s)", files.len()));
    Ok(())
}

pub fn deploy(args: DeployArgs, session: &Session) -> Result<()> {
    let stage_args = StageArgs {
        context: args.context,
    };
    let p = prepare(session, &stage_args, "deploy")?;
    let prefix = args.prefix.map(|prefix| session.root.join(prefix));

    let span = session.shell.span(Status::Installing, p.ctx.label());
    p.pipeline.cmake(&p.env).install_artifacts(
        &p.build_dir,
        p.ctx.configuration,
        prefix.as_deref(),
    )?;

    if session.shell.is_json() {
        session.shell.json_event(&serde_json::json!({
            "reason": "deploy-finished",
            "build_dir": p.build_dir,
            "prefix": prefix,
        }));
    }
    match prefix {
        Some(prefix) => span.finish_with_message(format!("into {}", prefix.display())),
        None => span.finish_with_message("into the configured prefix"),
    }
    Ok(())
}
