//! Running many pipelines at once.

use std::collections::HashSet;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;

use crate::core::context::{BuildConfiguration, BuildContext};
use crate::core::errors::{ErrorKind, PipelineError};
use crate::core::platform::Arch;
use crate::ops::pipeline::{Pipeline, PipelineReport};
use crate::util::config::Config;
use crate::util::shell::{Progress, Status};

/// Matrix run options.
#[derive(Debug, Clone, Default)]
pub struct MatrixOptions {
    /// Pipelines run at the same time (default 1)
    pub jobs: Option<usize>,
    /// Report a missing profile as skipped instead of failed
    pub skip_missing_profiles: bool,
}

/// How one matrix entry ended.
#[derive(Debug)]
pub enum MatrixOutcome {
    Succeeded(Box<PipelineReport>),
    Failed(Box<PipelineError>),
    /// The tuple's profile does not exist and missing profiles are skippable.
    Skipped(Box<PipelineError>),
}

/// One (target, compiler, configuration) result.
#[derive(Debug)]
pub struct MatrixEntry {
    pub context: BuildContext,
    pub outcome: MatrixOutcome,
}

/// Results of a matrix run, in request order.
#[derive(Debug, Default)]
pub struct MatrixReport {
    pub entries: Vec<MatrixEntry>,
}

/// Serializable per-entry summary.
#[derive(Debug, Serialize)]
pub struct EntrySummary<'a> {
    pub label: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<&'a PipelineReport>,
}

impl MatrixEntry {
    pub fn summary(&self) -> EntrySummary<'_> {
        let label = self.context.label();
        match &self.outcome {
            MatrixOutcome::Succeeded(report) => EntrySummary {
                label,
                status: "succeeded",
                stage: None,
                kind: None,
                report: Some(report.as_ref()),
            },
            MatrixOutcome::Failed(err) | MatrixOutcome::Skipped(err) => EntrySummary {
                label,
                status: if matches!(self.outcome, MatrixOutcome::Skipped(_)) {
                    "skipped"
                } else {
                    "failed"
                },
                stage: Some(err.stage.to_string()),
                kind: Some(err.kind().as_str()),
                report: None,
            },
        }
    }
}

impl MatrixReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, MatrixOutcome::Succeeded(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, MatrixOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, MatrixOutcome::Skipped(_)))
    }

    fn count(&self, pred: impl Fn(&MatrixOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    /// Failures, in request order.
    pub fn failures(&self) -> impl Iterator<Item = (&BuildContext, &PipelineError)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            MatrixOutcome::Failed(err) => Some((&e.context, err.as_ref())),
            _ => None,
        })
    }
}

/// Expand the configured (or overridden) targets, compilers and
/// configurations into one context per combination.
///
/// Duplicates, including compiler aliases of the same family, collapse into
/// the first occurrence so no two entries share a build directory.
pub fn expand_matrix(
    config: &Config,
    targets: &[String],
    compilers: &[String],
    configurations: &[BuildConfiguration],
    arch: &Arch,
) -> Vec<BuildContext> {
    let pick = |over: &[String], configured: &[String]| -> Vec<String> {
        if over.is_empty() {
            configured.to_vec()
        } else {
            over.to_vec()
        }
    };
    let targets = pick(targets, &config.project.targets);
    let compilers = pick(compilers, &config.project.compilers);
    let configurations = if configurations.is_empty() {
        config.project.configurations.clone()
    } else {
        configurations.to_vec()
    };

    let mut seen = HashSet::new();
    let mut contexts = Vec::new();
    for target in &targets {
        for compiler in &compilers {
            for &configuration in &configurations {
                let ctx = BuildContext::builder(target, compiler)
                    .pipeline("matrix")
                    .configuration(configuration)
                    .arch(arch.clone())
                    .shared(config.build.shared)
                    .static_runtime(config.build.static_runtime)
                    .build();
                let key = (ctx.target.clone(), ctx.compiler.clone(), ctx.configuration);
                if seen.insert(key) {
                    contexts.push(ctx);
                } else {
                    tracing::debug!("dropping duplicate matrix entry {}", ctx.label());
                }
            }
        }
    }
    contexts
}

/// Run a pipeline for every context on a dedicated thread pool.
///
/// Each context owns a disjoint build directory; only the pipeline's
/// detector and activation cache are shared. A failure in one entry does not
/// stop the others.
pub fn run_matrix(
    pipeline: &Pipeline<'_>,
    contexts: &[BuildContext],
    options: &MatrixOptions,
    progress: Option<&Progress>,
) -> Result<MatrixReport> {
    let jobs = options.jobs.unwrap_or(1).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("buildrig-matrix-{}", i))
        .build()
        .context("failed to start the matrix thread pool")?;

    tracing::info!("running {} pipelines with {} jobs", contexts.len(), jobs);

    let entries = pool.install(|| {
        contexts
            .par_iter()
            .map(|ctx| {
                let outcome = match pipeline.run(ctx) {
                    Ok(report) => MatrixOutcome::Succeeded(Box::new(report)),
                    Err(err)
                        if options.skip_missing_profiles
                            && err.kind() == ErrorKind::ProfileNotFound =>
                    {
                        tracing::warn!("skipping {}: {}", ctx.label(), err.cause);
                        MatrixOutcome::Skipped(Box::new(err))
                    }
                    Err(err) => MatrixOutcome::Failed(Box::new(err)),
                };

                if let Some(progress) = progress {
                    let (status, verb) = match &outcome {
                        MatrixOutcome::Succeeded(_) => (Status::Finished, "built"),
                        MatrixOutcome::Skipped(_) => (Status::Skipped, "skipped"),
                        MatrixOutcome::Failed(_) => (Status::Error, "failed"),
                    };
                    progress.println(status, format!("{} {}", ctx.label(), verb));
                    progress.inc(ctx.label());
                }

                MatrixEntry {
                    context: ctx.clone(),
                    outcome,
                }
            })
            .collect()
    });

    if let Some(progress) = progress {
        progress.finish();
    }

    Ok(MatrixReport { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::toolchain::{DetectOptions, Detector};
    use crate::core::platform::PlatformInfo;
    use crate::ops::pipeline::Stage;
    use crate::terminal::ActivationCache;
    use tempfile::TempDir;

    #[test]
    fn test_expand_matrix_uses_config_defaults() {
        let config = Config::parse(
            r#"
            [project]
            targets = ["app", "tool"]
            compilers = ["gcc", "clang"]
            configurations = ["debug", "release"]
            "#,
        )
        .unwrap();

        let all = expand_matrix(&config, &[], &[], &[], &Arch::X86_64);
        assert_eq!(all.len(), 8);
        assert_eq!(all[0].label(), "app/gcc/debug");
        assert_eq!(all[7].label(), "tool/clang/release");

        let narrowed = expand_matrix(
            &config,
            &["app".to_string()],
            &["msvc".to_string()],
            &[BuildConfiguration::Release],
            &Arch::X86_64,
        );
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].label(), "app/msvc/release");
        assert_eq!(narrowed[0].pipeline, "matrix");
    }

    #[test]
    fn test_expand_matrix_drops_duplicates() {
        let config = Config::default();

        let contexts = expand_matrix(
            &config,
            &["app".to_string(), "app".to_string()],
            &["gcc".to_string(), "g++".to_string(), "clang".to_string()],
            &[BuildConfiguration::Debug, BuildConfiguration::Debug],
            &Arch::X86_64,
        );

        let labels: Vec<String> = contexts.iter().map(BuildContext::label).collect();
        assert_eq!(labels, vec!["app/gcc/debug", "app/clang/debug"]);
    }

    #[test]
    fn test_failures_are_isolated_and_ordered() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let detector = Detector::with_platform(
            DetectOptions::default(),
            PlatformInfo::from_parts("linux", "x86_64"),
        );
        let cache = ActivationCache::new();
        let pipeline = Pipeline::new(tmp.path(), &config, &detector, &cache);

        let contexts: Vec<BuildContext> = ["watcom", "turbo-c", "lattice"]
            .iter()
            .map(|c| BuildContext::builder("app", *c).build())
            .collect();

        let report = run_matrix(
            &pipeline,
            &contexts,
            &MatrixOptions {
                jobs: Some(3),
                skip_missing_profiles: true,
            },
            None,
        )
        .unwrap();

        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.failed(), 3);
        assert_eq!(report.skipped(), 0);
        let order: Vec<&str> = report.entries.iter().map(|e| e.context.compiler.as_str()).collect();
        assert_eq!(order, vec!["watcom", "turbo-c", "lattice"]);
        for (_, err) in report.failures() {
            assert_eq!(err.stage, Stage::Prepare);
        }

        let summary = report.entries[0].summary();
        assert_eq!(summary.status, "failed");
        assert_eq!(summary.kind, Some("detection_failure"));
    }
}
