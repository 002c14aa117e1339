//! End-to-end pipeline tests against fake `gcc`, `conan` and `cmake`
//! scripts. The fakes append each call to `tools/calls.log` so stage order
//! can be checked.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use pretty_assertions::assert_eq;
use predicates::prelude::*;
use tempfile::TempDir;

use buildrig::builder::toolchain::{DetectOptions, Detector};
use buildrig::core::errors::{InstallFailureKind, StepFailureKind};
use buildrig::core::{BuildConfiguration, BuildContext, Error, ErrorKind, PipelineError};
use buildrig::ops::{Pipeline, PipelineOptions, PipelineReport, PipelineState, Stage};
use buildrig::terminal::ActivationCache;
use buildrig::util::process::CancellationToken;
use buildrig::util::Config;

const FAKE_GCC: &str = "#!/bin/sh\necho 'gcc (GCC) 13.2.0'\n";

const CONAN_OK: &str = r#"#!/bin/sh
echo "conan $1" >> "$(dirname "$0")/calls.log"
mkdir -p "$4"
touch "$4/conan_toolchain.cmake"
"#;

const CONAN_NO_FILES: &str = r#"#!/bin/sh
echo "conan $1" >> "$(dirname "$0")/calls.log"
echo "Install finished successfully"
"#;

const CONAN_RANGE: &str = r#"#!/bin/sh
echo "conan $1" >> "$(dirname "$0")/calls.log"
echo "ERROR: Version range '~1.3' from requirement 'pkgA/[~1.3]' required by 'conanfile.txt' could not be resolved" >&2
echo "Available versions: 1.2.9, 1.4.0" >&2
exit 1
"#;

const CMAKE_OK: &str = r#"#!/bin/sh
log="$(dirname "$0")/calls.log"
case "$1" in
  -S) echo "cmake configure" >> "$log"; touch "$4/CMakeCache.txt" ;;
  --build) echo "cmake build $4" >> "$log"; mkdir -p "$2/bin"; : > "$2/bin/$4" ;;
  --install) echo "cmake install $4" >> "$log"; mkdir -p "$6/bin"; cp "$2"/bin/* "$6/bin/" ;;
esac
exit 0
"#;

const CMAKE_SLOW_BUILD: &str = r#"#!/bin/sh
log="$(dirname "$0")/calls.log"
case "$1" in
  -S) echo "cmake configure" >> "$log"; touch "$4/CMakeCache.txt" ;;
  --build) echo "cmake build $4" >> "$log"; exec sleep 30 ;;
esac
exit 0
"#;

const CMAKE_NO_CACHE: &str = r#"#!/bin/sh
echo "cmake $1" >> "$(dirname "$0")/calls.log"
exit 0
"#;

/// A project wired to fake tools, with gcc profiles for both configurations.
struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(conan: &str, cmake: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let tools = root.join("tools");
        fs::create_dir(&tools).unwrap();

        for (name, body) in [("gcc", FAKE_GCC), ("conan", conan), ("cmake", cmake)] {
            let path = tools.join(name);
            fs::write(&path, body).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let config = format!(
            r#"
[project]
targets = ["app"]
compilers = ["gcc"]
configurations = ["debug", "release"]

[tools]
conan = "{tools}/conan"
cmake = "{tools}/cmake"

[compilers.gcc]
path = "{tools}/gcc"
"#,
            tools = tools.display()
        );
        fs::write(root.join("buildrig.toml"), config).unwrap();
        fs::write(root.join("conanfile.txt"), "[requires]\npkgA/[~1.3]\n").unwrap();

        let profiles = root.join("profiles");
        fs::create_dir(&profiles).unwrap();
        for cfg in ["debug", "release"] {
            fs::write(
                profiles.join(format!("gcc-{}", cfg)),
                "[settings]\nos=Linux\ncompiler=gcc\n",
            )
            .unwrap();
        }

        Fixture { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> Config {
        Config::parse(&fs::read_to_string(self.root().join("buildrig.toml")).unwrap()).unwrap()
    }

    fn build_dir(&self, cfg: &str) -> PathBuf {
        self.root().join("build").join(cfg).join("gcc").join("app")
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.root().join("tools/calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn run(&self, configuration: BuildConfiguration) -> Result<PipelineReport, PipelineError> {
        self.run_with(configuration, PipelineOptions::default())
    }

    fn run_with(
        &self,
        configuration: BuildConfiguration,
        options: PipelineOptions,
    ) -> Result<PipelineReport, PipelineError> {
        let config = self.config();
        let detector = Detector::new(DetectOptions::from_config(&config));
        let activation = ActivationCache::new();
        let pipeline = Pipeline::new(self.root(), &config, &detector, &activation).options(options);

        let ctx = BuildContext::builder("app", "gcc")
            .configuration(configuration)
            .build();
        pipeline.run(&ctx)
    }

    fn cli(&self) -> Command {
        let mut cmd = Command::cargo_bin("buildrig").unwrap();
        cmd.current_dir(self.root()).env("HOME", self.root());
        cmd
    }
}

#[test]
fn test_stages_run_in_order() {
    let fx = Fixture::new(CONAN_OK, CMAKE_OK);

    let report = fx.run(BuildConfiguration::Release).unwrap();

    assert_eq!(
        report.history,
        vec![
            PipelineState::Created,
            PipelineState::CleanedDirs,
            PipelineState::DependenciesInstalled,
            PipelineState::Configured,
            PipelineState::Built,
            PipelineState::Validated,
            PipelineState::Done,
        ]
    );
    assert_eq!(
        fx.calls(),
        vec!["conan install", "cmake configure", "cmake build app"]
    );
    assert_eq!(report.build_dir, fx.build_dir("release"));
    assert_eq!(report.artifacts.len(), 1);
    assert_eq!(report.compiler.version, "13.2.0");
}

#[test]
fn test_rerun_starts_from_a_clean_directory() {
    let fx = Fixture::new(CONAN_OK, CMAKE_OK);
    let stale = fx.build_dir("debug").join("stale.o");
    fs::create_dir_all(fx.build_dir("debug")).unwrap();
    fs::write(&stale, "").unwrap();

    fx.run(BuildConfiguration::Debug).unwrap();

    assert!(!stale.exists());
    assert!(fx.build_dir("debug").join("CMakeCache.txt").exists());
}

#[test]
fn test_successful_exit_without_generated_files() {
    let fx = Fixture::new(CONAN_NO_FILES, CMAKE_OK);

    let err = fx.run(BuildConfiguration::Debug).unwrap_err();

    assert_eq!(err.stage, Stage::InstallDependencies);
    assert_eq!(err.kind(), ErrorKind::InstallValidation);
    assert_eq!(fx.calls(), vec!["conan install"]);
}

#[test]
fn test_missing_profile_creates_no_build_dir() {
    let fx = Fixture::new(CONAN_OK, CMAKE_OK);
    fs::remove_file(fx.root().join("profiles/gcc-release")).unwrap();

    let err = fx.run(BuildConfiguration::Release).unwrap_err();

    assert_eq!(err.stage, Stage::InstallDependencies);
    assert_eq!(err.kind(), ErrorKind::ProfileNotFound);
    assert!(!fx.build_dir("release").exists());
    assert!(fx.calls().is_empty());
}

#[test]
fn test_unsatisfiable_range() {
    let fx = Fixture::new(CONAN_RANGE, CMAKE_OK);

    let err = fx.run(BuildConfiguration::Debug).unwrap_err();

    match &err.cause {
        Error::DependencyInstall {
            kind,
            message,
            output,
        } => {
            assert_eq!(*kind, InstallFailureKind::RangeUnsatisfiable);
            assert_eq!(output.status, Some(1));
            assert!(message.contains("pkgA/[~1.3]"), "{message}");
            assert!(message.contains("1.2.9, 1.4.0"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::DependencyInstall);
}

#[test]
fn test_configure_without_cache_is_validation_failure() {
    let fx = Fixture::new(CONAN_OK, CMAKE_NO_CACHE);

    let err = fx.run(BuildConfiguration::Debug).unwrap_err();

    assert_eq!(err.stage, Stage::Configure);
    match &err.cause {
        Error::Configure { kind, .. } => assert_eq!(*kind, StepFailureKind::ValidationFailed),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_cancel_while_build_is_running() {
    let fx = Fixture::new(CONAN_OK, CMAKE_SLOW_BUILD);
    let token = CancellationToken::new();
    let trigger = token.clone();
    let log = fx.root().join("tools/calls.log");

    let canceller = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(20);
        while Instant::now() < deadline {
            let started = fs::read_to_string(&log)
                .map(|calls| calls.contains("cmake build"))
                .unwrap_or(false);
            if started {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let start = Instant::now();
    let err = fx
        .run_with(
            BuildConfiguration::Debug,
            PipelineOptions {
                cancel: Some(token),
                ..Default::default()
            },
        )
        .unwrap_err();
    canceller.join().unwrap();

    assert_eq!(err.stage, Stage::Build);
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(25));
    assert_eq!(
        fx.calls(),
        vec!["conan install", "cmake configure", "cmake build app"]
    );
}

// ============================================================================
// through the CLI
// ============================================================================

#[test]
fn test_cli_run_succeeds() {
    let fx = Fixture::new(CONAN_OK, CMAKE_OK);

    fx.cli()
        .args(["run", "app", "--config", "release"])
        .assert()
        .success();

    assert!(fx.build_dir("release").join("bin/app").exists());
}

#[test]
fn test_cli_deploy_installs_into_prefix() {
    let fx = Fixture::new(CONAN_OK, CMAKE_OK);

    fx.cli()
        .args(["run", "app", "--config", "release"])
        .assert()
        .success();
    fx.cli()
        .args(["deploy", "app", "--config", "release", "--prefix", "dist/app"])
        .assert()
        .success();

    assert!(fx.root().join("dist/app/bin/app").exists());
    assert_eq!(fx.calls().last().map(String::as_str), Some("cmake install Release"));
}

#[test]
fn test_cli_exit_codes() {
    let fx = Fixture::new(CONAN_RANGE, CMAKE_OK);

    fx.cli()
        .args(["run", "app"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("range_unsatisfiable"));

    fs::remove_file(fx.root().join("profiles/gcc-release")).unwrap();
    fx.cli()
        .args(["run", "app", "--config", "release"])
        .assert()
        .code(3);
}

#[test]
fn test_cli_matrix_skips_missing_profiles() {
    let fx = Fixture::new(CONAN_OK, CMAKE_OK);
    fs::remove_file(fx.root().join("profiles/gcc-release")).unwrap();

    fx.cli().args(["matrix"]).assert().code(3);

    fx.cli()
        .args(["matrix", "--skip-missing-profiles", "--jobs", "2"])
        .assert()
        .success();

    assert!(fx.build_dir("debug").join("bin/app").exists());
    assert!(!fx.build_dir("release").exists());
}
