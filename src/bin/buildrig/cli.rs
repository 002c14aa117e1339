//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use buildrig::core::BuildConfiguration;
use buildrig::util::shell::ColorChoice;

/// buildrig - clean builds of CMake + Conan projects across compilers
#[derive(Parser)]
#[command(name = "buildrig")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// When to use colors
    #[arg(long, global = true, value_enum, default_value = "auto")]
    pub color: ColorChoice,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full clean-build pipeline for one target
    Run(RunArgs),

    /// Run the pipeline for every target/compiler/configuration combination
    Matrix(MatrixArgs),

    /// Remove build directories
    Clean(CleanArgs),

    /// Install dependencies with Conan into an existing build directory
    Install(StageArgs),

    /// Configure an existing build directory with CMake
    Configure(StageArgs),

    /// Build a target in an existing build directory
    Build(StageArgs),

    /// Run the test suite of a built target
    Test(StageArgs),

    /// Package a built target with CPack
    Package(PackageArgs),

    /// Install a built target's files into a prefix with `cmake --install`
    Deploy(DeployArgs),

    /// Detect compilers available on this machine
    Detect(DetectArgs),

    /// Inspect Conan profiles
    Profile(ProfileArgs),

    /// Check the environment for problems
    Doctor,
}

/// Identifies one pipeline.
#[derive(Args, Debug, Clone)]
pub struct ContextArgs {
    /// CMake target to build
    pub target: String,

    /// Compiler to use (msvc, clang-cl, mingw, gcc, clang, apple-clang)
    #[arg(short, long)]
    pub compiler: Option<String>,

    /// Build configuration
    #[arg(long = "config", default_value = "debug")]
    pub configuration: BuildConfiguration,

    /// Target architecture (defaults to the host's)
    #[arg(long)]
    pub arch: Option<String>,

    /// Build shared libraries
    #[arg(long)]
    pub shared: bool,

    /// Link the C/C++ runtime statically
    #[arg(long)]
    pub static_runtime: bool,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Run the test suite after building
    #[arg(long, conflicts_with = "no_tests")]
    pub tests: bool,

    /// Skip the test suite even if enabled in buildrig.toml
    #[arg(long)]
    pub no_tests: bool,
}

#[derive(Args)]
pub struct MatrixArgs {
    /// Targets to build (defaults to [project] targets)
    #[arg(long = "target")]
    pub targets: Vec<String>,

    /// Compilers to use (defaults to [project] compilers)
    #[arg(short, long = "compiler")]
    pub compilers: Vec<String>,

    /// Configurations to build (defaults to [project] configurations)
    #[arg(long = "config")]
    pub configurations: Vec<BuildConfiguration>,

    /// Target architecture (defaults to the host's)
    #[arg(long)]
    pub arch: Option<String>,

    /// Number of pipelines to run at once
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Report tuples without a profile as skipped instead of failed
    #[arg(long)]
    pub skip_missing_profiles: bool,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Target whose build directory to remove
    pub target: Option<String>,

    /// Compiler of the build directory to remove
    #[arg(short, long, requires = "target")]
    pub compiler: Option<String>,

    /// Only remove directories of this configuration
    #[arg(long = "config")]
    pub configuration: Option<BuildConfiguration>,

    /// Remove the whole build tree
    #[arg(long, conflicts_with_all = ["target", "configuration"])]
    pub all: bool,
}

#[derive(Args)]
pub struct StageArgs {
    #[command(flatten)]
    pub context: ContextArgs,
}

#[derive(Args)]
pub struct PackageArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// CPack generator (e.g. ZIP, TGZ, NSIS)
    #[arg(short = 'G', long)]
    pub generator: Option<String>,

    /// Directory to write packages to
    #[arg(short, long, default_value = "dist")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Installation prefix, relative to the project root
    #[arg(short, long)]
    pub prefix: Option<PathBuf>,
}

#[derive(Args)]
pub struct DetectArgs {
    /// Only detect this compiler
    pub compiler: Option<String>,

    /// Probe every compiler family for this platform
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub command: ProfileCommands,
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// List profiles in the profiles directory
    List,

    /// Show the profile used for a compiler and configuration
    Show {
        /// Compiler identifier
        compiler: String,

        /// Build configuration
        #[arg(long = "config", default_value = "debug")]
        configuration: BuildConfiguration,

        /// Check the profile's language standards against the detected compiler
        #[arg(long)]
        check: bool,
    },
}
