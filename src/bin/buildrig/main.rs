//! buildrig CLI - clean-build pipelines for CMake + Conan projects

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use buildrig::util::process::CancellationToken;
use buildrig::util::Shell;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("buildrig=debug")
    } else if cli.quiet {
        EnvFilter::new("buildrig=error")
    } else {
        EnvFilter::new("buildrig=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let shell = Arc::new(Shell::from_flags(cli.quiet, cli.verbose, cli.color, cli.json));

    let cancel = CancellationToken::new();
    commands::cancel_on_ctrl_c(cancel.clone());

    let code = match run(cli.command, &shell, cancel) {
        Ok(()) => 0,
        Err(e) => {
            commands::report_error(&shell, &e);
            commands::exit_code(&e)
        }
    };

    std::process::exit(code);
}

fn run(command: Commands, shell: &Arc<Shell>, cancel: CancellationToken) -> Result<()> {
    match command {
        Commands::Run(args) => commands::run::execute(args, &commands::Session::load(shell, cancel)?),
        Commands::Matrix(args) => {
            commands::matrix::execute(args, &commands::Session::load(shell, cancel)?)
        }
        Commands::Clean(args) => commands::clean::execute(args, shell),
        Commands::Install(args) => {
            commands::stage::install(args, &commands::Session::load(shell, cancel)?)
        }
        Commands::Configure(args) => {
            commands::stage::configure(args, &commands::Session::load(shell, cancel)?)
        }
        Commands::Build(args) => {
            commands::stage::build(args, &commands::Session::load(shell, cancel)?)
        }
        Commands::Test(args) => commands::stage::test(args, &commands::Session::load(shell, cancel)?),
        Commands::Package(args) => {
            commands::stage::package(args, &commands::Session::load(shell, cancel)?)
        }
        Commands::Deploy(args) => {
            commands::stage::deploy(args, &commands::Session::load(shell, cancel)?)
        }
        Commands::Detect(args) => commands::detect::execute(args, shell),
        Commands::Profile(args) => commands::profile::execute(args, shell),
        Commands::Doctor => commands::doctor::execute(shell),
    }
}
