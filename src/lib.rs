//! buildrig - clean-build pipelines for multi-compiler CMake + Conan projects
//!
//! This crate provides the orchestration core: compiler detection, the
//! terminal environments tools run in, Conan and CMake driving, and the
//! pipeline that sequences them.

pub mod builder;
pub mod core;
pub mod deps;
pub mod ops;
pub mod terminal;
pub mod util;

pub use core::{
    compiler::CompilerInfo, context::BuildConfiguration, context::BuildContext, errors::Error,
    errors::PipelineError, platform::PlatformInfo,
};

pub use ops::pipeline::Pipeline;
pub use terminal::TerminalEnvironment;
pub use util::context::GlobalContext;
