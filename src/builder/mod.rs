//! Toolchain detection and the CMake build tool.

pub mod cmake;
pub mod toolchain;

pub use cmake::{find_artifacts, Artifact, ArtifactKind, CMakeBuilder, CMakeTools, ConfigureOptions};
pub use toolchain::{CommandSpec, DetectOptions, Detector};
