//! Core types shared by every component.

pub mod compiler;
pub mod context;
pub mod errors;
pub mod layout;
pub mod platform;

pub use compiler::{CompilerFamily, CompilerInfo, LanguageStandard};
pub use context::{canonical_compiler, BuildConfiguration, BuildContext};
pub use errors::{Error, ErrorKind, PipelineError};
pub use platform::{detect_platform, Arch, OsFamily, PlatformInfo};
