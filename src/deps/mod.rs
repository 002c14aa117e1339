//! Conan dependency-manager integration.

pub mod conan;
pub mod manifest;
pub mod profile;

pub use conan::{classify_install_failure, install, locate_generated, InstallRequest};
pub use manifest::{DependencyManifest, Requirement, VersionRange, VersionSpec};
pub use profile::{list_profiles, resolve_profile, validate_profile_exists, ProfileDefinition, ProfileId};
