//! Version Manager (`spec.md` §4.6): keeps remote workers aligned with the
//! local codebase version, distributes signed updates, and rolls a worker
//! back to its pre-update state if any step of an update fails.

pub mod backup;
pub mod error;
pub mod manager;
pub mod package;

pub use backup::BackupStore;
pub use error::{Result, VersionError};
pub use manager::{UpdateMaterial, VersionManager};
pub use package::build_package;
