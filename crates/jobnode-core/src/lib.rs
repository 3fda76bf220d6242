//! jobnode Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The cluster executor API
//! - HTTP or any other transport
//! - Runtime specifics
//!
//! Everything here describes a Run as the node sees it: the request that
//! starts it, the storage it needs, and the result it ends with.

pub mod dataset;
mod encoding;
pub mod error;
pub mod ids;
pub mod request;
pub mod result;
pub mod status;
pub mod volume;

// Re-export commonly used types
pub use dataset::{validate_label, DatasetCatalog, DatasetEntry, DatasetKind};
pub use error::CoreError;
pub use ids::{RunId, TaskId};
pub use request::{RunRequest, RunToken, TaskArgs};
pub use result::RunResult;
pub use status::TaskStatus;
pub use volume::{
    InputMount, Mount, RunLayout, VolumeMountPlan, VolumePlanner, INPUT_FILE_MOUNT_PATH,
    INPUT_MOUNT_ROOT, OUTPUT_MOUNT_PATH, TMP_MOUNT_PATH, TOKEN_MOUNT_PATH,
};
