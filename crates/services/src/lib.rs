#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod persist;

pub use quiz_core::Clock;

pub use app_services::AppServices;
pub use error::{AppServicesError, SnapshotError};
pub use persist::{
    CaptureOutcome, MemoryPage, PageEvent, PersistenceController, RestoreOutcome, RestoreReport,
    RestoreTask, SnapshotStore,
};
