//! Client-side quiz progress persistence.
//!
//! A page's answers are captured into two records per session (a compact
//! companion snapshot and the launcher's main list), restored when the
//! inputs render again, and swept on demand.

mod capture;
mod clearing;
mod controller;
mod host;
mod memory_page;
mod resolver;
mod restore;
mod snapshot_store;
mod state;

pub use capture::{CaptureEngine, CaptureOutcome};
pub use clearing::SnapshotClearing;
pub use controller::PersistenceController;
pub use host::{AnswerInput, AnswerSurface, PageEvent, QuizQuestion, QuizRuntime, is_answer_input};
pub use memory_page::MemoryPage;
pub use resolver::{Resolution, SessionResolver};
pub use restore::{RestoreEngine, RestoreOutcome, RestoreReport, RestoreSource, RestoreTask};
pub use snapshot_store::SnapshotStore;
pub use state::{PersistState, RestorePhase};
