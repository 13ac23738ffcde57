mod ids;
pub mod namespace;
mod params;
mod settings;
mod snapshot;

pub use ids::{ParseIdError, QuestionId, SessionKey};
pub use namespace::{Namespace, SnapshotLocation};
pub use params::{ParamsError, QuizMode, QuizParams};
pub use settings::{PersistSettings, PersistSettingsDraft, SettingsError};
pub use snapshot::{CompanionItem, CompanionSnapshot, MainList, MainListEntry};
