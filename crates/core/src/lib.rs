pub mod breathing;
pub mod config;
pub mod dates;
pub mod error;
pub mod habits;
pub mod hydration;
pub mod ids;
pub mod kinds;
pub mod projection;
pub mod series;
pub mod sleep;

pub use config::{HabitTemplate, SyncConfig};
pub use error::CoreError;
pub use ids::*;
pub use kinds::{RemoteTable, SeriesKind};
pub use projection::Projection;
pub use series::DayRecord;
