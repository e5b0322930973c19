pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::{RemoteError, StorageError};
pub use sqlite::SqliteLocalStore;
pub use traits::*;
pub use wellsync_core::RemoteTable;
