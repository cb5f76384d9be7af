pub mod context;
pub mod error;

pub use context::{keep_command_error, AppContext};
pub use error::{PocketSyncError, Result};
