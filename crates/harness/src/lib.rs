pub mod device;
pub mod remote;

pub use device::{TestDevice, days_ago};
pub use remote::{CallLog, MemoryRemote};
