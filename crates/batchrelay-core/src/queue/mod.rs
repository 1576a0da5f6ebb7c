//! Queue module: task status machine, task records, the ordered queue and
//! the retry policy shared by the transport layer.

mod memory;
mod record;
mod retry;
mod state;

pub use memory::TaskQueue;
pub use record::{Task, progress_percent};
pub use retry::RetryPolicy;
pub use state::TaskStatus;
