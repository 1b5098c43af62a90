//! Utility modules for cross-cutting concerns

pub mod clock;
pub mod error;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock, start_of_day};
pub use error::{NexError, Result};
