pub mod locks;
pub mod manager;
pub mod sweeper;
pub mod types;

pub use locks::SessionLocks;
pub use manager::SessionManager;
pub use sweeper::{SWEEP_INTERVAL_SECS, start_sweeper_task};
pub use types::{
    CloseReason, Role, SESSION_TIMEOUT_MINUTES, SessionError, SessionHandle, SessionRecord,
    TurnRecord,
};
