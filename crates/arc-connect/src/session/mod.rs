//! Session lifecycle: state machine and the registry of live sessions.

pub mod registry;
pub mod state;

pub use registry::{SessionGuard, SessionInfo, SessionRegistry};
pub use state::SessionState;
