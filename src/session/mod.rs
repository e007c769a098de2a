pub mod controller;
pub mod status;

pub use controller::{SessionController, SessionError};
pub use status::{ErrorKind, SessionEvent, SessionPhase, SessionStatus, SessionStatusHandle};
