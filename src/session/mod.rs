//! Session lifecycle: the state machine, its tick-loop task, and the
//! registry of live sessions.

pub mod registry;
pub mod runner;
#[allow(clippy::module_inception)]
pub mod session;

pub use registry::{RegistryError, SessionFilter, SessionRegistry};
pub use runner::{RunnerDeps, SessionEvent, SessionHandle};
pub use session::{Session, SessionError, SessionInfo, SessionOptions, SessionState};
