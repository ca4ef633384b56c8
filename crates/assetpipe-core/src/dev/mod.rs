//! Development mode: a long-lived session that rebuilds on change.

pub mod client;
pub mod session;
pub mod watch;

pub use session::{DevEvent, DevPhase, DevSession, DevStatus, ErrorPayload, RebuildOutcome};
pub use watch::{spawn_watcher, WatchFilter, WatchHandle};
