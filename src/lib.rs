#![deny(clippy::wildcard_imports)]
#![cfg_attr(test, allow(clippy::wildcard_imports))]

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod errors;
pub mod identity;
pub mod protocol;
pub mod services;
pub mod store;
pub mod sync;
pub mod telemetry;

#[cfg(test)]
pub mod test_support;

// Re-exports for the public API
pub use clock::{GameClock, SharedClock, SystemClock, TokioClock};
pub use config::GameTimings;
pub use error::EngineError;
pub use identity::{IdentityProvider, PlayerId, StaticIdentity};
pub use protocol::session::{EndReason, GameSession, SessionId, SessionStatus};
pub use services::{LiveSession, LobbyService};
pub use store::memory::MemoryStore;
pub use store::{SessionSignal, SessionStore};
pub use sync::{spawn_solo, spawn_versus, CoordinatorHandle, GameEvent, StateView};

// Auto-initialize logging for unit tests
#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    test_support::logging::init();
}
