//! Synchronization layer: the per-client coordinator task, snapshot
//! reconciliation, and derived countdown timers.

pub mod coordinator;
pub mod events;
pub mod reconcile;
pub mod timer;

#[cfg(test)]
mod tests_scenarios;

pub use coordinator::{spawn_solo, spawn_versus, Command, CoordinatorHandle, StateView};
pub use events::{EventReceiver, EventSender, GameEvent};
pub use reconcile::{derive_transitions, SyncTransition};
pub use timer::{remaining_ms, CountdownTimer, TimerRole, TimerSpec, TimerState};
