//! Shared document store contract.
//!
//! The "server" is a passive store: clients write the session document and
//! every subscriber (the writer included) receives the whole current
//! document after each committed change. Nothing here validates game rules;
//! the design trusts clients.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::EngineError;
use crate::errors::domain::DomainError;
use crate::protocol::session::{GameSession, SessionPatch};

/// What a subscriber receives on each change.
#[derive(Debug, Clone)]
pub enum SessionSignal {
    /// The full current document after a committed write.
    Updated(GameSession),
    /// The document was deleted; the session is over.
    Removed,
}

pub type SnapshotReceiver = broadcast::Receiver<SessionSignal>;

/// Read-modify-write body. Returning an error aborts the transaction
/// without committing or notifying anyone.
pub type TxnMutator = Box<dyn FnOnce(&mut GameSession) -> Result<(), DomainError> + Send>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<GameSession>, EngineError>;

    /// Create or replace a document. Returns the committed copy (version 1
    /// for a fresh document).
    async fn put(&self, doc: GameSession) -> Result<GameSession, EngineError>;

    /// Apply a partial update atomically. Returns the committed document.
    async fn update(&self, id: &str, patch: SessionPatch) -> Result<GameSession, EngineError>;

    /// Atomic read-modify-write. The mutator sees the current document and
    /// may abort with a domain error.
    async fn run_transaction(
        &self,
        id: &str,
        mutator: TxnMutator,
    ) -> Result<GameSession, EngineError>;

    /// Long-lived subscription delivering the full document on every change.
    async fn subscribe(&self, id: &str) -> Result<SnapshotReceiver, EngineError>;

    /// Equality-filtered query: any waiting, public session without a guest.
    async fn find_joinable(&self) -> Result<Option<GameSession>, EngineError>;

    /// Delete the document and signal subscribers.
    async fn remove(&self, id: &str) -> Result<(), EngineError>;
}
