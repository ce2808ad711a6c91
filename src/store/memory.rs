//! In-memory reference store: per-document broadcast of full snapshots.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::EngineError;
use crate::errors::store::StoreError;
use crate::protocol::session::{GameSession, SessionId, SessionPatch, SessionStatus};
use crate::store::{SessionSignal, SessionStore, SnapshotReceiver, TxnMutator};

// Subscribers that fall this far behind skip ahead; safe because every
// signal carries the whole document.
const CHANNEL_CAPACITY: usize = 64;

struct Entry {
    doc: GameSession,
    tx: broadcast::Sender<SessionSignal>,
}

#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<SessionId, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    fn commit(entry: &mut Entry) -> GameSession {
        entry.doc.version += 1;
        let snapshot = entry.doc.clone();
        let _ = entry.tx.send(SessionSignal::Updated(snapshot.clone()));
        snapshot
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<GameSession>, EngineError> {
        Ok(self.sessions.get(id).map(|entry| entry.doc.clone()))
    }

    async fn put(&self, doc: GameSession) -> Result<GameSession, EngineError> {
        let id = doc.session_id.clone();
        let mut entry = self.sessions.entry(id).or_insert_with(|| {
            let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
            Entry {
                doc: doc.clone(),
                tx,
            }
        });
        // replacing a document never rewinds its version
        let prev_version = entry.doc.version.max(doc.version);
        entry.doc = doc;
        entry.doc.version = prev_version;
        Ok(Self::commit(&mut entry))
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> Result<GameSession, EngineError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply(&mut entry.doc);
        Ok(Self::commit(&mut entry))
    }

    async fn run_transaction(
        &self,
        id: &str,
        mutator: TxnMutator,
    ) -> Result<GameSession, EngineError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut working = entry.doc.clone();
        match mutator(&mut working) {
            Ok(()) => {
                entry.doc = working;
                Ok(Self::commit(&mut entry))
            }
            Err(err) => {
                debug!(session_id = id, error = %err, "transaction aborted");
                Err(err.into())
            }
        }
    }

    async fn subscribe(&self, id: &str) -> Result<SnapshotReceiver, EngineError> {
        let entry = self
            .sessions
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(entry.tx.subscribe())
    }

    async fn find_joinable(&self) -> Result<Option<GameSession>, EngineError> {
        Ok(self
            .sessions
            .iter()
            .find(|entry| {
                entry.doc.status == SessionStatus::Waiting
                    && !entry.doc.private
                    && !entry.doc.has_guest()
            })
            .map(|entry| entry.doc.clone()))
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        if let Some((_, entry)) = self.sessions.remove(id) {
            let _ = entry.tx.send(SessionSignal::Removed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::domain::generation::generate_board;
    use crate::errors::domain::{ConflictKind, DomainError};

    fn doc(id: &str, private: bool) -> GameSession {
        GameSession::new_waiting(id.into(), "host-uid".into(), generate_board(1), private, 0)
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_with_version() {
        let store = MemoryStore::new();
        let committed = store.put(doc("AAA111", false)).await.unwrap();
        assert_eq!(committed.version, 1);
        let loaded = store.get("AAA111").await.unwrap().unwrap();
        assert_eq!(loaded, committed);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn every_commit_pushes_the_full_document() {
        let store = MemoryStore::new();
        store.put(doc("AAA111", false)).await.unwrap();
        let mut rx = store.subscribe("AAA111").await.unwrap();

        let patch = SessionPatch {
            ready: Some((0, true)),
            ..SessionPatch::default()
        };
        let committed = store.update("AAA111", patch).await.unwrap();
        assert_eq!(committed.version, 2);

        match rx.recv().await.unwrap() {
            SessionSignal::Updated(snapshot) => {
                assert_eq!(snapshot, committed);
                assert!(snapshot.ready[0]);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn aborted_transaction_commits_and_notifies_nothing() {
        let store = MemoryStore::new();
        let before = store.put(doc("AAA111", false)).await.unwrap();
        let mut rx = store.subscribe("AAA111").await.unwrap();

        let result = store
            .run_transaction(
                "AAA111",
                Box::new(|doc| {
                    doc.game_started = true;
                    Err(DomainError::conflict(ConflictKind::AlreadyStarted, "taken"))
                }),
            )
            .await;
        assert!(result.is_err());

        let after = store.get("AAA111").await.unwrap().unwrap();
        assert_eq!(after, before);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn committed_transaction_applies_mutation() {
        let store = MemoryStore::new();
        store.put(doc("AAA111", false)).await.unwrap();
        let committed = store
            .run_transaction(
                "AAA111",
                Box::new(|doc| {
                    doc.game_started = true;
                    doc.turn_started_at_ms = 42;
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert!(committed.game_started);
        assert_eq!(committed.turn_started_at_ms, 42);
        assert_eq!(committed.version, 2);
    }

    #[tokio::test]
    async fn joinable_query_skips_private_and_full_sessions() {
        let store = MemoryStore::new();
        store.put(doc("PRIV01", true)).await.unwrap();
        let mut full = doc("FULL01", false);
        full.players[1] = Some("guest-uid".into());
        store.put(full).await.unwrap();
        assert!(store.find_joinable().await.unwrap().is_none());

        store.put(doc("OPEN01", false)).await.unwrap();
        let found = store.find_joinable().await.unwrap().unwrap();
        assert_eq!(found.session_id, "OPEN01");
    }

    #[tokio::test]
    async fn remove_signals_subscribers() {
        let store = MemoryStore::new();
        store.put(doc("AAA111", false)).await.unwrap();
        let mut rx = store.subscribe("AAA111").await.unwrap();
        store.remove("AAA111").await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), SessionSignal::Removed));
        assert!(store.get("AAA111").await.unwrap().is_none());
    }
}
