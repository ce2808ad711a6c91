//! Session lifecycle: create, join-by-code, quick-join, exit.
//!
//! Every operation resolves the caller identity before touching the store.
//! Join preconditions are validated inside the store transaction so two
//! racing guests cannot both take the seat.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};

use crate::clock::{GameClock, SharedClock};
use crate::config::GameTimings;
use crate::domain::generation::generate_board;
use crate::domain::state::Seat;
use crate::error::EngineError;
use crate::errors::domain::{ConflictKind, DomainError, ValidationKind};
use crate::identity::IdentityProvider;
use crate::protocol::session::{GameSession, SessionId, SessionStatus};
use crate::store::SessionStore;
use crate::sync::coordinator::{spawn_versus, CoordinatorHandle};
use crate::sync::events::EventReceiver;

pub const JOIN_CODE_LEN: usize = 6;
// No 0/O/1/I: codes are read aloud between players.
pub const JOIN_CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const MINT_ATTEMPTS: usize = 8;

/// Uppercase, validate length and alphabet. Runs before any store call.
pub fn normalize_join_code(raw: &str) -> Result<SessionId, DomainError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != JOIN_CODE_LEN {
        return Err(DomainError::validation(
            ValidationKind::InvalidJoinCode,
            format!("join code must be {JOIN_CODE_LEN} characters"),
        ));
    }
    for (idx, ch) in code.chars().enumerate() {
        if !JOIN_CODE_ALPHABET.contains(ch) {
            return Err(DomainError::validation(
                ValidationKind::InvalidJoinCode,
                format!("invalid character '{ch}' at position {idx}"),
            ));
        }
    }
    Ok(code)
}

fn mint_join_code() -> SessionId {
    let mut rng = rand::rng();
    let alphabet = JOIN_CODE_ALPHABET.as_bytes();
    (0..JOIN_CODE_LEN)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

/// A session this client is attached to. Dropping the handle tears the
/// local tasks down; `handle.leave()` records the departure first.
#[derive(Debug)]
pub struct LiveSession {
    pub session_id: SessionId,
    pub my_seat: Seat,
    pub handle: CoordinatorHandle,
    pub events: EventReceiver,
}

pub struct LobbyService {
    store: Arc<dyn SessionStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: SharedClock,
    timings: GameTimings,
}

impl LobbyService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        identity: Arc<dyn IdentityProvider>,
        clock: SharedClock,
        timings: GameTimings,
    ) -> Self {
        Self {
            store,
            identity,
            clock,
            timings,
        }
    }

    fn require_identity(&self) -> Result<String, EngineError> {
        self.identity
            .current_identity()
            .ok_or_else(|| DomainError::unauthorized("no identity for lobby operation").into())
    }

    /// Host a new session: fresh hidden board, waiting for a guest.
    pub async fn create(&self, private: bool) -> Result<LiveSession, EngineError> {
        let me = self.require_identity()?;
        let mut code = mint_join_code();
        for attempt in 0..MINT_ATTEMPTS {
            if self.store.get(&code).await?.is_none() {
                break;
            }
            debug!(attempt, "join code collision, reminting");
            code = mint_join_code();
        }
        let board = generate_board(rand::random());
        let doc = GameSession::new_waiting(
            code.clone(),
            me,
            board,
            private,
            self.clock.now_ms(),
        );
        let committed = self.store.put(doc).await?;
        let subscription = self.store.subscribe(&code).await?;
        let latest = self.store.get(&code).await?.unwrap_or(committed);
        info!(session_id = %code, "session created");
        let (handle, events) = spawn_versus(
            self.store.clone(),
            latest,
            0,
            subscription,
            self.clock.clone(),
            self.timings,
        );
        Ok(LiveSession {
            session_id: code,
            my_seat: 0,
            handle,
            events,
        })
    }

    /// Join a waiting session by its code. Fails if the document is gone,
    /// already full, already running, or our own.
    pub async fn join(&self, raw_code: &str) -> Result<LiveSession, EngineError> {
        let me = self.require_identity()?;
        let code = normalize_join_code(raw_code)?;
        let guest = me.clone();
        let committed = self
            .store
            .run_transaction(
                &code,
                Box::new(move |doc| {
                    if doc.status != SessionStatus::Waiting {
                        return Err(DomainError::validation(
                            ValidationKind::Other("NOT_JOINABLE".into()),
                            "session is no longer waiting for players",
                        ));
                    }
                    if doc.has_guest() {
                        return Err(DomainError::conflict(
                            ConflictKind::SeatTaken,
                            "another player joined first",
                        ));
                    }
                    if doc.players[0].as_ref() == Some(&guest) {
                        return Err(DomainError::conflict(
                            ConflictKind::SelfJoin,
                            "cannot join your own session",
                        ));
                    }
                    doc.players[1] = Some(guest);
                    doc.status = SessionStatus::InProgress;
                    Ok(())
                }),
            )
            .await?;
        let subscription = self.store.subscribe(&code).await?;
        let latest = self.store.get(&code).await?.unwrap_or(committed);
        info!(session_id = %code, "joined session");
        let (handle, events) = spawn_versus(
            self.store.clone(),
            latest,
            1,
            subscription,
            self.clock.clone(),
            self.timings,
        );
        Ok(LiveSession {
            session_id: code,
            my_seat: 1,
            handle,
            events,
        })
    }

    /// Take any waiting public session, or host a fresh one.
    pub async fn quick_join(&self) -> Result<LiveSession, EngineError> {
        self.require_identity()?;
        if let Some(doc) = self.store.find_joinable().await? {
            match self.join(&doc.session_id).await {
                Ok(session) => return Ok(session),
                // someone else got the seat between query and join
                Err(EngineError::Domain(err)) => {
                    debug!(session_id = %doc.session_id, error = %err, "quick-join raced, hosting instead");
                }
                Err(err) => return Err(err),
            }
        }
        self.create(false).await
    }
}
