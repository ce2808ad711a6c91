//! The shared session document: the de facto wire schema both clients
//! read and write through the store.

use serde::{Deserialize, Serialize};

use crate::domain::board::{Board, Position, Selection};
use crate::domain::state::Seat;
use crate::identity::PlayerId;

pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    InProgress,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    HostWon,
    GuestWon,
    HostLeft,
    GuestLeft,
    Abandoned,
}

/// The whole game document. The store delivers it in full on every change;
/// nothing is ever merged field-by-field on the consumer side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub session_id: SessionId,
    /// Seat-indexed identities: [host, guest].
    pub players: [Option<PlayerId>; 2],
    pub status: SessionStatus,
    pub board: Board,
    /// Mirror of `board.empty_pos`, kept in lockstep by `set_board`.
    pub empty_pos: Position,
    pub scores: [u8; 2],
    pub ready: [bool; 2],
    pub want_start: [bool; 2],
    pub current_turn: Option<Seat>,
    #[serde(rename = "turnStartTimestamp")]
    pub turn_started_at_ms: u64,
    pub is_selecting_move: bool,
    pub selections: Vec<Selection>,
    pub end_reason: Option<EndReason>,
    pub game_started: bool,
    pub private: bool,
    /// Bumped by the store on every committed write; consumers drop
    /// snapshots that do not advance it.
    pub version: u64,
    pub created_at_ms: u64,
}

impl GameSession {
    pub fn new_waiting(
        session_id: SessionId,
        host: PlayerId,
        board: Board,
        private: bool,
        now_ms: u64,
    ) -> Self {
        let empty_pos = board.empty_pos;
        Self {
            session_id,
            players: [Some(host), None],
            status: SessionStatus::Waiting,
            board,
            empty_pos,
            scores: [0, 0],
            ready: [false, false],
            want_start: [false, false],
            current_turn: None,
            turn_started_at_ms: 0,
            is_selecting_move: false,
            selections: Vec::new(),
            end_reason: None,
            game_started: false,
            private,
            version: 0,
            created_at_ms: now_ms,
        }
    }

    pub fn seat_of(&self, player: &PlayerId) -> Option<Seat> {
        self.players
            .iter()
            .position(|p| p.as_ref() == Some(player))
            .map(|seat| seat as Seat)
    }

    pub fn has_guest(&self) -> bool {
        self.players[1].is_some()
    }

    pub fn both_ready(&self) -> bool {
        self.ready.iter().all(|&r| r)
    }

    pub fn both_want_start(&self) -> bool {
        self.want_start.iter().all(|&w| w)
    }

    /// Replace the board and keep the mirrored empty slot in lockstep.
    pub fn set_board(&mut self, board: Board) {
        self.empty_pos = board.empty_pos;
        self.board = board;
    }
}

/// Partial update applied atomically by the store.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub guest: Option<PlayerId>,
    pub ready: Option<(Seat, bool)>,
    pub want_start: Option<(Seat, bool)>,
    pub scores: Option<[u8; 2]>,
    pub board: Option<Board>,
    pub selections: Option<Vec<Selection>>,
    pub current_turn: Option<Option<Seat>>,
    pub turn_started_at_ms: Option<u64>,
    pub is_selecting_move: Option<bool>,
    pub game_started: Option<bool>,
    pub end_reason: Option<Option<EndReason>>,
}

impl SessionPatch {
    pub fn apply(self, doc: &mut GameSession) {
        if let Some(status) = self.status {
            doc.status = status;
        }
        if let Some(guest) = self.guest {
            doc.players[1] = Some(guest);
        }
        if let Some((seat, flag)) = self.ready {
            doc.ready[seat as usize] = flag;
        }
        if let Some((seat, flag)) = self.want_start {
            doc.want_start[seat as usize] = flag;
        }
        if let Some(scores) = self.scores {
            doc.scores = scores;
        }
        if let Some(board) = self.board {
            doc.set_board(board);
        }
        if let Some(selections) = self.selections {
            doc.selections = selections;
        }
        if let Some(turn) = self.current_turn {
            doc.current_turn = turn;
        }
        if let Some(ts) = self.turn_started_at_ms {
            doc.turn_started_at_ms = ts;
        }
        if let Some(flag) = self.is_selecting_move {
            doc.is_selecting_move = flag;
        }
        if let Some(flag) = self.game_started {
            doc.game_started = flag;
        }
        if let Some(reason) = self.end_reason {
            doc.end_reason = reason;
        }
    }
}

/// The fields the reconciliation loop compares between snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub version: u64,
    pub status: SessionStatus,
    pub current_turn: Option<Seat>,
    pub is_selecting_move: bool,
    pub turn_started_at_ms: u64,
    pub game_started: bool,
    pub both_ready: bool,
    pub both_want_start: bool,
    pub guest_present: bool,
    pub end_reason: Option<EndReason>,
}

impl From<&GameSession> for SessionView {
    fn from(doc: &GameSession) -> Self {
        Self {
            version: doc.version,
            status: doc.status,
            current_turn: doc.current_turn,
            is_selecting_move: doc.is_selecting_move,
            turn_started_at_ms: doc.turn_started_at_ms,
            game_started: doc.game_started,
            both_ready: doc.both_ready(),
            both_want_start: doc.both_want_start(),
            guest_present: doc.has_guest(),
            end_reason: doc.end_reason.clone(),
        }
    }
}
