use crate::domain::board::{Board, Selection};
use crate::domain::matching::starting_chances;
use crate::errors::domain::{DomainError, ValidationKind};
use crate::protocol::session::{EndReason, GameSession, SessionStatus};

pub type Seat = u8; // 0 = host, 1 = guest

/// The opposing seat (0 <-> 1).
#[inline]
pub fn other_seat(seat: Seat) -> Seat {
    1 - (seat & 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    Solo,
    Versus,
}

/// Per-client phase progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Board hidden, waiting for a start command.
    Initial,
    /// Board fully shown for the preview countdown.
    Preview,
    /// Pair selection under the per-pair countdown.
    Playing,
    /// The active player must pick an adjacent tile to slide.
    SelectingSlide,
    Win,
    GameOver,
}

impl GamePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GamePhase::Win | GamePhase::GameOver)
    }
}

/// Which seat a terminal reason declares the winner, if any.
pub fn winner_for_reason(reason: &EndReason) -> Option<Seat> {
    match reason {
        EndReason::HostWon => Some(0),
        EndReason::GuestWon => Some(1),
        // A departure ends the game in the remaining player's favor.
        EndReason::HostLeft => Some(1),
        EndReason::GuestLeft => Some(0),
        EndReason::Abandoned => None,
    }
}

/// Phase implied by an authoritative document, seen from `my_seat`.
pub fn phase_for(doc: &GameSession, my_seat: Seat) -> GamePhase {
    match doc.status {
        SessionStatus::Waiting => GamePhase::Initial,
        SessionStatus::Ended => match doc.end_reason.as_ref().and_then(winner_for_reason) {
            Some(winner) if winner == my_seat => GamePhase::Win,
            _ => GamePhase::GameOver,
        },
        SessionStatus::InProgress => {
            if !doc.game_started {
                GamePhase::Initial
            } else if doc.current_turn.is_none() {
                GamePhase::Preview
            } else if doc.is_selecting_move && doc.current_turn == Some(my_seat) {
                GamePhase::SelectingSlide
            } else {
                GamePhase::Playing
            }
        }
    }
}

/// Per-client game state, mutated only through explicit operations and
/// snapshot replacement.
#[derive(Debug, Clone)]
pub struct LocalMachine {
    pub mode: GameMode,
    pub my_seat: Seat,
    pub phase: GamePhase,
    pub board: Board,
    pub selections: Vec<Selection>,
    pub current_turn: Option<Seat>,
    pub scores: [u8; 2],
    pub solo_points: u32,
    pub chances: u8,
    pub correct_pairs: u32,
    pub is_selecting_move: bool,
    pub turn_started_at_ms: u64,
    pub game_started: bool,
    pub end_reason: Option<EndReason>,
}

impl LocalMachine {
    pub fn new_solo(board: Board) -> Self {
        Self {
            mode: GameMode::Solo,
            my_seat: 0,
            phase: GamePhase::Initial,
            board,
            selections: Vec::new(),
            current_turn: None,
            scores: [0, 0],
            solo_points: 0,
            chances: starting_chances(),
            correct_pairs: 0,
            is_selecting_move: false,
            turn_started_at_ms: 0,
            game_started: false,
            end_reason: None,
        }
    }

    pub fn new_versus(doc: &GameSession, my_seat: Seat) -> Self {
        let mut machine = Self::new_solo(doc.board.clone());
        machine.mode = GameMode::Versus;
        machine.my_seat = my_seat;
        machine.apply_snapshot(doc);
        machine
    }

    pub fn is_my_turn(&self) -> bool {
        self.current_turn == Some(self.my_seat)
    }

    pub fn require_phase(&self, expected: GamePhase, ctx: &'static str) -> Result<(), DomainError> {
        if self.phase != expected {
            return Err(DomainError::validation(
                ValidationKind::PhaseMismatch,
                format!("{ctx}: expected {expected:?}, in {:?}", self.phase),
            ));
        }
        Ok(())
    }

    pub fn require_my_turn(&self, ctx: &'static str) -> Result<(), DomainError> {
        if self.mode == GameMode::Versus && !self.is_my_turn() {
            return Err(DomainError::validation(
                ValidationKind::OutOfTurn,
                format!("{ctx}: turn belongs to {:?}", self.current_turn),
            ));
        }
        Ok(())
    }

    /// Replace document-owned field groups wholesale from a snapshot.
    /// Mode-local fields (chances, solo points, bonus counter) are untouched.
    pub fn apply_snapshot(&mut self, doc: &GameSession) {
        self.board = doc.board.clone();
        self.selections = doc.selections.clone();
        self.current_turn = doc.current_turn;
        self.scores = doc.scores;
        self.is_selecting_move = doc.is_selecting_move;
        self.turn_started_at_ms = doc.turn_started_at_ms;
        self.game_started = doc.game_started;
        self.end_reason = doc.end_reason.clone();
        self.phase = phase_for(doc, self.my_seat);
    }

    /// Re-enter Initial with a fresh board (restart after a terminal phase).
    pub fn reset(&mut self, board: Board) {
        let mode = self.mode;
        let seat = self.my_seat;
        *self = Self::new_solo(board);
        self.mode = mode;
        self.my_seat = seat;
    }
}
