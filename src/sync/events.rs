//! Event surface observed by the embedding UI. Events are notifications;
//! the current state is always readable from the coordinator handle.

use tokio::sync::mpsc;

use crate::domain::board::{Position, Selection};
use crate::domain::state::{GamePhase, Seat};
use crate::identity::PlayerId;
use crate::protocol::session::EndReason;

pub type EventSender = mpsc::UnboundedSender<GameEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<GameEvent>;

#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    PhaseChanged {
        phase: GamePhase,
    },
    OpponentJoined {
        player: PlayerId,
    },
    PreviewTick {
        remaining_ms: u64,
    },
    TurnTick {
        remaining_ms: u64,
        mine: bool,
    },
    NumberRevealed {
        selection: Selection,
        value: u8,
    },
    PairMatched {
        value: u8,
        by: Seat,
    },
    PairMissed,
    /// Mismatched reveals were hidden again after the display delay.
    SelectionsReverted {
        a: Selection,
        b: Selection,
    },
    /// The active player must pick one of these origins to slide from.
    SlideRequired {
        options: Vec<Position>,
    },
    TileSlid {
        from: Position,
        to: Position,
    },
    ScoresChanged {
        scores: [u8; 2],
        solo_points: u32,
    },
    ChancesChanged {
        remaining: u8,
    },
    /// Remote fields changed (board, selections, flags); read the handle's
    /// state view for the details.
    BoardUpdated,
    GameEnded {
        outcome: GamePhase,
        reason: Option<EndReason>,
    },
    /// A store write failed; local play continues optimistically.
    StoreTrouble {
        detail: String,
    },
    /// The document vanished or the opponent left.
    SessionTerminated {
        reason: Option<EndReason>,
    },
}
