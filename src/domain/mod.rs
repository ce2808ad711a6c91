//! Domain layer: pure game logic types and helpers.

pub mod board;
pub mod generation;
pub mod matching;
pub mod rules;
pub mod scoring;
pub mod sliding;
pub mod state;

#[cfg(test)]
mod tests_props;

// Re-exports for ergonomics
pub use board::{Board, Position, Selection, Tile, TileId};
pub use generation::generate_board;
pub use matching::{resolve_pair, select_number, PairOutcome, SoloOutcome};
pub use scoring::calculate_score;
pub use sliding::{adjacent_positions, slide_options, slide_tile};
pub use state::{other_seat, GameMode, GamePhase, LocalMachine, Seat};
