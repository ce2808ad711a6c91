//! 3x3 adjacency and tile sliding.

use crate::domain::board::{Board, Position};
use crate::domain::rules::{position_in_range, GRID_DIM};
use crate::errors::domain::{DomainError, ValidationKind};

/// Orthogonal neighbors of `pos` on the 3x3 grid. Never contains `pos`.
pub fn adjacent_positions(pos: Position) -> Vec<Position> {
    if !position_in_range(pos) {
        return Vec::new();
    }
    let row = pos / GRID_DIM;
    let col = pos % GRID_DIM;
    let mut neighbors = Vec::with_capacity(4);
    if row > 0 {
        neighbors.push(pos - GRID_DIM);
    }
    if row < GRID_DIM - 1 {
        neighbors.push(pos + GRID_DIM);
    }
    if col > 0 {
        neighbors.push(pos - 1);
    }
    if col < GRID_DIM - 1 {
        neighbors.push(pos + 1);
    }
    neighbors
}

/// Positions the active player may slide from, given the current empty slot.
pub fn slide_options(board: &Board) -> Vec<Position> {
    adjacent_positions(board.empty_pos)
}

/// Move the tile at `from_pos` into the empty slot. The vacated position
/// becomes the new empty slot. Rejects non-adjacent origins without touching
/// the board.
pub fn slide_tile(board: &mut Board, from_pos: Position) -> Result<(), DomainError> {
    if !adjacent_positions(board.empty_pos).contains(&from_pos) {
        return Err(DomainError::validation(
            ValidationKind::NotAdjacent,
            format!("{from_pos} is not adjacent to empty slot {}", board.empty_pos),
        ));
    }
    let empty = board.empty_pos;
    let tile = board
        .tiles
        .iter_mut()
        .find(|t| t.position == from_pos)
        .ok_or_else(|| {
            DomainError::validation(
                ValidationKind::InvalidPosition,
                format!("no tile at position {from_pos}"),
            )
        })?;
    tile.position = empty;
    board.empty_pos = from_pos;
    Ok(())
}
