//! Selection validation and pair resolution.

use crate::domain::board::{Board, Selection};
use crate::domain::rules::{NUMBERS_PER_TILE, SOLO_CHANCES, TOTAL_PAIRS, VERSUS_WIN_SCORE};
use crate::domain::state::Seat;
use crate::errors::domain::{DomainError, ValidationKind};

/// Outcome of resolving two selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// Both slots carry this value; they are now matched.
    Matched(u8),
    /// Values differ; reveals are reverted after the display delay.
    Mismatched,
}

/// Terminal result of a solo game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoloOutcome {
    Win,
    Loss,
}

/// Reveal a slot and record the selection. Already-matched and
/// already-selected slots are rejected; so is a third selection.
pub fn select_number(
    board: &mut Board,
    selections: &mut Vec<Selection>,
    sel: Selection,
) -> Result<(), DomainError> {
    if selections.len() >= 2 {
        return Err(DomainError::validation(
            ValidationKind::SelectionFull,
            "two numbers are already selected",
        ));
    }
    if selections.contains(&sel) {
        return Err(DomainError::validation(
            ValidationKind::SlotAlreadySelected,
            format!("tile {} slot {} is already selected", sel.tile_id, sel.index),
        ));
    }
    if sel.index as usize >= NUMBERS_PER_TILE {
        return Err(DomainError::validation(
            ValidationKind::IndexOutOfRange,
            format!("slot index {} out of range", sel.index),
        ));
    }
    let tile = board.tile_mut(sel.tile_id).ok_or_else(|| {
        DomainError::validation(
            ValidationKind::UnknownTile,
            format!("no tile with id {}", sel.tile_id),
        )
    })?;
    if tile.matched[sel.index as usize] {
        return Err(DomainError::validation(
            ValidationKind::SlotAlreadyMatched,
            format!("tile {} slot {} is already matched", sel.tile_id, sel.index),
        ));
    }
    tile.revealed[sel.index as usize] = true;
    selections.push(sel);
    Ok(())
}

/// Resolve two selections. On a match, every slot on the board carrying the
/// value flips to matched+revealed in one step; on a mismatch the board is
/// left as-is (the caller schedules the reveal revert).
pub fn resolve_pair(board: &mut Board, a: Selection, b: Selection) -> PairOutcome {
    let value_a = board
        .tile(a.tile_id)
        .map(|t| t.numbers[a.index as usize]);
    let value_b = board
        .tile(b.tile_id)
        .map(|t| t.numbers[b.index as usize]);
    match (value_a, value_b) {
        (Some(va), Some(vb)) if va == vb => {
            for tile in &mut board.tiles {
                for idx in 0..NUMBERS_PER_TILE {
                    if tile.numbers[idx] == va {
                        tile.matched[idx] = true;
                        tile.revealed[idx] = true;
                    }
                }
            }
            PairOutcome::Matched(va)
        }
        _ => PairOutcome::Mismatched,
    }
}

/// Hide a previously revealed slot again, unless it has been matched since.
pub fn revert_selection(board: &mut Board, sel: Selection) {
    if let Some(tile) = board.tile_mut(sel.tile_id) {
        let idx = sel.index as usize;
        if idx < NUMBERS_PER_TILE && !tile.matched[idx] {
            tile.revealed[idx] = false;
        }
    }
}

/// Solo terminal check: all pairs found wins, zero chances loses.
pub fn solo_outcome(matched_pairs: u8, chances: u8) -> Option<SoloOutcome> {
    if matched_pairs >= TOTAL_PAIRS {
        Some(SoloOutcome::Win)
    } else if chances == 0 {
        Some(SoloOutcome::Loss)
    } else {
        None
    }
}

/// Two-player terminal check: first seat at the winning score.
pub fn versus_winner(scores: [u8; 2]) -> Option<Seat> {
    scores
        .iter()
        .position(|&s| s >= VERSUS_WIN_SCORE)
        .map(|seat| seat as Seat)
}

/// Fresh chance budget for a solo game.
pub fn starting_chances() -> u8 {
    SOLO_CHANCES
}
