use serde::{Deserialize, Serialize};

use crate::domain::rules::{NUMBERS_PER_TILE, POSITIONS, TILES, VALUE_MAX, VALUE_MIN};
use crate::errors::domain::{DomainError, ValidationKind};

pub type TileId = u8; // 0..=7
pub type Position = u8; // 0..=8

/// A tile carrying five values with slot-aligned revealed/matched flags.
///
/// The board owns `id` and `position`; the flags are mutated only by the
/// matching operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub id: TileId,
    pub numbers: [u8; NUMBERS_PER_TILE],
    pub revealed: [bool; NUMBERS_PER_TILE],
    pub matched: [bool; NUMBERS_PER_TILE],
    pub position: Position,
}

impl Tile {
    pub fn new(id: TileId, numbers: [u8; NUMBERS_PER_TILE], position: Position) -> Self {
        Self {
            id,
            numbers,
            revealed: [false; NUMBERS_PER_TILE],
            matched: [false; NUMBERS_PER_TILE],
            position,
        }
    }
}

/// A (tile, slot index) reference chosen by the active player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub tile_id: TileId,
    pub index: u8,
}

impl Selection {
    pub fn new(tile_id: TileId, index: u8) -> Self {
        Self { tile_id, index }
    }
}

/// Eight tiles plus one empty slot on the 3x3 grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub tiles: Vec<Tile>,
    pub empty_pos: Position,
}

impl Board {
    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.id == id)
    }

    pub fn tile_mut(&mut self, id: TileId) -> Option<&mut Tile> {
        self.tiles.iter_mut().find(|t| t.id == id)
    }

    pub fn tile_at(&self, pos: Position) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.position == pos)
    }

    /// All (tile, slot) references carrying `value`.
    pub fn slots_with_value(&self, value: u8) -> Vec<Selection> {
        let mut slots = Vec::new();
        for tile in &self.tiles {
            for (idx, &n) in tile.numbers.iter().enumerate() {
                if n == value {
                    slots.push(Selection::new(tile.id, idx as u8));
                }
            }
        }
        slots
    }

    /// Number of fully matched pairs on the board.
    pub fn matched_pairs(&self) -> u8 {
        let slots: usize = self
            .tiles
            .iter()
            .map(|t| t.matched.iter().filter(|&&m| m).count())
            .sum();
        (slots / 2) as u8
    }

    pub fn all_matched(&self) -> bool {
        self.tiles
            .iter()
            .all(|t| t.matched.iter().all(|&m| m))
    }

    /// Structural invariants: tile count, unique positions, one empty slot,
    /// and the {1..=20} x 2 value multiset.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.tiles.len() != TILES {
            return Err(DomainError::validation(
                ValidationKind::Other("TILE_COUNT".into()),
                format!("expected {TILES} tiles, got {}", self.tiles.len()),
            ));
        }
        let mut occupied = [false; POSITIONS as usize];
        for tile in &self.tiles {
            let pos = tile.position as usize;
            if tile.position >= POSITIONS || occupied[pos] {
                return Err(DomainError::validation(
                    ValidationKind::InvalidPosition,
                    format!("tile {} at bad or duplicate position {}", tile.id, tile.position),
                ));
            }
            occupied[pos] = true;
        }
        if self.empty_pos >= POSITIONS || occupied[self.empty_pos as usize] {
            return Err(DomainError::validation(
                ValidationKind::InvalidPosition,
                format!("empty slot {} is occupied or out of range", self.empty_pos),
            ));
        }
        let mut counts = [0u8; (VALUE_MAX + 1) as usize];
        for tile in &self.tiles {
            for &n in &tile.numbers {
                if !(VALUE_MIN..=VALUE_MAX).contains(&n) {
                    return Err(DomainError::validation(
                        ValidationKind::Other("VALUE_RANGE".into()),
                        format!("value {n} outside {VALUE_MIN}..={VALUE_MAX}"),
                    ));
                }
                counts[n as usize] += 1;
            }
        }
        if counts[VALUE_MIN as usize..].iter().any(|&c| c != 2) {
            return Err(DomainError::validation(
                ValidationKind::Other("VALUE_MULTISET".into()),
                "each value must appear exactly twice",
            ));
        }
        Ok(())
    }
}
