//! Property tests for the pure board operations (no store, no tasks).

use proptest::prelude::*;

use crate::domain::board::Selection;
use crate::domain::generation::generate_board;
use crate::domain::matching::{resolve_pair, select_number, PairOutcome};
use crate::domain::scoring::calculate_score;
use crate::domain::sliding::{adjacent_positions, slide_tile};

proptest! {
    /// Property: every generated board carries 8 uniquely positioned tiles,
    /// one empty slot, and the {1..=20} x 2 value multiset.
    #[test]
    fn prop_generated_boards_satisfy_invariants(seed in any::<u64>()) {
        let board = generate_board(seed);
        prop_assert!(board.check_invariants().is_ok());
        prop_assert_eq!(board.tiles.len(), 8);
        prop_assert_eq!(board.matched_pairs(), 0);
    }

    /// Property: sliding any adjacent tile keeps the board structurally
    /// valid, moves exactly one tile, and relocates the empty slot to the
    /// slide origin.
    #[test]
    fn prop_slide_preserves_invariants(seed in any::<u64>(), pick in 0usize..4) {
        let mut board = generate_board(seed);
        let options = adjacent_positions(board.empty_pos);
        let from = options[pick % options.len()];
        let before = board.clone();
        slide_tile(&mut board, from).unwrap();
        prop_assert!(board.check_invariants().is_ok());
        prop_assert_eq!(board.empty_pos, from);
        let moved = board
            .tiles
            .iter()
            .filter(|t| before.tile(t.id).unwrap().position != t.position)
            .count();
        prop_assert_eq!(moved, 1);
    }

    /// Property: resolving two equal-valued slots marks exactly the two
    /// slots carrying that value and nothing else.
    #[test]
    fn prop_match_marks_only_the_pair(seed in any::<u64>(), value in 1u8..=20) {
        let mut board = generate_board(seed);
        let slots = board.slots_with_value(value);
        prop_assert_eq!(slots.len(), 2);
        let outcome = resolve_pair(&mut board, slots[0], slots[1]);
        prop_assert_eq!(outcome, PairOutcome::Matched(value));
        for tile in &board.tiles {
            for idx in 0..5 {
                let expect = tile.numbers[idx] == value;
                prop_assert_eq!(tile.matched[idx], expect);
            }
        }
    }

    /// Property: a selection only ever reveals the slot it names.
    #[test]
    fn prop_select_reveals_one_slot(seed in any::<u64>(), tile in 0u8..8, index in 0u8..5) {
        let mut board = generate_board(seed);
        let mut selections = Vec::new();
        select_number(&mut board, &mut selections, Selection::new(tile, index)).unwrap();
        let revealed: usize = board
            .tiles
            .iter()
            .map(|t| t.revealed.iter().filter(|&&r| r).count())
            .sum();
        prop_assert_eq!(revealed, 1);
        prop_assert!(board.tile(tile).unwrap().revealed[index as usize]);
    }

    /// Property: score stays in [10, 50] and never decreases with more time
    /// left.
    #[test]
    fn prop_score_bounds_and_monotone(a in 0u64..=15, b in 0u64..=15) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let s_lo = calculate_score(lo, 15);
        let s_hi = calculate_score(hi, 15);
        prop_assert!((10..=50).contains(&s_lo));
        prop_assert!((10..=50).contains(&s_hi));
        prop_assert!(s_lo <= s_hi);
    }
}
