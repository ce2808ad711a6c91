//! Time-scaled scoring for solo pair finds.

pub const PAIR_SCORE_FLOOR: u32 = 10;
pub const PAIR_SCORE_CEILING: u32 = 50;

/// Points for a correct pair: linear in the remaining per-pair budget,
/// rounded, clamped to [10, 50].
pub fn calculate_score(time_left_secs: u64, max_time_secs: u64) -> u32 {
    if max_time_secs == 0 {
        return PAIR_SCORE_FLOOR;
    }
    let raw = (time_left_secs as f64 / max_time_secs as f64 * PAIR_SCORE_CEILING as f64).round();
    (raw as u32).clamp(PAIR_SCORE_FLOOR, PAIR_SCORE_CEILING)
}
