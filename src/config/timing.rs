use std::env;

use tracing::warn;

/// Countdown budgets and delays. Env-overridable so head-to-head test decks
/// can run on short clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameTimings {
    /// Board preview countdown (shared by both sides in multiplayer).
    pub preview_secs: u64,
    /// Per-pair turn countdown.
    pub turn_secs: u64,
    /// How long a mismatched pair stays revealed.
    pub mismatch_delay_ms: u64,
}

const DEFAULT_PREVIEW_SECS: u64 = 90;
const DEFAULT_TURN_SECS: u64 = 15;
const DEFAULT_MISMATCH_DELAY_MS: u64 = 1500;

impl Default for GameTimings {
    fn default() -> Self {
        Self {
            preview_secs: DEFAULT_PREVIEW_SECS,
            turn_secs: DEFAULT_TURN_SECS,
            mismatch_delay_ms: DEFAULT_MISMATCH_DELAY_MS,
        }
    }
}

impl GameTimings {
    pub fn from_env() -> Self {
        Self {
            preview_secs: env_u64("PAIRGRID_PREVIEW_SECS", DEFAULT_PREVIEW_SECS),
            turn_secs: env_u64("PAIRGRID_TURN_SECS", DEFAULT_TURN_SECS),
            mismatch_delay_ms: env_u64("PAIRGRID_MISMATCH_DELAY_MS", DEFAULT_MISMATCH_DELAY_MS),
        }
    }

    pub fn preview_ms(&self) -> u64 {
        self.preview_secs * 1000
    }

    pub fn turn_ms(&self) -> u64 {
        self.turn_secs * 1000
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(value) if value > 0 => value,
            _ => {
                warn!(var = name, value = %raw, "ignoring unparseable timing override");
                default
            }
        },
        Err(_) => default,
    }
}
