//! Wall-clock contract. Timestamps in the shared document are compared
//! across clients, so the reader must be loosely NTP-synchronized; no skew
//! compensation is attempted.

use std::sync::Arc;

use time::OffsetDateTime;

pub trait GameClock: Send + Sync {
    /// Milliseconds since the Unix epoch (or a process-fixed origin for the
    /// virtual clock; only differences matter).
    fn now_ms(&self) -> u64;
}

pub type SharedClock = Arc<dyn GameClock>;

/// Real wall clock.
pub struct SystemClock;

impl GameClock for SystemClock {
    fn now_ms(&self) -> u64 {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
    }
}

/// Clock bound to the tokio runtime's notion of time. Under
/// `tokio::time::pause` it advances in lockstep with sleeping tasks, which
/// makes countdown behavior fully deterministic in tests.
pub struct TokioClock {
    origin: tokio::time::Instant,
    base_ms: u64,
}

impl TokioClock {
    pub fn new(base_ms: u64) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            base_ms,
        }
    }
}

impl GameClock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.base_ms + self.origin.elapsed().as_millis() as u64
    }
}
