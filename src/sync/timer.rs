//! Cancellable countdown handles.
//!
//! Countdowns are never transmitted: each client derives the remaining time
//! from the shared start timestamp and its own clock on every tick, so a
//! late or replayed snapshot can never skew the display. A timer handle is a
//! small state machine (Idle/Running/Transitioning); cancel-before-start
//! plus the Transitioning guard is what keeps a single task per role.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::{GameClock, SharedClock};
use crate::sync::events::{EventSender, GameEvent};

pub const TICK_MS: u64 = 1000;

/// Remaining budget for a countdown anchored at `started_at_ms`.
pub fn remaining_ms(budget_ms: u64, started_at_ms: u64, now_ms: u64) -> u64 {
    budget_ms.saturating_sub(now_ms.saturating_sub(started_at_ms))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRole {
    Preview,
    Turn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running,
    /// An authoritative transition is in flight; no new task may start and
    /// incoming reconciliations are dropped until it completes.
    Transitioning,
}

/// Parameters of one countdown task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSpec {
    pub role: TimerRole,
    pub budget_ms: u64,
    pub started_at_ms: u64,
    pub mine: bool,
    /// Display-only timers never declare expiry.
    pub fire_expiry: bool,
}

/// Sent to the coordinator when an owned countdown reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerExpired {
    pub role: TimerRole,
    pub started_at_ms: u64,
}

pub struct CountdownTimer {
    state: TimerState,
    current: Option<TimerSpec>,
    cancel: Option<CancellationToken>,
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownTimer {
    pub fn new() -> Self {
        Self {
            state: TimerState::Idle,
            current: None,
            cancel: None,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_transitioning(&self) -> bool {
        self.state == TimerState::Transitioning
    }

    /// Make sure a task with exactly this spec is running. A matching task
    /// is left alone; anything else is cancelled first. No-op while
    /// transitioning.
    pub fn ensure(
        &mut self,
        spec: TimerSpec,
        clock: SharedClock,
        events: EventSender,
        expiry_tx: mpsc::UnboundedSender<TimerExpired>,
    ) {
        if self.state == TimerState::Transitioning {
            debug!(role = ?spec.role, "timer start dropped while transitioning");
            return;
        }
        if self.state == TimerState::Running && self.current == Some(spec) {
            return;
        }
        self.cancel_task();
        self.state = TimerState::Running;
        self.current = Some(spec);
        let token = CancellationToken::new();
        self.cancel = Some(token.clone());
        tokio::spawn(run_countdown(spec, clock, events, expiry_tx, token));
    }

    pub fn cancel(&mut self) {
        self.cancel_task();
        self.state = TimerState::Idle;
        self.current = None;
    }

    /// Enter the in-flight guard, cancelling any running task. Returns false
    /// if a transition is already in flight; the caller must drop its action.
    pub fn begin_transition(&mut self) -> bool {
        if self.state == TimerState::Transitioning {
            return false;
        }
        self.cancel_task();
        self.current = None;
        self.state = TimerState::Transitioning;
        true
    }

    pub fn end_transition(&mut self) {
        if self.state == TimerState::Transitioning {
            self.state = TimerState::Idle;
        }
    }

    fn cancel_task(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }
}

async fn run_countdown(
    spec: TimerSpec,
    clock: SharedClock,
    events: EventSender,
    expiry_tx: mpsc::UnboundedSender<TimerExpired>,
    cancel: CancellationToken,
) {
    loop {
        let remaining = remaining_ms(spec.budget_ms, spec.started_at_ms, clock.now_ms());
        let tick = match spec.role {
            TimerRole::Preview => GameEvent::PreviewTick {
                remaining_ms: remaining,
            },
            TimerRole::Turn => GameEvent::TurnTick {
                remaining_ms: remaining,
                mine: spec.mine,
            },
        };
        if events.send(tick).is_err() {
            return;
        }
        if remaining == 0 {
            if spec.fire_expiry {
                let _ = expiry_tx.send(TimerExpired {
                    role: spec.role,
                    started_at_ms: spec.started_at_ms,
                });
            }
            return;
        }
        let nap = remaining.min(TICK_MS);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(nap)) => {}
        }
    }
}
