//! Session coordinator: one task per client owning all mutable game state.
//!
//! The task processes, in arrival order: user commands, timer expiries, and
//! store snapshots. Authoritative changes go through a single in-flight
//! transition at a time; snapshots arriving while a transition is committing
//! are dropped and the post-commit document (or a re-read on conflict)
//! brings the client back in line. Countdowns are derived from the shared
//! start timestamp on every tick and are never written to the store.

use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{GameClock, SharedClock};
use crate::config::GameTimings;
use crate::domain::board::{Board, Position, Selection};
use crate::domain::matching::{
    resolve_pair, revert_selection, select_number, solo_outcome, versus_winner, PairOutcome,
    SoloOutcome,
};
use crate::domain::rules::BONUS_SLIDE_EVERY;
use crate::domain::scoring::calculate_score;
use crate::domain::sliding::{slide_options, slide_tile};
use crate::domain::state::{other_seat, GameMode, GamePhase, LocalMachine, Seat};
use crate::domain::generation::generate_board;
use crate::error::EngineError;
use crate::errors::domain::{ConflictKind, DomainError, ValidationKind};
use crate::protocol::session::{
    EndReason, GameSession, SessionId, SessionPatch, SessionStatus, SessionView,
};
use crate::store::{SessionSignal, SessionStore, SnapshotReceiver};
use crate::sync::events::{EventReceiver, EventSender, GameEvent};
use crate::sync::reconcile::{derive_transitions, SyncTransition};
use crate::sync::timer::{
    remaining_ms, CountdownTimer, TimerExpired, TimerRole, TimerSpec,
};

#[derive(Debug)]
pub enum Command {
    /// Solo: begin the preview. Versus: mark this side ready.
    Start,
    /// Solo: skip the rest of the preview. Versus: ask to start early.
    StartEarly,
    SelectNumber(Selection),
    ChooseSlide(Position),
    Restart,
    Leave,
}

/// Authoritative sequences that may be in flight, with what is needed to
/// advance locally if the store cannot be reached.
#[derive(Debug)]
enum PendingKind {
    EnterPreview,
    BeginPlaying,
    CommitResolution,
    CommitExpiry { board: Board },
    CommitSlide,
}

#[derive(Debug)]
enum InternalMsg {
    RevertDue {
        a: Selection,
        b: Selection,
    },
    TransitionDone {
        kind: PendingKind,
        result: Result<GameSession, EngineError>,
    },
}

enum LoopEvent {
    Command(Command),
    Internal(InternalMsg),
    Expired(TimerExpired),
    Signal(SessionSignal),
    Lagged(u64),
    SubscriptionClosed,
    Shutdown,
}

/// Read-only snapshot of the coordinator's state for the embedding UI.
#[derive(Debug, Clone)]
pub struct StateView {
    pub mode: GameMode,
    pub phase: GamePhase,
    pub my_seat: Seat,
    pub session_id: Option<SessionId>,
    pub board: Board,
    pub selections: Vec<Selection>,
    pub scores: [u8; 2],
    pub solo_points: u32,
    pub chances: u8,
    pub current_turn: Option<Seat>,
    pub is_selecting_move: bool,
    pub turn_started_at_ms: u64,
    pub end_reason: Option<EndReason>,
}

#[derive(Debug)]
pub struct CoordinatorHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<RwLock<StateView>>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    fn send(&self, cmd: Command) -> Result<(), EngineError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| EngineError::Terminated { reason: None })
    }

    pub fn start(&self) -> Result<(), EngineError> {
        self.send(Command::Start)
    }

    pub fn start_early(&self) -> Result<(), EngineError> {
        self.send(Command::StartEarly)
    }

    pub fn select_number(&self, selection: Selection) -> Result<(), EngineError> {
        self.send(Command::SelectNumber(selection))
    }

    pub fn choose_slide(&self, from_pos: Position) -> Result<(), EngineError> {
        self.send(Command::ChooseSlide(from_pos))
    }

    pub fn restart(&self) -> Result<(), EngineError> {
        self.send(Command::Restart)
    }

    pub fn state(&self) -> StateView {
        self.shared.read().clone()
    }

    /// Leave the session and wait for every session-scoped task to stop.
    pub async fn leave(self) {
        let _ = self.cmd_tx.send(Command::Leave);
        let _ = self.task.await;
    }
}

/// Start a solo session. The board is generated from `seed`; play begins on
/// the Start command.
pub fn spawn_solo(
    clock: SharedClock,
    timings: GameTimings,
    seed: u64,
) -> (CoordinatorHandle, EventReceiver) {
    let machine = LocalMachine::new_solo(generate_board(seed));
    spawn_inner(machine, None, None, None, SessionView::from_initial(), 0, clock, timings)
}

/// Attach to a shared session document as `my_seat`.
pub fn spawn_versus(
    store: Arc<dyn SessionStore>,
    doc: GameSession,
    my_seat: Seat,
    subscription: SnapshotReceiver,
    clock: SharedClock,
    timings: GameTimings,
) -> (CoordinatorHandle, EventReceiver) {
    let machine = LocalMachine::new_versus(&doc, my_seat);
    let view = SessionView::from(&doc);
    let version = doc.version;
    spawn_inner(
        machine,
        Some(store),
        Some(doc.session_id),
        Some(subscription),
        view,
        version,
        clock,
        timings,
    )
}

#[allow(clippy::too_many_arguments)]
fn spawn_inner(
    machine: LocalMachine,
    store: Option<Arc<dyn SessionStore>>,
    session_id: Option<SessionId>,
    subscription: Option<SnapshotReceiver>,
    view: SessionView,
    last_version: u64,
    clock: SharedClock,
    timings: GameTimings,
) -> (CoordinatorHandle, EventReceiver) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(RwLock::new(StateView {
        mode: machine.mode,
        phase: machine.phase,
        my_seat: machine.my_seat,
        session_id: session_id.clone(),
        board: machine.board.clone(),
        selections: machine.selections.clone(),
        scores: machine.scores,
        solo_points: machine.solo_points,
        chances: machine.chances,
        current_turn: machine.current_turn,
        is_selecting_move: machine.is_selecting_move,
        turn_started_at_ms: machine.turn_started_at_ms,
        end_reason: machine.end_reason.clone(),
    }));

    let coordinator = Coordinator {
        instance: Uuid::new_v4(),
        machine,
        timings,
        clock,
        store,
        session_id,
        view,
        last_version,
        preview_timer: CountdownTimer::new(),
        turn_timer: CountdownTimer::new(),
        pending_revert: None,
        session_over: false,
        events: events_tx,
        internal_tx,
        expiry_tx,
        shared: shared.clone(),
        cancel: CancellationToken::new(),
    };

    let task = tokio::spawn(coordinator.run(cmd_rx, internal_rx, expiry_rx, subscription));
    (
        CoordinatorHandle {
            cmd_tx,
            shared,
            task,
        },
        events_rx,
    )
}

impl SessionView {
    /// Empty before-state for a session with no document yet.
    fn from_initial() -> Self {
        Self {
            version: 0,
            status: SessionStatus::Waiting,
            current_turn: None,
            is_selecting_move: false,
            turn_started_at_ms: 0,
            game_started: false,
            both_ready: false,
            both_want_start: false,
            guest_present: false,
            end_reason: None,
        }
    }
}

struct Coordinator {
    instance: Uuid,
    machine: LocalMachine,
    timings: GameTimings,
    clock: SharedClock,
    store: Option<Arc<dyn SessionStore>>,
    session_id: Option<SessionId>,
    view: SessionView,
    last_version: u64,
    preview_timer: CountdownTimer,
    turn_timer: CountdownTimer,
    pending_revert: Option<(Selection, Selection)>,
    session_over: bool,
    events: EventSender,
    internal_tx: mpsc::UnboundedSender<InternalMsg>,
    expiry_tx: mpsc::UnboundedSender<TimerExpired>,
    shared: Arc<RwLock<StateView>>,
    cancel: CancellationToken,
}

impl Coordinator {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<InternalMsg>,
        mut expiry_rx: mpsc::UnboundedReceiver<TimerExpired>,
        mut subscription: Option<SnapshotReceiver>,
    ) {
        info!(
            instance = %self.instance,
            session_id = ?self.session_id,
            mode = ?self.machine.mode,
            "session coordinator started"
        );
        let cancel = self.cancel.clone();
        self.after_local_change();
        loop {
            let event = next_event(
                &cancel,
                &mut cmd_rx,
                &mut internal_rx,
                &mut expiry_rx,
                &mut subscription,
            )
            .await;
            match event {
                LoopEvent::Shutdown => break,
                LoopEvent::Command(Command::Leave) => {
                    self.handle_leave().await;
                    break;
                }
                LoopEvent::Command(cmd) => self.handle_command(cmd).await,
                LoopEvent::Internal(msg) => self.handle_internal(msg).await,
                LoopEvent::Expired(expired) => self.handle_expired(expired).await,
                LoopEvent::Signal(signal) => self.handle_signal(signal),
                LoopEvent::Lagged(skipped) => {
                    // safe to skip: every snapshot carries the whole document
                    warn!(skipped, "subscription lagged; waiting for a newer snapshot");
                }
                LoopEvent::SubscriptionClosed => {
                    self.handle_session_gone();
                    subscription = None;
                }
            }
        }
        self.teardown();
    }

    // ---- command handling -------------------------------------------------

    async fn handle_command(&mut self, cmd: Command) {
        if self.transitioning() {
            debug!(?cmd, "command dropped while a transition is in flight");
            return;
        }
        if self.session_over && !matches!(cmd, Command::Restart) {
            debug!(?cmd, "command dropped after session end");
            return;
        }
        let outcome = match cmd {
            Command::Start => self.handle_start().await,
            Command::StartEarly => self.handle_start_early().await,
            Command::SelectNumber(sel) => self.handle_select(sel).await,
            Command::ChooseSlide(pos) => self.handle_slide(pos).await,
            Command::Restart => self.handle_restart(),
            Command::Leave => Ok(()),
        };
        if let Err(EngineError::Domain(err)) = outcome {
            // invalid moves are a silent no-op, never fatal
            debug!(error = %err, "command rejected");
        }
    }

    async fn handle_start(&mut self) -> Result<(), EngineError> {
        self.machine.require_phase(GamePhase::Initial, "start")?;
        match self.machine.mode {
            GameMode::Solo => {
                self.machine.game_started = true;
                self.stamp_now();
                self.set_phase(GamePhase::Preview);
                self.after_local_change();
                Ok(())
            }
            GameMode::Versus => {
                let patch = SessionPatch {
                    ready: Some((self.machine.my_seat, true)),
                    ..SessionPatch::default()
                };
                self.write_patch(patch).await;
                Ok(())
            }
        }
    }

    async fn handle_start_early(&mut self) -> Result<(), EngineError> {
        self.machine.require_phase(GamePhase::Preview, "start early")?;
        match self.machine.mode {
            GameMode::Solo => {
                self.begin_playing_local();
                Ok(())
            }
            GameMode::Versus => {
                let patch = SessionPatch {
                    want_start: Some((self.machine.my_seat, true)),
                    ..SessionPatch::default()
                };
                self.write_patch(patch).await;
                Ok(())
            }
        }
    }

    async fn handle_select(&mut self, sel: Selection) -> Result<(), EngineError> {
        self.machine.require_phase(GamePhase::Playing, "select number")?;
        self.machine.require_my_turn("select number")?;
        if self.machine.is_selecting_move {
            return Err(DomainError::validation(
                ValidationKind::PhaseMismatch,
                "a slide must be chosen first",
            )
            .into());
        }
        select_number(&mut self.machine.board, &mut self.machine.selections, sel)?;
        let value = self
            .machine
            .board
            .tile(sel.tile_id)
            .map(|t| t.numbers[sel.index as usize])
            .unwrap_or_default();
        self.emit(GameEvent::NumberRevealed {
            selection: sel,
            value,
        });

        if self.machine.selections.len() < 2 {
            if self.machine.mode == GameMode::Versus {
                let patch = SessionPatch {
                    board: Some(self.machine.board.clone()),
                    selections: Some(self.machine.selections.clone()),
                    ..SessionPatch::default()
                };
                self.write_patch(patch).await;
            }
            self.publish_view();
            return Ok(());
        }
        self.resolve_selection_pair();
        Ok(())
    }

    /// Two numbers are in: suspend the countdown, resolve, then either keep
    /// playing (solo), pass the turn, or enter the slide phase.
    fn resolve_selection_pair(&mut self) {
        let a = self.machine.selections[0];
        let b = self.machine.selections[1];
        self.turn_timer.cancel();
        let remaining_secs = remaining_ms(
            self.timings.turn_ms(),
            self.machine.turn_started_at_ms,
            self.clock.now_ms(),
        ) / 1000;

        let outcome = resolve_pair(&mut self.machine.board, a, b);
        self.machine.selections.clear();

        match outcome {
            PairOutcome::Matched(value) => {
                let my_seat = self.machine.my_seat;
                self.machine.correct_pairs += 1;
                self.emit(GameEvent::PairMatched { value, by: my_seat });
                match self.machine.mode {
                    GameMode::Solo => {
                        self.machine.solo_points +=
                            calculate_score(remaining_secs, self.timings.turn_secs);
                        self.emit_scores();
                        let pairs = self.machine.board.matched_pairs();
                        if solo_outcome(pairs, self.machine.chances) == Some(SoloOutcome::Win) {
                            self.set_phase(GamePhase::Win);
                            self.after_local_change();
                            return;
                        }
                        if self.machine.correct_pairs % BONUS_SLIDE_EVERY == 0 {
                            self.machine.is_selecting_move = true;
                            self.set_phase(GamePhase::SelectingSlide);
                        }
                        self.stamp_now();
                        self.after_local_change();
                    }
                    GameMode::Versus => {
                        self.machine.scores[my_seat as usize] += 1;
                        self.emit_scores();
                        if let Some(winner) = versus_winner(self.machine.scores) {
                            let reason = if winner == 0 {
                                EndReason::HostWon
                            } else {
                                EndReason::GuestWon
                            };
                            self.machine.end_reason = Some(reason);
                            self.set_phase(GamePhase::Win);
                            self.launch_commit_resolution();
                            return;
                        }
                        if self.machine.correct_pairs % BONUS_SLIDE_EVERY == 0 {
                            self.machine.is_selecting_move = true;
                            self.set_phase(GamePhase::SelectingSlide);
                        } else {
                            self.machine.current_turn = Some(other_seat(my_seat));
                        }
                        self.launch_commit_resolution();
                    }
                }
            }
            PairOutcome::Mismatched => {
                self.emit(GameEvent::PairMissed);
                self.schedule_revert(a, b);
                match self.machine.mode {
                    GameMode::Solo => {
                        self.machine.chances = self.machine.chances.saturating_sub(1);
                        self.emit(GameEvent::ChancesChanged {
                            remaining: self.machine.chances,
                        });
                        let pairs = self.machine.board.matched_pairs();
                        if solo_outcome(pairs, self.machine.chances) == Some(SoloOutcome::Loss) {
                            self.set_phase(GamePhase::GameOver);
                            self.after_local_change();
                            return;
                        }
                        self.machine.is_selecting_move = true;
                        self.stamp_now();
                        self.set_phase(GamePhase::SelectingSlide);
                        self.after_local_change();
                    }
                    GameMode::Versus => {
                        self.machine.is_selecting_move = true;
                        self.set_phase(GamePhase::SelectingSlide);
                        self.launch_commit_resolution();
                    }
                }
            }
        }
    }

    async fn handle_slide(&mut self, from_pos: Position) -> Result<(), EngineError> {
        self.machine
            .require_phase(GamePhase::SelectingSlide, "choose slide")?;
        if !slide_options(&self.machine.board).contains(&from_pos) {
            return Err(DomainError::validation(
                ValidationKind::NotAdjacent,
                format!("{from_pos} is not adjacent to the empty slot"),
            )
            .into());
        }
        // hide any lingering mismatched reveals before the board moves on
        if let Some((a, b)) = self.pending_revert.take() {
            revert_selection(&mut self.machine.board, a);
            revert_selection(&mut self.machine.board, b);
            self.emit(GameEvent::SelectionsReverted { a, b });
        }
        let to = self.machine.board.empty_pos;
        slide_tile(&mut self.machine.board, from_pos)?;
        self.emit(GameEvent::TileSlid { from: from_pos, to });
        self.machine.is_selecting_move = false;

        match self.machine.mode {
            GameMode::Solo => {
                self.stamp_now();
                self.set_phase(GamePhase::Playing);
                self.after_local_change();
            }
            GameMode::Versus => {
                // one write ends this turn and starts the opponent's
                self.machine.current_turn = Some(other_seat(self.machine.my_seat));
                self.set_phase(GamePhase::Playing);
                self.launch_commit_slide();
            }
        }
        Ok(())
    }

    fn handle_restart(&mut self) -> Result<(), EngineError> {
        if !self.machine.phase.is_terminal() {
            return Err(DomainError::validation(
                ValidationKind::PhaseMismatch,
                "restart is only possible after the game ended",
            )
            .into());
        }
        let seed: u64 = rand::random();
        self.machine.reset(generate_board(seed));
        self.session_over = false;
        self.set_phase(GamePhase::Initial);
        self.after_local_change();
        Ok(())
    }

    async fn handle_leave(&mut self) {
        if self.machine.mode != GameMode::Versus || self.session_over {
            return;
        }
        let (Some(store), Some(id)) = (self.store.clone(), self.session_id.clone()) else {
            return;
        };
        match self.view.status {
            SessionStatus::Waiting => {
                // lobby never started; tear the document down entirely
                if let Err(err) = store.remove(&id).await {
                    warn!(error = %err, "failed to remove lobby document");
                }
            }
            SessionStatus::InProgress => {
                let reason = if self.machine.my_seat == 0 {
                    EndReason::HostLeft
                } else {
                    EndReason::GuestLeft
                };
                let patch = SessionPatch {
                    status: Some(SessionStatus::Ended),
                    end_reason: Some(Some(reason)),
                    ..SessionPatch::default()
                };
                if let Err(err) = store.update(&id, patch).await {
                    warn!(error = %err, "failed to record departure");
                }
            }
            SessionStatus::Ended => {}
        }
    }

    // ---- timer expiry -----------------------------------------------------

    async fn handle_expired(&mut self, expired: TimerExpired) {
        if expired.started_at_ms != self.machine.turn_started_at_ms {
            debug!(role = ?expired.role, "stale expiry dropped");
            return;
        }
        match expired.role {
            TimerRole::Preview => {
                if self.machine.phase != GamePhase::Preview || !self.is_timekeeper() {
                    return;
                }
                match self.machine.mode {
                    GameMode::Solo => self.begin_playing_local(),
                    GameMode::Versus => self.launch_begin_playing(),
                }
            }
            TimerRole::Turn => {
                // only the turn owner may declare expiry
                if self.machine.phase != GamePhase::Playing
                    || self.machine.is_selecting_move
                    || !self.machine.is_my_turn()
                {
                    return;
                }
                match self.machine.mode {
                    GameMode::Solo => self.handle_solo_expiry(),
                    GameMode::Versus => self.launch_commit_expiry(expired.started_at_ms),
                }
            }
        }
    }

    /// Missed turn in solo play: lose a chance, drop the selection, and
    /// force a slide automatically.
    fn handle_solo_expiry(&mut self) {
        self.turn_timer.cancel();
        self.machine.chances = self.machine.chances.saturating_sub(1);
        self.emit(GameEvent::ChancesChanged {
            remaining: self.machine.chances,
        });
        let stale: Vec<Selection> = self.machine.selections.drain(..).collect();
        for sel in stale {
            revert_selection(&mut self.machine.board, sel);
        }
        let pairs = self.machine.board.matched_pairs();
        if solo_outcome(pairs, self.machine.chances) == Some(SoloOutcome::Loss) {
            self.set_phase(GamePhase::GameOver);
            self.after_local_change();
            return;
        }
        let options = slide_options(&self.machine.board);
        let pick = rand::rng().random_range(0..options.len());
        let from = options[pick];
        let to = self.machine.board.empty_pos;
        if slide_tile(&mut self.machine.board, from).is_ok() {
            self.emit(GameEvent::TileSlid { from, to });
        }
        self.stamp_now();
        self.after_local_change();
    }

    // ---- in-flight transitions --------------------------------------------

    fn transitioning(&self) -> bool {
        self.preview_timer.is_transitioning() || self.turn_timer.is_transitioning()
    }

    fn is_timekeeper(&self) -> bool {
        self.machine.mode == GameMode::Solo || self.machine.my_seat == 0
    }

    fn launch(
        &mut self,
        kind: PendingKind,
        guard: TimerRole,
        mutator: Box<dyn FnOnce(&mut GameSession) -> Result<(), DomainError> + Send>,
    ) {
        let timer = match guard {
            TimerRole::Preview => &mut self.preview_timer,
            TimerRole::Turn => &mut self.turn_timer,
        };
        if !timer.begin_transition() {
            debug!(?kind, "transition dropped; another is in flight");
            return;
        }
        let Some(store) = self.store.clone() else {
            timer.end_transition();
            return;
        };
        let Some(id) = self.session_id.clone() else {
            timer.end_transition();
            return;
        };
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = store.run_transaction(&id, mutator).await;
            let _ = tx.send(InternalMsg::TransitionDone { kind, result });
        });
    }

    fn launch_enter_preview(&mut self) {
        let clock = self.clock.clone();
        self.launch(
            PendingKind::EnterPreview,
            TimerRole::Preview,
            Box::new(move |doc| {
                if doc.game_started {
                    return Err(DomainError::conflict(
                        ConflictKind::AlreadyStarted,
                        "preview already running",
                    ));
                }
                if !doc.both_ready() {
                    return Err(DomainError::conflict(
                        ConflictKind::Superseded,
                        "ready flags changed",
                    ));
                }
                doc.game_started = true;
                doc.turn_started_at_ms = clock.now_ms();
                Ok(())
            }),
        );
    }

    fn launch_begin_playing(&mut self) {
        let clock = self.clock.clone();
        self.launch(
            PendingKind::BeginPlaying,
            TimerRole::Preview,
            Box::new(move |doc| {
                if !doc.game_started || doc.status != SessionStatus::InProgress {
                    return Err(DomainError::conflict(
                        ConflictKind::Superseded,
                        "preview is not running",
                    ));
                }
                if doc.current_turn.is_some() {
                    return Err(DomainError::conflict(
                        ConflictKind::AlreadyStarted,
                        "play already began",
                    ));
                }
                doc.current_turn = Some(0);
                doc.turn_started_at_ms = clock.now_ms();
                Ok(())
            }),
        );
    }

    fn launch_commit_resolution(&mut self) {
        let clock = self.clock.clone();
        let my_seat = self.machine.my_seat;
        let board = self.machine.board.clone();
        let scores = self.machine.scores;
        let is_selecting = self.machine.is_selecting_move;
        let next_turn = self.machine.current_turn;
        let end_reason = self.machine.end_reason.clone();
        self.launch(
            PendingKind::CommitResolution,
            TimerRole::Turn,
            Box::new(move |doc| {
                if doc.status != SessionStatus::InProgress || doc.current_turn != Some(my_seat) {
                    return Err(DomainError::conflict(
                        ConflictKind::Superseded,
                        "turn ownership changed under the resolution",
                    ));
                }
                doc.set_board(board);
                doc.scores = scores;
                doc.selections = Vec::new();
                doc.is_selecting_move = is_selecting;
                doc.current_turn = next_turn;
                if let Some(reason) = end_reason {
                    doc.status = SessionStatus::Ended;
                    doc.end_reason = Some(reason);
                }
                doc.turn_started_at_ms = clock.now_ms();
                Ok(())
            }),
        );
    }

    /// One atomic read-modify-write for a declared expiry: enter the slide
    /// phase, drop the dangling selection, stamp a fresh start.
    fn launch_commit_expiry(&mut self, expected_ts: u64) {
        let clock = self.clock.clone();
        let my_seat = self.machine.my_seat;
        let mut board = self.machine.board.clone();
        for sel in &self.machine.selections {
            revert_selection(&mut board, *sel);
        }
        self.launch(
            PendingKind::CommitExpiry {
                board: board.clone(),
            },
            TimerRole::Turn,
            Box::new(move |doc| {
                if doc.status != SessionStatus::InProgress
                    || doc.current_turn != Some(my_seat)
                    || doc.is_selecting_move
                    || doc.turn_started_at_ms != expected_ts
                {
                    return Err(DomainError::conflict(
                        ConflictKind::Superseded,
                        "turn state changed under the expiry",
                    ));
                }
                doc.set_board(board);
                doc.selections = Vec::new();
                doc.is_selecting_move = true;
                doc.turn_started_at_ms = clock.now_ms();
                Ok(())
            }),
        );
    }

    fn launch_commit_slide(&mut self) {
        let clock = self.clock.clone();
        let my_seat = self.machine.my_seat;
        let board = self.machine.board.clone();
        self.launch(
            PendingKind::CommitSlide,
            TimerRole::Turn,
            Box::new(move |doc| {
                if doc.status != SessionStatus::InProgress
                    || doc.current_turn != Some(my_seat)
                    || !doc.is_selecting_move
                {
                    return Err(DomainError::conflict(
                        ConflictKind::Superseded,
                        "turn state changed under the slide",
                    ));
                }
                doc.set_board(board);
                doc.selections = Vec::new();
                doc.is_selecting_move = false;
                doc.current_turn = Some(other_seat(my_seat));
                doc.turn_started_at_ms = clock.now_ms();
                Ok(())
            }),
        );
    }

    async fn handle_internal(&mut self, msg: InternalMsg) {
        match msg {
            InternalMsg::RevertDue { a, b } => {
                if self.pending_revert == Some((a, b)) {
                    self.pending_revert = None;
                    revert_selection(&mut self.machine.board, a);
                    revert_selection(&mut self.machine.board, b);
                    self.emit(GameEvent::SelectionsReverted { a, b });
                    self.publish_view();
                }
            }
            InternalMsg::TransitionDone { kind, result } => {
                self.preview_timer.end_transition();
                self.turn_timer.end_transition();
                match result {
                    Ok(doc) => self.apply_remote(doc),
                    Err(EngineError::Domain(err)) if err.is_superseded() => {
                        debug!(?kind, error = %err, "transition superseded; re-reading document");
                        self.refetch().await;
                    }
                    Err(EngineError::Domain(err)) => {
                        debug!(?kind, error = %err, "transition rejected");
                        self.after_local_change();
                    }
                    Err(err) => {
                        warn!(?kind, error = %err, "store write failed; advancing optimistically");
                        self.apply_optimistic(kind);
                        self.emit(GameEvent::StoreTrouble {
                            detail: err.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// The store could not commit; keep the client playable with the state
    /// we computed. The next authoritative snapshot wins over all of this.
    fn apply_optimistic(&mut self, kind: PendingKind) {
        match kind {
            PendingKind::EnterPreview => {
                self.machine.game_started = true;
                self.stamp_now();
                self.set_phase(GamePhase::Preview);
            }
            PendingKind::BeginPlaying => {
                self.machine.current_turn = Some(0);
                self.stamp_now();
                self.set_phase(GamePhase::Playing);
            }
            PendingKind::CommitResolution | PendingKind::CommitSlide => {
                self.stamp_now();
            }
            PendingKind::CommitExpiry { board } => {
                self.machine.board = board;
                self.machine.selections.clear();
                self.machine.is_selecting_move = true;
                self.stamp_now();
                self.set_phase(GamePhase::SelectingSlide);
            }
        }
        self.after_local_change();
    }

    async fn refetch(&mut self) {
        let (Some(store), Some(id)) = (self.store.clone(), self.session_id.clone()) else {
            return;
        };
        match store.get(&id).await {
            Ok(Some(doc)) => self.apply_remote(doc),
            Ok(None) => self.handle_session_gone(),
            Err(err) => {
                warn!(error = %err, "re-read after superseded transition failed");
                self.emit(GameEvent::StoreTrouble {
                    detail: err.to_string(),
                });
                self.after_local_change();
            }
        }
    }

    // ---- reconciliation ---------------------------------------------------

    fn handle_signal(&mut self, signal: SessionSignal) {
        match signal {
            SessionSignal::Updated(doc) => {
                if self.transitioning() {
                    debug!(
                        version = doc.version,
                        "snapshot dropped while a transition is in flight"
                    );
                    return;
                }
                self.apply_remote(doc);
            }
            SessionSignal::Removed => self.handle_session_gone(),
        }
    }

    fn apply_remote(&mut self, doc: GameSession) {
        if self.last_version != 0 && doc.version <= self.last_version {
            debug!(version = doc.version, last = self.last_version, "stale snapshot dropped");
            return;
        }
        let after = SessionView::from(&doc);
        let transitions = derive_transitions(&self.view, &after);
        let old_phase = self.machine.phase;
        let old_scores = self.machine.scores;
        let board_changed =
            self.machine.board != doc.board || self.machine.selections != doc.selections;

        self.machine.apply_snapshot(&doc);
        self.last_version = doc.version;
        self.view = after;

        for transition in &transitions {
            match transition {
                SyncTransition::GuestJoined => {
                    if let Some(player) = doc.players[1].clone() {
                        self.emit(GameEvent::OpponentJoined { player });
                    }
                }
                SyncTransition::SessionEnded { reason } => {
                    self.session_over = true;
                    let departed = !matches!(
                        reason,
                        Some(EndReason::HostWon) | Some(EndReason::GuestWon)
                    );
                    if departed {
                        self.emit(GameEvent::SessionTerminated {
                            reason: reason.clone(),
                        });
                    }
                }
                _ => {}
            }
        }

        if self.machine.scores != old_scores {
            self.emit_scores();
        }
        if board_changed {
            self.emit(GameEvent::BoardUpdated);
        }
        self.emit_phase_events(old_phase);
        self.maybe_schedule_remote_revert(&doc);

        // shared transitions any snapshot may reveal
        if transitions.contains(&SyncTransition::BothReady) && !self.transitioning() {
            self.launch_enter_preview();
        }
        if transitions.contains(&SyncTransition::BothWantStart)
            && self.is_timekeeper()
            && !self.transitioning()
        {
            self.launch_begin_playing();
        }

        self.after_local_change();
    }

    /// The opponent's mismatch is on display; hide it again after the same
    /// delay the active player uses.
    fn maybe_schedule_remote_revert(&mut self, doc: &GameSession) {
        if self.machine.mode != GameMode::Versus
            || self.machine.is_my_turn()
            || self.pending_revert.is_some()
            || doc.selections.len() != 2
        {
            return;
        }
        let (a, b) = (doc.selections[0], doc.selections[1]);
        let value_of = |sel: Selection| {
            doc.board
                .tile(sel.tile_id)
                .map(|t| (t.numbers[sel.index as usize], t.matched[sel.index as usize]))
        };
        if let (Some((va, ma)), Some((vb, mb))) = (value_of(a), value_of(b)) {
            if va != vb && !ma && !mb {
                self.schedule_revert(a, b);
            }
        }
    }

    fn handle_session_gone(&mut self) {
        if self.session_over {
            return;
        }
        self.session_over = true;
        self.emit(GameEvent::SessionTerminated {
            reason: self.machine.end_reason.clone(),
        });
        if !self.machine.phase.is_terminal() {
            self.set_phase(GamePhase::GameOver);
        }
        self.after_local_change();
    }

    // ---- local state plumbing ---------------------------------------------

    fn begin_playing_local(&mut self) {
        self.machine.current_turn = Some(self.machine.my_seat);
        self.stamp_now();
        self.set_phase(GamePhase::Playing);
        self.after_local_change();
    }

    fn schedule_revert(&mut self, a: Selection, b: Selection) {
        self.pending_revert = Some((a, b));
        let delay = std::time::Duration::from_millis(self.timings.mismatch_delay_ms);
        let tx = self.internal_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(InternalMsg::RevertDue { a, b });
                }
            }
        });
    }

    async fn write_patch(&mut self, patch: SessionPatch) {
        let (Some(store), Some(id)) = (self.store.clone(), self.session_id.clone()) else {
            return;
        };
        match store.update(&id, patch).await {
            Ok(doc) => self.apply_remote(doc),
            Err(err) => {
                warn!(error = %err, "patch write failed; keeping optimistic state");
                self.emit(GameEvent::StoreTrouble {
                    detail: err.to_string(),
                });
                self.publish_view();
            }
        }
    }

    fn set_phase(&mut self, phase: GamePhase) {
        let old = self.machine.phase;
        self.machine.phase = phase;
        self.emit_phase_events(old);
    }

    fn emit_phase_events(&mut self, old: GamePhase) {
        let new = self.machine.phase;
        if old == new {
            return;
        }
        self.emit(GameEvent::PhaseChanged { phase: new });
        match new {
            GamePhase::SelectingSlide => {
                let options = slide_options(&self.machine.board);
                self.emit(GameEvent::SlideRequired { options });
            }
            GamePhase::Win | GamePhase::GameOver => {
                self.emit(GameEvent::GameEnded {
                    outcome: new,
                    reason: self.machine.end_reason.clone(),
                });
            }
            _ => {}
        }
    }

    fn emit_scores(&mut self) {
        self.emit(GameEvent::ScoresChanged {
            scores: self.machine.scores,
            solo_points: self.machine.solo_points,
        });
    }

    fn stamp_now(&mut self) {
        self.machine.turn_started_at_ms = self.clock.now_ms();
    }

    fn after_local_change(&mut self) {
        self.ensure_timers();
        self.publish_view();
    }

    fn ensure_timers(&mut self) {
        match self.machine.phase {
            GamePhase::Preview => {
                self.turn_timer.cancel();
                let spec = TimerSpec {
                    role: TimerRole::Preview,
                    budget_ms: self.timings.preview_ms(),
                    started_at_ms: self.machine.turn_started_at_ms,
                    mine: true,
                    fire_expiry: self.is_timekeeper(),
                };
                self.preview_timer.ensure(
                    spec,
                    self.clock.clone(),
                    self.events.clone(),
                    self.expiry_tx.clone(),
                );
            }
            GamePhase::Playing | GamePhase::SelectingSlide => {
                self.preview_timer.cancel();
                let mine = self.machine.is_my_turn();
                let spec = TimerSpec {
                    role: TimerRole::Turn,
                    budget_ms: self.timings.turn_ms(),
                    started_at_ms: self.machine.turn_started_at_ms,
                    mine,
                    fire_expiry: mine && !self.machine.is_selecting_move,
                };
                self.turn_timer.ensure(
                    spec,
                    self.clock.clone(),
                    self.events.clone(),
                    self.expiry_tx.clone(),
                );
            }
            GamePhase::Initial | GamePhase::Win | GamePhase::GameOver => {
                self.preview_timer.cancel();
                self.turn_timer.cancel();
            }
        }
    }

    fn publish_view(&self) {
        let machine = &self.machine;
        *self.shared.write() = StateView {
            mode: machine.mode,
            phase: machine.phase,
            my_seat: machine.my_seat,
            session_id: self.session_id.clone(),
            board: machine.board.clone(),
            selections: machine.selections.clone(),
            scores: machine.scores,
            solo_points: machine.solo_points,
            chances: machine.chances,
            current_turn: machine.current_turn,
            is_selecting_move: machine.is_selecting_move,
            turn_started_at_ms: machine.turn_started_at_ms,
            end_reason: machine.end_reason.clone(),
        };
    }

    fn emit(&self, event: GameEvent) {
        let _ = self.events.send(event);
    }

    fn teardown(&mut self) {
        self.preview_timer.cancel();
        self.turn_timer.cancel();
        self.cancel.cancel();
        info!(instance = %self.instance, session_id = ?self.session_id, "session coordinator stopped");
    }
}

async fn next_event(
    cancel: &CancellationToken,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    internal_rx: &mut mpsc::UnboundedReceiver<InternalMsg>,
    expiry_rx: &mut mpsc::UnboundedReceiver<TimerExpired>,
    subscription: &mut Option<SnapshotReceiver>,
) -> LoopEvent {
    if let Some(rx) = subscription.as_mut() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => LoopEvent::Shutdown,
            Some(msg) = internal_rx.recv() => LoopEvent::Internal(msg),
            Some(expired) = expiry_rx.recv() => LoopEvent::Expired(expired),
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => LoopEvent::Command(cmd),
                None => LoopEvent::Shutdown,
            },
            signal = rx.recv() => match signal {
                Ok(signal) => LoopEvent::Signal(signal),
                Err(RecvError::Lagged(skipped)) => LoopEvent::Lagged(skipped),
                Err(RecvError::Closed) => LoopEvent::SubscriptionClosed,
            },
        }
    } else {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => LoopEvent::Shutdown,
            Some(msg) = internal_rx.recv() => LoopEvent::Internal(msg),
            Some(expired) = expiry_rx.recv() => LoopEvent::Expired(expired),
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => LoopEvent::Command(cmd),
                None => LoopEvent::Shutdown,
            },
        }
    }
}
