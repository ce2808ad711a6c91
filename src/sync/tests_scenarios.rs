//! End-to-end scenarios: two coordinators over the in-memory store with the
//! runtime clock paused, so countdowns and commits interleave
//! deterministically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::{GameClock, SharedClock, TokioClock};
use crate::config::GameTimings;
use crate::domain::board::Selection;
use crate::domain::generation::generate_board;
use crate::domain::state::GamePhase;
use crate::error::EngineError;
use crate::identity::StaticIdentity;
use crate::protocol::session::{
    EndReason, GameSession, SessionPatch, SessionStatus,
};
use crate::services::lobby::{LiveSession, LobbyService};
use crate::store::memory::MemoryStore;
use crate::store::{SessionStore, SnapshotReceiver, TxnMutator};
use crate::sync::coordinator::spawn_versus;
use crate::sync::events::{EventReceiver, GameEvent};

fn short_timings() -> GameTimings {
    GameTimings {
        preview_secs: 3,
        turn_secs: 5,
        mismatch_delay_ms: 200,
    }
}

fn lobby(store: &Arc<MemoryStore>, who: &str, clock: &SharedClock) -> LobbyService {
    LobbyService::new(
        store.clone(),
        Arc::new(StaticIdentity::new(who)),
        clock.clone(),
        short_timings(),
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn drain(rx: &mut EventReceiver) -> Vec<GameEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn host_and_guest(
    store: &Arc<MemoryStore>,
    clock: &SharedClock,
) -> (LiveSession, LiveSession) {
    let host = lobby(store, "host-uid", clock).create(false).await.unwrap();
    let guest = lobby(store, "guest-uid", clock)
        .join(&host.session_id)
        .await
        .unwrap();
    settle().await;
    (host, guest)
}

/// Both sides ready, preview skipped early: straight to the host's turn.
async fn into_playing(
    store: &Arc<MemoryStore>,
    clock: &SharedClock,
) -> (LiveSession, LiveSession) {
    let (host, guest) = host_and_guest(store, clock).await;
    host.handle.start().unwrap();
    guest.handle.start().unwrap();
    settle().await;
    host.handle.start_early().unwrap();
    guest.handle.start_early().unwrap();
    settle().await;
    assert_eq!(host.handle.state().phase, GamePhase::Playing);
    assert_eq!(guest.handle.state().phase, GamePhase::Playing);
    (host, guest)
}

#[tokio::test(start_paused = true)]
async fn both_ready_share_one_preview_then_host_plays() {
    let store = Arc::new(MemoryStore::new());
    let clock: SharedClock = Arc::new(TokioClock::new(50_000));
    let (host, guest) = host_and_guest(&store, &clock).await;

    host.handle.start().unwrap();
    settle().await;
    // one ready flag is not enough
    assert_eq!(host.handle.state().phase, GamePhase::Initial);

    guest.handle.start().unwrap();
    settle().await;

    let host_state = host.handle.state();
    let guest_state = guest.handle.state();
    assert_eq!(host_state.phase, GamePhase::Preview);
    assert_eq!(guest_state.phase, GamePhase::Preview);
    assert!(host_state.turn_started_at_ms > 0);
    // the shared stamp is written once; both sides derive from the same value
    assert_eq!(
        host_state.turn_started_at_ms,
        guest_state.turn_started_at_ms
    );
    let preview_stamp = host_state.turn_started_at_ms;

    // run the preview countdown out
    tokio::time::sleep(Duration::from_secs(4)).await;
    settle().await;

    let host_state = host.handle.state();
    let guest_state = guest.handle.state();
    assert_eq!(host_state.phase, GamePhase::Playing);
    assert_eq!(guest_state.phase, GamePhase::Playing);
    assert_eq!(host_state.current_turn, Some(0));
    assert_eq!(guest_state.current_turn, Some(0));
    assert!(host_state.turn_started_at_ms > preview_stamp);
    assert_eq!(
        host_state.turn_started_at_ms,
        guest_state.turn_started_at_ms
    );
}

#[tokio::test(start_paused = true)]
async fn both_asking_cuts_the_preview_short() {
    let store = Arc::new(MemoryStore::new());
    let clock: SharedClock = Arc::new(TokioClock::new(50_000));
    let (host, guest) = host_and_guest(&store, &clock).await;

    host.handle.start().unwrap();
    guest.handle.start().unwrap();
    settle().await;
    assert_eq!(host.handle.state().phase, GamePhase::Preview);

    host.handle.start_early().unwrap();
    settle().await;
    // one side alone cannot cut the preview
    assert_eq!(guest.handle.state().phase, GamePhase::Preview);

    guest.handle.start_early().unwrap();
    settle().await;
    assert_eq!(host.handle.state().phase, GamePhase::Playing);
    assert_eq!(guest.handle.state().phase, GamePhase::Playing);
    assert_eq!(host.handle.state().current_turn, Some(0));
}

#[tokio::test(start_paused = true)]
async fn mismatch_forces_a_slide_and_one_write_hands_the_turn_over() {
    let store = Arc::new(MemoryStore::new());
    let clock: SharedClock = Arc::new(TokioClock::new(50_000));
    let (mut host, mut guest) = into_playing(&store, &clock).await;

    let board = host.handle.state().board;
    let first = board.slots_with_value(1)[0];
    let second = board.slots_with_value(2)[0];

    host.handle.select_number(first).unwrap();
    settle().await;
    // the reveal travels to the opponent through the document
    let guest_board = guest.handle.state().board;
    assert!(guest_board.tile(first.tile_id).unwrap().revealed[first.index as usize]);

    host.handle.select_number(second).unwrap();
    settle().await;

    let host_state = host.handle.state();
    assert_eq!(host_state.phase, GamePhase::SelectingSlide);
    assert!(host_state.is_selecting_move);
    // the opponent keeps a plain view of the same document
    assert_eq!(guest.handle.state().phase, GamePhase::Playing);

    let host_events = drain(&mut host.events);
    assert!(host_events.contains(&GameEvent::PairMissed));
    assert!(host_events
        .iter()
        .any(|e| matches!(e, GameEvent::SlideRequired { .. })));

    let options = crate::domain::sliding::slide_options(&host.handle.state().board);
    let slide_stamp = host.handle.state().turn_started_at_ms;
    host.handle.choose_slide(options[0]).unwrap();
    settle().await;

    let host_state = host.handle.state();
    let guest_state = guest.handle.state();
    // the handoff write ended the turn and started the opponent's in one step
    assert_eq!(host_state.current_turn, Some(1));
    assert_eq!(guest_state.current_turn, Some(1));
    assert!(!host_state.is_selecting_move);
    assert!(!guest_state.is_selecting_move);
    assert_eq!(host_state.board, guest_state.board);
    assert_eq!(host_state.board.empty_pos, options[0]);
    assert!(host_state.turn_started_at_ms > slide_stamp);
    assert_eq!(
        host_state.turn_started_at_ms,
        guest_state.turn_started_at_ms
    );

    // and the guest can now act
    let slot = guest_state.board.slots_with_value(3)[0];
    guest.handle.select_number(slot).unwrap();
    settle().await;
    assert_eq!(guest.handle.state().selections.len(), 1);
    assert!(drain(&mut guest.events)
        .iter()
        .any(|e| matches!(e, GameEvent::NumberRevealed { .. })));
}

#[tokio::test(start_paused = true)]
async fn solo_match_scores_and_play_continues() {
    let clock: SharedClock = Arc::new(TokioClock::new(50_000));
    let (handle, mut events) = crate::sync::coordinator::spawn_solo(clock, short_timings(), 7);

    handle.start().unwrap();
    settle().await;
    assert_eq!(handle.state().phase, GamePhase::Preview);
    handle.start_early().unwrap();
    settle().await;
    assert_eq!(handle.state().phase, GamePhase::Playing);

    let board = generate_board(7);
    let pair = board.slots_with_value(5);
    handle.select_number(pair[0]).unwrap();
    settle().await;
    handle.select_number(pair[1]).unwrap();
    settle().await;

    let state = handle.state();
    assert_eq!(state.phase, GamePhase::Playing);
    assert!(state.selections.is_empty());
    assert_eq!(state.board.matched_pairs(), 1);
    assert_eq!(state.chances, 3);
    assert!((10..=50).contains(&state.solo_points));

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, GameEvent::PairMatched { value: 5, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, GameEvent::ScoresChanged { .. })));
}

#[tokio::test(start_paused = true)]
async fn solo_mismatch_hides_the_reveals_after_the_display_delay() {
    let clock: SharedClock = Arc::new(TokioClock::new(50_000));
    let (handle, mut events) = crate::sync::coordinator::spawn_solo(clock, short_timings(), 7);

    handle.start().unwrap();
    settle().await;
    handle.start_early().unwrap();
    settle().await;

    let board = generate_board(7);
    let a = board.slots_with_value(1)[0];
    let b = board.slots_with_value(2)[0];
    handle.select_number(a).unwrap();
    settle().await;
    handle.select_number(b).unwrap();
    settle().await;

    let state = handle.state();
    assert_eq!(state.phase, GamePhase::SelectingSlide);
    assert_eq!(state.chances, 2);
    assert!(state.selections.is_empty());
    // still on display during the mismatch window
    assert!(state.board.tile(a.tile_id).unwrap().revealed[a.index as usize]);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let state = handle.state();
    assert!(!state.board.tile(a.tile_id).unwrap().revealed[a.index as usize]);
    assert!(!state.board.tile(b.tile_id).unwrap().revealed[b.index as usize]);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, GameEvent::SelectionsReverted { .. })));

    // the slide releases the board back into play with a fresh countdown
    let options = crate::domain::sliding::slide_options(&handle.state().board);
    handle.choose_slide(options[0]).unwrap();
    settle().await;
    let state = handle.state();
    assert_eq!(state.phase, GamePhase::Playing);
    assert_eq!(state.chances, 2);
    assert_eq!(state.board.empty_pos, options[0]);
}

#[tokio::test(start_paused = true)]
async fn solo_expiry_costs_a_chance_clears_the_selection_and_slides() {
    let clock: SharedClock = Arc::new(TokioClock::new(50_000));
    let (handle, mut events) = crate::sync::coordinator::spawn_solo(clock, short_timings(), 7);

    handle.start().unwrap();
    settle().await;
    handle.start_early().unwrap();
    settle().await;

    let sel = Selection::new(0, 0);
    handle.select_number(sel).unwrap();
    settle().await;
    assert_eq!(handle.state().selections.len(), 1);
    let stamp = handle.state().turn_started_at_ms;

    // let the per-pair countdown run out with a single number picked
    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;

    let state = handle.state();
    assert_eq!(state.chances, 2);
    assert!(state.selections.is_empty());
    assert!(
        !state.board.tile(sel.tile_id).unwrap().revealed[sel.index as usize],
        "the dangling reveal is hidden again"
    );
    assert_ne!(state.board.empty_pos, 8, "a forced slide happened");
    assert!(state.turn_started_at_ms > stamp, "a fresh countdown started");
    assert_eq!(state.phase, GamePhase::Playing);

    let events = drain(&mut events);
    assert!(events.contains(&GameEvent::ChancesChanged { remaining: 2 }));
    assert!(events.iter().any(|e| matches!(e, GameEvent::TileSlid { .. })));
}

#[tokio::test(start_paused = true)]
async fn guest_departure_terminates_the_session_for_the_host() {
    let store = Arc::new(MemoryStore::new());
    let clock: SharedClock = Arc::new(TokioClock::new(50_000));
    let (mut host, guest) = into_playing(&store, &clock).await;
    drain(&mut host.events);

    let session_id = guest.session_id.clone();
    guest.handle.leave().await;
    settle().await;

    let doc = store.get(&session_id).await.unwrap().unwrap();
    assert_eq!(doc.status, SessionStatus::Ended);
    assert_eq!(doc.end_reason, Some(EndReason::GuestLeft));

    let host_state = host.handle.state();
    assert_eq!(host_state.end_reason, Some(EndReason::GuestLeft));
    // the remaining player gets the win
    assert_eq!(host_state.phase, GamePhase::Win);
    assert!(drain(&mut host.events).iter().any(|e| matches!(
        e,
        GameEvent::SessionTerminated {
            reason: Some(EndReason::GuestLeft)
        }
    )));
}

/// Store whose transactions commit only after a delay, exposing the window
/// in which a conflicting snapshot can arrive.
struct SlowStore {
    inner: Arc<MemoryStore>,
    txn_delay: Duration,
}

#[async_trait]
impl SessionStore for SlowStore {
    async fn get(&self, id: &str) -> Result<Option<GameSession>, EngineError> {
        self.inner.get(id).await
    }
    async fn put(&self, doc: GameSession) -> Result<GameSession, EngineError> {
        self.inner.put(doc).await
    }
    async fn update(&self, id: &str, patch: SessionPatch) -> Result<GameSession, EngineError> {
        self.inner.update(id, patch).await
    }
    async fn run_transaction(
        &self,
        id: &str,
        mutator: TxnMutator,
    ) -> Result<GameSession, EngineError> {
        tokio::time::sleep(self.txn_delay).await;
        self.inner.run_transaction(id, mutator).await
    }
    async fn subscribe(&self, id: &str) -> Result<SnapshotReceiver, EngineError> {
        self.inner.subscribe(id).await
    }
    async fn find_joinable(&self) -> Result<Option<GameSession>, EngineError> {
        self.inner.find_joinable().await
    }
    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.inner.remove(id).await
    }
}

#[tokio::test(start_paused = true)]
async fn snapshot_during_an_expiry_transition_is_dropped_without_duplicate_timers() {
    let inner = Arc::new(MemoryStore::new());
    let store: Arc<dyn SessionStore> = Arc::new(SlowStore {
        inner: inner.clone(),
        txn_delay: Duration::from_millis(500),
    });
    let clock: SharedClock = Arc::new(TokioClock::new(50_000));
    let timings = GameTimings {
        preview_secs: 3,
        turn_secs: 2,
        mismatch_delay_ms: 200,
    };

    // a running game, host's turn, mid-play
    let mut doc = GameSession::new_waiting(
        "ROOMAA".into(),
        "host-uid".into(),
        generate_board(3),
        false,
        clock.now_ms(),
    );
    doc.players[1] = Some("guest-uid".into());
    doc.status = SessionStatus::InProgress;
    doc.game_started = true;
    doc.current_turn = Some(0);
    doc.turn_started_at_ms = clock.now_ms();
    let committed = store.put(doc).await.unwrap();
    let subscription = store.subscribe("ROOMAA").await.unwrap();
    let (host, mut events) = spawn_versus(
        store.clone(),
        committed,
        0,
        subscription,
        clock.clone(),
        timings,
    );
    settle().await;
    assert_eq!(host.state().phase, GamePhase::Playing);
    drain(&mut events);

    // the turn countdown expires; the expiry transaction is now in flight
    // against the slow store
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    // the opponent reassigns the turn while the transaction is committing
    let patch = SessionPatch {
        current_turn: Some(Some(1)),
        turn_started_at_ms: Some(clock.now_ms()),
        is_selecting_move: Some(false),
        selections: Some(Vec::new()),
        ..SessionPatch::default()
    };
    let reassigned = store.update("ROOMAA", patch).await.unwrap();

    // transaction completes (superseded), the coordinator re-reads and
    // falls in line with the opponent's write
    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;

    let state = host.state();
    assert_eq!(state.current_turn, Some(1));
    assert!(!state.is_selecting_move);
    assert_eq!(state.phase, GamePhase::Playing);
    assert_eq!(state.turn_started_at_ms, reassigned.turn_started_at_ms);

    // the stale expiry never produced a slide phase on this client
    let events = drain(&mut events);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, GameEvent::SlideRequired { .. })),
        "no duplicate slide phase after the dropped snapshot"
    );
    // and the only ticking countdown is the read-only one for the opponent
    assert!(events
        .iter()
        .any(|e| matches!(e, GameEvent::TurnTick { mine: false, .. })));
}
