//! Match state machine: membership, elimination and end-of-match detection

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::combat::CombatTracker;
use super::events::{MatchEvent, EVENT_CHANNEL_CAPACITY};
use super::state::{
    MatchConfig, MatchId, MatchState, PlayerId, PlayerMatchRecord, TransitionError,
};
use crate::util::time::wall_time;

/// Receives every confirmed state transition of a match.
///
/// The match calls this synchronously while it still holds its lifecycle
/// lock, so implementations must not call back into the match's mutating
/// operations.
pub trait StateListener: Send + Sync {
    fn on_state_change(&self, state: MatchState);

    /// Release timers and other resources; the match is being discarded
    fn halt(&self);
}

/// Zone/arena collaborator's own "final phase now" signal
pub type FinalPhaseProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Outcome of a credited elimination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Elimination {
    pub player_id: PlayerId,
    pub placement: u32,
    pub killer: Option<PlayerId>,
    pub assisters: Vec<PlayerId>,
}

/// Serializable point-in-time view of a match
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub id: MatchId,
    pub state: MatchState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds since activation, frozen once the match ends
    pub elapsed_secs: Option<u64>,
    pub min_players: usize,
    pub max_players: usize,
    pub player_count: usize,
    pub alive_count: usize,
    pub winner: Option<PlayerId>,
    pub players: Vec<PlayerMatchRecord>,
}

/// One elimination contest.
///
/// Player records, the alive-set and the spectator-set live in concurrent
/// maps so reads never block. Membership changes and state transitions
/// are serialized by a per-match lifecycle lock; combat bookkeeping is not.
pub struct Match {
    id: MatchId,
    config: MatchConfig,
    created_at: Instant,
    created_wall: DateTime<Utc>,
    state: RwLock<MatchState>,
    lifecycle: Mutex<()>,
    started_at: OnceLock<Instant>,
    ended_at: OnceLock<Instant>,
    players: DashMap<PlayerId, PlayerMatchRecord>,
    alive: DashSet<PlayerId>,
    spectators: DashSet<PlayerId>,
    winner: OnceLock<PlayerId>,
    combat: CombatTracker,
    events: broadcast::Sender<MatchEvent>,
    listener: OnceLock<Arc<dyn StateListener>>,
    final_phase_probe: OnceLock<FinalPhaseProbe>,
}

impl std::fmt::Debug for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Match")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Match {
    /// Create a match in WAITING.
    ///
    /// Panics if the configuration is invalid.
    pub fn new(id: MatchId, config: MatchConfig) -> Self {
        if let Err(e) = config.validate() {
            panic!("match {} constructed with invalid config: {}", id, e);
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let combat = CombatTracker::new(config.combat_window);

        Self {
            id,
            config,
            created_at: Instant::now(),
            created_wall: Utc::now(),
            state: RwLock::new(MatchState::Waiting),
            lifecycle: Mutex::new(()),
            started_at: OnceLock::new(),
            ended_at: OnceLock::new(),
            players: DashMap::new(),
            alive: DashSet::new(),
            spectators: DashSet::new(),
            winner: OnceLock::new(),
            combat,
            events,
            listener: OnceLock::new(),
            final_phase_probe: OnceLock::new(),
        }
    }

    /// Attach the listener notified on every transition. Only the first
    /// attachment takes effect.
    pub fn attach_listener(&self, listener: Arc<dyn StateListener>) -> bool {
        self.listener.set(listener).is_ok()
    }

    /// Inject the zone collaborator's final-phase signal. Only the first
    /// probe takes effect.
    pub fn set_final_phase_probe(&self, probe: FinalPhaseProbe) -> bool {
        self.final_phase_probe.set(probe).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: MatchEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> &MatchId {
        &self.id
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn state(&self) -> MatchState {
        *self.state.read()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at.get().copied()
    }

    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at.get().copied()
    }

    pub fn winner(&self) -> Option<PlayerId> {
        self.winner.get().copied()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    pub fn contains_player(&self, player_id: &PlayerId) -> bool {
        self.players.contains_key(player_id)
    }

    pub fn is_alive(&self, player_id: &PlayerId) -> bool {
        self.alive.contains(player_id)
    }

    pub fn is_spectator(&self, player_id: &PlayerId) -> bool {
        self.spectators.contains(player_id)
    }

    pub fn player(&self, player_id: &PlayerId) -> Option<PlayerMatchRecord> {
        self.players.get(player_id).map(|r| r.value().clone())
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|r| *r.key()).collect()
    }

    pub fn alive_players(&self) -> Vec<PlayerId> {
        self.alive.iter().map(|p| *p.key()).collect()
    }

    pub fn spectators(&self) -> Vec<PlayerId> {
        self.spectators.iter().map(|p| *p.key()).collect()
    }

    pub fn combat(&self) -> &CombatTracker {
        &self.combat
    }

    /// Every record, best finish first. Players still alive rank ahead of
    /// eliminated ones.
    pub fn standings(&self) -> Vec<PlayerMatchRecord> {
        let mut records: Vec<PlayerMatchRecord> =
            self.players.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| (!r.alive, r.placement.unwrap_or(u32::MAX)));
        records
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            id: self.id.clone(),
            state: self.state(),
            created_at: self.created_wall,
            started_at: self.started_at().map(wall_time),
            ended_at: self.ended_at().map(wall_time),
            elapsed_secs: self.started_at().map(|start| {
                let until = self.ended_at().unwrap_or_else(Instant::now);
                until.saturating_duration_since(start).as_secs()
            }),
            min_players: self.config.min_players,
            max_players: self.config.max_players,
            player_count: self.player_count(),
            alive_count: self.alive_count(),
            winner: self.winner(),
            players: self.standings(),
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Move to `next`, running its entry effects and notifying the
    /// listener before returning.
    pub fn set_state(&self, next: MatchState) -> Result<(), TransitionError> {
        let _guard = self.lifecycle.lock();
        self.transition(next)
    }

    /// Move from `expected` to `next` only if the match is still in
    /// `expected`. Returns false when the match has already moved on.
    pub fn advance(&self, expected: MatchState, next: MatchState) -> bool {
        let _guard = self.lifecycle.lock();
        if self.state() != expected {
            debug!(
                match_id = %self.id,
                expected = %expected,
                actual = %self.state(),
                "Stale transition request ignored"
            );
            return false;
        }
        self.transition(next).is_ok()
    }

    /// Admin start: a WAITING match with at least one player begins its
    /// countdown without reaching the minimum population.
    pub fn force_start(&self) -> bool {
        let _guard = self.lifecycle.lock();
        if self.state() != MatchState::Waiting || self.players.is_empty() {
            return false;
        }
        info!(match_id = %self.id, "Match force-started");
        self.transition(MatchState::Starting).is_ok()
    }

    /// Admin end: jump to ENDING without declaring a winner
    pub fn force_end(&self) -> bool {
        let _guard = self.lifecycle.lock();
        if self.state().is_ending() {
            return false;
        }
        info!(match_id = %self.id, "Match force-ended");
        self.transition(MatchState::Ending).is_ok()
    }

    /// Caller must hold the lifecycle lock
    fn transition(&self, next: MatchState) -> Result<(), TransitionError> {
        let previous = {
            let mut state = self.state.write();
            if !state.can_transition_to(next) {
                error!(
                    match_id = %self.id,
                    from = %*state,
                    to = %next,
                    "Rejected illegal transition"
                );
                return Err(TransitionError::Illegal {
                    from: *state,
                    to: next,
                });
            }
            std::mem::replace(&mut *state, next)
        };

        let now = Instant::now();
        match next {
            MatchState::Active => {
                let _ = self.started_at.set(now);
            }
            MatchState::Ending => {
                let _ = self.ended_at.set(now);
            }
            _ => {}
        }

        info!(
            match_id = %self.id,
            from = %previous,
            to = %next,
            players = self.players.len(),
            "Match state changed"
        );
        self.emit(MatchEvent::StateChanged {
            match_id: self.id.clone(),
            from: previous,
            to: next,
        });

        match next {
            MatchState::Waiting | MatchState::Starting => {}
            MatchState::Active => {
                self.alive.clear();
                for record in self.players.iter() {
                    self.alive.insert(*record.key());
                }
            }
            MatchState::FinalPhase => {
                self.emit(MatchEvent::FinalPhase {
                    match_id: self.id.clone(),
                });
            }
            MatchState::Ending => {
                self.emit(MatchEvent::MatchEnded {
                    match_id: self.id.clone(),
                    winner: self.winner(),
                    standings: self.standings(),
                });
            }
        }

        if let Some(listener) = self.listener.get() {
            listener.on_state_change(next);
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add a player while the match is joinable and below capacity.
    /// Reaching the minimum population starts the countdown.
    pub fn add_player(&self, record: PlayerMatchRecord) -> bool {
        let _guard = self.lifecycle.lock();
        let state = self.state();

        if !state.can_join() {
            debug!(
                match_id = %self.id,
                player_id = %record.player_id,
                state = %state,
                "Join rejected: match closed"
            );
            return false;
        }
        if self.players.len() >= self.config.max_players {
            debug!(match_id = %self.id, player_id = %record.player_id, "Join rejected: match full");
            return false;
        }
        if self.players.contains_key(&record.player_id) {
            debug!(
                match_id = %self.id,
                player_id = %record.player_id,
                "Join rejected: already a member"
            );
            return false;
        }

        let player_id = record.player_id;
        let display_name = record.display_name.clone();
        self.players.insert(player_id, record);
        let player_count = self.players.len();

        info!(
            match_id = %self.id,
            player_id = %player_id,
            player_count,
            "Player joined match"
        );
        self.emit(MatchEvent::PlayerJoined {
            match_id: self.id.clone(),
            player_id,
            display_name,
            player_count,
        });

        if state == MatchState::Waiting && player_count >= self.config.min_players {
            if let Err(e) = self.transition(MatchState::Starting) {
                error!(match_id = %self.id, error = %e, "Failed to start countdown");
            }
        }

        true
    }

    /// Remove a player from every set. Idempotent. Returns whether the
    /// player was a member.
    pub fn remove_player(&self, player_id: &PlayerId) -> bool {
        let _guard = self.lifecycle.lock();

        let removed = self.players.remove(player_id).is_some();
        self.alive.remove(player_id);
        self.spectators.remove(player_id);
        self.combat.clear_player(*player_id);

        if removed {
            info!(match_id = %self.id, player_id = %player_id, "Player left match");
            self.emit(MatchEvent::PlayerLeft {
                match_id: self.id.clone(),
                player_id: *player_id,
                player_count: self.players.len(),
            });
        }

        self.check_match_end();
        removed
    }

    // ------------------------------------------------------------------
    // Combat and elimination
    // ------------------------------------------------------------------

    /// Record a hit in the combat ledger and on both players' records.
    ///
    /// Hits are only counted between alive players of a match in progress;
    /// anything else (a late event from a player who left or was already
    /// eliminated) is dropped so it cannot earn kill credit.
    pub fn record_damage(&self, victim: PlayerId, attacker: PlayerId, amount: f32) {
        if !self.state().is_in_progress()
            || !self.alive.contains(&attacker)
            || !self.alive.contains(&victim)
        {
            debug!(
                match_id = %self.id,
                victim = %victim,
                attacker = %attacker,
                "Damage ignored: attacker or victim not alive"
            );
            return;
        }

        self.combat.record_damage(victim, attacker, amount);

        if let Some(mut record) = self.players.get_mut(&attacker) {
            record.damage_dealt += amount;
        }
        if let Some(mut record) = self.players.get_mut(&victim) {
            record.damage_taken += amount;
        }
    }

    /// Eliminate an alive player. No-op (false) if the player is not
    /// currently alive or the match is not in progress.
    pub fn eliminate_player(&self, player_id: &PlayerId) -> bool {
        let _guard = self.lifecycle.lock();

        let Some(placement) = self.eliminate_locked(player_id) else {
            return false;
        };

        self.emit(MatchEvent::PlayerEliminated {
            match_id: self.id.clone(),
            player_id: *player_id,
            placement,
            killer: None,
            assisters: Vec::new(),
        });

        self.check_match_end();
        true
    }

    /// Eliminate a player and settle kill and assist credit from the
    /// combat ledger, consuming the victim's ledger entries.
    pub fn eliminate_with_credit(&self, player_id: &PlayerId) -> Option<Elimination> {
        let _guard = self.lifecycle.lock();

        let placement = self.eliminate_locked(player_id)?;

        // Self-inflicted deaths earn nobody a kill, and credit only goes
        // to players still in the match
        let creditable = |p: &PlayerId| p != player_id && self.players.contains_key(p);
        let killer = self.combat.take_killer(*player_id).filter(creditable);
        let mut assisters: Vec<PlayerId> = self
            .combat
            .take_assisters(*player_id, killer)
            .into_iter()
            .filter(creditable)
            .collect();
        assisters.sort_unstable();

        if let Some(killer_id) = killer {
            if let Some(mut record) = self.players.get_mut(&killer_id) {
                record.kills += 1;
            }
        }
        for assister in &assisters {
            if let Some(mut record) = self.players.get_mut(assister) {
                record.assists += 1;
            }
        }

        info!(
            match_id = %self.id,
            player_id = %player_id,
            placement,
            killer = ?killer,
            assists = assisters.len(),
            "Elimination credited"
        );

        let elimination = Elimination {
            player_id: *player_id,
            placement,
            killer,
            assisters,
        };
        self.emit(MatchEvent::PlayerEliminated {
            match_id: self.id.clone(),
            player_id: elimination.player_id,
            placement,
            killer: elimination.killer,
            assisters: elimination.assisters.clone(),
        });

        self.check_match_end();
        Some(elimination)
    }

    /// Caller must hold the lifecycle lock. Returns the placement.
    fn eliminate_locked(&self, player_id: &PlayerId) -> Option<u32> {
        if !self.state().is_in_progress() {
            debug!(
                match_id = %self.id,
                player_id = %player_id,
                "Elimination ignored: match not in progress"
            );
            return None;
        }
        if self.alive.remove(player_id).is_none() {
            debug!(
                match_id = %self.id,
                player_id = %player_id,
                "Elimination ignored: player not alive"
            );
            return None;
        }

        self.spectators.insert(*player_id);
        let placement = self.alive.len() as u32 + 1;

        if let Some(mut record) = self.players.get_mut(player_id) {
            record.alive = false;
            if record.placement.is_none() {
                record.placement = Some(placement);
            }
        }

        info!(
            match_id = %self.id,
            player_id = %player_id,
            placement,
            remaining = self.alive.len(),
            "Player eliminated"
        );

        Some(placement)
    }

    /// Evaluate the end-of-match condition now. Used by the scheduler's
    /// win-check safety net.
    pub fn end_if_decided(&self) {
        let _guard = self.lifecycle.lock();
        self.check_match_end();
    }

    /// Sole authority for declaring a winner. Caller must hold the
    /// lifecycle lock.
    fn check_match_end(&self) {
        if !self.state().is_in_progress() {
            return;
        }

        match self.alive.len() {
            0 => {
                info!(match_id = %self.id, "No survivors, ending match");
            }
            1 => {
                let survivor = self.alive.iter().next().map(|p| *p.key());
                if let Some(winner) = survivor {
                    if self.winner.set(winner).is_ok() {
                        if let Some(mut record) = self.players.get_mut(&winner) {
                            record.placement = Some(1);
                        }
                        info!(match_id = %self.id, winner = %winner, "Winner decided");
                    }
                }
            }
            _ => return,
        }

        if let Err(e) = self.transition(MatchState::Ending) {
            error!(match_id = %self.id, error = %e, "Failed to end match");
        }
    }

    /// True while ACTIVE once the duration limit has passed or the zone
    /// collaborator reports its own final-phase condition.
    pub fn should_trigger_final_phase(&self) -> bool {
        if self.state() != MatchState::Active || !self.config.final_phase_enabled {
            return false;
        }

        let over_time = self
            .started_at()
            .is_some_and(|start| start.elapsed() > self.config.match_duration_limit);
        if over_time {
            return true;
        }

        self.final_phase_probe.get().is_some_and(|probe| probe())
    }

    /// Stop timers and drop combat state before the match is discarded
    pub fn teardown(&self) {
        if let Some(listener) = self.listener.get() {
            listener.halt();
        }
        self.combat.clear_all();
        debug!(match_id = %self.id, "Match torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    fn config(min: usize, max: usize) -> MatchConfig {
        MatchConfig {
            min_players: min,
            max_players: max,
            ..MatchConfig::default()
        }
    }

    fn new_match(min: usize, max: usize) -> Match {
        Match::new(MatchId::from_counter(1), config(min, max))
    }

    fn join(game: &Match, name: &str) -> PlayerId {
        let id = Uuid::new_v4();
        assert!(game.add_player(PlayerMatchRecord::new(id, name)));
        id
    }

    /// Records transitions instead of arming timers
    #[derive(Default)]
    struct RecordingListener {
        seen: parking_lot::Mutex<Vec<MatchState>>,
        halted: AtomicBool,
    }

    impl StateListener for RecordingListener {
        fn on_state_change(&self, state: MatchState) {
            self.seen.lock().push(state);
        }

        fn halt(&self) {
            self.halted.store(true, Ordering::SeqCst);
        }
    }

    /// Match with three players, already ACTIVE
    fn active_match() -> (Match, Vec<PlayerId>) {
        let game = new_match(3, 4);
        let ids = vec![join(&game, "a"), join(&game, "b"), join(&game, "c")];
        game.set_state(MatchState::Active).unwrap();
        (game, ids)
    }

    #[test]
    fn self_starts_at_minimum_population() {
        let game = new_match(3, 4);
        join(&game, "a");
        join(&game, "b");
        assert_eq!(game.state(), MatchState::Waiting);
        join(&game, "c");
        assert_eq!(game.state(), MatchState::Starting);

        // still joinable while counting down
        join(&game, "d");
        assert_eq!(game.player_count(), 4);
    }

    #[test]
    fn rejects_when_full_or_closed() {
        let game = new_match(1, 1);
        join(&game, "a");
        assert!(!game.add_player(PlayerMatchRecord::new(Uuid::new_v4(), "late")));
        assert_eq!(game.player_count(), 1);

        let game = new_match(2, 4);
        join(&game, "a");
        join(&game, "b");
        game.set_state(MatchState::Active).unwrap();
        assert!(!game.add_player(PlayerMatchRecord::new(Uuid::new_v4(), "late")));
        assert_eq!(game.alive_count(), 2);
    }

    #[test]
    fn duplicate_member_rejected() {
        let game = new_match(3, 4);
        let id = join(&game, "a");
        assert!(!game.add_player(PlayerMatchRecord::new(id, "again")));
        assert_eq!(game.player_count(), 1);
    }

    #[test]
    fn activation_snapshots_alive_set() {
        let (game, ids) = active_match();
        assert!(game.started_at().is_some());
        assert_eq!(game.alive_count(), 3);
        for id in &ids {
            assert!(game.is_alive(id));
        }
    }

    #[test]
    fn placement_counts_down_to_winner() {
        let (game, ids) = active_match();

        assert!(game.eliminate_player(&ids[0]));
        assert_eq!(game.player(&ids[0]).unwrap().placement, Some(3));
        assert!(game.is_spectator(&ids[0]));
        assert_eq!(game.state(), MatchState::Active);

        assert!(game.eliminate_player(&ids[1]));
        assert_eq!(game.player(&ids[1]).unwrap().placement, Some(2));

        assert_eq!(game.winner(), Some(ids[2]));
        assert_eq!(game.player(&ids[2]).unwrap().placement, Some(1));
        assert_eq!(game.state(), MatchState::Ending);
        assert!(game.ended_at().is_some());

        let order: Vec<PlayerId> = game.standings().iter().map(|r| r.player_id).collect();
        assert_eq!(order, vec![ids[2], ids[1], ids[0]]);
    }

    #[test]
    fn eliminating_twice_is_a_no_op() {
        let (game, ids) = active_match();
        assert!(game.eliminate_player(&ids[0]));
        assert!(!game.eliminate_player(&ids[0]));
        assert!(!game.eliminate_player(&Uuid::new_v4()));
        assert_eq!(game.alive_count(), 2);
    }

    #[test]
    fn no_elimination_before_start() {
        let game = new_match(3, 4);
        let id = join(&game, "a");
        assert!(!game.eliminate_player(&id));
        assert!(game.player(&id).unwrap().alive);
    }

    #[test]
    fn leaving_players_can_end_the_match() {
        let (game, ids) = active_match();
        game.remove_player(&ids[0]);
        game.remove_player(&ids[1]);
        // one left standing
        assert_eq!(game.winner(), Some(ids[2]));
        assert_eq!(game.state(), MatchState::Ending);

        let (game, ids) = active_match();
        game.eliminate_player(&ids[0]);
        // two players leave at once before the last elimination resolves
        game.remove_player(&ids[1]);
        assert_eq!(game.state(), MatchState::Ending);
        assert_eq!(game.winner(), Some(ids[2]));
    }

    #[test]
    fn last_player_leaving_ends_without_winner() {
        let game = new_match(1, 2);
        let id = join(&game, "a");
        game.set_state(MatchState::Active).unwrap();
        assert_eq!(game.alive_count(), 1);

        game.remove_player(&id);
        assert_eq!(game.state(), MatchState::Ending);
        assert_eq!(game.winner(), None);
    }

    #[test]
    fn remove_is_idempotent() {
        let game = new_match(3, 4);
        let id = join(&game, "a");
        assert!(game.remove_player(&id));
        assert!(!game.remove_player(&id));
        assert_eq!(game.player_count(), 0);
    }

    #[test]
    fn winner_is_set_once() {
        let (game, ids) = active_match();
        game.eliminate_player(&ids[0]);
        game.eliminate_player(&ids[1]);
        assert_eq!(game.winner(), Some(ids[2]));

        // The winner leaving afterwards doesn't change the result
        game.remove_player(&ids[2]);
        game.end_if_decided();
        assert_eq!(game.winner(), Some(ids[2]));
    }

    #[test]
    fn backward_transitions_are_rejected() {
        let (game, _) = active_match();
        let err = game.set_state(MatchState::Starting).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: MatchState::Active,
                to: MatchState::Starting
            }
        );
        assert_eq!(game.state(), MatchState::Active);
    }

    #[test]
    fn final_phase_is_only_reachable_from_active() {
        let game = new_match(2, 4);
        join(&game, "a");
        join(&game, "b");
        assert_err!(game.set_state(MatchState::FinalPhase));
        assert_eq!(game.state(), MatchState::Starting);

        assert_ok!(game.set_state(MatchState::Active));
        assert_ok!(game.set_state(MatchState::FinalPhase));
        assert_err!(game.set_state(MatchState::Active));
        assert_ok!(game.set_state(MatchState::Ending));
        assert_err!(game.set_state(MatchState::Ending));
    }

    #[test]
    fn advance_ignores_stale_requests() {
        let game = new_match(1, 2);
        join(&game, "a");
        assert_eq!(game.state(), MatchState::Starting);
        assert!(game.force_end());
        assert!(!game.advance(MatchState::Starting, MatchState::Active));
        assert_eq!(game.state(), MatchState::Ending);
    }

    #[test]
    fn force_start_needs_a_player() {
        let game = new_match(4, 8);
        assert!(!game.force_start());
        join(&game, "a");
        assert!(game.force_start());
        assert_eq!(game.state(), MatchState::Starting);
        assert!(!game.force_start());
    }

    #[test]
    fn listener_sees_every_transition() {
        let game = new_match(2, 2);
        let listener = Arc::new(RecordingListener::default());
        assert!(game.attach_listener(listener.clone()));

        join(&game, "a");
        let b = join(&game, "b");
        game.set_state(MatchState::Active).unwrap();
        game.eliminate_player(&b);
        game.teardown();

        assert_eq!(
            *listener.seen.lock(),
            vec![MatchState::Starting, MatchState::Active, MatchState::Ending]
        );
        assert!(listener.halted.load(Ordering::SeqCst));
    }

    #[test]
    fn credited_elimination_updates_records() {
        let (game, ids) = active_match();
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        game.record_damage(c, a, 30.0);
        game.record_damage(c, b, 50.0);

        let elimination = game.eliminate_with_credit(&c).unwrap();
        assert_eq!(elimination.placement, 3);
        assert_eq!(elimination.killer, Some(b));
        assert_eq!(elimination.assisters, vec![a]);

        let killer = game.player(&b).unwrap();
        assert_eq!(killer.kills, 1);
        assert_eq!(killer.damage_dealt, 50.0);
        let assister = game.player(&a).unwrap();
        assert_eq!(assister.assists, 1);
        assert_eq!(game.player(&c).unwrap().damage_taken, 80.0);

        // The ledger entry was consumed
        assert_eq!(game.combat().take_killer(c), None);
    }

    #[test]
    fn self_inflicted_death_credits_nobody() {
        let (game, ids) = active_match();
        game.record_damage(ids[0], ids[0], 100.0);
        let elimination = game.eliminate_with_credit(&ids[0]).unwrap();
        assert_eq!(elimination.killer, None);
        assert!(elimination.assisters.is_empty());
        assert_eq!(game.player(&ids[0]).unwrap().kills, 0);
    }

    #[test]
    fn hits_from_departed_attacker_are_ignored() {
        let (game, ids) = active_match();
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        game.record_damage(c, a, 10.0);
        game.remove_player(&b);
        game.record_damage(c, b, 50.0);
        assert_eq!(game.player(&c).unwrap().damage_taken, 10.0);
        assert!(!game.combat().is_in_combat(b));

        let elimination = game.eliminate_with_credit(&c).unwrap();
        assert_eq!(elimination.killer, Some(a));
        assert!(elimination.assisters.is_empty());
        assert_eq!(game.player(&a).unwrap().kills, 1);
    }

    #[test]
    fn hits_from_eliminated_attacker_are_ignored() {
        let (game, ids) = active_match();
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        assert!(game.eliminate_player(&a));
        assert!(game.is_spectator(&a));
        assert_eq!(game.spectators(), vec![a]);

        game.record_damage(c, a, 50.0);
        game.record_damage(c, b, 10.0);
        assert_eq!(game.player(&a).unwrap().damage_dealt, 0.0);

        let elimination = game.eliminate_with_credit(&c).unwrap();
        assert_eq!(elimination.killer, Some(b));
        assert!(elimination.assisters.is_empty());
        assert_eq!(game.player(&b).unwrap().kills, 1);
        assert_eq!(game.winner(), Some(b));
    }

    #[test]
    fn combat_window_comes_from_config() {
        let game = Match::new(
            MatchId::from_counter(1),
            MatchConfig {
                combat_window: Duration::from_secs(4),
                ..MatchConfig::default()
            },
        );
        assert_eq!(game.combat().window(), Duration::from_secs(4));
    }

    #[test]
    fn hits_before_activation_are_ignored() {
        let game = new_match(2, 4);
        let a = join(&game, "a");
        let b = join(&game, "b");
        assert_eq!(game.state(), MatchState::Starting);

        game.record_damage(b, a, 25.0);
        assert_eq!(game.combat().last_damage(b), None);
        assert_eq!(game.player(&b).unwrap().damage_taken, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn final_phase_after_duration_limit() {
        let game = Match::new(
            MatchId::from_counter(1),
            MatchConfig {
                min_players: 2,
                max_players: 4,
                match_duration_limit: Duration::from_secs(60),
                ..MatchConfig::default()
            },
        );
        join(&game, "a");
        join(&game, "b");
        assert!(!game.should_trigger_final_phase());
        game.set_state(MatchState::Active).unwrap();
        assert!(!game.should_trigger_final_phase());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(game.should_trigger_final_phase());

        game.set_state(MatchState::FinalPhase).unwrap();
        assert!(!game.should_trigger_final_phase());
    }

    #[test]
    fn final_phase_from_zone_probe() {
        let (game, _) = active_match();
        let closed = Arc::new(AtomicBool::new(false));
        let signal = closed.clone();
        assert!(game.set_final_phase_probe(Arc::new(move || signal.load(Ordering::SeqCst))));

        assert!(!game.should_trigger_final_phase());
        closed.store(true, Ordering::SeqCst);
        assert!(game.should_trigger_final_phase());
    }

    #[test]
    fn disabled_final_phase_never_triggers() {
        let game = Match::new(
            MatchId::from_counter(1),
            MatchConfig {
                min_players: 1,
                max_players: 2,
                final_phase_enabled: false,
                ..MatchConfig::default()
            },
        );
        game.set_final_phase_probe(Arc::new(|| true));
        join(&game, "a");
        game.set_state(MatchState::Active).unwrap();
        assert!(!game.should_trigger_final_phase());
    }

    #[test]
    fn events_follow_the_lifecycle() {
        let game = new_match(2, 2);
        let mut rx = game.subscribe();
        let a = join(&game, "a");
        join(&game, "b");

        assert!(matches!(rx.try_recv().unwrap(), MatchEvent::PlayerJoined { player_count: 1, .. }));
        assert!(matches!(rx.try_recv().unwrap(), MatchEvent::PlayerJoined { player_count: 2, .. }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            MatchEvent::StateChanged {
                to: MatchState::Starting,
                ..
            }
        ));

        game.set_state(MatchState::Active).unwrap();
        game.eliminate_player(&a);
        let mut saw_end = false;
        while let Ok(event) = rx.try_recv() {
            if let MatchEvent::MatchEnded { winner, standings, .. } = event {
                assert!(winner.is_some());
                assert_eq!(standings.len(), 2);
                saw_end = true;
            }
        }
        assert!(saw_end);
    }

    #[test]
    #[should_panic(expected = "invalid config")]
    fn invalid_config_fails_fast() {
        Match::new(MatchId::from_counter(1), config(0, 4));
    }
}
