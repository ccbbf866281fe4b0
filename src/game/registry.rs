//! Process-wide directory of live matches and the player -> match index

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::r#match::{Match, MatchSummary};
use super::scheduler::MatchScheduler;
use super::state::{MatchConfig, MatchId, MatchState, PlayerId, PlayerMatchRecord};

/// Attempts `quick_join` makes before giving up on a racing fill
const QUICK_JOIN_ATTEMPTS: usize = 3;

/// Why `quick_join` placed nobody
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuickJoinError {
    #[error("player is already in match {0}")]
    AlreadyInMatch(MatchId),

    #[error("no open slot after {0} attempts")]
    NoOpenSlot(usize),
}

/// Registry-level timing and defaults
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Config for matches created by `quick_join`
    pub match_defaults: MatchConfig,
    /// How long an ENDING match stays up for result display
    pub end_grace: Duration,
    /// How long an empty WAITING match may sit before it is reclaimed
    pub idle_timeout: Duration,
    /// Period of the background reclamation task
    pub reclaim_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            match_defaults: MatchConfig::default(),
            end_grace: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(300),
            reclaim_interval: Duration::from_secs(5),
        }
    }
}

/// Directory of all live matches.
///
/// Constructed once by the process wiring and torn down with
/// [`MatchRegistry::shutdown`]. For every `player -> match` index entry
/// the referenced match is live and has the player in its player set.
pub struct MatchRegistry {
    config: RegistryConfig,
    matches: DashMap<MatchId, Arc<Match>>,
    player_index: DashMap<PlayerId, MatchId>,
    next_id: AtomicU64,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

impl MatchRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            matches: DashMap::new(),
            player_index: DashMap::new(),
            next_id: AtomicU64::new(0),
            reclaimer: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a WAITING match with its scheduler running
    pub fn create_match(&self, config: MatchConfig) -> Arc<Match> {
        let id = MatchId::from_counter(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let game = Arc::new(Match::new(id.clone(), config));

        let scheduler = MatchScheduler::attach(&game);
        scheduler.start();

        self.matches.insert(id.clone(), game.clone());
        info!(
            match_id = %id,
            min_players = game.config().min_players,
            max_players = game.config().max_players,
            "Created new match"
        );
        game
    }

    /// Add a player to `game`. Fails without side effects if the player is
    /// already in any match, the match is no longer live, or the match
    /// rejects the join.
    pub fn join_match(
        &self,
        player_id: PlayerId,
        player_name: impl Into<String>,
        game: &Arc<Match>,
    ) -> bool {
        match self.player_index.entry(player_id) {
            Entry::Occupied(existing) => {
                debug!(
                    player_id = %player_id,
                    current_match = %existing.get(),
                    "Join rejected: already in a match"
                );
                false
            }
            Entry::Vacant(slot) => {
                // Holding the map guard keeps reclamation from removing the
                // match while the player is being added.
                let Some(live) = self.matches.get(game.id()) else {
                    debug!(match_id = %game.id(), "Join rejected: match no longer live");
                    return false;
                };
                if !Arc::ptr_eq(live.value(), game) {
                    return false;
                }

                if !live.add_player(PlayerMatchRecord::new(player_id, player_name)) {
                    return false;
                }

                slot.insert(game.id().clone());
                true
            }
        }
    }

    /// Remove a player from its match. No-op if the player is in none.
    pub fn leave_match(&self, player_id: &PlayerId) -> bool {
        let Some((_, match_id)) = self.player_index.remove(player_id) else {
            return false;
        };

        let game = self.matches.get(&match_id).map(|m| m.value().clone());
        if let Some(game) = game {
            game.remove_player(player_id);
        }
        true
    }

    /// Any joinable match with a free slot. Selection order is unspecified.
    pub fn find_joinable_match(&self) -> Option<Arc<Match>> {
        self.matches
            .iter()
            .find(|entry| {
                let game = entry.value();
                game.state().can_join() && game.player_count() < game.config().max_players
            })
            .map(|entry| entry.value().clone())
    }

    /// Join any open match, creating one with the default config when none
    /// has room. Returns the joined match.
    pub fn quick_join(
        &self,
        player_id: PlayerId,
        player_name: &str,
    ) -> Result<Arc<Match>, QuickJoinError> {
        if let Some(current) = self.match_of(&player_id) {
            return Err(QuickJoinError::AlreadyInMatch(current));
        }

        for _ in 0..QUICK_JOIN_ATTEMPTS {
            let game = self
                .find_joinable_match()
                .unwrap_or_else(|| self.create_match(self.config.match_defaults.clone()));
            if self.join_match(player_id, player_name, &game) {
                return Ok(game);
            }
            // A concurrent join for the same player won
            if let Some(current) = self.match_of(&player_id) {
                return Err(QuickJoinError::AlreadyInMatch(current));
            }
        }

        warn!(
            player_id = %player_id,
            attempts = QUICK_JOIN_ATTEMPTS,
            "Quick join found no open slot"
        );
        Err(QuickJoinError::NoOpenSlot(QUICK_JOIN_ATTEMPTS))
    }

    /// End a match without a winner
    pub fn force_end(&self, match_id: &MatchId) -> bool {
        self.get(match_id).is_some_and(|game| game.force_end())
    }

    pub fn get(&self, match_id: &MatchId) -> Option<Arc<Match>> {
        self.matches.get(match_id).map(|m| m.value().clone())
    }

    pub fn match_of(&self, player_id: &PlayerId) -> Option<MatchId> {
        self.player_index.get(player_id).map(|m| m.value().clone())
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.player_index.len()
    }

    pub fn summaries(&self) -> Vec<MatchSummary> {
        let mut summaries: Vec<MatchSummary> =
            self.matches.iter().map(|m| m.value().summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    fn is_reclaimable(&self, game: &Match, now: Instant) -> bool {
        match game.state() {
            MatchState::Ending => game
                .ended_at()
                .is_some_and(|ended| now.saturating_duration_since(ended) > self.config.end_grace),
            MatchState::Waiting => {
                game.player_count() == 0
                    && now.saturating_duration_since(game.created_at()) > self.config.idle_timeout
            }
            _ => false,
        }
    }

    /// Remove finished matches past their grace period and abandoned empty
    /// matches past the idle timeout. Returns how many were removed.
    pub fn reclaim_expired(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<MatchId> = self
            .matches
            .iter()
            .filter(|entry| self.is_reclaimable(entry.value(), now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut reclaimed = 0;
        for match_id in candidates {
            // Re-checked under the shard lock in case a join slipped in
            let removed = self
                .matches
                .remove_if(&match_id, |_, game| self.is_reclaimable(game, now));
            if let Some((_, game)) = removed {
                self.release(&game);
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            info!(
                reclaimed,
                remaining = self.matches.len(),
                "Reclaimed expired matches"
            );
        }
        reclaimed
    }

    /// Drop index entries of a match already removed from the map
    fn release(&self, game: &Match) {
        for player_id in game.player_ids() {
            self.player_index
                .remove_if(&player_id, |_, match_id| match_id == game.id());
        }
        game.teardown();
        info!(match_id = %game.id(), state = %game.state(), "Match removed from registry");
    }

    /// Spawn the periodic reclamation task. Calling it again replaces the
    /// previous task.
    pub fn spawn_reclaimer(self: &Arc<Self>) {
        let registry = Arc::downgrade(self);
        let period = self.config.reclaim_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.reclaim_expired();
            }
        });

        if let Some(previous) = self.reclaimer.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Force every live match to ENDING, stop all timers and empty both
    /// maps. Does not wait for in-flight timer callbacks.
    pub fn shutdown(&self) {
        if let Some(handle) = self.reclaimer.lock().take() {
            handle.abort();
        }

        let live: Vec<Arc<Match>> = self.matches.iter().map(|m| m.value().clone()).collect();
        for game in &live {
            game.force_end();
            game.teardown();
        }

        self.matches.clear();
        self.player_index.clear();
        info!(matches = live.len(), "Match registry shut down");
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
