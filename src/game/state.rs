//! Match lifecycle states, per-player records and match configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::config::ConfigError;

/// Opaque, globally-unique player identifier
pub type PlayerId = Uuid;

/// Unique identifier of a match, allocated by the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    /// Build an id from the registry's monotonically increasing counter
    pub fn from_counter(n: u64) -> Self {
        Self(format!("match-{}", n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle of a single match. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    /// Assembling players
    Waiting,
    /// Minimum population reached, countdown running
    Starting,
    /// Elimination in progress
    Active,
    /// Forced-engagement late phase
    FinalPhase,
    /// Result display, awaiting reclamation
    Ending,
}

impl MatchState {
    /// Players may still join
    pub fn can_join(self) -> bool {
        matches!(self, Self::Waiting | Self::Starting)
    }

    /// Eligible for win-condition checks and elimination
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Active | Self::FinalPhase)
    }

    pub fn is_ending(self) -> bool {
        self == Self::Ending
    }

    fn rank(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Starting => 1,
            Self::Active => 2,
            Self::FinalPhase => 3,
            Self::Ending => 4,
        }
    }

    /// Strictly forward moves are legal, and the final phase can only be
    /// entered from an active match.
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::FinalPhase {
            return self == Self::Active;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "WAITING",
            Self::Starting => "STARTING",
            Self::Active => "ACTIVE",
            Self::FinalPhase => "FINAL_PHASE",
            Self::Ending => "ENDING",
        };
        f.write_str(name)
    }
}

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Illegal match transition from {from} to {to}")]
    Illegal { from: MatchState, to: MatchState },
}

/// Per-player statistics for one match. Kept after elimination so the
/// final standings can be shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMatchRecord {
    pub player_id: PlayerId,
    pub display_name: String,
    pub alive: bool,
    pub kills: u32,
    pub assists: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
    /// Finishing rank, 1 = winner. Set once.
    pub placement: Option<u32>,
}

impl PlayerMatchRecord {
    pub fn new(player_id: PlayerId, display_name: impl Into<String>) -> Self {
        Self {
            player_id,
            display_name: display_name.into(),
            alive: true,
            kills: 0,
            assists: 0,
            damage_dealt: 0.0,
            damage_taken: 0.0,
            placement: None,
        }
    }
}

/// Per-match configuration, fixed at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Population that triggers the countdown
    pub min_players: usize,
    pub max_players: usize,
    /// Elapsed time in ACTIVE after which the final phase is forced
    pub match_duration_limit: Duration,
    pub countdown_secs: u32,
    pub final_phase_enabled: bool,
    /// How long an attacker stays eligible for kill/assist credit
    pub combat_window: Duration,
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_players == 0 {
            return Err(ConfigError::InvalidMatchConfig(
                "min_players must be at least 1".to_string(),
            ));
        }
        if self.max_players < self.min_players {
            return Err(ConfigError::InvalidMatchConfig(format!(
                "max_players ({}) is below min_players ({})",
                self.max_players, self.min_players
            )));
        }
        Ok(())
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 16,
            match_duration_limit: Duration::from_secs(600),
            countdown_secs: 30,
            final_phase_enabled: true,
            combat_window: Duration::from_secs(10),
        }
    }
}
