//! Semantic match events for announcement collaborators
//! The engine only emits these; formatting and delivery happen elsewhere.

use serde::Serialize;

use super::state::{MatchId, MatchState, PlayerId, PlayerMatchRecord};

/// Seconds-remaining values at which a countdown is announced
pub const COUNTDOWN_CHECKPOINTS: [u32; 8] = [30, 15, 10, 5, 4, 3, 2, 1];

/// Capacity of each match's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

pub fn is_countdown_checkpoint(seconds_remaining: u32) -> bool {
    COUNTDOWN_CHECKPOINTS.contains(&seconds_remaining)
}

/// Events emitted by a match and its scheduler
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    /// Lifecycle transition completed
    StateChanged {
        match_id: MatchId,
        from: MatchState,
        to: MatchState,
    },

    PlayerJoined {
        match_id: MatchId,
        player_id: PlayerId,
        display_name: String,
        player_count: usize,
    },

    PlayerLeft {
        match_id: MatchId,
        player_id: PlayerId,
        player_count: usize,
    },

    /// Countdown announcement
    Countdown {
        match_id: MatchId,
        seconds_remaining: u32,
    },

    /// Forced-engagement mode begins
    FinalPhase { match_id: MatchId },

    PlayerEliminated {
        match_id: MatchId,
        player_id: PlayerId,
        placement: u32,
        /// None for environmental deaths or stale damage
        killer: Option<PlayerId>,
        assisters: Vec<PlayerId>,
    },

    /// Match reached ENDING
    MatchEnded {
        match_id: MatchId,
        winner: Option<PlayerId>,
        standings: Vec<PlayerMatchRecord>,
    },
}

impl MatchEvent {
    pub fn match_id(&self) -> &MatchId {
        match self {
            Self::StateChanged { match_id, .. }
            | Self::PlayerJoined { match_id, .. }
            | Self::PlayerLeft { match_id, .. }
            | Self::Countdown { match_id, .. }
            | Self::FinalPhase { match_id }
            | Self::PlayerEliminated { match_id, .. }
            | Self::MatchEnded { match_id, .. } => match_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoints() {
        assert!(is_countdown_checkpoint(30));
        assert!(is_countdown_checkpoint(1));
        assert!(!is_countdown_checkpoint(29));
        assert!(!is_countdown_checkpoint(0));
    }

    #[test]
    fn events_are_tagged() {
        let event = MatchEvent::Countdown {
            match_id: MatchId::from_counter(7),
            seconds_remaining: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "countdown");
        assert_eq!(json["match_id"], "match-7");
        assert_eq!(json["seconds_remaining"], 5);
    }
}
