//! Match lifecycle engine

pub mod combat;
pub mod events;
pub mod r#match;
pub mod registry;
pub mod scheduler;
pub mod state;

pub use combat::{CombatTracker, DamageRecord};
pub use events::MatchEvent;
pub use r#match::{Elimination, FinalPhaseProbe, Match, MatchSummary, StateListener};
pub use registry::{MatchRegistry, QuickJoinError, RegistryConfig};
pub use scheduler::MatchScheduler;
pub use state::{
    MatchConfig, MatchId, MatchState, PlayerId, PlayerMatchRecord, TransitionError,
};
