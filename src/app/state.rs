//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::util::rate_limit::{
    create_limiter, create_player_limiter, Limiter, PlayerLimiter, JOIN_RATE_LIMIT,
    PLAYER_JOIN_RATE_LIMIT,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<MatchRegistry>,
    pub join_limiter: Arc<Limiter>,
    pub player_join_limiter: Arc<PlayerLimiter>,
}

impl AppState {
    /// Wrap an already constructed registry. The registry's lifecycle is
    /// owned by the caller, not by the HTTP layer.
    pub fn new(config: Config, registry: Arc<MatchRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            join_limiter: create_limiter(JOIN_RATE_LIMIT),
            player_join_limiter: create_player_limiter(PLAYER_JOIN_RATE_LIMIT),
        }
    }
}
