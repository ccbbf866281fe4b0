//! Join throttling for the HTTP surface

use governor::{
    clock::DefaultClock,
    state::{keyed::DefaultKeyedStateStore, InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::game::PlayerId;

/// Server-wide limiter
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limiter keyed by player
pub type PlayerLimiter = RateLimiter<PlayerId, DefaultKeyedStateStore<PlayerId>, DefaultClock>;

/// Join attempts accepted per second across all players
pub const JOIN_RATE_LIMIT: u32 = 50;

/// Join attempts accepted per second from one player
pub const PLAYER_JOIN_RATE_LIMIT: u32 = 2;

fn quota(per_second: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN))
}

pub fn create_limiter(per_second: u32) -> Arc<Limiter> {
    Arc::new(RateLimiter::direct(quota(per_second)))
}

pub fn create_player_limiter(per_second: u32) -> Arc<PlayerLimiter> {
    Arc::new(RateLimiter::keyed(quota(per_second)))
}
