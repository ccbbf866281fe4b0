//! Arena match server - match lifecycle engine for a last-one-standing
//! elimination game
//!
//! - `game`: match state machine, per-match scheduler, combat attribution
//!   and the process-wide match registry
//! - `http`: admin and collaborator endpoints over the registry
//! - `config`: environment-driven configuration

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
