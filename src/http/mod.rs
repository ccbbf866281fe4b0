//! HTTP admin and collaborator surface

pub mod routes;

pub use routes::{build_router, AppError};
