//! HTTP transport for the check-in flow.
//!
//! Each endpoint maps onto one operation of [`crate::session::CheckInFlow`]
//! against a session handle minted by `POST /sessions`.
//!
//! # Endpoints
//!
//! - `GET  /health` - liveness probe
//! - `POST /sessions` - create a session, then drive it through
//!   `/capture`, `/answers`, `/analysis`, `/chat` and `/dialogue`

pub mod routes;

pub use routes::{app_router, ApiError, AppState};
