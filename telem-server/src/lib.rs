//! telem-server – REST boundary for the telem telemetry task service.
//!
//! The library exposes the router, state, and configuration so integration
//! tests can drive the full HTTP surface; the binary in `main.rs` is a thin
//! startup wrapper.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ServerError;
pub use state::AppState;
