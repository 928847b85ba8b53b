//! # icyserver - HTTP surface for the ICYCast proxy
//!
//! Thin boundary layer over [`icystation`]: axum handlers for the stream,
//! metadata, cover and listing endpoints, a [`Server`] wrapper with graceful
//! SIGINT/SIGTERM shutdown, and logging initialization.

pub mod api;
pub mod logging;
pub mod server;

pub use api::{ApiDoc, AppState};
pub use server::Server;
