//! deck-server: Control deck session gateway.
//!
//! Serves the authenticated WebSocket control channel and the HTTP control
//! endpoints (token lifecycle, pairing, health). Embedding applications
//! register their action handlers in an [`deck_core::ActionRegistry`] and
//! hand it to [`DeckServer::new`].

pub mod actions;
pub mod auth;
pub mod cache;
pub mod config;
pub mod control;
pub mod gateway;
pub mod handshake;
pub mod server;
pub mod transport;

pub use config::{Overrides, ServerConfig};
pub use server::DeckServer;
