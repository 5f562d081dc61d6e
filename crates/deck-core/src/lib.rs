//! deck-core: Shared protocol library for the control deck gateway.
//!
//! Provides the JSON wire messages and envelope builders, the error taxonomy,
//! the bearer-token store, and the action-handler contract that the gateway
//! dispatches through.

pub mod action;
pub mod error;
pub mod messages;
pub mod token;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Re-export commonly used items at crate root.
pub use action::{ActionFuture, ActionHandler, ActionRegistry};
pub use error::{DeckError, DeckResult};
pub use messages::{Envelope, InboundMessage, CLOSE_MESSAGE_TOO_BIG, CLOSE_UNAUTHORIZED};
pub use token::{generate_token_value, Metadata, Token, TokenManager, TokenStats};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
