//! Admission control: rate limiting and device pairing.

pub mod pairing;
pub mod rate_limit;

pub use pairing::{PairingCode, PairingManager, DEFAULT_PAIRING_TTL_SECS};
pub use rate_limit::{RateDecision, RateLimiter, RateLimiterStats, RatePolicy, WEBSOCKET_SCOPE};
