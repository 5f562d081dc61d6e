//! Network transports: the WebSocket listener and TLS plumbing.

pub mod tls;
pub mod websocket;
