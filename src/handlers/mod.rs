//! HTTP and WebSocket request handlers
//!
//! - `relay` - Relay/multiplexer WebSocket endpoints and health check

pub mod relay;
