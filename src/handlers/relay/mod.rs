//! Relay/multiplexer WebSocket handlers
//!
//! The relay connects one or more model-bearing upstream peers with any
//! number of downstream observers.
//!
//! # Endpoints
//!
//! | Mode   | Upstream    | Downstream  | Direction     |
//! |--------|-------------|-------------|---------------|
//! | simple | `/model`    | `/client`   | up → down     |
//! | debug  | `/provider` | `/consumer` | bidirectional |
//!
//! In simple mode at most one upstream peer is connected; a newer one
//! replaces the previous. Peers receive only frames published after they
//! connected.

mod handler;
pub mod hub;

pub use handler::{
    CONNECTION_COMPLETE, downstream_handler, health_handler, unknown_path_handler,
    upstream_handler,
};
pub use hub::{PeerRole, RelayHub};
