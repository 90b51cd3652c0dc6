//! Wire protocol shared by lookout agents, gateways and the CLI.
//!
//! Messages are bincode-encoded envelopes behind a 4-byte big-endian length
//! prefix, carried over TCP.

pub mod client;
pub mod errors;
pub mod frame;
pub mod protocol;
pub mod server;
