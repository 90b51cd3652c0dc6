//! Test utilities for the lookout workspace
//!
//! Starts real agents and gateways on loopback ports with a temporary log
//! root, so tests can drive the whole fetch path over TCP.

pub mod helpers;

pub use helpers::cluster::{LOOPBACK_WORKER, TestCluster};
pub use helpers::log_files::{append_log, numbered_lines, write_log};
pub use helpers::metadata_feed::MetadataFeed;
pub use helpers::status::PlacedStatus;
pub use helpers::wait_utils::wait_for;
