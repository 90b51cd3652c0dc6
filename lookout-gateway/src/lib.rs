//! Gateway side of the log pipeline: keeps a cache of which worker runs
//! each function instance and fetches log pages from those workers.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod metadata;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod watchdog;

pub use gateway::Gateway;
