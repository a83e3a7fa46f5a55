pub mod api;
pub mod config;
pub mod error;
pub mod failover;
pub mod graph;
pub mod leadership;
pub mod membership;
pub mod node;
pub mod partition;
pub mod recovery;
pub mod shutdown;
pub mod store;
