use thiserror::Error;

use crate::membership::NodeAddress;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Membership error: {0}")]
    Membership(String),

    #[error("Failed to notify node {node}: {message}")]
    Notify { node: NodeAddress, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid record {record_id}: {reason}")]
    InvalidRecord { record_id: u64, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WardenError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
