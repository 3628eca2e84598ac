//! Error types for abi-bind

use std::sync::Arc;

use alloy::primitives::{Address, Bytes};
use thiserror::Error;

/// Main error type for contract bindings.
///
/// Cloneable so a terminal subscription error can be both kept for
/// inspection and handed to the consumer.
#[derive(Error, Debug, Clone)]
pub enum BindError {
    /// Malformed or incomplete ABI descriptor
    #[error("invalid ABI descriptor: {0}")]
    Descriptor(String),

    #[error("method '{0}' not found in ABI")]
    MethodNotFound(String),

    #[error("event '{0}' not found in ABI")]
    EventNotFound(String),

    /// Argument count or type does not match the descriptor
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Returned data or log payload does not match the declared layout
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Network or node failure, passed through untouched
    #[error("transport error: {0:#}")]
    Transport(Arc<anyhow::Error>),

    #[error("execution reverted: {}", reason.as_deref().unwrap_or("<no reason>"))]
    Reverted {
        reason: Option<String>,
        data: Bytes,
    },

    /// A call returned nothing because no contract is deployed there
    #[error("no contract code at address {0}")]
    NoCode(Address),

    /// The subscription ended; not a failure by itself
    #[error("subscription closed")]
    SubscriptionClosed,
}

impl BindError {
    pub fn transport(err: anyhow::Error) -> Self {
        BindError::Transport(Arc::new(err))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, BindError::Transport(_))
    }

    pub fn is_decoding(&self) -> bool {
        matches!(self, BindError::Decoding(_))
    }
}

pub type Result<T, E = BindError> = std::result::Result<T, E>;
