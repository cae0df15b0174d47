//! Error types shared by the decision engine and the node adapter.

use crate::graph::{ChannelId, PubKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or inconsistent configuration, detected before any RPC call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Request parameters that can never succeed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// RPC, connection or response decoding failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("no route from channel {out_channel} back through {last_hop} for {amount_sats} sat")]
    NoRoute {
        out_channel: ChannelId,
        last_hop: PubKey,
        amount_sats: u64,
    },

    #[error("insufficient balance in channel {out_channel} to send {amount_sats} sat")]
    InsufficientBalance {
        out_channel: ChannelId,
        amount_sats: u64,
    },

    #[error(
        "fee limit of {max_fee_sats} sat exceeded sending {amount_sats} sat from channel {out_channel} through {last_hop}"
    )]
    FeeExceeded {
        out_channel: ChannelId,
        last_hop: PubKey,
        amount_sats: u64,
        max_fee_sats: u64,
    },
}

impl Error {
    /// Payment failures which end progress on one channel pair but not the whole command.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NoRoute { .. } | Error::InsufficientBalance { .. } | Error::FeeExceeded { .. }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Transport(format!("malformed response: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
