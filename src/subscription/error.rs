use thiserror::Error;

use super::FeedKey;

/// Failure modes of the changefeed/subscription path.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Subscription ceiling reached; new requests are rejected explicitly
    /// rather than silently dropped.
    #[error("subscription limit of {max} reached, rejecting {key:?}")]
    SubscriptionLimit { max: usize, key: FeedKey },

    /// Reconnect attempts exhausted. Fatal: the manager stops retrying,
    /// records this in the connection error history, and reports it exactly
    /// once to observers.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("heartbeat failed: {message}")]
    Heartbeat { message: String },

    #[error("changefeed connection failed: {message}")]
    Connect { message: String },

    /// The manager actor is gone (shut down).
    #[error("subscription manager is shut down")]
    ChannelClosed,
}

impl SubscriptionError {
    pub fn heartbeat(message: impl Into<String>) -> Self {
        Self::Heartbeat {
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }
}
