//! Error types for sessions and snippet persistence.

use crate::session::SessionState;

/// Errors raised by the playground client core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The execution channel failed to open or broke mid-run.
    #[error("connection error: {0}")]
    Connection(String),

    /// Input was submitted while no run was active. Nothing was sent.
    #[error("not connected: input is only forwarded while a run is active (session is {state})")]
    ForwardingRejected { state: SessionState },

    /// A payload was sent on a channel that is not open.
    #[error("channel is not open")]
    ChannelNotOpen,

    /// The snippet store rejected a request, or the exchange failed.
    #[error("snippet store error: {0}")]
    Persistence(String),

    /// The snippet store has no snippet under this identifier.
    #[error("snippet not found: {0}")]
    NotFound(String),

    /// An endpoint URL could not be built from the configuration.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
