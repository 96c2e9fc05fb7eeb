//! Errors surfaced by the client handles

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported url scheme {0:?}, expected ws or wss")]
    UnsupportedScheme(String),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The connection driver is gone, usually after `dispose`
    #[error("connection driver has stopped")]
    Closed,
}
