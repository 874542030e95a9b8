use formats::page::PageError;
use thiserror::Error;

/// A page could not be obtained. Ends the session; never retried.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("malformed page: {0}")]
    Decode(#[from] PageError),
}

impl NetworkError {
    /// HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
