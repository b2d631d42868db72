use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Message is empty")]
    EmptyMessage,

    #[error("No conversation is open")]
    NoActiveConversation,

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Failures the user can act on, as opposed to transport trouble.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClientError::Api { status, .. } if (400..500).contains(status))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
