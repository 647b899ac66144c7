use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("No conversation is open")]
    NotOpen,
}

pub type Result<T> = std::result::Result<T, SyncError>;
