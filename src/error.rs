use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("local store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("message body is empty")]
    EmptyMessage,

    #[error("not logged in; run `orchid login` first")]
    NotLoggedIn,
}

pub type Result<T> = std::result::Result<T, ClientError>;
