use thiserror::Error;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),
    /// Refused locally without contacting the server.
    #[error("{0}")]
    Refused(&'static str),
}
