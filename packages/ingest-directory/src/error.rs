use thiserror::Error;

pub type Result<T> = std::result::Result<T, DirectoryError>;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("retries exhausted after {attempts} attempts against {url}")]
    RetriesExhausted { attempts: u32, url: String },

    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("manager source file error: {0}")]
    ManagerSource(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
