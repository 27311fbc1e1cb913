use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScrapeError>;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Page render failed; the page is skipped.
    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Renderer or store unavailable at startup; fatal for the session.
    #[error("initialization failed: {0}")]
    Init(String),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ScrapeError {
    pub fn fetch(url: &str, message: impl ToString) -> Self {
        ScrapeError::Fetch {
            url: url.to_string(),
            message: message.to_string(),
        }
    }
}
