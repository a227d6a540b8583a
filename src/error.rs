use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error("unknown product: {0}")]
    UnknownProduct(String),
    #[error("{product}: unable to fetch candles after {attempts} attempt(s)")]
    FetchFailed {
        product: String,
        attempts: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
