use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed pair id in response: {0}")]
    MalformedPair(String),

    #[error("price endpoint unavailable: {0}")]
    Unavailable(String),
}
