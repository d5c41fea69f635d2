use thiserror::Error;

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Transcode session response is missing {0}")]
    InvalidSessionResponse(&'static str),

    #[error("Proxy template must contain a {{url}} placeholder: {0}")]
    InvalidProxyTemplate(String),

    #[error("Player has shut down")]
    PlayerClosed,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

pub type TetherResult<T> = Result<T, TetherError>;
