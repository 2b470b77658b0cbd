use reqwest::{Method, StatusCode};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("rta: {0}")]
    Rta(#[from] rta::Error),

    #[error("request token: {0}")]
    Token(#[from] rta::TokenError),

    #[error("http request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {url}: {status}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
    },

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("subscribe reply carried no ConnectionId")]
    MissingConnectionId,

    #[error("activity handle has no id")]
    MissingHandleId,

    #[error("invalid session resource {0:?}")]
    InvalidResource(String),
}
