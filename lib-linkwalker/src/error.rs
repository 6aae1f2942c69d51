use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad configuration: {0}")]
    Config(String),
    #[error("bad start url `{raw}`: {detail}")]
    BadStartUrl { raw: String, detail: String },
    #[error("worker pool failed: {0}")]
    WorkerPool(String),
    #[error("ipc failure: {0}")]
    Ipc(String),
    #[error("{0}")]
    Custom(String),
}

impl From<String> for Error {
    fn from(this: String) -> Error {
        Error::Custom(this)
    }
}
