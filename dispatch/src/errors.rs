use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("could not decode {what}: {source}")]
    Decode {
        what: &'static str,
        source: prost::DecodeError,
    },
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("could not access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("could not fetch {url}: {source}")]
    Fetch { url: String, source: reqwest::Error },
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned {0}")]
    Status(reqwest::StatusCode),
}
