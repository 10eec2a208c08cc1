use std::path::PathBuf;
use thiserror::Error;

/// The one failure the refresh pipeline distinguishes. Everything after a
/// successful fetch degrades to fewer results instead.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build http client")]
    ClientBuild(#[source] reqwest::Error),

    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to read response body from {url}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read menu snapshot {}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch.file_path missing for file mode")]
    MissingFilePath,
}
