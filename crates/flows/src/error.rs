use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading a flow document.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The document does not exist.
    #[error("Flow definition not found at {0}")]
    NotFound(PathBuf),

    /// The document could not be read.
    #[error("Failed to read flow definition {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML.
    #[error("Invalid flow document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The document parsed but has the wrong shape.
    #[error("Invalid flow document: {0}")]
    InvalidDocument(String),
}

/// Result type for flow loading.
pub type Result<T> = std::result::Result<T, FlowError>;
