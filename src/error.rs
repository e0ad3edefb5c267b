//! Crate-level error type and `Result` alias.
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resample failed: cannot produce {width}x{height} ({reason})")]
    Resample {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    #[error("Export failed for {path:?}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl Error {
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn export<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Error::Export {
            path: path.into(),
            source,
        }
    }
}
