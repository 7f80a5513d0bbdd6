use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Failed to write to file: inner writer returned an io error")]
    IoError(#[from] std::io::Error),

    #[error("Gzip compression failed: {0}")]
    Compression(String),

    #[error("Malformed spill record '{0}'")]
    InvalidSpillRecord(String),
}
