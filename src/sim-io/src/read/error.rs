use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Failed to open input file")]
    OpenFile(#[source] std::io::Error),

    #[error("Input file does not contain any sequence data")]
    EmptySequence,
}
