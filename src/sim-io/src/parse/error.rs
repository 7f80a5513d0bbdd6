use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to create parent directory")]
    CreateParentDirectory(#[source] std::io::Error),

    #[error("'{path}' already exists. Use '--overwrite' to allow overwriting")]
    OverwriteDisallowed { path: PathBuf },
}
