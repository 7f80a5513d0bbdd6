use std::{fs, path::Path};

use anyhow::Result;
use located_error::LocatedError;

mod error;
pub use error::ParseError;

/// Attempt to create the parent directories of a path (if needed).
pub fn create_parent_directory(path: &Path) -> Result<()> {
    use ParseError::CreateParentDirectory;
    let parent_dir = path.parent().unwrap_or(path);
    fs::create_dir_all(parent_dir)
        .map_err(CreateParentDirectory)
        .with_loc(|| format!("While attempting to create output directory '{}'", path.display()))?;
    Ok(())
}

/// Refuse to clobber an existing file unless the user explicitly allowed
/// overwriting.
pub fn can_write_file(overwrite: bool, path: &Path) -> Result<()> {
    if !overwrite && path.exists() {
        return Err(ParseError::OverwriteDisallowed { path: path.to_path_buf() })
            .loc("While ensuring that file permissions were appropriate")
    }
    Ok(())
}
