use std::{fs, path::Path};

use anyhow::Result;
use located_error::prelude::*;

mod error;
pub use error::ReaderError;

/// Read an ancestral sequence from `path`.
///
/// Accepts either a FASTA file (the first record is used, subsequent records
/// are ignored with a warning) or a bare sequence file. Whitespace is
/// stripped; character-to-state conversion is the caller's concern.
pub fn read_ancestral_sequence(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .map_err(ReaderError::OpenFile)
        .with_loc(|| format!("While reading ancestral sequence '{}'", path.display()))?;

    let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
    let sequence: String = match lines.peek() {
        Some(header) if header.starts_with('>') => {
            lines.next(); // skip header
            let seq: String = lines.by_ref()
                .take_while(|line| !line.starts_with('>'))
                .collect();
            if lines.next().is_some() {
                log::warn!(
                    "'{}' contains more than one FASTA record. Only the first is used as the ancestral sequence",
                    path.display()
                );
            }
            seq
        },
        _ => lines.collect(),
    };

    if sequence.is_empty() {
        return Err(ReaderError::EmptySequence)
            .with_loc(|| format!("While reading ancestral sequence '{}'", path.display()))
    }
    Ok(sequence.split_whitespace().collect())
}
