pub mod parse;
pub mod read;
pub mod write;

pub use read::read_ancestral_sequence;
pub use write::{AlignmentFormat, OutputSink, SpillWriter, WriterError};
