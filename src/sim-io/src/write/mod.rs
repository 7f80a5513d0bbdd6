use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use ahash::AHashMap;
use alphabet::{State, STATE_UNKNOWN};
use anyhow::Result;
use gzp::{deflate::Gzip, par::compress::{ParCompress, ParCompressBuilder}, ZWriter};
use located_error::prelude::*;
use log::debug;

mod error;
pub use error::WriterError;

use crate::parse::{can_write_file, create_parent_directory};

/// Alignment output flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentFormat {
    Phylip,
    Fasta,
}

impl AlignmentFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Phylip => "phy",
            Self::Fasta  => "fa",
        }
    }
}

/// Either a plain buffered file or a parallel-gzip stream.
enum SinkTarget {
    Plain(BufWriter<File>),
    Gzip(ParCompress<Gzip>),
}

impl SinkTarget {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Plain(w) => w,
            Self::Gzip(w)  => w,
        }
    }
}

/// Formats and writes one simulated alignment.
///
/// The PHYLIP header is emitted at creation time, which is what permits
/// streaming leaves one at a time during the traversal.
pub struct OutputSink {
    target: SinkTarget,
    format: AlignmentFormat,
    name_width: usize,
    path: PathBuf,
}

impl OutputSink {
    /// Open `path` (creating parent directories) and emit the header.
    ///
    /// `seq_chars` is the readable-character length of every sequence and
    /// `name_width` the longest taxon name (PHYLIP column padding).
    pub fn create(
        path: &Path,
        format: AlignmentFormat,
        compress: bool,
        overwrite: bool,
        num_leaves: usize,
        seq_chars: usize,
        name_width: usize,
    ) -> Result<Self> {
        let path = match compress {
            true  => path.with_extension(format!("{}.gz", format.extension())),
            false => path.with_extension(format.extension()),
        };
        create_parent_directory(&path)?;
        can_write_file(overwrite, &path)?;

        let file = File::create(&path)
            .map_err(WriterError::IoError)
            .with_loc(|| format!("While creating output file '{}'", path.display()))?;
        let target = match compress {
            true  => SinkTarget::Gzip(ParCompressBuilder::<Gzip>::new().from_writer(file)),
            false => SinkTarget::Plain(BufWriter::new(file)),
        };

        debug!("Writing alignment to '{}'", path.display());
        let mut sink = Self { target, format, name_width, path };
        if format == AlignmentFormat::Phylip {
            writeln!(sink.target.writer(), "{num_leaves} {seq_chars}")
                .map_err(WriterError::IoError)
                .loc("While writing alignment header")?;
        }
        Ok(sink)
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Write a single leaf row.
    pub fn write_sequence(&mut self, name: &str, seq_chars: &str) -> Result<()> {
        let width = self.name_width;
        let result = match self.format {
            AlignmentFormat::Phylip => {
                writeln!(self.target.writer(), "{name: <width$} {seq_chars}")
            },
            AlignmentFormat::Fasta => {
                writeln!(self.target.writer(), ">{name}\n{seq_chars}")
            },
        };
        result.map_err(WriterError::IoError)
            .with_loc(|| format!("While writing sequence '{name}'"))
    }

    /// Flush and finalize the stream. Mandatory for gzip output: dropping
    /// the sink without finishing truncates the trailer.
    pub fn finish(self) -> Result<()> {
        match self.target {
            SinkTarget::Plain(mut w) => w.flush()
                .map_err(WriterError::IoError)
                .loc("While flushing alignment")?,
            SinkTarget::Gzip(mut w) => w.finish()
                .map_err(|e| WriterError::Compression(e.to_string()))
                .loc("While finalizing gzip stream")?,
        }
        Ok(())
    }
}

/// Temporary spill store for leaf sequences whose final coordinates are not
/// known until indel reconciliation. One `name@len@s0 s1 ...` line per leaf,
/// with `-1` encoding the unknown state.
pub struct SpillWriter {
    file: tempfile::NamedTempFile,
}

impl SpillWriter {
    pub fn create() -> Result<Self> {
        let file = tempfile::NamedTempFile::new()
            .map_err(WriterError::IoError)
            .loc("While creating spill file")?;
        Ok(Self { file })
    }

    pub fn write_states(&mut self, name: &str, seq: &[State]) -> Result<()> {
        let mut line = String::with_capacity(name.len() + 2 + seq.len() * 2);
        line.push_str(name);
        line.push('@');
        line.push_str(&seq.len().to_string());
        line.push('@');
        for (i, &state) in seq.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            match state {
                STATE_UNKNOWN => line.push_str("-1"),
                s             => line.push_str(&s.to_string()),
            }
        }
        writeln!(self.file, "{line}")
            .map_err(WriterError::IoError)
            .with_loc(|| format!("While spilling sequence '{name}'"))
    }

    /// Re-materialize every spilled sequence.
    pub fn read_back(mut self) -> Result<AHashMap<String, Vec<State>>> {
        use WriterError::InvalidSpillRecord;
        self.file.flush().map_err(WriterError::IoError).loc("While flushing spill file")?;
        self.file.as_file_mut().seek(SeekFrom::Start(0))
            .map_err(WriterError::IoError)
            .loc("While rewinding spill file")?;

        let mut map = AHashMap::new();
        for line in BufReader::new(self.file.as_file()).lines() {
            let line = line.map_err(WriterError::IoError).loc("While reading spill file")?;
            let mut fields = line.splitn(3, '@');
            let (name, len, states) = match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(len), Some(states)) => (name, len, states),
                _ => return Err(InvalidSpillRecord(line.clone())).loc("While parsing spill file"),
            };
            let len: usize = len.parse()
                .map_err(|_| InvalidSpillRecord(line.clone()))
                .loc("While parsing spill record length")?;
            let seq: Vec<State> = states.split_whitespace()
                .map(|s| match s {
                    "-1" => Ok(STATE_UNKNOWN),
                    s    => s.parse::<State>().map_err(|_| InvalidSpillRecord(line.clone())),
                })
                .collect::<Result<_, _>>()
                .loc("While parsing spill record states")?;
            if seq.len() != len {
                return Err(InvalidSpillRecord(line.clone())).loc("While validating spill record")
            }
            map.insert(name.to_string(), seq);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_file(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn phylip_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let mut sink = OutputSink::create(&path, AlignmentFormat::Phylip, false, false, 2, 4, 5).unwrap();
        sink.write_sequence("A", "ACGT").unwrap();
        sink.write_sequence("Bravo", "TTTT").unwrap();
        let out = dir.path().join("out.phy");
        sink.finish().unwrap();

        assert_eq!(read_file(&out), "2 4\nA     ACGT\nBravo TTTT\n");
    }

    #[test]
    fn fasta_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let mut sink = OutputSink::create(&path, AlignmentFormat::Fasta, false, false, 1, 4, 1).unwrap();
        sink.write_sequence("A", "AC-T").unwrap();
        sink.finish().unwrap();

        assert_eq!(read_file(&dir.path().join("out.fa")), ">A\nAC-T\n");
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        std::fs::write(dir.path().join("out.phy"), "occupied").unwrap();
        assert!(OutputSink::create(&path, AlignmentFormat::Phylip, false, false, 1, 1, 1).is_err());
        assert!(OutputSink::create(&path, AlignmentFormat::Phylip, false, true, 1, 1, 1).is_ok());
    }

    #[test]
    fn spill_round_trip() {
        let mut spill = SpillWriter::create().unwrap();
        spill.write_states("A", &[0, 3, STATE_UNKNOWN, 2]).unwrap();
        spill.write_states("B", &[1, 1]).unwrap();

        let map = spill.read_back().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["A"], vec![0, 3, STATE_UNKNOWN, 2]);
        assert_eq!(map["B"], vec![1, 1]);
    }
}
