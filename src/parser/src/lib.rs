use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgEnum, Args, Parser, Subcommand};
use located_error::LocatedError;
use log::debug;
use serde::{Deserialize, Serialize};

mod error;
pub use error::ParserError;

#[derive(Parser, Debug, Serialize, Deserialize)]
#[clap(name="phylosim-rs", author, version, about, long_about = None)]
#[clap(propagate_version = true)]
/// PHYLOSIM-rs: simulate multiple sequence alignments along a phylogeny
pub struct Cli {
    /// Set the verbosity level (-v -vv -vvv)
    ///
    /// Set the verbosity level of this program. Multiple levels allowed {n}
    ///
    /// -v: Info  |  -vv: Debug  | -vvv: Trace {n}
    ///
    /// Note that the program will still output warnings by default, even when this flag is off.
    /// Use the --quiet/-q flag to disable them.
    #[clap(short='v', long, parse(from_occurrences), global=true)]
    pub verbose: u8,

    /// Disable warnings.
    ///
    /// By default, warnings are emitted and redirected to the console, even when verbose mode
    /// is off. Use this argument to disable this. Only errors will be displayed.
    #[clap(short='q', long, global=true)]
    pub quiet: bool,

    #[clap(subcommand)]
    pub commands: Commands,
}

impl Cli {
    /// Serialize command line arguments within a `.yaml` file.
    ///
    /// # Behavior
    /// - File naming follows the convention '{current time}-simulate.yaml', with the current
    ///   time formatted as `YYYY`-`MM`-`DD`T`hhmmss`.
    /// - The file is written next to the user-provided `--output` prefix.
    /// - Commands other than `simulate` are not serialized.
    pub fn serialize(&self) -> Result<()> {
        let Commands::Simulate { output, .. } = &self.commands else {
            return Ok(())
        };

        let serialized = serde_yaml::to_string(&self)
            .map_err(|err| ParserError::SerializeYaml {
                path: output.output.display().to_string(),
                msg: err.to_string(),
            })
            .loc("While serializing command line arguments")?;
        debug!("\n---- Command line args ----\n{serialized}\n---");

        let current_time = chrono::offset::Local::now().format("%Y-%m-%dT%H%M%S");
        let output_dir = output.output.parent().unwrap_or_else(|| Path::new("."));
        let output_file = output_dir.join(format!("{current_time}-simulate.yaml"));

        std::fs::write(&output_file, serialized)
            .map_err(|err| ParserError::SerializeYaml {
                path: output_file.display().to_string(),
                msg: err.to_string(),
            })
            .loc("While writing command line arguments")?;
        Ok(())
    }

    /// Deserialize a `.yaml` file into command line arguments.
    pub fn from_yaml(yaml: &Path) -> Result<Self> {
        let file = std::fs::File::open(yaml)
            .with_loc(|| format!("While opening '{}'", yaml.display()))?;
        serde_yaml::from_reader(file)
            .map_err(|err| ParserError::DeserializeYaml {
                path: yaml.display().to_string(),
                msg: err.to_string(),
            })
            .loc("While deserializing command line arguments")
    }
}

#[derive(Subcommand, Debug, Serialize, Deserialize)]
pub enum Commands {
    /// Simulate one or more multiple sequence alignments along a tree.
    Simulate {
        #[clap(flatten)]
        sim: SimulateArgs,
        #[clap(flatten)]
        indel: IndelArgs,
        #[clap(flatten)]
        output: OutputArgs,
    },

    /// Run phylosim-rs using a previously serialized YAML argument file.
    FromYaml {
        /// Path to an input YAML arguments file.
        #[clap(short, long, required = true)]
        yaml: PathBuf,
    },

    /// Display citation information.
    Cite,
}

/// Core simulation arguments.
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct SimulateArgs {
    /// Path to an input newick tree file.
    #[clap(short = 't', long, required = true)]
    pub tree: PathBuf,

    /// Target alignment length, in characters.
    ///
    /// Required unless an ancestral sequence is provided through
    /// --ancestral-sequence, in which case it defaults to that sequence's
    /// length. Codon and NT2AA alphabets require a multiple of three.
    #[clap(short = 'L', long)]
    pub length: Option<usize>,

    /// State alphabet: BIN, DNA, AA, NT2AA, CODON or MORPH{n}.
    #[clap(short = 'a', long, default_value = "DNA")]
    pub alphabet: String,

    /// Substitution model string, e.g. 'HKY{2.0}+G{4,0.5}+I{0.1}+ASC'.
    #[clap(short = 'm', long, default_value = "JC")]
    pub model: String,

    /// Global branch length multiplier.
    #[clap(long, default_value_t = 1.0)]
    pub branch_scale: f64,

    /// Number of replicate alignments to simulate.
    #[clap(short = 'n', long, default_value_t = 1)]
    pub num_datasets: usize,

    /// Fixed random seed, for reproducible runs.
    #[clap(long)]
    pub seed: Option<u64>,

    /// Verbatim override of the ascertainment over-simulation length ratio.
    #[clap(long)]
    pub length_ratio: Option<f64>,

    /// Verbatim override of the per-branch simulation method threshold.
    #[clap(long)]
    pub simulation_thresh: Option<f64>,

    /// Path to an ancestral sequence (FASTA or bare text) assigned to the
    /// root. Padded with stationary draws when shorter than --length.
    #[clap(long)]
    pub ancestral_sequence: Option<PathBuf>,

    /// Also write the sequences of internal nodes.
    #[clap(long)]
    pub write_internal: bool,

    /// Comma-separated taxa subjected to functional divergence.
    /// Requires --fundi-proportion.
    #[clap(long)]
    pub fundi_taxa: Option<String>,

    /// Proportion of sites permuted by functional divergence.
    /// Requires --fundi-taxa.
    #[clap(long)]
    pub fundi_proportion: Option<f64>,
}

/// Insertion/deletion process arguments.
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct IndelArgs {
    /// Insertion rate, relative to the substitution rate.
    #[clap(long, default_value_t = 0.0)]
    pub insertion_ratio: f64,

    /// Deletion rate, relative to the substitution rate.
    #[clap(long, default_value_t = 0.0)]
    pub deletion_ratio: f64,

    /// Insertion size distribution: NB{r,p}, POW{a,max}, LAV{a,max},
    /// GEO{p} or USER{p1,...}.
    #[clap(long, default_value = "POW{1.7,100}")]
    pub insertion_distribution: String,

    /// Deletion size distribution (same grammar as --insertion-distribution).
    #[clap(long, default_value = "POW{1.7,100}")]
    pub deletion_distribution: String,

    /// κ: fraction of the leaf count processed between two rebuilds of the
    /// indel history structure during reconciliation.
    #[clap(long, default_value_t = 1.0)]
    pub rebuild_indel_history: f64,
}

/// Output arguments.
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct OutputArgs {
    /// Output file prefix. The format extension is appended.
    #[clap(short = 'o', long, default_value = "phylosim")]
    pub output: PathBuf,

    /// Output alignment format.
    #[clap(long, arg_enum, default_value = "phylip")]
    pub format: OutputFormat,

    /// Gzip-compress the output alignment(s).
    #[clap(long)]
    pub compress: bool,

    /// Overwrite pre-existing output files.
    #[clap(long)]
    pub overwrite: bool,
}

#[derive(ArgEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Phylip,
    Fasta,
}

/// Split a user-provided comma-separated list, trimming whitespace and
/// dropping empty items.
pub fn parse_comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
