use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parser::{Cli, Commands, IndelArgs, OutputArgs, OutputFormat, SimulateArgs};

/// Scratch directory holding a newick file and the run outputs.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub tree: PathBuf,
}

impl Fixture {
    pub fn new(newick: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create scratch directory");
        let tree = dir.path().join("input.nwk");
        std::fs::write(&tree, newick).expect("Failed to write tree file");
        Self { dir, tree }
    }

    pub fn output_prefix(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Builder over the `simulate` subcommand arguments, defaulting to a seeded
/// JC run in PHYLIP format.
pub struct SimulateRunBuilder {
    sim: SimulateArgs,
    indel: IndelArgs,
    output: OutputArgs,
}

impl SimulateRunBuilder {
    pub fn new(fixture: &Fixture, prefix: &str) -> Self {
        Self {
            sim: SimulateArgs {
                tree: fixture.tree.clone(),
                length: Some(300),
                alphabet: "DNA".to_string(),
                model: "JC".to_string(),
                branch_scale: 1.0,
                num_datasets: 1,
                seed: Some(0xA11C0_u64),
                length_ratio: None,
                simulation_thresh: None,
                ancestral_sequence: None,
                write_internal: false,
                fundi_taxa: None,
                fundi_proportion: None,
            },
            indel: IndelArgs {
                insertion_ratio: 0.0,
                deletion_ratio: 0.0,
                insertion_distribution: "POW{1.7,100}".to_string(),
                deletion_distribution: "POW{1.7,100}".to_string(),
                rebuild_indel_history: 1.0,
            },
            output: OutputArgs {
                output: fixture.output_prefix(prefix),
                format: OutputFormat::Phylip,
                compress: false,
                overwrite: false,
            },
        }
    }

    pub fn length(mut self, length: usize) -> Self {
        self.sim.length = Some(length);
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.sim.model = model.to_string();
        self
    }

    pub fn length_ratio(mut self, ratio: f64) -> Self {
        self.sim.length_ratio = Some(ratio);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.output.format = format;
        self
    }

    pub fn num_datasets(mut self, num: usize) -> Self {
        self.sim.num_datasets = num;
        self
    }

    pub fn indels(mut self, insertion: f64, deletion: f64) -> Self {
        self.indel.insertion_ratio = insertion;
        self.indel.deletion_ratio = deletion;
        self
    }

    pub fn overwrite(mut self) -> Self {
        self.output.overwrite = true;
        self
    }

    pub fn run(self) -> anyhow::Result<()> {
        phylosim_rs::run(Cli {
            verbose: 0,
            quiet: true,
            commands: Commands::Simulate {
                sim: self.sim,
                indel: self.indel,
                output: self.output,
            },
        })
    }
}

/// Parse a PHYLIP alignment back into `(num_taxa, length, name -> row)`.
pub fn read_phylip(path: &Path) -> (usize, usize, HashMap<String, String>) {
    let contents = std::fs::read_to_string(path)
        .unwrap_or_else(|_| panic!("Failed to open {path:?}"));
    let mut lines = contents.lines();
    let header = lines.next().expect("Empty PHYLIP file");
    let mut fields = header.split_whitespace();
    let num: usize = fields.next().expect("Malformed header").parse().expect("Malformed taxa count");
    let len: usize = fields.next().expect("Malformed header").parse().expect("Malformed length");

    let mut rows = HashMap::new();
    for line in lines.filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split_whitespace();
        let name = fields.next().expect("Missing taxon name").to_string();
        let seq = fields.next().expect("Missing sequence").to_string();
        rows.insert(name, seq);
    }
    (num, len, rows)
}
