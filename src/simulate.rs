use std::path::{Path, PathBuf};

use alphabet::{Alphabet, AlphabetKind, State};
use anyhow::Result;
use indicatif::ProgressBar;
use located_error::prelude::*;
use logger::Logger;
use parser::{IndelArgs, OutputArgs, OutputFormat, SimulateArgs};
use phylotree::Tree;
use rayon::prelude::*;
use sim_io::{read_ancestral_sequence, AlignmentFormat, OutputSink};
use simseq::{
    FunDiConfig, IndelParams, LabeledSeq, LeafSink, SimError, SimOutput, SimParams, Simulator,
};
use submodels::Model;

/// Run the `simulate` subcommand: one or more replicate alignments along
/// the input tree.
pub fn run(sim: &SimulateArgs, indel: &IndelArgs, out: &OutputArgs) -> Result<()> {
    // ----------------------------- Alphabet & ancestral sequence.
    let kind: AlphabetKind = sim.alphabet.parse()
        .loc("While parsing the --alphabet argument")?;
    let alphabet = Alphabet::new(kind);

    let ancestral: Option<Vec<State>> = match &sim.ancestral_sequence {
        Some(path) => {
            let chars = read_ancestral_sequence(path)?;
            let states = alphabet.parse_sequence(&chars)
                .with_loc(|| format!("While parsing ancestral sequence '{}'", path.display()))?;
            info!("Read an ancestral sequence of {} site(s)", states.len());
            Some(states)
        },
        None => None,
    };
    let target_states = resolve_length(sim.length, ancestral.as_deref(), &alphabet)?;

    // ----------------------------- Substitution model.
    let mut model = Model::parse(&sim.model, kind)
        .with_loc(|| format!("While parsing model string '{}'", sim.model))?;
    info!("Substitution model: '{}' on a {} alphabet ({} states)",
        model.spec(), kind, model.num_states());

    // ----------------------------- Input tree.
    let mut tree = Tree::from_file(&sim.tree)?;
    info!("Read a tree with {} taxa", tree.num_leaves());
    if !tree.is_rooted() {
        debug!("Input tree is unrooted: grafting a root");
        tree.graft_root();
    } else if model.ascertainment() {
        warn!("Ascertainment-bias correction is calibrated on unrooted trees. The rooted input is used as-is");
    }

    // ----------------------------- Indel & FunDi configuration.
    let indels = build_indel_params(indel)?;
    let fundi = build_fundi_config(sim)?;

    // ----------------------------- RNG.
    let mut rng = match sim.seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None       => fastrand::Rng::new(),
    };

    // ----------------------------- Replicates.
    let num_datasets = sim.num_datasets.max(1);
    let format = match out.format {
        OutputFormat::Phylip => AlignmentFormat::Phylip,
        OutputFormat::Fasta  => AlignmentFormat::Fasta,
    };
    let bar = match Logger::try_multi() {
        Some(multi) if num_datasets > 1 => multi.add(ProgressBar::new(num_datasets as u64)),
        _ => ProgressBar::hidden(),
    };

    for dataset in 1..=num_datasets {
        let prefix = dataset_prefix(&out.output, dataset, num_datasets);
        let params = SimParams {
            seq_length: target_states,
            branch_scale: sim.branch_scale,
            write_internal: sim.write_internal,
            indels: indels.clone(),
            fundi: fundi.clone(),
            length_ratio_override: sim.length_ratio,
            threshold_override: sim.simulation_thresh,
            rebuild_indel_history: indel.rebuild_indel_history,
            ancestral: ancestral.clone(),
            cancel: None,
        };
        run_dataset(&tree, &mut model, params, &mut rng, &alphabet, &prefix, format, out)
            .with_loc(|| format!("While simulating dataset {dataset}/{num_datasets}"))?;
        bar.inc(1);
    }
    bar.finish_and_clear();
    info!("Simulated {num_datasets} dataset(s)");
    Ok(())
}

/// Lazily created sink: the simulator only streams in modes where every
/// sequence has its final length from the start, so the header can be
/// written upon the first leaf.
struct StreamSink<'a> {
    sink: Option<OutputSink>,
    alphabet: &'a Alphabet,
    prefix: &'a Path,
    format: AlignmentFormat,
    out: &'a OutputArgs,
    num_leaves: usize,
    name_width: usize,
}

impl LeafSink for StreamSink<'_> {
    fn stream_leaf(&mut self, name: &str, seq: &[State]) -> Result<()> {
        if self.sink.is_none() {
            self.sink = Some(OutputSink::create(
                self.prefix,
                self.format,
                self.out.compress,
                self.out.overwrite,
                self.num_leaves,
                self.alphabet.printed_len(seq.len()),
                self.name_width,
            )?);
        }
        let row = self.alphabet.seq_to_string(seq);
        self.sink.as_mut()
            .loc("Sink was created above")?
            .write_sequence(name, &row)
    }
}

#[allow(clippy::too_many_arguments)]
fn run_dataset(
    tree: &Tree,
    model: &mut Model,
    params: SimParams,
    rng: &mut fastrand::Rng,
    alphabet: &Alphabet,
    prefix: &Path,
    format: AlignmentFormat,
    out: &OutputArgs,
) -> Result<()> {
    let write_internal = params.write_internal;
    let mut sink = StreamSink {
        sink: None,
        alphabet,
        prefix,
        format,
        out,
        num_leaves: tree.num_leaves(),
        name_width: tree.max_name_len(),
    };
    let SimOutput { leaves, internals, final_length, .. } =
        Simulator::new(tree, model, params, rng).run(&mut sink)?;

    match leaves {
        // Every leaf was streamed while the traversal ran.
        None => match sink.sink {
            Some(sink) => sink.finish(),
            None => Ok(()), // zero-taxon degenerate tree
        },
        Some(leaves) => write_collected(
            alphabet, prefix, format, out, &internals, final_length, leaves, write_internal,
        ),
    }
}

/// Write a fully collected alignment, fanning the state-to-character
/// conversion out across threads before the sequential write.
#[allow(clippy::too_many_arguments)]
fn write_collected(
    alphabet: &Alphabet,
    prefix: &Path,
    format: AlignmentFormat,
    out: &OutputArgs,
    internals: &[LabeledSeq],
    final_length: usize,
    leaves: Vec<LabeledSeq>,
    write_internal: bool,
) -> Result<()> {
    let internals = match write_internal {
        true  => internals,
        false => &[],
    };
    let num_rows = leaves.len() + internals.len();
    let name_width = leaves.iter()
        .chain(internals)
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);

    let mut sink = OutputSink::create(
        prefix,
        format,
        out.compress,
        out.overwrite,
        num_rows,
        alphabet.printed_len(final_length),
        name_width,
    )?;

    let rows: Vec<(String, String)> = leaves.par_iter()
        .chain(internals.par_iter())
        .map(|(name, seq)| (name.clone(), alphabet.seq_to_string(seq)))
        .collect();
    for (name, row) in rows {
        sink.write_sequence(&name, &row)?;
    }
    sink.finish()
}

/// Resolve the target length in states from `--length` (characters) or the
/// ancestral sequence.
fn resolve_length(
    length_chars: Option<usize>,
    ancestral: Option<&[State]>,
    alphabet: &Alphabet,
) -> Result<usize> {
    if let Some(chars) = length_chars {
        if chars == 0 {
            bail!("--length must be strictly positive");
        }
        return match alphabet.kind() {
            AlphabetKind::Codon => match chars % 3 {
                0 => Ok(chars / 3),
                _ => Err(anyhow!("A codon alignment length must be a multiple of 3 (got {chars})")),
            },
            // Amino-acid output: three underlying nucleotide sites per
            // printed character.
            AlphabetKind::Nt2Aa => Ok(chars * 3),
            _ => Ok(chars),
        }
    }
    match ancestral {
        Some(states) if !states.is_empty() => Ok(states.len()),
        _ => Err(SimError::MissingSequenceLength).loc("While resolving the target length"),
    }
}

fn build_indel_params(indel: &IndelArgs) -> Result<Option<IndelParams>> {
    if indel.insertion_ratio < 0.0 || indel.deletion_ratio < 0.0 {
        bail!("Indel ratios must be non-negative");
    }
    if indel.insertion_ratio == 0.0 && indel.deletion_ratio == 0.0 {
        return Ok(None)
    }
    let insertion_dist = indel.insertion_distribution.parse()
        .loc("While parsing the --insertion-distribution argument")?;
    let deletion_dist = indel.deletion_distribution.parse()
        .loc("While parsing the --deletion-distribution argument")?;
    info!(
        "Indel process enabled (insertion ratio {}, deletion ratio {})",
        indel.insertion_ratio, indel.deletion_ratio
    );
    Ok(Some(IndelParams::new(
        indel.insertion_ratio,
        indel.deletion_ratio,
        insertion_dist,
        deletion_dist,
    )))
}

fn build_fundi_config(sim: &SimulateArgs) -> Result<Option<FunDiConfig>> {
    match (&sim.fundi_taxa, sim.fundi_proportion) {
        (None, None) => Ok(None),
        (Some(raw), Some(proportion)) => {
            let taxa = parser::parse_comma_list(raw);
            if taxa.is_empty() {
                bail!("--fundi-taxa does not contain any taxon name");
            }
            if !(0.0..=1.0).contains(&proportion) || proportion == 0.0 {
                bail!("--fundi-proportion must lie within (0, 1] (got {proportion})");
            }
            Ok(Some(FunDiConfig { taxa, proportion }))
        },
        _ => bail!("--fundi-taxa and --fundi-proportion must be provided together"),
    }
}

fn dataset_prefix(prefix: &Path, dataset: usize, num_datasets: usize) -> PathBuf {
    match num_datasets {
        0 | 1 => prefix.to_path_buf(),
        _     => PathBuf::from(format!("{}_{dataset}", prefix.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_resolution() {
        let dna = Alphabet::new(AlphabetKind::Dna);
        assert_eq!(resolve_length(Some(100), None, &dna).unwrap(), 100);
        assert!(resolve_length(Some(0), None, &dna).is_err());
        assert!(resolve_length(None, None, &dna).is_err());
        assert_eq!(resolve_length(None, Some(&[0, 1, 2]), &dna).unwrap(), 3);

        let codon = Alphabet::new(AlphabetKind::Codon);
        assert_eq!(resolve_length(Some(9), None, &codon).unwrap(), 3);
        assert!(resolve_length(Some(10), None, &codon).is_err());

        let nt2aa = Alphabet::new(AlphabetKind::Nt2Aa);
        assert_eq!(resolve_length(Some(10), None, &nt2aa).unwrap(), 30);
    }

    #[test]
    fn dataset_prefixes() {
        let prefix = PathBuf::from("out/run");
        assert_eq!(dataset_prefix(&prefix, 1, 1), PathBuf::from("out/run"));
        assert_eq!(dataset_prefix(&prefix, 2, 3), PathBuf::from("out/run_2"));
    }

    #[test]
    fn fundi_validation() {
        let mut sim = base_sim_args();
        assert!(build_fundi_config(&sim).unwrap().is_none());

        sim.fundi_taxa = Some("A,B".to_string());
        assert!(build_fundi_config(&sim).is_err());

        sim.fundi_proportion = Some(0.1);
        let config = build_fundi_config(&sim).unwrap().unwrap();
        assert_eq!(config.taxa, vec!["A", "B"]);

        sim.fundi_proportion = Some(1.5);
        assert!(build_fundi_config(&sim).is_err());
    }

    #[test]
    fn indel_validation() {
        let mut indel = base_indel_args();
        assert!(build_indel_params(&indel).unwrap().is_none());

        indel.insertion_ratio = 0.1;
        assert!(build_indel_params(&indel).unwrap().is_some());

        indel.insertion_distribution = "WAT{1}".to_string();
        assert!(build_indel_params(&indel).is_err());

        indel.insertion_distribution = "GEO{0.5}".to_string();
        indel.deletion_ratio = -1.0;
        assert!(build_indel_params(&indel).is_err());
    }

    fn base_sim_args() -> SimulateArgs {
        SimulateArgs {
            tree: PathBuf::from("tree.nwk"),
            length: Some(100),
            alphabet: "DNA".to_string(),
            model: "JC".to_string(),
            branch_scale: 1.0,
            num_datasets: 1,
            seed: None,
            length_ratio: None,
            simulation_thresh: None,
            ancestral_sequence: None,
            write_internal: false,
            fundi_taxa: None,
            fundi_proportion: None,
        }
    }

    fn base_indel_args() -> IndelArgs {
        IndelArgs {
            insertion_ratio: 0.0,
            deletion_ratio: 0.0,
            insertion_distribution: "POW{1.7,100}".to_string(),
            deletion_distribution: "POW{1.7,100}".to_string(),
            rebuild_indel_history: 1.0,
        }
    }
}
