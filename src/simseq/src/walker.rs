use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ahash::{AHashMap, AHashSet};
use alphabet::{State, STATE_UNKNOWN};
use anyhow::Result;
use located_error::prelude::*;
use log::{debug, trace, warn};
use phylotree::Tree;
use sim_io::SpillWriter;
use submodels::{Model, RateProfile};

use crate::branch::{select_method, site_rate, BranchMethod, RateMatrixState, TransProbSampler};
use crate::error::SimError;
use crate::filter::filter_constant_sites;
use crate::fundi::{FunDiConfig, FunDiPermutation};
use crate::genome_tree::GenomeTree;
use crate::indel::{apply_deletion, deletion_start, insertion_position, IndelParams};
use crate::insertion::InsertionList;
use crate::length_ratio::estimate_length_ratio;

pub type LabeledSeq = (String, Vec<State>);

/// Streaming consumer of finalized leaf sequences. Implemented by the
/// output layer so that indel-free runs never hold the full alignment in
/// memory.
pub trait LeafSink {
    fn stream_leaf(&mut self, name: &str, seq: &[State]) -> Result<()>;
}

/// A sink for runs that are collected rather than streamed.
pub struct NullSink;

impl LeafSink for NullSink {
    fn stream_leaf(&mut self, _name: &str, _seq: &[State]) -> Result<()> {
        Ok(())
    }
}

/// Per-dataset simulation settings.
#[derive(Debug, Clone)]
pub struct SimParams {
    /// Target alignment length, in states.
    pub seq_length: usize,
    /// Global branch length multiplier.
    pub branch_scale: f64,
    pub write_internal: bool,
    pub indels: Option<IndelParams>,
    pub fundi: Option<FunDiConfig>,
    /// Verbatim override of the over-simulation length ratio.
    pub length_ratio_override: Option<f64>,
    /// Verbatim override of the method switching threshold.
    pub threshold_override: Option<f64>,
    /// κ: fraction of the leaf count processed between genome-tree rebuilds
    /// during reconciliation.
    pub rebuild_indel_history: f64,
    /// Ancestral root sequence; padded from the stationary distribution
    /// when shorter than the simulated length.
    pub ancestral: Option<Vec<State>>,
    /// Polled between branches; cooperative cancellation.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SimParams {
    pub fn new(seq_length: usize) -> Self {
        Self {
            seq_length,
            branch_scale: 1.0,
            write_internal: false,
            indels: None,
            fundi: None,
            length_ratio_override: None,
            threshold_override: None,
            rebuild_indel_history: 1.0,
            ancestral: None,
            cancel: None,
        }
    }
}

/// Result of one dataset simulation.
#[derive(Debug)]
pub struct SimOutput {
    /// `None` when every leaf was already streamed to the sink.
    pub leaves: Option<Vec<LabeledSeq>>,
    /// Internal node sequences, present on request.
    pub internals: Vec<LabeledSeq>,
    /// Final alignment length, in states.
    pub final_length: usize,
    pub num_insertions: usize,
}

struct NodeState {
    seq: Option<Vec<State>>,
    num_gaps: usize,
    children_done: usize,
}

enum Frame {
    Enter { node: usize, dad: usize, length: f64 },
    Exit { node: usize, dad: usize },
}

/// Depth-first tree walker: evolves every edge, maintains gap counts and
/// the insertion list, and hands finalized leaves to the sink (or collects
/// them when post-processing requires the full alignment).
pub struct Simulator<'a> {
    tree: &'a Tree,
    model: &'a mut Model,
    params: SimParams,
    rng: &'a mut fastrand::Rng,
    nan_rate_warned: bool,
}

impl<'a> Simulator<'a> {
    pub fn new(tree: &'a Tree, model: &'a mut Model, params: SimParams, rng: &'a mut fastrand::Rng) -> Self {
        Self { tree, model, params, rng, nan_rate_warned: false }
    }

    /// Run one dataset.
    pub fn run(mut self, sink: &mut dyn LeafSink) -> Result<SimOutput> {
        let tree = self.tree;
        let target_len = self.params.seq_length;

        // ---- Over-simulation ratio under ascertainment correction.
        let ratio = match self.model.ascertainment() {
            true => estimate_length_ratio(
                self.model,
                tree,
                self.params.branch_scale,
                self.params.length_ratio_override,
            ),
            false => 1.0,
        };
        let sim_len = (target_len as f64 * ratio).ceil() as usize;
        if ratio > 1.0 {
            debug!("Ascertainment correction: simulating {sim_len} sites to retain {target_len}");
        }

        // ---- Indel configuration; a configuration with both rates at zero
        //      behaves exactly like no configuration at all.
        let mut indels = self.params.indels.clone()
            .filter(|p| p.insertion_rate > 0.0 || p.deletion_rate > 0.0);
        if let Some(ind) = &mut indels {
            ind.estimate_mean_deletion(sim_len, self.rng);
            debug!("Estimated mean deletion size: {:.3}", ind.mean_deletion_size());
        }
        let indels_enabled = indels.is_some();

        // ---- FunDi bookkeeping. Site selection happens now against the
        //      simulated length, or after reconciliation under indels.
        let fundi_taxa = self.resolve_fundi_taxa()?;
        let mut fundi_perm = match (&self.params.fundi, indels_enabled) {
            (Some(config), false) => {
                Some(FunDiPermutation::sample(sim_len, config.proportion, self.rng))
            },
            _ => None,
        };

        // ---- Root sequence and per-site rate/class profile.
        let root = tree.root();
        let root_seq = self.build_root_sequence(sim_len);
        let mut profile = RateProfile::sample(self.model, sim_len, self.rng);

        let mut insertions = InsertionList::new();
        let mut spill = match indels_enabled {
            true  => Some(SpillWriter::create()?),
            false => None,
        };

        // Streaming is only sound when nothing global happens after the
        // traversal.
        let streaming = !indels_enabled && ratio <= 1.0 && !self.params.write_internal;
        let mut collected: Vec<LabeledSeq> = Vec::new();
        let mut leaf_order: Vec<usize> = Vec::new();

        let mut nodes: Vec<NodeState> = (0..tree.num_nodes())
            .map(|_| NodeState { seq: None, num_gaps: 0, children_done: 0 })
            .collect();
        nodes[root].num_gaps = root_seq.iter().filter(|&&s| s == STATE_UNKNOWN).count();
        nodes[root].seq = Some(root_seq);

        let is_taxon: Vec<bool> = (0..tree.num_nodes())
            .map(|id| tree.taxa().contains(&id))
            .collect();

        // A root that is itself a taxon freezes immediately.
        if is_taxon[root] {
            self.finalize_leaf(
                root, true, &profile, &fundi_taxa, &fundi_perm,
                streaming, sink, &mut collected, &mut leaf_order,
                &mut nodes, &mut insertions, &mut spill,
            )?;
        }

        // ---- Depth-first traversal, explicit stack.
        let mut stack: Vec<Frame> = tree.node(root)
            .children(None)
            .map(|e| Frame::Enter { node: e.target, dad: root, length: e.length })
            .rev()
            .collect();

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Exit { node, dad } => {
                    debug_assert_eq!(
                        nodes[node].children_done,
                        tree.node(node).children(Some(dad)).count()
                    );
                    if let Some(seq) = &nodes[node].seq {
                        debug_assert_eq!(
                            nodes[node].num_gaps,
                            seq.iter().filter(|&&s| s == STATE_UNKNOWN).count(),
                        );
                    }
                    if !self.params.write_internal {
                        nodes[node].seq = None;
                    }
                    nodes[dad].children_done += 1;
                },
                Frame::Enter { node, dad, length } => {
                    self.check_cancelled()?;
                    self.evolve_edge(
                        node, dad, length, &mut nodes, &mut profile,
                        &mut insertions, indels.as_ref(),
                    )?;

                    // Grafting can anchor the root onto a taxon, leaving it
                    // with a further neighbor: such a node emits its
                    // sequence and still stays on the path, so recursion is
                    // decided from the remaining degree alone.
                    let has_children = tree.node(node).children(Some(dad)).next().is_some();
                    if is_taxon[node] {
                        self.finalize_leaf(
                            node, has_children, &profile, &fundi_taxa, &fundi_perm,
                            streaming, sink, &mut collected, &mut leaf_order,
                            &mut nodes, &mut insertions, &mut spill,
                        )?;
                    }
                    if has_children {
                        stack.push(Frame::Exit { node, dad });
                        let children: Vec<Frame> = tree.node(node)
                            .children(Some(dad))
                            .map(|e| Frame::Enter { node: e.target, dad: node, length: e.length })
                            .rev()
                            .collect();
                        stack.extend(children);
                    } else {
                        nodes[dad].children_done += 1;
                    }
                },
            }
        }

        let num_insertions = insertions.num_events();
        let final_length = sim_len + insertions.inserted_length(1, insertions.end());

        // ---- Reconciliation: pad every frozen leaf with the gap columns
        //      opened after its freeze point.
        if indels_enabled {
            let spill = spill.take().loc("Spill store must exist under indels")?;
            collected = self.reconcile_leaves(spill, &mut insertions, sim_len, &leaf_order)?;

            if let Some(config) = &self.params.fundi {
                fundi_perm = Some(FunDiPermutation::sample(final_length, config.proportion, self.rng));
                let perm = fundi_perm.as_ref().loc("FunDi permutation was just sampled")?;
                for (name, seq) in &mut collected {
                    let id = tree.taxon_id(name)?;
                    if fundi_taxa.contains(&id) {
                        perm.apply(seq);
                    }
                }
            }
        }

        // ---- Ascertainment: drop invariant columns down to the target.
        if ratio > 1.0 {
            filter_constant_sites(&mut collected, target_len, indels_enabled)?;
        }

        let internals = match self.params.write_internal {
            true  => self.collect_internals(&mut nodes, &is_taxon),
            false => Vec::new(),
        };

        let final_length = match ratio > 1.0 {
            true  => target_len,
            false => final_length,
        };
        Ok(SimOutput {
            leaves: (!streaming).then_some(collected),
            internals,
            final_length,
            num_insertions,
        })
    }

    fn check_cancelled(&self) -> Result<(), SimError> {
        match &self.params.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(SimError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Ancestral sequence (padded or truncated to `sim_len`), or a fresh
    /// draw from the stationary distribution.
    fn build_root_sequence(&mut self, sim_len: usize) -> Vec<State> {
        match self.params.ancestral.clone() {
            Some(mut seq) => {
                if seq.len() < sim_len {
                    let missing = sim_len - seq.len();
                    debug!("Appending {missing} stationary sites to the ancestral sequence");
                    seq.extend((0..missing).map(|_| self.model.sample_stationary(self.rng)));
                } else if seq.len() > sim_len {
                    warn!(
                        "Ancestral sequence is longer ({}) than the simulated length ({sim_len}); truncating",
                        seq.len()
                    );
                    seq.truncate(sim_len);
                }
                seq
            },
            None => (0..sim_len).map(|_| self.model.sample_stationary(self.rng)).collect(),
        }
    }

    fn resolve_fundi_taxa(&self) -> Result<AHashSet<usize>> {
        let Some(config) = &self.params.fundi else {
            return Ok(AHashSet::new())
        };
        config.taxa.iter()
            .map(|name| {
                self.tree.taxon_id(name)
                    .map_err(|_| SimError::FunDiUnknownTaxon(name.clone()).into())
            })
            .collect()
    }

    /// Evolve one edge `dad -> node`, including its indel/substitution
    /// event loop and the gap-column propagation to every live sequence.
    #[allow(clippy::too_many_arguments)]
    fn evolve_edge(
        &mut self,
        node: usize,
        dad: usize,
        length: f64,
        nodes: &mut [NodeState],
        profile: &mut RateProfile,
        insertions: &mut InsertionList,
        indels: Option<&IndelParams>,
    ) -> Result<()> {
        let dist = length * self.params.branch_scale;
        let parent_seq = nodes[dad].seq.as_ref()
            .loc("Parent sequences are materialized before their children")?;
        let parent_len = parent_seq.len();

        // ---- Per-branch method selection.
        let method = select_method(self.model, dist, parent_len, self.params.threshold_override);
        trace!("edge {dad}->{node}: dist={dist:.4} method={method:?}");

        let mut child_seq = match (dist <= 0.0, method) {
            (true, _) => parent_seq.clone(),
            (false, BranchMethod::TransProb) => {
                TransProbSampler::new(self.model, dist).evolve(parent_seq, profile, self.rng)
            },
            // Substitutions happen inside the event loop.
            (false, BranchMethod::RateMatrix) => parent_seq.clone(),
        };
        nodes[node].num_gaps = nodes[dad].num_gaps;

        let first_new = insertions.end();
        if dist > 0.0 && (indels.is_some() || method == BranchMethod::RateMatrix) {
            let with_subs = method == BranchMethod::RateMatrix;
            let mut num_gaps = nodes[node].num_gaps;
            self.gillespie_edge(
                &mut child_seq, dist, with_subs, indels,
                insertions, profile, &mut num_gaps,
            )?;
            nodes[node].num_gaps = num_gaps;
        }

        // ---- Insertions on this edge pad every other live sequence.
        if insertions.end() > first_new {
            let added = insertions.inserted_length(first_new, insertions.end());
            let translator = GenomeTree::build(insertions, first_new, parent_len);
            for state in nodes.iter_mut() {
                if state.seq.as_ref().map_or(true, |s| s.len() != parent_len) {
                    continue
                }
                if let Some(seq) = state.seq.take() {
                    state.seq = Some(translator.export(&seq));
                    state.num_gaps += added;
                }
            }
        }
        nodes[node].seq = Some(child_seq);
        Ok(())
    }

    /// Gillespie event loop along one branch of scaled length `dist`.
    #[allow(clippy::too_many_arguments)]
    fn gillespie_edge(
        &mut self,
        seq: &mut Vec<State>,
        dist: f64,
        with_subs: bool,
        indels: Option<&IndelParams>,
        insertions: &mut InsertionList,
        profile: &mut RateProfile,
        num_gaps: &mut usize,
    ) -> Result<()> {
        let mut rms = match with_subs {
            true  => Some(RateMatrixState::init(self.model, profile, seq)),
            false => None,
        };
        if let Some(state) = &mut rms {
            if state.is_total_nan() {
                if !self.nan_rate_warned {
                    warn!("Total substitution rate is NaN (fully gapped sequence?). Substitutions are disabled on the affected branches");
                    self.nan_rate_warned = true;
                }
                state.clear_total();
            }
        }

        let mut remaining = dist;
        loop {
            let len = seq.len();
            let (r_ins, r_del) = match indels {
                Some(p) => (
                    p.total_insertion_rate(len, *num_gaps),
                    p.total_deletion_rate(len, *num_gaps),
                ),
                None => (0.0, 0.0),
            };
            let r_sub = rms.as_ref().map_or(0.0, RateMatrixState::total_rate);
            let total = r_sub + r_ins + r_del;
            if total <= 0.0 {
                break
            }

            let wait = -self.rng.f64().max(f64::MIN_POSITIVE).ln() / total;
            if wait > remaining {
                break
            }
            remaining -= wait;

            let mut pick = self.rng.f64() * total;

            // ---- Substitution.
            if pick < r_sub {
                if let Some(state) = &mut rms {
                    let pos = state.sample_position(self.rng);
                    let next = state.sample_substitution(profile.class(pos), seq[pos], self.rng);
                    seq[pos] = next;
                    state.set_site(pos, site_rate(self.model, profile, pos, next));
                }
                continue
            }
            pick -= r_sub;
            let Some(params) = indels else {
                break
            };

            if pick < r_ins {
                // ---- Insertion.
                let size = params.insertion_dist.sample_positive(self.rng)?;
                let (pos, appended) = insertion_position(seq, self.rng)?;
                let fresh: Vec<State> = (0..size)
                    .map(|_| self.model.sample_stationary(self.rng))
                    .collect();
                seq.splice(pos..pos, fresh);
                profile.splice(self.model, pos, size, self.rng);
                if let Some(state) = &mut rms {
                    let rates: Vec<f64> = (pos..pos + size)
                        .map(|i| site_rate(self.model, profile, i, seq[i]))
                        .collect();
                    state.splice(pos, rates);
                }
                insertions.push(pos, size, appended);
            } else {
                // ---- Deletion.
                let size = params.deletion_dist.sample_positive(self.rng)?;
                let start = deletion_start(seq, size, self.rng)?;
                let removed = apply_deletion(seq, start, size);
                *num_gaps += removed.len();
                if let Some(state) = &mut rms {
                    for pos in removed {
                        state.set_site(pos, 0.0);
                    }
                }
            }
        }
        Ok(())
    }

    /// A finalized leaf either streams to the sink, spills for later
    /// reconciliation, or joins the collected alignment.
    #[allow(clippy::too_many_arguments)]
    fn finalize_leaf(
        &mut self,
        node: usize,
        keep_sequence: bool,
        profile: &RateProfile,
        fundi_taxa: &AHashSet<usize>,
        fundi_perm: &Option<FunDiPermutation>,
        streaming: bool,
        sink: &mut dyn LeafSink,
        collected: &mut Vec<LabeledSeq>,
        leaf_order: &mut Vec<usize>,
        nodes: &mut [NodeState],
        insertions: &mut InsertionList,
        spill: &mut Option<SpillWriter>,
    ) -> Result<()> {
        let name = self.tree.node(node).name.clone()
            .loc("Taxa always carry a name")?;
        let mut seq = match keep_sequence {
            true => nodes[node].seq.clone(),
            false => nodes[node].seq.take(),
        }.loc("Finalized leaves always hold a sequence")?;
        leaf_order.push(node);

        if let Some(writer) = spill {
            // Indel mode: sequencing error now, permutation after
            // reconciliation.
            if self.model.contains_dna_error() {
                self.apply_dna_error(&mut seq, profile);
            }
            writer.write_states(&name, &seq)?;
            insertions.attach_leaf(node);
            return Ok(())
        }

        if let Some(perm) = fundi_perm {
            if fundi_taxa.contains(&node) {
                trace!("Permuting {} FunDi sites of leaf '{name}'", perm.num_sites());
                perm.apply(&mut seq);
            }
        }
        if self.model.contains_dna_error() {
            self.apply_dna_error(&mut seq, profile);
        }
        match streaming {
            true  => sink.stream_leaf(&name, &seq)?,
            false => collected.push((name, seq)),
        }
        Ok(())
    }

    /// Post-evolution per-state sequencing error, per mixture class.
    fn apply_dna_error(&mut self, seq: &mut [State], profile: &RateProfile) {
        let s = self.model.num_states();
        for (i, state) in seq.iter_mut().enumerate() {
            if *state == STATE_UNKNOWN {
                continue
            }
            let Some(prob) = self.model.dna_err_prob(profile.class(i)) else {
                continue
            };
            if self.rng.f64() < prob {
                let mut replacement = self.rng.usize(0..s - 1) as State;
                if replacement >= *state {
                    replacement += 1;
                }
                *state = replacement;
            }
        }
    }

    /// Walk the insertion list in order, exporting every frozen leaf into
    /// final coordinates. The genome tree advances one event at a time and
    /// is rebuilt from scratch every `κ·|leaves|` processed tips.
    fn reconcile_leaves(
        &mut self,
        spill: SpillWriter,
        insertions: &mut InsertionList,
        sim_len: usize,
        leaf_order: &[usize],
    ) -> Result<Vec<LabeledSeq>> {
        let mut frozen = spill.read_back()?;
        let num_leaves = self.tree.num_leaves();
        let rebuild_every = ((self.params.rebuild_indel_history * num_leaves as f64).ceil() as usize).max(1);

        let mut translator = GenomeTree::build(insertions, 1, sim_len);
        let mut base_len = sim_len;
        let mut tips_since_rebuild = 0usize;
        let mut exported: AHashMap<usize, Vec<State>> = AHashMap::with_capacity(num_leaves);

        for idx in 0..insertions.end() {
            if idx > 0 {
                base_len += insertions.get(idx).length;
                if tips_since_rebuild >= rebuild_every {
                    trace!("Rebuilding the genome tree at event {idx}");
                    translator = GenomeTree::build(insertions, idx + 1, base_len);
                    tips_since_rebuild = 0;
                } else {
                    translator.advance(insertions, idx);
                }
            }
            for leaf in insertions.take_leaves(idx) {
                let name = self.tree.node(leaf).name.as_deref()
                    .loc("Taxa always carry a name")?;
                let seq = frozen.remove(name)
                    .ok_or_else(|| SimError::MissingSpilledLeaf(name.to_string()))?;
                exported.insert(leaf, translator.export(&seq));
                tips_since_rebuild += 1;
            }
        }

        // Re-emit in depth-first order.
        leaf_order.iter()
            .map(|&leaf| {
                let name = self.tree.node(leaf).name.clone()
                    .loc("Taxa always carry a name")?;
                let seq = exported.remove(&leaf)
                    .ok_or_else(|| SimError::MissingSpilledLeaf(name.clone()))?;
                Ok((name, seq))
            })
            .collect()
    }

    fn collect_internals(&self, nodes: &mut [NodeState], is_taxon: &[bool]) -> Vec<LabeledSeq> {
        nodes.iter_mut().enumerate()
            .filter(|(id, state)| !is_taxon[*id] && state.seq.is_some())
            .map(|(id, state)| {
                let name = self.tree.node(id).name.clone()
                    .unwrap_or_else(|| format!("Node{id}"));
                (name, state.seq.take().unwrap_or_default())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alphabet::AlphabetKind;
    use itertools::Itertools;

    struct VecSink(Vec<LabeledSeq>);

    impl LeafSink for VecSink {
        fn stream_leaf(&mut self, name: &str, seq: &[State]) -> Result<()> {
            self.0.push((name.to_string(), seq.to_vec()));
            Ok(())
        }
    }

    fn jc_model() -> Model {
        Model::parse("JC", AlphabetKind::Dna).unwrap()
    }

    fn run_streaming(
        newick: &str,
        model: &mut Model,
        params: SimParams,
        seed: u64,
    ) -> (Vec<LabeledSeq>, SimOutput) {
        let tree = Tree::from_newick(newick).unwrap();
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut sink = VecSink(Vec::new());
        let output = Simulator::new(&tree, model, params, &mut rng)
            .run(&mut sink)
            .unwrap();
        (sink.0, output)
    }

    fn run_collected(
        newick: &str,
        model: &mut Model,
        params: SimParams,
        seed: u64,
    ) -> SimOutput {
        let tree = Tree::from_newick(newick).unwrap();
        let mut rng = fastrand::Rng::with_seed(seed);
        Simulator::new(&tree, model, params, &mut rng)
            .run(&mut NullSink)
            .unwrap()
    }

    fn pairwise_diff(a: &[State], b: &[State]) -> f64 {
        let n = a.len();
        let diff = a.iter().zip(b).filter(|(x, y)| x != y).count();
        diff as f64 / n as f64
    }

    #[test]
    fn two_taxon_jc_lengths_and_divergence() {
        let mut model = jc_model();
        let (leaves, output) = run_streaming(
            "(A:0.1,B:0.1);",
            &mut model,
            SimParams::new(5_000),
            1234,
        );
        assert!(output.leaves.is_none(), "indel-free runs stream");
        assert_eq!(output.final_length, 5_000);
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].0, "A");
        assert_eq!(leaves[1].0, "B");
        assert!(leaves.iter().all(|(_, s)| s.len() == 5_000));

        // Expected divergence across a path of length 0.2 under JC:
        // 3/4·(1 − exp(−0.2·4/3)) ≈ 0.175.
        let observed = pairwise_diff(&leaves[0].1, &leaves[1].1);
        assert!((observed - 0.175).abs() < 0.02, "observed={observed}");
    }

    #[test]
    fn zero_length_branches_copy_the_parent() {
        let mut model = jc_model();
        let (leaves, _) = run_streaming("(A:0.0,B:0.0);", &mut model, SimParams::new(200), 7);
        assert_eq!(leaves[0].1, leaves[1].1);
    }

    #[test]
    fn no_indels_means_no_gaps() {
        let mut model = jc_model();
        let (leaves, _) = run_streaming(
            "((A:0.3,B:0.2):0.1,C:0.4);",
            &mut model,
            SimParams::new(500),
            42,
        );
        assert_eq!(leaves.len(), 3);
        for (name, seq) in &leaves {
            assert!(
                seq.iter().all(|&s| s != STATE_UNKNOWN),
                "leaf {name} contains gaps without an indel process"
            );
        }
    }

    #[test]
    fn both_methods_agree_on_leaf_composition() {
        // Force each method in turn via the threshold override and compare
        // the leaf state frequencies over a long branch.
        let mut totals = Vec::new();
        for threshold in [Some(1e9), Some(0.0)] {
            let mut model = Model::parse("HKY{2.0}+F{0.1,0.4,0.4,0.1}", AlphabetKind::Dna).unwrap();
            let mut params = SimParams::new(2_000);
            params.threshold_override = threshold;
            let (leaves, _) = run_streaming("(A:2.0,B:2.0);", &mut model, params, 99);
            let mut counts = [0f64; 4];
            for &s in &leaves[0].1 {
                counts[s as usize] += 1.0;
            }
            totals.push(counts.map(|c| c / leaves[0].1.len() as f64));
        }
        for (a, b) in totals[0].iter().zip(&totals[1]) {
            assert!((a - b).abs() < 0.05, "{a} vs {b}");
        }
    }

    #[test]
    fn insertions_extend_every_leaf_equally() {
        let mut model = jc_model();
        let mut params = SimParams::new(100);
        params.indels = Some(IndelParams::new(
            0.05,
            0.0,
            "GEO{0.5}".parse().unwrap(),
            "GEO{0.5}".parse().unwrap(),
        ));
        let output = run_collected("(A:1.0,B:1.0);", &mut model, params, 2024);
        let leaves = output.leaves.unwrap();

        assert!(output.num_insertions > 0, "expected ~10 insertion events");
        assert!(output.num_insertions < 40);
        assert!(output.final_length > 100);
        for (name, seq) in &leaves {
            assert_eq!(seq.len(), output.final_length, "leaf {name}");
        }
        // Insertion-only runs still open gap columns on the sister lineage,
        // and sites inserted on one branch are unknown on the other.
        let gapped = leaves.iter()
            .flat_map(|(_, s)| s.iter())
            .any(|&s| s == STATE_UNKNOWN);
        assert!(gapped);
    }

    #[test]
    fn deletions_keep_length_and_open_gaps() {
        let mut model = jc_model();
        let mut params = SimParams::new(200);
        params.indels = Some(IndelParams::new(
            0.0,
            0.05,
            "GEO{0.5}".parse().unwrap(),
            "GEO{0.5}".parse().unwrap(),
        ));
        let output = run_collected("(A:1.0,B:1.0);", &mut model, params, 3);
        let leaves = output.leaves.unwrap();

        assert_eq!(output.num_insertions, 0);
        assert_eq!(output.final_length, 200);
        let gaps: usize = leaves.iter()
            .map(|(_, s)| s.iter().filter(|&&x| x == STATE_UNKNOWN).count())
            .sum();
        assert!(gaps > 0, "deletions should have produced unknown states");
        assert!(leaves.iter().all(|(_, s)| s.len() == 200));
    }

    #[test]
    fn ascertainment_filter_leaves_only_variant_columns() {
        let mut model = Model::parse("JC+ASC", AlphabetKind::Dna).unwrap();
        let mut params = SimParams::new(50);
        params.length_ratio_override = Some(2.5);
        let output = run_collected(
            "((A:0.4,B:0.5):0.2,(C:0.4,D:0.3):0.2);",
            &mut model,
            params,
            11,
        );
        let leaves = output.leaves.unwrap();
        assert_eq!(output.final_length, 50);
        assert!(leaves.iter().all(|(_, s)| s.len() == 50));

        for col in 0..50 {
            let distinct = leaves.iter()
                .map(|(_, s)| s[col])
                .filter(|&s| s != STATE_UNKNOWN)
                .unique()
                .count();
            assert!(distinct >= 2, "column {col} is constant");
        }
    }

    #[test]
    fn fundi_permutes_only_the_selected_taxon() {
        let mut model = jc_model();
        let mut params = SimParams::new(100);
        params.fundi = Some(FunDiConfig { taxa: vec!["A".to_string()], proportion: 0.1 });
        let (leaves, _) = run_streaming("(A:0.0,B:0.0);", &mut model, params, 5);

        // With zero branch lengths both leaves start identical; the only
        // differences are sites the permutation moved.
        let (a, b) = (&leaves[0].1, &leaves[1].1);
        let differing: Vec<usize> = (0..100).filter(|&i| a[i] != b[i]).collect();
        assert!(differing.len() <= 10);
    }

    #[test]
    fn unknown_fundi_taxon_is_fatal() {
        let tree = Tree::from_newick("(A:0.1,B:0.1);").unwrap();
        let mut model = jc_model();
        let mut params = SimParams::new(100);
        params.fundi = Some(FunDiConfig { taxa: vec!["Z".to_string()], proportion: 0.1 });
        let mut rng = fastrand::Rng::with_seed(1);
        let err = Simulator::new(&tree, &mut model, params, &mut rng)
            .run(&mut NullSink)
            .unwrap_err();
        assert!(err.to_string().contains('Z'));
    }

    #[test]
    fn ancestral_sequence_seeds_the_root() {
        let mut model = jc_model();
        let mut params = SimParams::new(100);
        let ancestral: Vec<State> = (0..40u32).map(|i| i % 4).collect();
        params.ancestral = Some(ancestral.clone());
        params.write_internal = true;
        let output = run_collected("(A:0.0,B:0.1);", &mut model, params, 8);

        let internals = output.internals;
        assert!(!internals.is_empty());
        let root_seq = &internals[0].1;
        assert_eq!(root_seq.len(), 100);
        assert_eq!(&root_seq[..40], &ancestral[..]);

        // The zero-length branch towards A copies the root verbatim.
        let leaves = output.leaves.unwrap();
        let a = &leaves.iter().find(|(n, _)| n == "A").unwrap().1;
        assert_eq!(&a[..], &root_seq[..]);
    }

    #[test]
    fn cancellation_aborts_the_traversal() {
        let tree = Tree::from_newick("(A:0.1,B:0.1);").unwrap();
        let mut model = jc_model();
        let mut params = SimParams::new(100);
        let flag = Arc::new(AtomicBool::new(true));
        params.cancel = Some(Arc::clone(&flag));
        let mut rng = fastrand::Rng::with_seed(1);
        let err = Simulator::new(&tree, &mut model, params, &mut rng)
            .run(&mut NullSink)
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn grafted_unrooted_tree_simulates_all_taxa() {
        let mut tree = Tree::from_newick("(A:0.1,B:0.2,C:0.3);").unwrap();
        tree.graft_root();
        let mut model = jc_model();
        let mut rng = fastrand::Rng::with_seed(21);
        let mut sink = VecSink(Vec::new());
        let output = Simulator::new(&tree, &mut model, SimParams::new(300), &mut rng)
            .run(&mut sink)
            .unwrap();
        assert!(output.leaves.is_none());
        let names: Vec<&str> = sink.0.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names.len(), 3);
        for name in ["A", "B", "C"] {
            assert!(names.contains(&name));
        }
        // The graft anchors onto taxon A, which stays on the path towards
        // B and C; every taxon still receives a full-length sequence.
        assert!(sink.0.iter().all(|(_, s)| s.len() == 300));
    }

    #[test]
    fn dna_error_perturbs_leaves() {
        let mut model = Model::parse("JC+E{0.5}", AlphabetKind::Dna).unwrap();
        let (leaves, _) = run_streaming("(A:0.0,B:0.0);", &mut model, SimParams::new(2_000), 13);
        // Both leaves derive from the identical root, so every difference
        // comes from independently applied sequencing errors.
        let observed = pairwise_diff(&leaves[0].1, &leaves[1].1);
        // P(differ) = 2·e·(1−e) + e²·(2/3) = 0.6667 for e = 0.5.
        assert!((observed - 0.6667).abs() < 0.04, "observed={observed}");
    }
}
