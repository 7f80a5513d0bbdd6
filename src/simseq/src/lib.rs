mod error;
pub use error::SimError;

mod distributions;
pub use distributions::{IndelDistribution, MAX_SIZE_ATTEMPTS};

mod insertion;
pub use insertion::{Insertion, InsertionList};

mod genome_tree;
pub use genome_tree::GenomeTree;

mod branch;
pub use branch::{select_method, switching_threshold, BranchMethod, RateMatrixState, TransProbSampler};

mod indel;
pub use indel::IndelParams;

mod fundi;
pub use fundi::{FunDiConfig, FunDiPermutation};

mod filter;
pub use filter::filter_constant_sites;

mod length_ratio;
pub use length_ratio::estimate_length_ratio;

mod walker;
pub use walker::{LabeledSeq, LeafSink, NullSink, SimOutput, SimParams, Simulator};
