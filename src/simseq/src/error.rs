use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown indel size distribution '{0}'. Expected NB{{r,p}}, POW{{a,max}}, LAV{{a,max}}, GEO{{p}} or USER{{p1,...}}")]
    UnknownDistribution(String),

    #[error("Invalid parameters for indel size distribution '{0}'")]
    InvalidDistribution(String),

    #[error("Failed to draw a strictly positive indel size after {0} attempts. Consider lowering the corresponding indel rate or adjusting its size distribution")]
    IndelSizeExhausted(usize),

    #[error("Could not select a gap-free site after {0} attempts. Consider lowering the deletion rate")]
    NoGaplessSite(usize),

    #[error("Only {found} variant sites were simulated, but {needed} are required. Increase the length ratio")]
    InsufficientVariantSites { needed: usize, found: usize },

    #[error("Functional divergence taxon '{0}' does not exist within the tree")]
    FunDiUnknownTaxon(String),

    #[error("A sequence length is required when no ancestral sequence is provided")]
    MissingSequenceLength,

    #[error("Leaf '{0}' is missing from the spill store")]
    MissingSpilledLeaf(String),

    #[error("Simulation was cancelled")]
    Cancelled,
}
