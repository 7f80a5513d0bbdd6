use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unknown substitution model '{0}'")]
    UnknownModel(String),

    #[error("Model '{model}' expects an alphabet with {expected} states (got {got})")]
    WrongStateCount { model: String, expected: usize, got: usize },

    #[error("Model '{model}' expects {expected} parameter(s) (got {got})")]
    WrongParamCount { model: String, expected: usize, got: usize },

    #[error("Invalid model parameter '{0}': expected a strictly positive number")]
    InvalidParam(String),

    #[error("Invalid state frequencies: expected {expected} strictly positive values (got {got})")]
    InvalidFrequencies { expected: usize, got: usize },

    #[error("Unknown model modifier '+{0}'")]
    UnknownModifier(String),

    #[error("Invalid rate heterogeneity specifier '{0}'")]
    InvalidRateSpec(String),

    #[error("Invalid invariant-site proportion '{0}': expected a value within [0, 1)")]
    InvalidPinv(String),

    #[error("Invalid error probability '{0}': expected a value within [0, 1]")]
    InvalidErrorProb(String),

    #[error("Empty mixture specifier: MIX{{...}} requires at least one component")]
    EmptyMixture,

    #[error("Eigendecomposition failed to converge after {0} sweeps")]
    EigenNonConvergence(usize),
}
