use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlphabetError {
    #[error("Unknown alphabet specifier '{0}'. Expected one of BIN, DNA, AA, NT2AA, CODON, MORPH{{n}}")]
    UnknownKind(String),

    #[error("Invalid number of morphological states '{0}'. Expected a value within [2, 32]")]
    InvalidMorphStates(String),

    #[error("Character '{0}' is not a valid state for the {1} alphabet")]
    InvalidStateChar(char, &'static str),

    #[error("Codon sequences must have a character length that is a multiple of 3 (got {0})")]
    InvalidCodonLength(usize),

    #[error("The triplet '{0}' is a stop codon and cannot appear within a codon sequence")]
    StopCodon(String),
}
