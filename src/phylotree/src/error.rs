use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Unbalanced parentheses within newick string")]
    UnbalancedParentheses,

    #[error("Unexpected character '{0}' at byte offset {1} of newick string")]
    UnexpectedToken(char, usize),

    #[error("Newick string does not contain any node")]
    EmptyTree,

    #[error("Newick string is missing its terminating ';'")]
    MissingTerminator,

    #[error("Invalid branch length '{0}'")]
    InvalidBranchLength(String),

    #[error("Duplicate taxon name '{0}'")]
    DuplicateTaxon(String),

    #[error("Taxon '{0}' does not exist within the tree")]
    UnknownTaxon(String),
}
