use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Failed to serialize command line arguments into '{path}': [{msg}]")]
    SerializeYaml { path: String, msg: String },

    #[error("Unable to deserialize arguments from '{path}': [{msg}]")]
    DeserializeYaml { path: String, msg: String },
}
