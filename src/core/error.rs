use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Role '{0}' declared without a selection predicate")]
    MissingSelect(String),

    #[error("Role '{0}' declared without a cardinality")]
    MissingCardinality(String),

    #[error("Role '{role}' declared twice on ensemble '{ensemble}'")]
    DuplicateRole { ensemble: String, role: String },

    #[error("Estimate '{estimate}' bound twice on ensemble '{ensemble}'")]
    DuplicateEstimate { ensemble: String, estimate: String },

    #[error("Schema mismatch for estimator '{estimator}': {detail}")]
    SchemaMismatch { estimator: String, detail: String },

    #[error("Feature encoding error for '{feature}': {detail}")]
    FeatureEncoding { feature: String, detail: String },

    #[error("No pending training input for record {0}")]
    UnmatchedRecord(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EnsembleError>;
