use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Structure error: {0}")]
    Structure(String),

    #[error("Dimension mismatch at row {row}: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        row: usize,
    },

    #[error("Arity mismatch: {records} records but {vectors} vectors")]
    ArityMismatch { records: usize, vectors: usize },

    #[error("Invalid vector at row {row}: {message}")]
    InvalidVector { row: usize, message: String },

    #[error("Index not loaded: build or load it first")]
    NotLoaded,

    #[error("Corrupt index state: {0}")]
    CorruptState(String),

    #[error("Unsupported metric: {0}")]
    UnsupportedMetric(String),

    #[error("Remote request timed out: {operation}")]
    RemoteTimeout { operation: String },

    #[error("Remote request failed: {0}")]
    RemoteRequest(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod connectors;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod query;
pub mod record;
pub mod tree;
