//! Crate-level error type

use crate::applier::ApplyError;
use crate::oracle::OracleError;
use crate::store::StoreError;
use crate::trie::TrieError;
use crate::types::{ParseHexError, ValueError};
use thiserror::Error;

/// Unified error for callers that don't need to match a specific module error
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseHexError),

    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    #[error("Trie error: {0}")]
    Trie(#[from] TrieError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
