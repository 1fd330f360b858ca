//! Error taxonomy for the retrieval core.
//!
//! Errors on the retrieval path (resolving, parsing, indexing) are fatal —
//! a wrong answer from a half-built graph is worse than no answer. Errors
//! on the LLM path downgrade to safe defaults instead (see `llm` and
//! `orchestrator`) and never appear here as a propagated failure.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DoctalkError {
    #[error("no source reference supplied — at least one of --code or --docs is required")]
    EmptySources,

    #[error("no resolver accepts reference {0:?}")]
    UnresolvableReference(String),

    #[error("remote fetch failed for {reference:?}")]
    RemoteFetchFailed {
        reference: String,
        #[source]
        source: git2::Error,
    },

    #[error("path {0:?} not found after resolving reference")]
    PathMissing(PathBuf),

    #[error("bad index file format: magic mismatch")]
    BadIndexFormat,

    #[error("index version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("failed to parse {path:?}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DoctalkError>;
