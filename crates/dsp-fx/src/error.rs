//! Chain construction errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or operating an effects chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A token named no registered effect.
    #[error("no such effect: {0}")]
    UnknownEffect(String),

    /// An effect rejected its arguments; the message carries the usage line.
    #[error("{effect}: {message}")]
    Usage {
        effect: String,
        message: String,
    },

    /// An effect init failed for a reason other than bad arguments.
    #[error("failed to initialize effect: {effect}: {message}")]
    Init {
        effect: String,
        message: String,
    },

    /// Bad channel selector token.
    #[error("bad channel selector: {0}")]
    Selector(#[from] dsp_core::SelectorError),

    /// A `:` selector no longer parses after a channel-count change.
    #[error("channel selector {selector:?} is invalid after a channel-count change")]
    SelectorStale { selector: String },

    /// Unbalanced braces in a block.
    #[error("missing '}}'")]
    MissingBrace,

    /// `}` at the top level of a block.
    #[error("unexpected '}}'")]
    UnexpectedBrace,

    /// A chain-script file could not be loaded.
    #[error("failed to load effects file: {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// EOF-marker enforcement was on and the file did not end with it.
    #[error("missing end-of-file marker: {path}")]
    MissingEofMarker { path: PathBuf },

    /// An effect that cannot plot was asked to.
    #[error("effect '{0}' does not support plotting")]
    PlotUnsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChainError {
    /// Usage-style error for bad effect arguments.
    pub fn usage(effect: &str, message: impl Into<String>) -> Self {
        Self::Usage { effect: effect.to_string(), message: message.into() }
    }

    /// Generic init failure.
    pub fn init(effect: &str, message: impl Into<String>) -> Self {
        Self::Init { effect: effect.to_string(), message: message.into() }
    }
}
