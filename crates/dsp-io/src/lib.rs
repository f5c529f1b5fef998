//! Codec backends and concurrent codec buffers for dsp.
//!
//! A [`Codec`] moves interleaved `f64` frames between the engine and some
//! storage or device format. The [`open_codec`] factory resolves a
//! [`CodecParams`] to a concrete backend (WAV via `hound`, the null codec,
//! or the `sgen` signal generator), first by explicit type, then by file
//! extension, then through the fallback cascade.
//!
//! [`CodecReadBuf`] and [`CodecWriteBuf`] wrap codecs in worker-thread ring
//! buffers so that a real-time sink never waits on processing jitter; see
//! the module docs of [`read_buf`] and [`write_buf`] for the command
//! protocols.

pub mod codec;
pub mod null;
pub mod read_buf;
pub mod sgen;
pub mod wav;
pub mod write_buf;

pub use codec::{open_codec, Codec, CodecHints, CodecInfo, CodecMode, CodecParams};
pub use read_buf::CodecReadBuf;
pub use write_buf::{CodecWriteBuf, WriteBufError};

use std::path::PathBuf;

/// Errors from codec open and I/O setup.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The backend recognized the request but could not satisfy it.
    #[error("failed to open {path}: {reason}")]
    Open {
        /// Path of the stream that could not be opened.
        path: PathBuf,
        /// Backend-specific description.
        reason: String,
    },

    /// The backend does not handle this path/type; the factory may try the
    /// next codec in the autodetect cascade.
    #[error("no codec for {path}")]
    Unrecognized {
        /// Path that no backend claimed.
        path: PathBuf,
    },

    /// The requested mode (read/write) is not supported by the backend.
    #[error("{kind} codec cannot {mode} {path}")]
    UnsupportedMode {
        kind: &'static str,
        mode: &'static str,
        path: PathBuf,
    },

    /// Bad parameter combination (unknown encoding, zero rate, ...).
    #[error("invalid codec parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
