//! The codec interface and the open factory.

use crate::{null, sgen, wav, CodecError, Result};
use dsp_core::Sample;
use std::path::Path;

/// Behavioral hints a codec exposes to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecHints {
    /// Output precision is low enough that dither improves the result.
    pub can_dither: bool,
    /// Sink is meant for a person listening right now (enables the
    /// interactive default).
    pub interactive: bool,
    /// Source cannot be pre-read (live capture); the read buffer idles
    /// before it until downstream drains.
    pub realtime: bool,
    /// Never wrap this codec in a write buffer.
    pub no_out_buf: bool,
    /// Never wrap this codec in any buffer.
    pub no_buf: bool,
}

/// Whether a codec is opened for reading or writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    Read,
    Write,
}

/// Parameters for [`open_codec`].
///
/// A closed record rather than a variadic init: unset options fall back to
/// backend defaults.
#[derive(Debug, Clone)]
pub struct CodecParams {
    pub path: String,
    /// Explicit codec type (`wav`, `null`, `sgen`); autodetected when unset.
    pub kind: Option<String>,
    /// Sample encoding (`s16`, `s24`, `s32`, `f32`, `f64`).
    pub encoding: Option<String>,
    pub fs: Option<u32>,
    pub channels: Option<usize>,
    pub mode: CodecMode,
    pub block_frames: usize,
    /// Ring depth of the codec buffer as a multiple of the block size.
    pub buf_ratio: usize,
}

impl CodecParams {
    pub fn new(path: impl Into<String>, mode: CodecMode) -> Self {
        Self {
            path: path.into(),
            kind: None,
            encoding: None,
            fs: None,
            channels: None,
            mode,
            block_frames: 2048,
            buf_ratio: 8,
        }
    }
}

/// A polymorphic audio source or sink.
///
/// Exactly one of `read`/`write` is meaningful, matching the open mode.
/// A short read means end of stream; a short write is an error the caller
/// must latch. Sample buffers are interleaved `f64` frames.
pub trait Codec: Send {
    fn path(&self) -> &str;
    fn kind(&self) -> &'static str;
    fn encoding(&self) -> &str;
    fn fs(&self) -> u32;
    fn channels(&self) -> usize;
    /// Effective precision in bits (53 for native `f64` paths).
    fn precision(&self) -> u32;
    /// Total length in frames, `None` when unknown or streaming.
    fn frames(&self) -> Option<u64>;
    fn hints(&self) -> CodecHints {
        CodecHints::default()
    }

    /// Read up to `frames` frames into `buf`; returns frames read.
    /// A short count signals end of stream.
    fn read(&mut self, _buf: &mut [Sample], _frames: usize) -> usize {
        0
    }

    /// Write `frames` frames from `buf`; returns frames written.
    /// A short count is an error condition.
    fn write(&mut self, _buf: &[Sample], _frames: usize) -> usize {
        0
    }

    /// Seek to absolute frame `pos`; returns the new position, or `None`
    /// when the codec cannot seek.
    fn seek(&mut self, _pos: u64) -> Option<u64> {
        None
    }

    /// Frames buffered inside the codec or device, not yet presented.
    fn delay(&self) -> u64 {
        0
    }

    /// Discard frames buffered inside the codec or device. Idempotent.
    fn drop_pending(&mut self) {}

    /// Pause or resume a device codec. Idempotent.
    fn pause(&mut self, _state: bool) {}
}

/// Immutable snapshot of a codec's descriptive fields.
///
/// The codec buffers move codec ownership into their worker threads;
/// callers keep one of these for progress display and stream checks.
#[derive(Debug, Clone)]
pub struct CodecInfo {
    pub path: String,
    pub kind: &'static str,
    pub encoding: String,
    pub fs: u32,
    pub channels: usize,
    pub precision: u32,
    pub frames: Option<u64>,
    pub hints: CodecHints,
}

impl CodecInfo {
    pub fn of(codec: &dyn Codec) -> Self {
        Self {
            path: codec.path().to_string(),
            kind: codec.kind(),
            encoding: codec.encoding().to_string(),
            fs: codec.fs(),
            channels: codec.channels(),
            precision: codec.precision(),
            frames: codec.frames(),
            hints: codec.hints(),
        }
    }
}

/// Open a codec from `params`.
///
/// Resolution order: explicit `kind`, then file extension, then the
/// fallback cascade (currently just the WAV reader). Open failures from an
/// explicitly named backend are final; cascade misses surface as
/// [`CodecError::Unrecognized`] so the caller can report "no codec".
pub fn open_codec(params: &CodecParams) -> Result<Box<dyn Codec>> {
    if let Some(kind) = params.kind.as_deref() {
        return open_by_kind(kind, params);
    }
    if params.path == "null" {
        return null::NullCodec::open(params);
    }
    let ext = Path::new(&params.path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if ext.as_deref() == Some("wav") {
        return wav::open(params);
    }
    // fallback cascade: formats that can identify a file from its header
    match wav::open(params) {
        Ok(codec) => Ok(codec),
        Err(err) => {
            tracing::debug!(path = %params.path, %err, "fallback codec rejected input");
            Err(CodecError::Unrecognized { path: params.path.clone().into() })
        }
    }
}

fn open_by_kind(kind: &str, params: &CodecParams) -> Result<Box<dyn Codec>> {
    match kind {
        "wav" => wav::open(params),
        "null" => null::NullCodec::open(params),
        "sgen" => sgen::SgenCodec::open(params),
        _ => Err(CodecError::InvalidParams(format!("unknown codec type: {kind}"))),
    }
}
