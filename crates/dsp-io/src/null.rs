//! The null codec: reads silence, discards writes.

use crate::codec::{Codec, CodecHints, CodecMode, CodecParams};
use crate::Result;
use dsp_core::Sample;

pub struct NullCodec {
    fs: u32,
    channels: usize,
    mode: CodecMode,
}

impl NullCodec {
    pub fn open(params: &CodecParams) -> Result<Box<dyn Codec>> {
        Ok(Box::new(Self {
            fs: params.fs.unwrap_or(48000),
            channels: params.channels.unwrap_or(1),
            mode: params.mode,
        }))
    }
}

impl Codec for NullCodec {
    fn path(&self) -> &str {
        "null"
    }
    fn kind(&self) -> &'static str {
        "null"
    }
    fn encoding(&self) -> &str {
        "sample"
    }
    fn fs(&self) -> u32 {
        self.fs
    }
    fn channels(&self) -> usize {
        self.channels
    }
    fn precision(&self) -> u32 {
        53
    }
    fn frames(&self) -> Option<u64> {
        None
    }
    fn hints(&self) -> CodecHints {
        CodecHints { no_out_buf: true, ..CodecHints::default() }
    }

    fn read(&mut self, buf: &mut [Sample], frames: usize) -> usize {
        if self.mode != CodecMode::Read {
            return 0;
        }
        buf[..frames * self.channels].fill(0.0);
        frames
    }

    fn write(&mut self, _buf: &[Sample], frames: usize) -> usize {
        if self.mode != CodecMode::Write {
            return 0;
        }
        frames
    }

    fn seek(&mut self, pos: u64) -> Option<u64> {
        Some(pos)
    }
}
