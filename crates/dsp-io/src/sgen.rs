//! Signal-generator codec.
//!
//! A read-only codec whose "path" describes one or more generators summed
//! into the output. Grammar:
//!
//! ```text
//! gen[@selector][:opt=value[:opt=value...]][/gen...]
//! ```
//!
//! Generators: `sine` (`freq=`), `delta` (`offset=`), `silence`. The
//! codec-level option `len=` (length syntax: seconds, `m`, `S`) bounds the
//! stream; without it the generator runs forever.

use crate::codec::{Codec, CodecHints, CodecParams};
use crate::{CodecError, Result};
use dsp_core::{parse_freq, parse_len, ChannelSelector, Sample};
use std::f64::consts::TAU;

enum GenKind {
    Sine { freq: f64 },
    Delta { offset: u64 },
    Silence,
}

struct Generator {
    kind: GenKind,
    selector: ChannelSelector,
}

pub struct SgenCodec {
    path: String,
    fs: u32,
    channels: usize,
    generators: Vec<Generator>,
    total_frames: Option<u64>,
    pos: u64,
}

impl SgenCodec {
    pub fn open(params: &CodecParams) -> Result<Box<dyn Codec>> {
        let fs = params.fs.unwrap_or(48000);
        let channels = params.channels.unwrap_or(1);
        let bad = |reason: String| CodecError::Open {
            path: params.path.clone().into(),
            reason,
        };

        let mut generators = Vec::new();
        let mut total_frames = None;
        for part in params.path.split('/') {
            let mut fields = part.split(':');
            let head = fields.next().unwrap_or("");
            let (name, selector) = match head.split_once('@') {
                Some((n, sel)) => (
                    n,
                    ChannelSelector::parse(sel, channels)
                        .map_err(|e| bad(format!("bad selector: {e}")))?,
                ),
                None => (head, ChannelSelector::all(channels)),
            };
            let mut freq = 440.0;
            let mut offset = 0;
            for opt in fields {
                let (key, value) = opt
                    .split_once('=')
                    .ok_or_else(|| bad(format!("bad option: {opt}")))?;
                match key {
                    "freq" => {
                        freq = parse_freq(value).map_err(|e| bad(e.to_string()))?;
                    }
                    "offset" => {
                        offset = parse_len(value, fs).map_err(|e| bad(e.to_string()))?.max(0)
                            as u64;
                    }
                    "len" => {
                        let len = parse_len(value, fs).map_err(|e| bad(e.to_string()))?;
                        total_frames = Some(len.max(0) as u64);
                    }
                    _ => return Err(bad(format!("unknown option: {key}"))),
                }
            }
            let kind = match name {
                "sine" => GenKind::Sine { freq },
                "delta" => GenKind::Delta { offset },
                "silence" => GenKind::Silence,
                _ => return Err(bad(format!("unknown generator: {name}"))),
            };
            generators.push(Generator { kind, selector });
        }

        Ok(Box::new(Self {
            path: params.path.clone(),
            fs,
            channels,
            generators,
            total_frames,
            pos: 0,
        }))
    }
}

impl Codec for SgenCodec {
    fn path(&self) -> &str {
        &self.path
    }
    fn kind(&self) -> &'static str {
        "sgen"
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
        self.total_frames
    }
    fn hints(&self) -> CodecHints {
        CodecHints::default()
    }

    fn read(&mut self, buf: &mut [Sample], frames: usize) -> usize {
        let frames = match self.total_frames {
            Some(total) => frames.min(total.saturating_sub(self.pos) as usize),
            None => frames,
        };
        let samples = frames * self.channels;
        buf[..samples].fill(0.0);
        for gen in &self.generators {
            match gen.kind {
                GenKind::Sine { freq } => {
                    for i in 0..frames {
                        let t = (self.pos + i as u64) as f64 / f64::from(self.fs);
                        let s = (TAU * freq * t).sin();
                        for k in gen.selector.iter_set() {
                            buf[i * self.channels + k] += s;
                        }
                    }
                }
                GenKind::Delta { offset } => {
                    if offset >= self.pos && offset - self.pos < frames as u64 {
                        let i = (offset - self.pos) as usize;
                        for k in gen.selector.iter_set() {
                            buf[i * self.channels + k] += 1.0;
                        }
                    }
                }
                GenKind::Silence => {}
            }
        }
        self.pos += frames as u64;
        frames
    }

    fn seek(&mut self, pos: u64) -> Option<u64> {
        let pos = match self.total_frames {
            Some(total) => pos.min(total),
            None => pos,
        };
        self.pos = pos;
        Some(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecMode;

    fn open(path: &str, channels: usize) -> Box<dyn Codec> {
        let mut p = CodecParams::new(path, CodecMode::Read);
        p.fs = Some(48000);
        p.channels = Some(channels);
        SgenCodec::open(&p).unwrap()
    }

    #[test]
    fn sine_generates_expected_tone() {
        let mut c = open("sine:freq=1k:len=100S", 1);
        assert_eq!(c.frames(), Some(100));
        let mut buf = vec![0.0; 128];
        assert_eq!(c.read(&mut buf, 128), 100);
        let expected = (TAU * 1000.0 * 3.0 / 48000.0).sin();
        assert!((buf[3] - expected).abs() < 1e-12);
        assert_eq!(c.read(&mut buf, 16), 0);
    }

    #[test]
    fn delta_on_selected_channel() {
        let mut c = open("delta@1:offset=5S:len=10S", 2);
        let mut buf = vec![0.0; 20];
        assert_eq!(c.read(&mut buf, 10), 10);
        assert_eq!(buf[5 * 2], 0.0);
        assert_eq!(buf[5 * 2 + 1], 1.0);
        assert_eq!(buf.iter().filter(|&&s| s != 0.0).count(), 1);
    }

    #[test]
    fn rejects_unknown_generator() {
        let mut p = CodecParams::new("square", CodecMode::Read);
        p.fs = Some(48000);
        assert!(SgenCodec::open(&p).is_err());
    }
}
