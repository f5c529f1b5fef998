//! WAV file codec via `hound`.

use crate::codec::{Codec, CodecHints, CodecMode, CodecParams};
use crate::{CodecError, Result};
use dsp_core::Sample;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufReader, BufWriter};

/// Open a WAV codec in the mode requested by `params`.
pub fn open(params: &CodecParams) -> Result<Box<dyn Codec>> {
    match params.mode {
        CodecMode::Read => WavReadCodec::open(params),
        CodecMode::Write => WavWriteCodec::open(params),
    }
}

fn encoding_name(spec: &WavSpec) -> String {
    match spec.sample_format {
        SampleFormat::Int => format!("s{}", spec.bits_per_sample),
        SampleFormat::Float => format!("f{}", spec.bits_per_sample),
    }
}

pub struct WavReadCodec {
    path: String,
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
    encoding: String,
    total_frames: u64,
}

impl WavReadCodec {
    pub fn open(params: &CodecParams) -> Result<Box<dyn Codec>> {
        let reader = WavReader::open(&params.path).map_err(|e| CodecError::Open {
            path: params.path.clone().into(),
            reason: e.to_string(),
        })?;
        let spec = reader.spec();
        let total_frames = reader.duration() as u64;
        Ok(Box::new(Self {
            path: params.path.clone(),
            encoding: encoding_name(&spec),
            reader,
            spec,
            total_frames,
        }))
    }
}

impl Codec for WavReadCodec {
    fn path(&self) -> &str {
        &self.path
    }
    fn kind(&self) -> &'static str {
        "wav"
    }
    fn encoding(&self) -> &str {
        &self.encoding
    }
    fn fs(&self) -> u32 {
        self.spec.sample_rate
    }
    fn channels(&self) -> usize {
        self.spec.channels as usize
    }
    fn precision(&self) -> u32 {
        match self.spec.sample_format {
            SampleFormat::Int => u32::from(self.spec.bits_per_sample),
            SampleFormat::Float => 24,
        }
    }
    fn frames(&self) -> Option<u64> {
        Some(self.total_frames)
    }
    fn hints(&self) -> CodecHints {
        CodecHints {
            can_dither: self.spec.sample_format == SampleFormat::Int,
            ..CodecHints::default()
        }
    }

    fn read(&mut self, buf: &mut [Sample], frames: usize) -> usize {
        let channels = self.channels();
        let want = frames * channels;
        let mut n = 0;
        match self.spec.sample_format {
            SampleFormat::Int => {
                let norm = 1.0 / (1i64 << (self.spec.bits_per_sample - 1)) as f64;
                for s in self.reader.samples::<i32>().take(want) {
                    match s {
                        Ok(v) => {
                            buf[n] = f64::from(v) * norm;
                            n += 1;
                        }
                        Err(_) => break,
                    }
                }
            }
            SampleFormat::Float => {
                for s in self.reader.samples::<f32>().take(want) {
                    match s {
                        Ok(v) => {
                            buf[n] = f64::from(v);
                            n += 1;
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        n / channels
    }

    fn seek(&mut self, pos: u64) -> Option<u64> {
        let pos = pos.min(self.total_frames);
        match self.reader.seek(pos as u32) {
            Ok(()) => Some(pos),
            Err(_) => None,
        }
    }
}

pub struct WavWriteCodec {
    path: String,
    writer: Option<WavWriter<BufWriter<File>>>,
    spec: WavSpec,
    encoding: String,
}

impl WavWriteCodec {
    pub fn open(params: &CodecParams) -> Result<Box<dyn Codec>> {
        let encoding = params.encoding.as_deref().unwrap_or("s16");
        let (bits, format) = match encoding {
            "s16" => (16, SampleFormat::Int),
            "s24" => (24, SampleFormat::Int),
            "s32" => (32, SampleFormat::Int),
            "f32" => (32, SampleFormat::Float),
            other => {
                return Err(CodecError::InvalidParams(format!(
                    "unknown wav encoding: {other}"
                )))
            }
        };
        let spec = WavSpec {
            channels: params.channels.unwrap_or(1) as u16,
            sample_rate: params.fs.unwrap_or(48000),
            bits_per_sample: bits,
            sample_format: format,
        };
        let writer = WavWriter::create(&params.path, spec).map_err(|e| CodecError::Open {
            path: params.path.clone().into(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(Self {
            path: params.path.clone(),
            writer: Some(writer),
            spec,
            encoding: encoding_name(&spec),
        }))
    }
}

impl Codec for WavWriteCodec {
    fn path(&self) -> &str {
        &self.path
    }
    fn kind(&self) -> &'static str {
        "wav"
    }
    fn encoding(&self) -> &str {
        &self.encoding
    }
    fn fs(&self) -> u32 {
        self.spec.sample_rate
    }
    fn channels(&self) -> usize {
        self.spec.channels as usize
    }
    fn precision(&self) -> u32 {
        match self.spec.sample_format {
            SampleFormat::Int => u32::from(self.spec.bits_per_sample),
            SampleFormat::Float => 24,
        }
    }
    fn frames(&self) -> Option<u64> {
        None
    }
    fn hints(&self) -> CodecHints {
        CodecHints {
            can_dither: self.spec.sample_format == SampleFormat::Int,
            ..CodecHints::default()
        }
    }

    fn write(&mut self, buf: &[Sample], frames: usize) -> usize {
        let Some(writer) = self.writer.as_mut() else {
            return 0;
        };
        let samples = frames * self.spec.channels as usize;
        match self.spec.sample_format {
            SampleFormat::Int => {
                let max = f64::from(1i32 << (self.spec.bits_per_sample - 1));
                for (i, &s) in buf[..samples].iter().enumerate() {
                    let v = (s * max).clamp(-max, max - 1.0) as i32;
                    if writer.write_sample(v).is_err() {
                        return i / self.spec.channels as usize;
                    }
                }
            }
            SampleFormat::Float => {
                for (i, &s) in buf[..samples].iter().enumerate() {
                    if writer.write_sample(s as f32).is_err() {
                        return i / self.spec.channels as usize;
                    }
                }
            }
        }
        frames
    }
}

impl Drop for WavWriteCodec {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.finalize() {
                tracing::error!(path = %self.path, %err, "failed to finalize wav file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecMode;

    fn params(path: &str, mode: CodecMode) -> CodecParams {
        let mut p = CodecParams::new(path, mode);
        p.fs = Some(48000);
        p.channels = Some(2);
        p
    }

    #[test]
    fn roundtrip_s16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        let path = path.to_str().unwrap();

        let input: Vec<Sample> = (0..256)
            .flat_map(|i| {
                let s = (i as f64 / 256.0 * std::f64::consts::TAU).sin() * 0.5;
                [s, -s]
            })
            .collect();
        {
            let mut w = WavWriteCodec::open(&params(path, CodecMode::Write)).unwrap();
            assert_eq!(w.write(&input, 256), 256);
        }
        let mut r = WavReadCodec::open(&params(path, CodecMode::Read)).unwrap();
        assert_eq!(r.fs(), 48000);
        assert_eq!(r.channels(), 2);
        assert_eq!(r.frames(), Some(256));
        assert!(r.hints().can_dither);
        let mut out = vec![0.0; 512];
        assert_eq!(r.read(&mut out, 256), 256);
        for (a, b) in input.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1.0 / 32768.0);
        }
        // EOF
        assert_eq!(r.read(&mut out, 16), 0);
    }

    #[test]
    fn seek_restarts_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        let path = path.to_str().unwrap();

        let mut p = params(path, CodecMode::Write);
        p.channels = Some(1);
        p.encoding = Some("f32".into());
        let input: Vec<Sample> = (0..100).map(|i| i as f64 / 100.0).collect();
        {
            let mut w = WavWriteCodec::open(&p).unwrap();
            assert_eq!(w.write(&input, 100), 100);
        }
        let mut rp = params(path, CodecMode::Read);
        rp.channels = Some(1);
        let mut r = WavReadCodec::open(&rp).unwrap();
        let mut out = vec![0.0; 100];
        assert_eq!(r.read(&mut out, 100), 100);
        assert_eq!(r.seek(50), Some(50));
        let mut rest = vec![0.0; 50];
        assert_eq!(r.read(&mut rest, 50), 50);
        for (a, b) in out[50..].iter().zip(rest.iter()) {
            assert_eq!(a, b);
        }
    }
}
