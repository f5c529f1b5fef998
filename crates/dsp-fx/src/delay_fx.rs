//! `delay`: whole-sample delay on selected channels.
//!
//! A negative delay argument delays every *other* channel instead, which
//! advances the selected ones relative to them; the effect then reports the
//! corresponding latency.

use crate::effect::{BufSel, Effect, EffectArgs};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{parse_len, Sample, Stream};
use std::any::Any;
use std::io::Write;

pub struct DelayEffect {
    name: &'static str,
    stream: Stream,
    /// Ring buffer per delayed channel.
    bufs: Vec<Option<Vec<Sample>>>,
    len: usize,
    p: usize,
    negative: bool,
    buf_full: bool,
    draining: Option<usize>,
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    if args.args.len() != 1 {
        return Err(args.usage(format!("usage: {}", info.usage)));
    }
    let samples = parse_len(&args.args[0], args.istream.fs)
        .map_err(|e| args.usage(e.to_string()))?;
    if samples == 0 {
        tracing::debug!("delay is zero; no processing will be done");
        return Ok(vec![]);
    }
    let negative = samples < 0;
    let len = samples.unsigned_abs() as usize;
    tracing::debug!(
        "actual delay is {}s ({} sample{})",
        samples as f64 / f64::from(args.istream.fs),
        samples,
        if samples.abs() == 1 { "" } else { "s" }
    );
    let bufs = (0..args.istream.channels)
        .map(|k| {
            // negative delay shifts the complement
            if args.selector.get(k) != negative {
                Some(vec![0.0; len])
            } else {
                None
            }
        })
        .collect();
    Ok(vec![Box::new(DelayEffect {
        name: info.name,
        stream: args.istream,
        bufs,
        len,
        p: 0,
        negative,
        buf_full: false,
        draining: None,
    })])
}

impl Effect for DelayEffect {
    fn name(&self) -> &'static str {
        self.name
    }
    fn istream(&self) -> Stream {
        self.stream
    }
    fn ostream(&self) -> Stream {
        self.stream
    }
    fn flags(&self) -> crate::effect::EffectFlags {
        crate::effect::EffectFlags { opt_reorderable: true, ..Default::default() }
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], _obuf: &mut [Sample]) -> BufSel {
        let channels = self.stream.channels;
        if !self.buf_full && self.p + *frames >= self.len {
            self.buf_full = true;
        }
        for frame in ibuf[..*frames * channels].chunks_exact_mut(channels) {
            for (s, buf) in frame.iter_mut().zip(self.bufs.iter_mut()) {
                if let Some(buf) = buf {
                    std::mem::swap(s, &mut buf[self.p]);
                }
            }
            self.p = if self.p + 1 >= self.len { 0 } else { self.p + 1 };
        }
        BufSel::In
    }

    fn delay(&self) -> usize {
        if self.negative {
            if self.buf_full {
                self.len
            } else {
                self.p
            }
        } else {
            0
        }
    }

    fn reset(&mut self) {
        self.p = 0;
        self.buf_full = false;
        self.draining = None;
        for buf in self.bufs.iter_mut().flatten() {
            buf.fill(0.0);
        }
    }

    fn can_plot(&self) -> bool {
        true
    }

    fn plot(&self, out: &mut dyn Write, idx: usize) -> std::io::Result<()> {
        for (k, buf) in self.bufs.iter().enumerate() {
            if buf.is_some() {
                let d = if self.negative { -(self.len as i64) } else { self.len as i64 };
                writeln!(out, "H{k}_{idx}(w)=exp(-j*w*{d})")?;
            } else {
                writeln!(out, "H{k}_{idx}(w)=1.0")?;
            }
        }
        Ok(())
    }

    fn drain(
        &mut self,
        frames: &mut usize,
        buf1: &mut [Sample],
        _buf2: &mut [Sample],
    ) -> Option<BufSel> {
        if !self.buf_full && self.p == 0 {
            return None;
        }
        let remaining = *self.draining.get_or_insert(self.len);
        if remaining == 0 {
            return None;
        }
        let n = (*frames).min(remaining);
        self.draining = Some(remaining - n);
        let channels = self.stream.channels;
        for frame in buf1[..n * channels].chunks_exact_mut(channels) {
            for (s, buf) in frame.iter_mut().zip(self.bufs.iter_mut()) {
                if let Some(buf) = buf {
                    *s = buf[self.p];
                    buf[self.p] = 0.0;
                } else {
                    *s = 0.0;
                }
            }
            self.p = if self.p + 1 >= self.len { 0 } else { self.p + 1 };
        }
        *frames = n;
        Some(BufSel::In)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsp_core::ChannelSelector;
    use std::path::Path;

    fn make(arg: &str, channels: usize, selector: &str) -> Vec<Box<dyn Effect>> {
        let info = crate::registry::find_effect("delay").unwrap();
        let selector = ChannelSelector::parse(selector, channels).unwrap();
        let args = EffectArgs {
            name: "delay",
            args: &[arg.to_string()],
            istream: Stream::new(48000, channels),
            selector: &selector,
            dir: Path::new("."),
        };
        init(info, &args).unwrap()
    }

    #[test]
    fn zero_delay_returns_no_effect() {
        assert!(make("0", 2, "").is_empty());
    }

    #[test]
    fn delays_by_sample_count() {
        let mut e = make("3S", 1, "").remove(0);
        let mut obuf = vec![0.0; 8];
        let mut buf = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let mut frames = 8;
        e.run(&mut frames, &mut buf, &mut obuf);
        assert_eq!(buf, vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        // the tail drains out
        let mut d = vec![0.0; 8];
        let mut dframes = 8;
        assert!(e.drain(&mut dframes, &mut d, &mut obuf).is_some());
        assert_eq!(dframes, 3);
        assert_eq!(&d[..3], &[6.0, 7.0, 8.0]);
        let mut dframes = 8;
        assert!(e.drain(&mut dframes, &mut d, &mut obuf).is_none());
    }

    #[test]
    fn negative_delay_reports_latency() {
        let mut e = make("-4S", 2, "0").remove(0);
        assert_eq!(e.delay(), 0);
        let mut buf = vec![0.0; 16];
        let mut obuf = vec![0.0; 16];
        let mut frames = 8;
        e.run(&mut frames, &mut buf, &mut obuf);
        assert_eq!(e.delay(), 4);
    }
}
