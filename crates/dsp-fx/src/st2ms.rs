//! `st2ms` / `ms2st`: stereo <-> mid/side on a selected channel pair.

use crate::effect::{BufSel, Effect, EffectArgs, EffectFlags};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{Sample, Stream};
use std::any::Any;
use std::io::Write;

pub struct St2MsEffect {
    name: &'static str,
    stream: Stream,
    /// The matrixed pair.
    c0: usize,
    c1: usize,
    /// 0.5 encoding to M/S, 1.0 decoding back.
    scale: Sample,
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    if !args.args.is_empty() {
        return Err(args.usage(format!("usage: {}", info.usage)));
    }
    if args.selector.count() != 2 {
        return Err(args.usage("number of input channels must be 2"));
    }
    let mut pair = args.selector.iter_set();
    let c0 = pair.next().unwrap();
    let c1 = pair.next().unwrap();
    let scale = if args.name == "st2ms" { 0.5 } else { 1.0 };
    Ok(vec![Box::new(St2MsEffect {
        name: info.name,
        stream: args.istream,
        c0,
        c1,
        scale,
    })])
}

impl Effect for St2MsEffect {
    fn name(&self) -> &'static str {
        self.name
    }
    fn istream(&self) -> Stream {
        self.stream
    }
    fn ostream(&self) -> Stream {
        self.stream
    }
    fn flags(&self) -> EffectFlags {
        // sum/difference couples the pair, so plotting cannot treat the
        // channels independently downstream
        EffectFlags { plot_mix: true, ..EffectFlags::default() }
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], _obuf: &mut [Sample]) -> BufSel {
        let channels = self.stream.channels;
        for frame in ibuf[..*frames * channels].chunks_exact_mut(channels) {
            let s0 = frame[self.c0];
            let s1 = frame[self.c1];
            frame[self.c0] = (s0 + s1) * self.scale;
            frame[self.c1] = (s0 - s1) * self.scale;
        }
        BufSel::In
    }

    fn can_plot(&self) -> bool {
        true
    }

    fn plot(&self, out: &mut dyn Write, idx: usize) -> std::io::Result<()> {
        let fs = self.stream.fs;
        for k in 0..self.stream.channels {
            if k == self.c0 {
                writeln!(
                    out,
                    "H{k}_{idx}(w)=(Ht{}_{idx}(w*{fs}/2.0/pi)+Ht{}_{idx}(w*{fs}/2.0/pi))*{}",
                    self.c0, self.c1, self.scale
                )?;
            } else if k == self.c1 {
                writeln!(
                    out,
                    "H{k}_{idx}(w)=(Ht{}_{idx}(w*{fs}/2.0/pi)-Ht{}_{idx}(w*{fs}/2.0/pi))*{}",
                    self.c0, self.c1, self.scale
                )?;
            } else {
                writeln!(out, "H{k}_{idx}(w)=Ht{k}_{idx}(w*{fs}/2.0/pi)")?;
            }
        }
        Ok(())
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

    fn make(name: &str) -> Box<dyn Effect> {
        let info = crate::registry::find_effect(name).unwrap();
        let selector = ChannelSelector::all(2);
        let args = EffectArgs {
            name,
            args: &[],
            istream: Stream::new(48000, 2),
            selector: &selector,
            dir: Path::new("."),
        };
        init(info, &args).unwrap().remove(0)
    }

    #[test]
    fn encode_decode_is_identity() {
        let mut enc = make("st2ms");
        let mut dec = make("ms2st");
        let mut buf = vec![0.8, -0.3];
        let mut obuf = vec![0.0; 2];
        let mut frames = 1;
        enc.run(&mut frames, &mut buf, &mut obuf);
        assert_eq!(buf, vec![0.25, 0.55]);
        dec.run(&mut frames, &mut buf, &mut obuf);
        assert!((buf[0] - 0.8).abs() < 1e-15);
        assert!((buf[1] + 0.3).abs() < 1e-15);
    }
}
