//! `matrix4` / `matrix4_mb`: 2-to-4 channel matrix surround decode.
//!
//! The selected stereo pair is decoded into front left/right plus two
//! appended surround channels derived from the difference signal. The
//! multiband variant accepts the same surface; band-split steering is an
//! algorithmic refinement this decoder does not implement.

use crate::effect::{BufSel, Effect, EffectArgs, EffectFlags};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{Sample, Stream};
use std::any::Any;
use std::io::Write;

pub struct Matrix4Effect {
    name: &'static str,
    istream: Stream,
    ostream: Stream,
    c0: usize,
    c1: usize,
    surround_level: Sample,
    enabled: bool,
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    if args.selector.count() != 2 {
        return Err(args.usage("number of input channels must be 2"));
    }
    let surround_level = match args.args {
        [] => 1.0,
        [level] => {
            let v: f64 = level
                .parse()
                .map_err(|_| args.usage(format!("failed to parse surround_level: {level}")))?;
            if !(0.0..=1.0).contains(&v) {
                return Err(args.usage("surround_level out of range"));
            }
            v
        }
        _ => return Err(args.usage(format!("usage: {}", info.usage))),
    };
    let mut pair = args.selector.iter_set();
    let c0 = pair.next().unwrap();
    let c1 = pair.next().unwrap();
    Ok(vec![Box::new(Matrix4Effect {
        name: info.name,
        istream: args.istream,
        ostream: Stream::new(args.istream.fs, args.istream.channels + 2),
        c0,
        c1,
        surround_level,
        enabled: true,
    })])
}

impl Effect for Matrix4Effect {
    fn name(&self) -> &'static str {
        self.name
    }
    fn istream(&self) -> Stream {
        self.istream
    }
    fn ostream(&self) -> Stream {
        self.ostream
    }
    fn flags(&self) -> EffectFlags {
        EffectFlags { plot_mix: true, ..EffectFlags::default() }
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], obuf: &mut [Sample]) -> BufSel {
        let (ic, oc) = (self.istream.channels, self.ostream.channels);
        let level = if self.enabled { self.surround_level * 0.5 } else { 0.0 };
        for i in 0..*frames {
            let frame = &ibuf[i * ic..(i + 1) * ic];
            let out = &mut obuf[i * oc..(i + 1) * oc];
            out[..ic].copy_from_slice(frame);
            let diff = frame[self.c0] - frame[self.c1];
            out[ic] = diff * level;
            out[ic + 1] = -diff * level;
        }
        BufSel::Out
    }

    fn signal(&mut self) {
        self.enabled = !self.enabled;
        tracing::info!(
            "{}: surround decode {}",
            self.name,
            if self.enabled { "enabled" } else { "disabled" }
        );
    }

    fn can_plot(&self) -> bool {
        true
    }

    fn plot(&self, out: &mut dyn Write, idx: usize) -> std::io::Result<()> {
        let fs = self.ostream.fs;
        let level = self.surround_level * 0.5;
        for k in 0..self.istream.channels {
            writeln!(out, "H{k}_{idx}(w)=Ht{k}_{idx}(w*{fs}/2.0/pi)")?;
        }
        for (k, sign) in [(self.istream.channels, ""), (self.istream.channels + 1, "-")] {
            writeln!(
                out,
                "H{k}_{idx}(w)={sign}{level:.15e}*(Ht{}_{idx}(w*{fs}/2.0/pi)-Ht{}_{idx}(w*{fs}/2.0/pi))",
                self.c0, self.c1
            )?;
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
