//! `noise`: additive TPDF noise on selected channels.

use crate::effect::{BufSel, Effect, EffectArgs, EffectFlags};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::rng::PM_RAND_MAX;
use dsp_core::{parse_level, ChannelSelector, Sample, Stream, TpdfNoise};
use std::any::Any;
use std::io::Write;

pub struct NoiseEffect {
    name: &'static str,
    stream: Stream,
    selector: ChannelSelector,
    noise: TpdfNoise,
    mult: Sample,
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    if args.args.len() != 1 {
        return Err(args.usage(format!("usage: {}", info.usage)));
    }
    let level = parse_level(&args.args[0]).map_err(|e| args.usage(e.to_string()))?;
    let mult = level / f64::from(PM_RAND_MAX);
    Ok(vec![Box::new(NoiseEffect {
        name: info.name,
        stream: args.istream,
        selector: args.selector.clone(),
        noise: TpdfNoise::new(mult),
        mult,
    })])
}

impl Effect for NoiseEffect {
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
        // noise is signal-dependent per channel; the plot accumulator
        // cannot factor through it
        EffectFlags { plot_mix: true, ..EffectFlags::default() }
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], _obuf: &mut [Sample]) -> BufSel {
        let channels = self.stream.channels;
        for frame in ibuf[..*frames * channels].chunks_exact_mut(channels) {
            for k in self.selector.iter_set() {
                frame[k] += self.noise.next();
            }
        }
        BufSel::In
    }

    fn can_plot(&self) -> bool {
        true
    }

    fn plot(&self, out: &mut dyn Write, idx: usize) -> std::io::Result<()> {
        let fs = self.stream.fs;
        let amp = self.mult * f64::from(PM_RAND_MAX) * std::f64::consts::FRAC_1_SQRT_2;
        for k in 0..self.stream.channels {
            if self.selector.get(k) {
                writeln!(out, "H{k}_{idx}_lw=NaN")?;
                writeln!(out, "H{k}_{idx}_lv=0")?;
                writeln!(
                    out,
                    "H{k}_{idx}_tpdf(w)=(w==H{k}_{idx}_lw)?H{k}_{idx}_lv:\
                     (H{k}_{idx}_lw=w, H{k}_{idx}_lv={amp:.15e}*((rand(0)-rand(0))+j*(rand(0)-rand(0))))"
                )?;
                writeln!(
                    out,
                    "H{k}_{idx}(w)=Ht{k}_{idx}(w*{fs}/2.0/pi)+H{k}_{idx}_tpdf(w)"
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
