//! `crossfeed`: shelving headphone crossfeed on a selected channel pair.

use crate::effect::{BufSel, Effect, EffectArgs, EffectFlags};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{parse_freq, Biquad, BiquadType, Sample, Stream, Width};
use std::any::Any;
use std::io::Write;

pub struct CrossfeedEffect {
    name: &'static str,
    stream: Stream,
    c0: usize,
    c1: usize,
    direct_gain: Sample,
    cross_gain: Sample,
    lp: [Biquad; 2],
    hp: [Biquad; 2],
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    if args.args.len() != 2 {
        return Err(args.usage(format!("usage: {}", info.usage)));
    }
    if args.selector.count() != 2 {
        return Err(args.usage("number of input channels must be 2"));
    }
    let freq = parse_freq(&args.args[0]).map_err(|e| args.usage(e.to_string()))?;
    if !(0.0..f64::from(args.istream.fs) / 2.0).contains(&freq) {
        return Err(args.usage("f0 out of range"));
    }
    let sep_db: f64 = args.args[1]
        .parse()
        .map_err(|_| args.usage(format!("failed to parse separation: {}", args.args[1])))?;
    if sep_db < 0.0 {
        return Err(args.usage("separation out of range"));
    }

    let mut pair = args.selector.iter_set();
    let c0 = pair.next().unwrap();
    let c1 = pair.next().unwrap();
    let sep = dsp_core::db_to_linear(sep_db);
    let fs = f64::from(args.istream.fs);
    let lp = Biquad::design(BiquadType::Lowpass1, fs, freq, Width::default_q(), 0.0);
    let hp = Biquad::design(BiquadType::Highpass1, fs, freq, Width::default_q(), 0.0);
    Ok(vec![Box::new(CrossfeedEffect {
        name: info.name,
        stream: args.istream,
        c0,
        c1,
        direct_gain: sep / (1.0 + sep),
        cross_gain: 1.0 / (1.0 + sep),
        lp: [lp.clone(), lp],
        hp: [hp.clone(), hp],
    })])
}

impl Effect for CrossfeedEffect {
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
        EffectFlags { plot_mix: true, ..EffectFlags::default() }
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], _obuf: &mut [Sample]) -> BufSel {
        let channels = self.stream.channels;
        for frame in ibuf[..*frames * channels].chunks_exact_mut(channels) {
            let s0 = frame[self.c0];
            let s1 = frame[self.c1];
            frame[self.c0] = s0 * self.direct_gain
                + self.lp[0].process(s1) * self.cross_gain
                + self.hp[0].process(s0) * self.cross_gain;
            frame[self.c1] = s1 * self.direct_gain
                + self.lp[1].process(s0) * self.cross_gain
                + self.hp[1].process(s1) * self.cross_gain;
        }
        BufSel::In
    }

    fn reset(&mut self) {
        for b in self.lp.iter_mut().chain(self.hp.iter_mut()) {
            b.reset();
        }
    }

    fn can_plot(&self) -> bool {
        true
    }

    fn plot(&self, out: &mut dyn Write, idx: usize) -> std::io::Result<()> {
        let fs = self.stream.fs;
        let biquad_term = |b: &Biquad| {
            let (b0, b1, b2, a1, a2) = b.coefficients();
            format!(
                "({b0:.15e}+{b1:.15e}*exp(-j*w)+{b2:.15e}*exp(-2.0*j*w))\
                 /(1.0+{a1:.15e}*exp(-j*w)+{a2:.15e}*exp(-2.0*j*w))"
            )
        };
        for k in 0..self.stream.channels {
            if k == self.c0 || k == self.c1 {
                let cc = if k == self.c0 { self.c1 } else { self.c0 };
                writeln!(
                    out,
                    "H{k}_{idx}(w)=(abs(w)<=pi)?{:.15e}*Ht{k}_{idx}(w*{fs}/2.0/pi)\
                     +{:.15e}*Ht{cc}_{idx}(w*{fs}/2.0/pi)*{}\
                     +{:.15e}*Ht{k}_{idx}(w*{fs}/2.0/pi)*{}:0/0",
                    self.direct_gain,
                    self.cross_gain,
                    biquad_term(&self.lp[0]),
                    self.cross_gain,
                    biquad_term(&self.hp[0]),
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
