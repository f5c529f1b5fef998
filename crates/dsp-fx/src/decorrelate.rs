//! `decorrelate`: frequency-dependent Schroeder allpass decorrelator.
//!
//! After "Frequency-Dependent Schroeder Allpass Filters" by Sebastian J.
//! Schlecht (doi:10.3390/app10010187). Each selected channel runs an
//! independent cascade of allpass stages with randomized delays, giving
//! uncorrelated phase without coloration.

use crate::effect::{BufSel, Effect, EffectArgs};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{PmRand, Sample, Stream};
use std::any::Any;

const FILTER_FC: f64 = 1100.0;
const RT60_LF: f64 = 0.1;
const RT60_HF: f64 = 0.008;

/// One frequency-dependent Schroeder allpass section.
struct SchAp {
    len: usize,
    p: usize,
    mx: Vec<Sample>,
    my: Vec<Sample>,
    b0: Sample,
    b1: Sample,
    a0: Sample,
    a1: Sample,
}

impl SchAp {
    fn new(fs: u32, delay_s: f64) -> Self {
        let fs = f64::from(fs);
        let delay_samples = (delay_s * fs).round().max(1.0);
        let gain_lf = -60.0 / (RT60_LF * fs) * delay_samples;
        let gain_hf = -60.0 / (RT60_HF * fs) * delay_samples;
        let w0 = std::f64::consts::TAU * FILTER_FC / fs;
        let t = (w0 / 2.0).tan();
        let g_hf = dsp_core::db_to_linear(gain_hf);
        let gd = dsp_core::db_to_linear(gain_lf - gain_hf);
        let sgd = gd.sqrt();
        let a0 = t + sgd;
        Self {
            len: delay_samples as usize + 1,
            p: 0,
            mx: vec![0.0; delay_samples as usize + 1],
            my: vec![0.0; delay_samples as usize + 1],
            b0: (gd * t - sgd) / a0 * g_hf,
            b1: (gd * t + sgd) / a0 * g_hf,
            a0: 1.0,
            a1: (t - sgd) / a0,
        }
    }

    #[inline]
    fn process(&mut self, x: Sample) -> Sample {
        let i0 = if self.p < 1 { self.len } else { self.p } - 1;
        let i_n1 = self.p;
        let i_n2 = if self.p + 1 >= self.len { 0 } else { self.p + 1 };
        let r = self.b1 * x + self.b0 * self.mx[i0] + self.a1 * self.mx[i_n2]
            + self.a0 * self.mx[i_n1]
            - self.a1 * self.my[i0]
            - self.b0 * self.my[i_n2]
            - self.b1 * self.my[i_n1];
        self.mx[self.p] = x;
        self.my[self.p] = r;
        self.p = if self.p + 1 >= self.len { 0 } else { self.p + 1 };
        r
    }

    fn reset(&mut self) {
        self.p = 0;
        self.mx.fill(0.0);
        self.my.fill(0.0);
    }
}

pub struct DecorrelateEffect {
    name: &'static str,
    stream: Stream,
    /// Allpass cascade per channel; `None` for unselected channels.
    stages: Vec<Option<Vec<SchAp>>>,
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    let mut mono = false;
    let mut rest = args.args;
    if rest.first().map(String::as_str) == Some("-m") {
        mono = true;
        rest = &rest[1..];
    }
    let n_stages = match rest {
        [] => 5,
        [s] => s
            .parse::<usize>()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| args.usage(format!("usage: {}", info.usage)))?,
        _ => return Err(args.usage(format!("usage: {}", info.usage))),
    };

    // randomized stage delays up to ~2.5 ms; with -m every channel shares
    // one draw so the decorrelation is only against other sources
    let mut rng = PmRand::new1();
    let mut draw_cascade = |rng: &mut PmRand| {
        (0..n_stages)
            .map(|_| {
                let r = f64::from(rng.next()) / f64::from(dsp_core::rng::PM_RAND_MAX);
                SchAp::new(args.istream.fs, 0.0005 + r * 0.002)
            })
            .collect::<Vec<_>>()
    };
    let shared = mono.then(|| draw_cascade(&mut rng));
    let stages = (0..args.istream.channels)
        .map(|k| {
            if !args.selector.get(k) {
                return None;
            }
            match &shared {
                Some(c) => Some(
                    c.iter()
                        .map(|ap| SchAp { // clone with fresh state
                            len: ap.len,
                            p: 0,
                            mx: vec![0.0; ap.len],
                            my: vec![0.0; ap.len],
                            b0: ap.b0,
                            b1: ap.b1,
                            a0: ap.a0,
                            a1: ap.a1,
                        })
                        .collect(),
                ),
                None => Some(draw_cascade(&mut rng)),
            }
        })
        .collect();
    Ok(vec![Box::new(DecorrelateEffect {
        name: info.name,
        stream: args.istream,
        stages,
    })])
}

impl Effect for DecorrelateEffect {
    fn name(&self) -> &'static str {
        self.name
    }
    fn istream(&self) -> Stream {
        self.stream
    }
    fn ostream(&self) -> Stream {
        self.stream
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], _obuf: &mut [Sample]) -> BufSel {
        let channels = self.stream.channels;
        for frame in ibuf[..*frames * channels].chunks_exact_mut(channels) {
            for (s, cascade) in frame.iter_mut().zip(self.stages.iter_mut()) {
                if let Some(cascade) = cascade {
                    for ap in cascade.iter_mut() {
                        *s = ap.process(*s);
                    }
                }
            }
        }
        BufSel::In
    }

    fn reset(&mut self) {
        for ap in self.stages.iter_mut().flatten().flat_map(|c| c.iter_mut()) {
            ap.reset();
        }
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

    #[test]
    fn allpass_section_preserves_energy_roughly() {
        let mut ap = SchAp::new(48000, 0.001);
        let mut in_e = 0.0;
        let mut out_e = 0.0;
        let mut rng = PmRand::new2();
        for _ in 0..48000 {
            let x = f64::from(rng.next()) / f64::from(dsp_core::rng::PM_RAND_MAX) - 0.5;
            let y = ap.process(x);
            in_e += x * x;
            out_e += y * y;
            assert!(y.is_finite());
        }
        let ratio_db = 10.0 * (out_e / in_e).log10();
        assert!(ratio_db.abs() < 3.0, "energy ratio {ratio_db} dB");
    }
}
