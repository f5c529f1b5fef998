//! `dither`: TPDF dither with optional noise shaping and requantization.
//!
//! Shapers:
//!
//! - `flat` - TPDF with no feedback
//! - `sloped` - TPDF with error feedback; first-order highpass response
//! - `sloped2` - sloped TPDF noise with feedback; stronger HF emphasis
//! - `lipshitz` - 5-tap e-weighted curve (44.1 kHz)
//! - `wan3` / `wan9` - 3/9-tap f-weighted curves (44.1-48 kHz)
//!
//! References: Lipshitz, Vanderkooy, Wannamaker, "Minimally Audible Noise
//! Shaping", J. AES 39(11), 1991; Wannamaker, "Psychoacoustically Optimal
//! Noise Shaping", J. AES 40(7/8), 1992.

use crate::effect::{BufSel, Effect, EffectArgs};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::rng::PM_RAND_MAX;
use dsp_core::{ChannelSelector, PmRand, Sample, Stream};
use std::any::Any;
use std::io::Write;

const MAX_FIR_LEN: usize = 9;

const FILTER_LIPSHITZ_44: [Sample; 5] = [2.033, -2.165, 1.959, -1.590, 0.6149];
const FILTER_WAN3_44: [Sample; 3] = [1.623, -0.982, 0.109];
const FILTER_WAN9_44: [Sample; 9] =
    [2.412, -3.370, 3.937, -4.174, 3.353, -2.205, 1.281, -0.569, 0.0847];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Flat,
    Sloped,
    Sloped2,
    Lipshitz44,
    Wan3_44,
    Wan9_44,
}

impl Shape {
    /// Look a shape name up, checking the rate it was designed for
    /// (within 5%). `fs == 0` skips the rate check.
    fn find(name: &str, fs: u32) -> Option<Self> {
        let (shape, design_fs) = match name {
            "flat" => (Self::Flat, 0),
            "sloped" => (Self::Sloped, 0),
            "sloped2" => (Self::Sloped2, 0),
            "lipshitz" => (Self::Lipshitz44, 44100),
            "wan3" => (Self::Wan3_44, 46000),
            "wan9" => (Self::Wan9_44, 46000),
            _ => return None,
        };
        if fs != 0 && design_fs != 0 {
            let limit = f64::from(design_fs) * 0.05;
            if (f64::from(design_fs) - f64::from(fs)).abs() >= limit {
                return None;
            }
        }
        Some(shape)
    }

    fn fir(&self) -> Option<&'static [Sample]> {
        match self {
            Self::Lipshitz44 => Some(&FILTER_LIPSHITZ_44),
            Self::Wan3_44 => Some(&FILTER_WAN3_44),
            Self::Wan9_44 => Some(&FILTER_WAN9_44),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct ChannelState {
    enabled: bool,
    noise_auto: bool,
    quantize_auto: bool,
    n_mult: Sample,
    q_mult: [Sample; 2],
    z1: Sample,
    fir_buf: [Sample; MAX_FIR_LEN],
    fir_p: usize,
    m0: i64,
}

impl ChannelState {
    fn set_noise_bits(&mut self, noise_bits: f64) {
        self.n_mult = 2.0 / (2.0f64).powf(noise_bits) / f64::from(PM_RAND_MAX);
    }

    fn set_quantize_bits(&mut self, quantize_bits: u32) {
        let quantize_bits = quantize_bits.clamp(2, 32);
        self.q_mult[0] = f64::from(1u32 << (quantize_bits - 1));
        self.q_mult[1] = 1.0 / self.q_mult[0];
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.fir_buf = [0.0; MAX_FIR_LEN];
        self.fir_p = 0;
        self.m0 = 1;
    }
}

pub struct DitherEffect {
    name: &'static str,
    stream: Stream,
    selector: ChannelSelector,
    shape: Shape,
    states: Vec<ChannelState>,
    rng: [PmRand; 2],
}

/// Whether `e` is a dither stage (used by the auto-dither planner).
pub fn is_dither(e: &dyn Effect) -> bool {
    e.as_any().is::<DitherEffect>()
}

pub fn as_dither_mut(e: &mut dyn Effect) -> Option<&mut DitherEffect> {
    e.as_any_mut().downcast_mut::<DitherEffect>()
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    if args.args.len() > 3 {
        return Err(args.usage(format!("usage: {}", info.usage)));
    }
    // argument layout: [shape] [[quantize_bits] bits]
    let (shape_arg, quantize_arg, noise_arg) = match args.args.len() {
        0 => (None, None, None),
        1 => {
            if Shape::find(&args.args[0], 0).is_some() {
                (Some(0), None, None)
            } else {
                (None, None, Some(0))
            }
        }
        2 => {
            if Shape::find(&args.args[0], 0).is_some() {
                (Some(0), None, Some(1))
            } else {
                (None, Some(0), Some(1))
            }
        }
        _ => (Some(0), Some(1), Some(2)),
    };

    let shape = match shape_arg {
        None => Shape::Flat,
        Some(i) => Shape::find(&args.args[i], args.istream.fs).unwrap_or_else(|| {
            tracing::warn!(
                "invalid shape for fs={}: {}; using sloped",
                args.istream.fs,
                args.args[i]
            );
            Shape::Sloped
        }),
    };

    let mut proto = ChannelState {
        enabled: true,
        noise_auto: true,
        quantize_auto: true,
        n_mult: 0.0,
        q_mult: [0.0; 2],
        z1: 0.0,
        fir_buf: [0.0; MAX_FIR_LEN],
        fir_p: 0,
        m0: 1,
    };
    if let Some(i) = quantize_arg {
        let s = &args.args[i];
        if s != "auto" {
            let bits: u32 = s
                .parse()
                .ok()
                .filter(|b| (2..=32).contains(b))
                .ok_or_else(|| args.usage("quantize_bits must be within [2,32]"))?;
            proto.set_quantize_bits(bits);
            proto.quantize_auto = false;
        }
    }
    if let Some(i) = noise_arg {
        let s = &args.args[i];
        if s != "auto" {
            let bits: f64 = s
                .parse()
                .ok()
                .filter(|b| (1.0..=32.0).contains(b))
                .ok_or_else(|| args.usage("bits must be within [1,32]"))?;
            proto.set_noise_bits(bits);
            proto.noise_auto = false;
        }
    }
    if proto.quantize_auto {
        proto.set_quantize_bits(32);
    }
    if proto.noise_auto {
        // stays silent until the auto-dither planner supplies a precision
        proto.enabled = false;
    }

    let states = (0..args.istream.channels)
        .map(|k| {
            let mut st = proto.clone();
            st.enabled &= args.selector.get(k);
            st
        })
        .collect();
    Ok(vec![Box::new(DitherEffect {
        name: info.name,
        stream: args.istream,
        selector: args.selector.clone(),
        shape,
        states,
        rng: [PmRand::new1(), PmRand::new2()],
    })])
}

impl DitherEffect {
    /// Auto-dither hook: supply the output precision for channels whose
    /// noise or quantization level is automatic.
    pub fn set_auto_params(&mut self, prec: u32, enabled: bool) {
        for k in 0..self.stream.channels {
            if !self.selector.get(k) {
                continue;
            }
            let st = &mut self.states[k];
            if st.noise_auto {
                if !enabled || !(2..=32).contains(&prec) {
                    st.enabled = false;
                } else {
                    st.set_noise_bits(f64::from(prec));
                    st.enabled = true;
                }
            }
            if st.quantize_auto {
                st.set_quantize_bits(if prec < 2 { 32 } else { prec });
            }
        }
    }

    #[inline]
    fn noise(rng: &mut [PmRand; 2], shape: Shape, st: &mut ChannelState) -> Sample {
        match shape {
            Shape::Sloped2 => {
                let n1 = i64::from(rng[0].next());
                let n2 = st.m0;
                st.m0 = n1;
                (n1 - n2) as Sample * st.n_mult
            }
            _ => {
                let n1 = i64::from(rng[0].next());
                let n2 = i64::from(rng[1].next());
                (n1 - n2) as Sample * st.n_mult
            }
        }
    }

    #[inline]
    fn feedback(shape: Shape, st: &mut ChannelState) -> Sample {
        match shape.fir() {
            None => st.z1,
            Some(fir) => {
                // scatter the error across the FIR history
                let n_taps = fir.len();
                let mut n = st.fir_p;
                for &c in fir {
                    st.fir_buf[n] += st.z1 * c;
                    n = if n + 1 < n_taps { n + 1 } else { 0 };
                }
                let r = st.fir_buf[st.fir_p];
                st.fir_buf[st.fir_p] = 0.0;
                st.fir_p = if st.fir_p + 1 < n_taps { st.fir_p + 1 } else { 0 };
                r
            }
        }
    }
}

impl Effect for DitherEffect {
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
        let shape = self.shape;
        for k in 0..channels {
            if !self.states[k].enabled {
                continue;
            }
            let mut i = k;
            let end = *frames * channels;
            while i < end {
                let st = &mut self.states[k];
                let noise = Self::noise(&mut self.rng, shape, st);
                let x = ibuf[i];
                let out = if shape == Shape::Flat {
                    st.q_mult[1] * (st.q_mult[0] * (x + noise)).round_ties_even()
                } else {
                    let p0 = x - Self::feedback(shape, st);
                    let p1 = st.q_mult[1] * (st.q_mult[0] * (p0 + noise)).round_ties_even();
                    st.z1 = p1 - p0;
                    p1
                };
                ibuf[i] = out;
                i += channels;
            }
        }
        BufSel::In
    }

    fn reset(&mut self) {
        for k in self.selector.iter_set() {
            self.states[k].reset();
        }
    }

    fn can_plot(&self) -> bool {
        true
    }

    fn plot(&self, out: &mut dyn Write, idx: usize) -> std::io::Result<()> {
        // quantization is signal-correlated; for plotting purposes the
        // stage is transparent
        for k in 0..self.stream.channels {
            writeln!(out, "H{k}_{idx}(w)=1.0")?;
        }
        Ok(())
    }

    fn mergeable(&self) -> bool {
        true
    }

    fn merge(&mut self, src: &dyn Effect) -> bool {
        let Some(other) = src.as_any().downcast_ref::<DitherEffect>() else {
            return false;
        };
        if self.shape != other.shape {
            return false;
        }
        if (0..self.stream.channels).any(|k| self.selector.get(k) && other.selector.get(k)) {
            return false;
        }
        for k in other.selector.iter_set() {
            self.selector.set(k);
            self.states[k] = other.states[k].clone();
        }
        true
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
    use std::path::Path;

    fn make(arg_strs: &[&str]) -> Box<dyn Effect> {
        let info = crate::registry::find_effect("dither").unwrap();
        let selector = ChannelSelector::all(1);
        let arg_strings: Vec<String> = arg_strs.iter().map(|s| s.to_string()).collect();
        let args = EffectArgs {
            name: "dither",
            args: &arg_strings,
            istream: Stream::new(44100, 1),
            selector: &selector,
            dir: Path::new("."),
        };
        init(info, &args).unwrap().remove(0)
    }

    #[test]
    fn quantizes_to_requested_grid() {
        let mut e = make(&["flat", "8", "8"]);
        let mut buf: Vec<f64> = (0..512).map(|i| (i as f64 / 512.0) - 0.5).collect();
        let mut obuf = vec![0.0; 512];
        let mut frames = 512;
        e.run(&mut frames, &mut buf, &mut obuf);
        let step = 1.0 / 128.0;
        for s in &buf {
            let q = s / step;
            assert!((q - q.round()).abs() < 1e-9, "{s} not on the 8-bit grid");
        }
    }

    #[test]
    fn auto_dither_stays_silent_until_configured() {
        let mut e = make(&[]);
        let mut buf = vec![0.0; 256];
        let mut obuf = vec![0.0; 256];
        let mut frames = 256;
        e.run(&mut frames, &mut buf, &mut obuf);
        assert!(buf.iter().all(|&s| s == 0.0));

        as_dither_mut(e.as_mut()).unwrap().set_auto_params(16, true);
        let mut frames = 256;
        e.run(&mut frames, &mut buf, &mut obuf);
        assert!(buf.iter().any(|&s| s != 0.0));
        assert!(buf.iter().all(|&s| s.abs() <= 3.0 / 32768.0));
    }

    #[test]
    fn shape_rate_check() {
        assert!(Shape::find("lipshitz", 44100).is_some());
        assert!(Shape::find("lipshitz", 96000).is_none());
        assert!(Shape::find("sloped", 96000).is_some());
        assert!(Shape::find("nope", 0).is_none());
    }

    #[test]
    fn chain_detects_dither_stage() {
        let e = make(&[]);
        assert!(is_dither(e.as_ref()));
    }
}
