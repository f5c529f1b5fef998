//! The biquad filter family (`lowpass_1` ... `biquad`, `deemph`).

use crate::effect::{BufSel, Effect, EffectArgs};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{parse_freq, Biquad, BiquadType, ChannelSelector, Sample, Stream, Width, WidthType};
use std::any::Any;
use std::io::Write;

pub struct BiquadEffect {
    name: &'static str,
    stream: Stream,
    selector: ChannelSelector,
    states: Vec<Biquad>,
}

fn get_freq(args: &EffectArgs, s: &str, what: &str) -> Result<f64, ChainError> {
    let f = parse_freq(s).map_err(|e| args.usage(e.to_string()))?;
    if !(0.0..f64::from(args.istream.fs) / 2.0).contains(&f) {
        return Err(args.usage(format!("{what} out of range")));
    }
    Ok(f)
}

fn get_width(args: &EffectArgs, s: &str, allow_slope: bool) -> Result<Width, ChainError> {
    let w = Width::parse(s).map_err(|e| args.usage(e.to_string()))?;
    if w.value <= 0.0 {
        return Err(args.usage("width out of range"));
    }
    if !allow_slope && matches!(w.kind, WidthType::Slope | WidthType::SlopeDb) {
        return Err(args.usage("invalid width type"));
    }
    Ok(w)
}

fn get_num(args: &EffectArgs, s: &str, what: &str) -> Result<f64, ChainError> {
    s.parse()
        .map_err(|_| args.usage(format!("failed to parse {what}: {s}")))
}

fn expect_args(info: &EffectInfo, args: &EffectArgs, n: usize) -> Result<(), ChainError> {
    if args.args.len() != n {
        return Err(args.usage(format!("usage: {}", info.usage)));
    }
    Ok(())
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    let fs = f64::from(args.istream.fs);
    let a = args.args;
    let proto = match args.name {
        "lowpass_1" | "highpass_1" | "allpass_1" | "lowpass_1p" => {
            expect_args(info, args, 1)?;
            let ty = match args.name {
                "lowpass_1" => BiquadType::Lowpass1,
                "highpass_1" => BiquadType::Highpass1,
                "allpass_1" => BiquadType::Allpass1,
                _ => BiquadType::Lowpass1P,
            };
            Biquad::design(ty, fs, get_freq(args, &a[0], "f0")?, Width::default_q(), 0.0)
        }
        "lowshelf_1" | "highshelf_1" => {
            expect_args(info, args, 2)?;
            let ty = if args.name == "lowshelf_1" {
                BiquadType::Lowshelf1
            } else {
                BiquadType::Highshelf1
            };
            Biquad::design(
                ty,
                fs,
                get_freq(args, &a[0], "f0")?,
                Width::default_q(),
                get_num(args, &a[1], "gain")?,
            )
        }
        "lowpass" | "highpass" | "bandpass_skirt" | "bandpass_peak" | "notch" | "allpass" => {
            expect_args(info, args, 2)?;
            let ty = match args.name {
                "lowpass" => BiquadType::Lowpass,
                "highpass" => BiquadType::Highpass,
                "bandpass_skirt" => BiquadType::BandpassSkirt,
                "bandpass_peak" => BiquadType::BandpassPeak,
                "notch" => BiquadType::Notch,
                _ => BiquadType::Allpass,
            };
            Biquad::design(
                ty,
                fs,
                get_freq(args, &a[0], "f0")?,
                get_width(args, &a[1], false)?,
                0.0,
            )
        }
        "eq" | "lowshelf" | "highshelf" => {
            expect_args(info, args, 3)?;
            let (ty, allow_slope) = match args.name {
                "eq" => (BiquadType::Peak, false),
                "lowshelf" => (BiquadType::Lowshelf, true),
                _ => (BiquadType::Highshelf, true),
            };
            Biquad::design(
                ty,
                fs,
                get_freq(args, &a[0], "f0")?,
                get_width(args, &a[1], allow_slope)?,
                get_num(args, &a[2], "gain")?,
            )
        }
        "lowpass_transform" | "highpass_transform" | "linkwitz_transform" => {
            expect_args(info, args, 4)?;
            Biquad::design_transform(
                args.name == "lowpass_transform",
                fs,
                get_freq(args, &a[0], "fz")?,
                get_num(args, &a[1], "qz")?,
                get_freq(args, &a[2], "fp")?,
                get_num(args, &a[3], "qp")?,
            )
        }
        "deemph" => {
            expect_args(info, args, 0)?;
            // 50/15us CD de-emphasis fitted as a high shelf
            let (f0, slope, gain) = match args.istream.fs {
                44100 => (5283.0, 0.4845, -9.477),
                48000 => (5356.0, 0.479, -9.62),
                _ => {
                    return Err(args.usage("sample rate must be 44100 or 48000"));
                }
            };
            Biquad::design(
                BiquadType::Highshelf,
                fs,
                f0,
                Width { value: slope, kind: WidthType::Slope },
                gain,
            )
        }
        "biquad" => {
            expect_args(info, args, 6)?;
            Biquad::from_coefficients(
                get_num(args, &a[0], "b0")?,
                get_num(args, &a[1], "b1")?,
                get_num(args, &a[2], "b2")?,
                get_num(args, &a[3], "a0")?,
                get_num(args, &a[4], "a1")?,
                get_num(args, &a[5], "a2")?,
            )
        }
        other => return Err(ChainError::init(other, "not a biquad effect")),
    };

    let states = (0..args.istream.channels)
        .map(|k| {
            if args.selector.get(k) {
                proto.clone()
            } else {
                Biquad::identity()
            }
        })
        .collect();
    Ok(vec![Box::new(BiquadEffect {
        name: info.name,
        stream: args.istream,
        selector: args.selector.clone(),
        states,
    })])
}

impl Effect for BiquadEffect {
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
        if self.selector.count() == channels {
            for frame in ibuf[..*frames * channels].chunks_exact_mut(channels) {
                for (s, b) in frame.iter_mut().zip(self.states.iter_mut()) {
                    *s = b.process(*s);
                }
            }
        } else {
            for frame in ibuf[..*frames * channels].chunks_exact_mut(channels) {
                for k in self.selector.iter_set() {
                    frame[k] = self.states[k].process(frame[k]);
                }
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
        for k in 0..self.stream.channels {
            if self.selector.get(k) {
                let (b0, b1, b2, a1, a2) = self.states[k].coefficients();
                writeln!(
                    out,
                    "H{k}_{idx}(w)=(abs(w)<=pi)?({b0:.15e}+{b1:.15e}*exp(-j*w)+{b2:.15e}*exp(-2.0*j*w))\
                     /(1.0+{a1:.15e}*exp(-j*w)+{a2:.15e}*exp(-2.0*j*w)):0/0"
                )?;
            } else {
                writeln!(out, "H{k}_{idx}(w)=1.0")?;
            }
        }
        Ok(())
    }

    fn mergeable(&self) -> bool {
        true
    }

    /// Two biquad stages merge only when their selectors are disjoint; the
    /// merged effect carries each source channel's own filter state.
    fn merge(&mut self, src: &dyn Effect) -> bool {
        let Some(other) = src.as_any().downcast_ref::<BiquadEffect>() else {
            return false;
        };
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

    fn make(name: &str, arg_strs: &[&str], channels: usize, selector: &str) -> Box<dyn Effect> {
        let info = crate::registry::find_effect(name).unwrap();
        let selector = ChannelSelector::parse(selector, channels).unwrap();
        let arg_strings: Vec<String> = arg_strs.iter().map(|s| s.to_string()).collect();
        let args = EffectArgs {
            name,
            args: &arg_strings,
            istream: Stream::new(48000, channels),
            selector: &selector,
            dir: Path::new("."),
        };
        init(info, &args).unwrap().remove(0)
    }

    #[test]
    fn rejects_out_of_range_freq() {
        let info = crate::registry::find_effect("lowpass").unwrap();
        let selector = ChannelSelector::all(2);
        let arg_strings = vec!["30k".to_string(), "0.707q".to_string()];
        let args = EffectArgs {
            name: "lowpass",
            args: &arg_strings,
            istream: Stream::new(48000, 2),
            selector: &selector,
            dir: Path::new("."),
        };
        assert!(init(info, &args).is_err());
    }

    #[test]
    fn lowpass_attenuates_high_frequency() {
        let mut e = make("lowpass", &["1k", "0.707q"], 1, "");
        let fs = 48000.0;
        // measure rms gain of a 10 kHz tone
        let mut in_rms = 0.0;
        let mut out_rms = 0.0;
        let mut obuf = vec![0.0; 1];
        for n in 0..48000 {
            let mut x = [(std::f64::consts::TAU * 10_000.0 * n as f64 / fs).sin()];
            in_rms += x[0] * x[0];
            let mut frames = 1;
            e.run(&mut frames, &mut x, &mut obuf);
            if n > 1000 {
                out_rms += x[0] * x[0];
            }
        }
        assert!(out_rms / in_rms < 0.01);
    }

    #[test]
    fn disjoint_selectors_merge() {
        let mut a = make("lowpass", &["1k", "0.707q"], 2, "0");
        let b = make("highpass", &["2k", "0.707q"], 2, "1");
        assert!(a.merge(b.as_ref()));
        // overlapping selectors must not merge
        let mut c = make("lowpass", &["1k", "0.707q"], 2, "");
        let d = make("highpass", &["2k", "0.707q"], 2, "1");
        assert!(!c.merge(d.as_ref()));
    }

    #[test]
    fn deemph_requires_supported_rate() {
        let info = crate::registry::find_effect("deemph").unwrap();
        let selector = ChannelSelector::all(2);
        let args = EffectArgs {
            name: "deemph",
            args: &[],
            istream: Stream::new(96000, 2),
            selector: &selector,
            dir: Path::new("."),
        };
        assert!(init(info, &args).is_err());
    }
}
