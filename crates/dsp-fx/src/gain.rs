//! `gain`, `mult` and `add`: per-channel scale and offset.

use crate::effect::{BufSel, Effect, EffectArgs, EffectFlags};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{Sample, Stream};
use std::any::Any;
use std::io::Write;

#[derive(Clone, Copy, PartialEq, Eq)]
enum GainOp {
    /// `gain` / `mult`: multiply selected channels.
    Scale,
    /// `add`: offset selected channels.
    Offset,
}

pub struct GainEffect {
    name: &'static str,
    op: GainOp,
    stream: Stream,
    /// Per-channel factor (Scale) or addend (Offset); identity elsewhere.
    state: Vec<Sample>,
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    if args.args.len() != 1 {
        return Err(args.usage(format!("usage: {}", info.usage)));
    }
    let arg = &args.args[0];
    let (op, v) = match args.name {
        "gain" => {
            let db: f64 = arg
                .parse()
                .map_err(|_| args.usage(format!("failed to parse gain: {arg}")))?;
            (GainOp::Scale, dsp_core::db_to_linear(db))
        }
        "mult" => {
            let m: f64 = arg
                .parse()
                .map_err(|_| args.usage(format!("failed to parse multiplier: {arg}")))?;
            (GainOp::Scale, m)
        }
        "add" => {
            let a: f64 = arg
                .parse()
                .map_err(|_| args.usage(format!("failed to parse value: {arg}")))?;
            (GainOp::Offset, a)
        }
        other => return Err(ChainError::init(other, "not a gain effect")),
    };
    let identity = match op {
        GainOp::Scale => 1.0,
        GainOp::Offset => 0.0,
    };
    let state = (0..args.istream.channels)
        .map(|k| if args.selector.get(k) { v } else { identity })
        .collect();
    Ok(vec![Box::new(GainEffect {
        name: info.name,
        op,
        stream: args.istream,
        state,
    })])
}

impl Effect for GainEffect {
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
        EffectFlags {
            // a pure scale commutes with anything linear and time-invariant
            opt_reorderable: self.op == GainOp::Scale,
            ..EffectFlags::default()
        }
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], _obuf: &mut [Sample]) -> BufSel {
        let channels = self.stream.channels;
        match self.op {
            GainOp::Scale => {
                for frame in ibuf[..*frames * channels].chunks_exact_mut(channels) {
                    for (s, g) in frame.iter_mut().zip(&self.state) {
                        *s *= g;
                    }
                }
            }
            GainOp::Offset => {
                for frame in ibuf[..*frames * channels].chunks_exact_mut(channels) {
                    for (s, a) in frame.iter_mut().zip(&self.state) {
                        *s += a;
                    }
                }
            }
        }
        BufSel::In
    }

    fn can_plot(&self) -> bool {
        true
    }

    fn plot(&self, out: &mut dyn Write, idx: usize) -> std::io::Result<()> {
        for (k, v) in self.state.iter().enumerate() {
            match self.op {
                GainOp::Scale => writeln!(out, "H{k}_{idx}(w)={v:.15e}")?,
                GainOp::Offset => {
                    writeln!(out, "H{k}_{idx}(w)=(w==0.0)?1.0+{v:.15e}:1.0")?;
                }
            }
        }
        Ok(())
    }

    fn mergeable(&self) -> bool {
        true
    }

    fn merge(&mut self, src: &dyn Effect) -> bool {
        let Some(other) = src.as_any().downcast_ref::<GainEffect>() else {
            return false;
        };
        if other.op != self.op {
            return false;
        }
        for (d, s) in self.state.iter_mut().zip(&other.state) {
            match self.op {
                GainOp::Scale => *d *= s,
                GainOp::Offset => *d += s,
            }
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
    use dsp_core::ChannelSelector;
    use std::path::Path;

    fn make(name: &str, arg: &str, channels: usize, selector: &str) -> Box<dyn Effect> {
        let info = crate::registry::find_effect(name).unwrap();
        let selector = ChannelSelector::parse(selector, channels).unwrap();
        let args = EffectArgs {
            name,
            args: &[arg.to_string()],
            istream: Stream::new(48000, channels),
            selector: &selector,
            dir: Path::new("."),
        };
        init(info, &args).unwrap().remove(0)
    }

    #[test]
    fn gain_scales_selected_channels_only() {
        let mut e = make("gain", "-6.0205999", 2, "0");
        let mut buf = vec![1.0, 1.0, -0.5, -0.5];
        let mut obuf = vec![0.0; 4];
        let mut frames = 2;
        assert_eq!(e.run(&mut frames, &mut buf, &mut obuf), BufSel::In);
        assert!((buf[0] - 0.5).abs() < 1e-7);
        assert_eq!(buf[1], 1.0);
        assert!((buf[2] + 0.25).abs() < 1e-7);
        assert_eq!(buf[3], -0.5);
    }

    #[test]
    fn gains_merge_multiplicatively() {
        let mut a = make("gain", "-6", 2, "");
        let b = make("gain", "-6", 2, "");
        assert!(a.merge(b.as_ref()));
        let mut buf = vec![1.0, 1.0];
        let mut obuf = vec![0.0; 2];
        let mut frames = 1;
        a.run(&mut frames, &mut buf, &mut obuf);
        let want = dsp_core::db_to_linear(-12.0);
        assert!((buf[0] - want).abs() < 1e-12);
    }

    #[test]
    fn gain_and_mult_merge_but_add_does_not() {
        let mut g = make("gain", "0", 2, "");
        let m = make("mult", "0.5", 2, "");
        let a = make("add", "0.1", 2, "");
        assert!(g.merge(m.as_ref()));
        assert!(!g.merge(a.as_ref()));
    }
}
