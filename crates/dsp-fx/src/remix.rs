//! `remix`: arbitrary channel mixing/reordering.
//!
//! One selector argument per output channel names the input channels summed
//! into it; `.` produces a silent output channel.

use crate::effect::{BufSel, Effect, EffectArgs, EffectFlags};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{ChannelSelector, Sample, Stream};
use std::any::Any;
use std::io::Write;

pub struct RemixEffect {
    name: &'static str,
    istream: Stream,
    ostream: Stream,
    /// Input-channel selector per output channel.
    sources: Vec<ChannelSelector>,
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    if args.args.is_empty() {
        return Err(args.usage(format!("usage: {}", info.usage)));
    }
    let sources: Vec<ChannelSelector> = args
        .args
        .iter()
        .map(|a| {
            if a == "." {
                Ok(ChannelSelector::none(args.istream.channels))
            } else {
                ChannelSelector::parse(a, args.istream.channels).map_err(ChainError::from)
            }
        })
        .collect::<Result<_, _>>()?;
    let ostream = Stream::new(args.istream.fs, sources.len());
    Ok(vec![Box::new(RemixEffect {
        name: info.name,
        istream: args.istream,
        ostream,
        sources,
    })])
}

impl Effect for RemixEffect {
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
        for i in 0..*frames {
            let frame = &ibuf[i * ic..(i + 1) * ic];
            for (k, sel) in self.sources.iter().enumerate() {
                obuf[i * oc + k] = sel.iter_set().map(|j| frame[j]).sum();
            }
        }
        BufSel::Out
    }

    fn can_plot(&self) -> bool {
        true
    }

    fn plot(&self, out: &mut dyn Write, idx: usize) -> std::io::Result<()> {
        for (k, sel) in self.sources.iter().enumerate() {
            write!(out, "H{k}_{idx}(w)=0.0")?;
            for j in sel.iter_set() {
                write!(out, "+Ht{j}_{idx}(w*{}/2.0/pi)", self.ostream.fs)?;
            }
            writeln!(out)?;
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
