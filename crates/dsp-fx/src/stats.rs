//! `stats`: per-channel signal statistics, reported when the chain is torn
//! down.

use crate::effect::{BufSel, Effect, EffectArgs, EffectFlags};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{linear_to_db, Sample, Stream};
use std::any::Any;
use std::io::Write;

#[derive(Clone, Default)]
struct ChannelStats {
    samples: u64,
    sum: f64,
    sum_sq: f64,
    min: Sample,
    max: Sample,
    peak_count: u64,
    peak_frame: u64,
}

impl ChannelStats {
    fn update(&mut self, s: Sample) {
        self.sum += s;
        self.sum_sq += s * s;
        if s < self.min {
            self.min = s;
        }
        if s > self.max {
            self.max = s;
        }
        let peak = self.max.abs().max(self.min.abs());
        if s.abs() >= peak {
            self.peak_frame = self.samples;
            self.peak_count = 0;
        }
        if s.abs() == peak {
            self.peak_count += 1;
        }
        self.samples += 1;
    }
}

pub struct StatsEffect {
    name: &'static str,
    stream: Stream,
    ref_level: Option<f64>,
    channels: Vec<ChannelStats>,
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    let ref_level = match args.args.len() {
        0 => None,
        1 => Some(
            args.args[0]
                .parse()
                .map_err(|_| args.usage(format!("failed to parse ref_level: {}", args.args[0])))?,
        ),
        _ => return Err(args.usage(format!("usage: {}", info.usage))),
    };
    Ok(vec![Box::new(StatsEffect {
        name: info.name,
        stream: args.istream,
        ref_level,
        channels: vec![ChannelStats::default(); args.istream.channels],
    })])
}

impl Effect for StatsEffect {
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
        // pure analysis; never a reason to dither
        EffectFlags { no_dither: true, ..EffectFlags::default() }
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], _obuf: &mut [Sample]) -> BufSel {
        let channels = self.stream.channels;
        for frame in ibuf[..*frames * channels].chunks_exact(channels) {
            for (s, st) in frame.iter().zip(self.channels.iter_mut()) {
                st.update(*s);
            }
        }
        BufSel::In
    }

    fn can_plot(&self) -> bool {
        true
    }

    fn plot(&self, out: &mut dyn Write, idx: usize) -> std::io::Result<()> {
        for k in 0..self.stream.channels {
            writeln!(out, "H{k}_{idx}(f)=1.0")?;
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

impl Drop for StatsEffect {
    fn drop(&mut self) {
        let channels = &self.channels;
        let row = |name: &str, f: &dyn Fn(&ChannelStats) -> String| {
            let mut line = format!("{name:<18}");
            for st in channels {
                line.push_str(&format!(" {:>12}", f(st)));
            }
            line
        };
        let peak_db = |st: &ChannelStats| linear_to_db(st.max.abs().max(st.min.abs()));
        let mut report = format!("{:<18}", "Channel");
        for k in 0..channels.len() {
            report.push_str(&format!(" {k:>12}"));
        }
        let rows = [
            row("DC offset", &|st| format!("{:.8}", st.sum / st.samples.max(1) as f64)),
            row("Minimum", &|st| format!("{:.8}", st.min)),
            row("Maximum", &|st| format!("{:.8}", st.max)),
            row("Peak level (dBFS)", &|st| format!("{:.4}", peak_db(st))),
            row("RMS level (dBFS)", &|st| {
                format!("{:.4}", linear_to_db((st.sum_sq / st.samples.max(1) as f64).sqrt()))
            }),
            row("Peak count", &|st| format!("{}", st.peak_count)),
            row("Peak sample", &|st| format!("{}", st.peak_frame)),
        ];
        for r in rows {
            report.push('\n');
            report.push_str(&r);
        }
        if let Some(rl) = self.ref_level {
            report.push('\n');
            report.push_str(&row("Peak level (dBr)", &|st| format!("{:.4}", rl + peak_db(st))));
        }
        tracing::info!("signal statistics:\n{report}");
    }
}
