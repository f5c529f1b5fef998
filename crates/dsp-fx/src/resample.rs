//! `resample`: polyphase windowed-sinc rational sample-rate conversion.
//!
//! The conversion ratio `L/M` comes from the reduced rate fraction. A
//! Kaiser-windowed sinc prototype at `L` times the input rate is split
//! into `L` phases; each output frame takes one phase's dot product
//! against the input history.

use crate::effect::{BufSel, Effect, EffectArgs};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{gcd, parse_freq, Sample, Stream};
use std::any::Any;
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Prototype taps per phase.
const TAPS_PER_PHASE: usize = 32;
const KAISER_BETA: f64 = 10.0;

fn bessel_i0(x: f64) -> f64 {
    // power series; converges quickly for the beta range used here
    let mut sum = 1.0;
    let mut term = 1.0;
    let half_x = x / 2.0;
    for k in 1..64 {
        term *= (half_x / k as f64) * (half_x / k as f64);
        sum += term;
        if term < 1e-18 * sum {
            break;
        }
    }
    sum
}

pub struct ResampleEffect {
    name: &'static str,
    istream: Stream,
    ostream: Stream,
    /// Upsample factor.
    l: usize,
    /// Downsample factor.
    m: usize,
    /// Polyphase taps: `phases[p][q]` applies to `x[n0 - q]`.
    phases: Vec<Vec<Sample>>,
    /// Input history, most recent frame last; `hist_start` is the global
    /// index of the first stored frame.
    hist: VecDeque<Sample>,
    hist_start: u64,
    in_total: u64,
    out_total: u64,
    draining: Option<u64>,
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    let usage = || args.usage(format!("usage: {}", info.usage));
    let (bandwidth, rate_str) = match args.args {
        [r] => (0.95, r),
        [bw, r] => {
            let bw: f64 = bw.parse().map_err(|_| usage())?;
            if !(0.0 < bw && bw < 1.0) {
                return Err(args.usage("bandwidth must be within (0,1)"));
            }
            (bw, r)
        }
        _ => return Err(usage()),
    };
    let out_fs = parse_freq(rate_str).map_err(|e| args.usage(e.to_string()))? as u32;
    if out_fs == 0 {
        return Err(args.usage("sample rate must be > 0"));
    }
    if out_fs == args.istream.fs {
        tracing::debug!("sample rates are equal; no processing will be done");
        return Ok(vec![]);
    }

    let g = gcd(out_fs, args.istream.fs);
    let l = (out_fs / g) as usize;
    let m = (args.istream.fs / g) as usize;
    tracing::debug!("ratio is {l}/{m}");

    // lowpass at the tighter Nyquist, scaled by the bandwidth factor
    let cutoff = bandwidth * 0.5 / l as f64 * (1.0f64).min(l as f64 / m as f64);
    let total_taps = TAPS_PER_PHASE * l;
    let center = (total_taps - 1) as f64 / 2.0;
    let i0_beta = bessel_i0(KAISER_BETA);
    let mut proto = vec![0.0; total_taps];
    for (i, tap) in proto.iter_mut().enumerate() {
        let t = i as f64 - center;
        let sinc = if t == 0.0 {
            2.0 * cutoff
        } else {
            (2.0 * PI * cutoff * t).sin() / (PI * t)
        };
        let w = 1.0 - (t / (center + 1.0)).powi(2);
        let window = bessel_i0(KAISER_BETA * w.max(0.0).sqrt()) / i0_beta;
        *tap = sinc * window * l as f64;
    }
    let phases = (0..l)
        .map(|p| (0..TAPS_PER_PHASE).map(|q| proto[p + q * l]).collect())
        .collect();

    Ok(vec![Box::new(ResampleEffect {
        name: info.name,
        istream: args.istream,
        ostream: Stream::new(out_fs, args.istream.channels),
        l,
        m,
        phases,
        hist: VecDeque::new(),
        hist_start: 0,
        in_total: 0,
        out_total: 0,
        draining: None,
    })])
}

impl ResampleEffect {
    /// Emit every output frame whose input window is complete, writing
    /// interleaved frames into `obuf`. Returns frames produced.
    fn produce(&mut self, obuf: &mut [Sample]) -> usize {
        let channels = self.istream.channels;
        let mut produced = 0;
        loop {
            let k = self.out_total;
            // newest input frame the k-th output depends on
            let n0 = (k * self.m as u64) / self.l as u64;
            let phase = ((k * self.m as u64) % self.l as u64) as usize;
            if n0 + 1 > self.in_total {
                break;
            }
            // need frames n0 - q for q in 0..TAPS_PER_PHASE
            let taps = &self.phases[phase];
            let out = &mut obuf[produced * channels..(produced + 1) * channels];
            out.fill(0.0);
            for (q, &h) in taps.iter().enumerate() {
                let Some(n) = n0.checked_sub(q as u64) else {
                    break;
                };
                if n < self.hist_start {
                    break;
                }
                let base = ((n - self.hist_start) as usize) * channels;
                for (o, &x) in out.iter_mut().zip(&self.hist.as_slices().0[base..base + channels])
                {
                    *o += h * x;
                }
            }
            produced += 1;
            self.out_total += 1;
        }
        // discard history older than any future output needs
        let next_n0 = (self.out_total * self.m as u64) / self.l as u64;
        let keep_from = next_n0.saturating_sub(TAPS_PER_PHASE as u64);
        while self.hist_start < keep_from {
            for _ in 0..channels {
                self.hist.pop_front();
            }
            self.hist_start += 1;
        }
        produced
    }

    fn latency_in_frames(&self) -> u64 {
        // group delay of the prototype, in input frames
        (TAPS_PER_PHASE as u64) / 2
    }
}

impl Effect for ResampleEffect {
    fn name(&self) -> &'static str {
        self.name
    }
    fn istream(&self) -> Stream {
        self.istream
    }
    fn ostream(&self) -> Stream {
        self.ostream
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], obuf: &mut [Sample]) -> BufSel {
        let channels = self.istream.channels;
        self.hist.extend(ibuf[..*frames * channels].iter().copied());
        self.hist.make_contiguous();
        self.in_total += *frames as u64;
        *frames = self.produce(obuf);
        BufSel::Out
    }

    fn delay(&self) -> usize {
        // expressed at the output rate
        (self.latency_in_frames() * self.l as u64 / self.m as u64) as usize
    }

    fn reset(&mut self) {
        self.hist.clear();
        self.hist_start = 0;
        self.in_total = 0;
        self.out_total = 0;
        self.draining = None;
    }

    fn drain(
        &mut self,
        frames: &mut usize,
        buf1: &mut [Sample],
        buf2: &mut [Sample],
    ) -> Option<BufSel> {
        if self.in_total == 0 {
            return None;
        }
        let default_drain = self.latency_in_frames() + TAPS_PER_PHASE as u64;
        let remaining = *self.draining.get_or_insert_with(|| default_drain);
        if remaining == 0 {
            return None;
        }
        let n = (*frames as u64).min(remaining);
        self.draining = Some(remaining - n);
        let channels = self.istream.channels;
        buf1[..n as usize * channels].fill(0.0);
        let mut run_frames = n as usize;
        let sel = self.run(&mut run_frames, buf1, buf2);
        *frames = run_frames;
        Some(sel)
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

    fn make(rate: &str, fs: u32) -> Vec<Box<dyn Effect>> {
        let info = crate::registry::find_effect("resample").unwrap();
        let selector = ChannelSelector::all(1);
        let arg_strings = vec![rate.to_string()];
        let args = EffectArgs {
            name: "resample",
            args: &arg_strings,
            istream: Stream::new(fs, 1),
            selector: &selector,
            dir: Path::new("."),
        };
        init(info, &args).unwrap()
    }

    fn process_all(e: &mut dyn Effect, input: &[Sample], out_cap: usize) -> Vec<Sample> {
        let mut out = Vec::new();
        let mut obuf = vec![0.0; out_cap];
        for chunk in input.chunks(512) {
            let mut ibuf = chunk.to_vec();
            let mut frames = chunk.len();
            e.run(&mut frames, &mut ibuf, &mut obuf);
            out.extend_from_slice(&obuf[..frames]);
        }
        loop {
            let mut dbuf = vec![0.0; 512];
            let mut frames = 256;
            match e.drain(&mut frames, &mut dbuf, &mut obuf) {
                None => break,
                Some(BufSel::In) => out.extend_from_slice(&dbuf[..frames]),
                Some(BufSel::Out) => out.extend_from_slice(&obuf[..frames]),
            }
        }
        out
    }

    #[test]
    fn equal_rates_elide() {
        assert!(make("48k", 48000).is_empty());
    }

    #[test]
    fn output_length_tracks_ratio() {
        let mut e = make("96k", 48000).remove(0);
        let input = vec![0.0; 4800];
        let out = process_all(e.as_mut(), &input, 2048);
        // 2x the input length, give or take the filter tail
        assert!((out.len() as i64 - 9600).abs() < 200, "got {}", out.len());
    }

    #[test]
    fn tone_survives_upsample() {
        let fs = 44100.0;
        let f = 1000.0;
        let mut e = make("88.2k", 44100).remove(0);
        let input: Vec<Sample> = (0..8192)
            .map(|n| (std::f64::consts::TAU * f * n as f64 / fs).sin())
            .collect();
        let out = process_all(e.as_mut(), &input, 4096);
        // correlate the steady-state region with an ideal tone at 2x rate,
        // compensating the filter delay (16 input frames = 32 output frames)
        let lat = 32;
        let mut dot = 0.0;
        let mut energy_y = 0.0;
        let mut energy_r = 0.0;
        for n in 2000..12000usize {
            let y = out[n + lat];
            let r = (std::f64::consts::TAU * f * n as f64 / (2.0 * fs)).sin();
            dot += y * r;
            energy_y += y * y;
            energy_r += r * r;
        }
        let corr = dot / (energy_y.sqrt() * energy_r.sqrt());
        assert!(corr > 0.999, "correlation {corr}");
    }

    #[test]
    fn rational_ratio_44k_to_48k() {
        let mut e = make("48k", 44100).remove(0);
        let input = vec![0.25; 44100];
        let out = process_all(e.as_mut(), &input, 4096);
        assert!((out.len() as i64 - 48000).abs() < 200, "got {}", out.len());
        // DC passes at unity
        let mid = out.len() / 2;
        for &s in &out[mid - 100..mid + 100] {
            assert!((s - 0.25).abs() < 0.01, "got {s}");
        }
    }
}
