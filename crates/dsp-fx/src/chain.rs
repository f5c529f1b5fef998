//! Effects chains: construction, execution, drain, plot, peephole merge.

use crate::effect::{run_effects, BufSel, Effect};
use crate::error::ChainError;
use dsp_core::{gcd, ratio_mult_ceil, Sample, Stream};
use std::io::Write;

/// Crossfade length used when a chain is hot-swapped.
pub const CHAIN_XFADE_TIME_MS: u64 = 100;

/// An ordered list of effects.
///
/// Invariant: for any adjacent pair `A -> B`, `A.ostream() == B.istream()`.
/// The builder maintains this; [`push`](Self::push) asserts it in debug
/// builds.
#[derive(Default)]
pub struct EffectsChain {
    effects: Vec<Box<dyn Effect>>,
}

impl EffectsChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Box<dyn Effect>) {
        if let Some(last) = self.effects.last() {
            debug_assert_eq!(last.ostream(), effect.istream());
        }
        self.effects.push(effect);
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn effects(&self) -> &[Box<dyn Effect>] {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut [Box<dyn Effect>] {
        &mut self.effects
    }

    /// Stream leaving the chain, given the stream entering it.
    pub fn ostream(&self, istream: Stream) -> Stream {
        self.effects.last().map_or(istream, |e| e.ostream())
    }

    /// Peephole optimization: for each effect with a `merge`, scan forward
    /// absorbing compatible effects. The scan skips (but keeps) effects
    /// marked reorderable and stops at any stream-change boundary or at the
    /// first effect that is neither mergeable nor reorderable.
    pub fn optimize(&mut self) {
        let before = self.effects.len();
        let mut dest = 0;
        while dest < self.effects.len() {
            if !self.effects[dest].mergeable() {
                dest += 1;
                continue;
            }
            let mut src = dest + 1;
            while src < self.effects.len() {
                let (d, s) = {
                    let (a, b) = self.effects.split_at_mut(src);
                    (&mut a[dest], &b[0])
                };
                if d.istream() != s.istream() || d.ostream() != s.ostream() {
                    break;
                }
                if !s.mergeable() {
                    if s.flags().opt_reorderable {
                        src += 1;
                        continue;
                    }
                    break;
                }
                if d.merge(s.as_ref()) {
                    self.effects.remove(src);
                } else {
                    src += 1;
                }
            }
            dest += 1;
        }
        let after = self.effects.len();
        if after < before {
            tracing::debug!("optimize: reduced number of effects from {before} to {after}");
        }
    }

    /// Run one block. Returns which buffer holds the output.
    pub fn run(&mut self, frames: &mut usize, buf1: &mut [Sample], buf2: &mut [Sample]) -> BufSel {
        if run_effects(&mut self.effects, frames, buf1, buf2) {
            BufSel::In
        } else {
            BufSel::Out
        }
    }

    /// After input has ended, pull tail samples out of the chain.
    ///
    /// The first effect with something left to drain feeds the downstream
    /// remainder; once every effect is dry this returns `None`.
    pub fn drain(
        &mut self,
        frames: &mut usize,
        buf1: &mut [Sample],
        buf2: &mut [Sample],
    ) -> Option<BufSel> {
        let mut ftmp = *frames;
        for i in 0..self.effects.len() {
            let mut dframes = ftmp;
            let e = &mut self.effects[i];
            if let Some(sel) = e.drain(&mut dframes, buf1, buf2) {
                *frames = dframes;
                let rest = &mut self.effects[i + 1..];
                let in_first = match sel {
                    BufSel::In => run_effects(rest, frames, buf1, buf2),
                    BufSel::Out => !run_effects(rest, frames, buf2, buf1),
                };
                return Some(if in_first { BufSel::In } else { BufSel::Out });
            }
            let e = &self.effects[i];
            let (ifs, ofs) = (e.istream().fs, e.ostream().fs);
            if ifs != ofs {
                let g = gcd(ofs, ifs);
                ftmp = ratio_mult_ceil(ftmp, ofs / g, ifs / g);
            }
        }
        None
    }

    /// Scratch-buffer size (in samples) adequate for any block of
    /// `in_frames` frames entering the chain.
    pub fn buffer_len(&mut self, in_frames: usize, in_channels: usize) -> usize {
        let mut frames = in_frames;
        let mut max_len = in_frames * in_channels;
        for e in &mut self.effects {
            frames = e.buffer_frames(frames);
            max_len = max_len.max(frames * e.ostream().channels);
        }
        max_len
    }

    /// Upper bound on output frames produced for `in_frames` input frames.
    pub fn max_out_frames(&self, in_frames: usize) -> usize {
        let mut frames = in_frames;
        for e in &self.effects {
            let (ifs, ofs) = (e.istream().fs, e.ostream().fs);
            if ifs != ofs {
                let g = gcd(ofs, ifs);
                frames = ratio_mult_ceil(frames, ofs / g, ifs / g);
            }
        }
        frames
    }

    /// Total user-visible latency in seconds.
    pub fn delay_seconds(&self) -> f64 {
        self.effects
            .iter()
            .map(|e| e.delay() as f64 / f64::from(e.ostream().fs))
            .sum()
    }

    pub fn reset(&mut self) {
        for e in &mut self.effects {
            e.reset();
        }
    }

    pub fn signal(&mut self) {
        for e in &mut self.effects {
            e.signal();
        }
    }

    /// True when some effect modifies the signal such that dither helps.
    pub fn needs_dither(&self) -> bool {
        self.effects
            .iter()
            .any(|e| !e.flags().no_dither && !crate::dither::is_dither(e.as_ref()))
    }

    /// Configure any dither effects already in the chain.
    ///
    /// Returns `true` when dither is wanted but no effect in the chain
    /// provides it after the last signal-modifying stage, i.e. the caller
    /// should apply its own dither.
    pub fn set_dither_params(&mut self, prec: u32, enabled: bool) -> bool {
        let mut needs = true;
        for e in &mut self.effects {
            if let Some(d) = crate::dither::as_dither_mut(e.as_mut()) {
                d.set_auto_params(prec, enabled);
                needs = false;
            } else if !e.flags().no_dither {
                needs = true;
            }
        }
        needs && enabled
    }

    /// Emit a gnuplot script describing the chain's transfer function.
    pub fn plot(
        &self,
        out: &mut dyn Write,
        input_fs: u32,
        input_channels: usize,
        plot_phase: bool,
    ) -> Result<(), ChainError> {
        let mut fs = input_fs;
        for e in &self.effects {
            if !e.can_plot() {
                return Err(ChainError::PlotUnsupported(e.name()));
            }
            debug_assert!(
                e.istream().channels == e.ostream().channels || e.flags().plot_mix,
                "effect changed the channel count without plot_mix"
            );
            fs = e.ostream().fs;
        }

        writeln!(
            out,
            "set xlabel 'Frequency (Hz)'\n\
             set ylabel 'Magnitude (dB)'\n\
             set logscale x\n\
             set samples 500\n\
             set mxtics\n\
             set mytics\n\
             set grid xtics ytics mxtics mytics lw 0.8, lw 0.3\n\
             set key on\n\
             j={{0,1}}\n\n\
             set yrange [-30:20]\n\
             set xrange [10:{}/2]",
            fs
        )?;
        if plot_phase {
            writeln!(
                out,
                "set ytics nomirror\n\
                 set y2tics -180,90,180 format '%g°'\n\
                 set y2range [-180:720]"
            )?;
        }
        writeln!(out)?;

        // per-channel transfer accumulators, flushed at each mixing effect
        let mut start_idx = 0;
        let mut channels = input_channels;
        for (i, e) in self.effects.iter().enumerate() {
            if e.flags().plot_mix {
                for k in 0..e.istream().channels {
                    write!(out, "Ht{k}_{i}(f)=1.0")?;
                    for (j, e2) in self.effects[start_idx..i].iter().enumerate() {
                        write!(out, "*H{k}_{}(2.0*pi*f/{})", start_idx + j, e2.ostream().fs)?;
                    }
                    writeln!(out)?;
                }
                start_idx = i;
                channels = e.ostream().channels;
            }
            e.plot(out, i)?;
        }
        for k in 0..channels {
            write!(out, "Ht{k}(f)=1.0")?;
            for (j, e) in self.effects[start_idx..].iter().enumerate() {
                write!(out, "*H{k}_{}(2.0*pi*f/{})", start_idx + j, e.ostream().fs)?;
            }
            writeln!(out)?;
            writeln!(out, "Ht{k}_mag(f)=abs(Ht{k}(f))")?;
            writeln!(out, "Ht{k}_mag_dB(f)=20*log10(Ht{k}_mag(f))")?;
            writeln!(out, "Ht{k}_phase(f)=arg(Ht{k}(f))")?;
            writeln!(out, "Ht{k}_phase_deg(f)=Ht{k}_phase(f)*180/pi")?;
        }
        write!(out, "\nplot ")?;
        for k in 0..channels {
            if k > 0 {
                write!(out, ", ")?;
            }
            write!(out, "Ht{k}_mag_dB(x) lt {} lw 2 title 'Channel {k}'", k + 1)?;
            if plot_phase {
                write!(
                    out,
                    ", Ht{k}_phase_deg(x) axes x1y2 lt {} lw 1 dt '-' notitle",
                    k + 1
                )?;
            }
        }
        writeln!(out, "\npause mouse close")?;
        Ok(())
    }
}

impl std::fmt::Debug for EffectsChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.effects.iter().map(|e| e.name()))
            .finish()
    }
}

/// Linear crossfade between two chains fed the same input.
///
/// During the fade each block goes through both chains; the outputs are
/// mixed with weights `(1-t, t)` as `t` ramps 0 to 1 over
/// [`CHAIN_XFADE_TIME_MS`] worth of output frames.
pub struct ChainCrossfade {
    /// Scratch for the incoming chain's buffer ping-pong.
    buf: Vec<Sample>,
    /// `[0]` fades out, `[1]` fades in.
    pub chains: [EffectsChain; 2],
    ostream: Stream,
    /// Total fade length in output frames.
    total: usize,
    /// Output frames remaining in the fade.
    pub pos: usize,
}

impl ChainCrossfade {
    pub fn new(old: EffectsChain, new: EffectsChain, ostream: Stream, buf_len: usize) -> Self {
        let total = (CHAIN_XFADE_TIME_MS as f64 / 1000.0 * f64::from(ostream.fs)).round() as usize;
        Self {
            buf: vec![0.0; buf_len],
            chains: [old, new],
            ostream,
            total,
            pos: total,
        }
    }

    pub fn done(&self) -> bool {
        self.pos == 0
    }

    /// Take the incoming chain, discarding the outgoing one.
    pub fn finish(self) -> EffectsChain {
        let [_, new] = self.chains;
        new
    }

    /// Run one block through both chains, mixing the outputs.
    pub fn run(
        &mut self,
        frames: &mut usize,
        ibuf: &mut [Sample],
        obuf: &mut [Sample],
    ) -> BufSel {
        let channels = self.ostream.channels;
        // keep a copy of the input for the incoming chain
        let in_channels = self.chains[1]
            .effects()
            .first()
            .map_or(channels, |e| e.istream().channels);
        let copy_samples = *frames * in_channels;
        self.buf[..copy_samples].copy_from_slice(&ibuf[..copy_samples]);

        let mut old_frames = *frames;
        let old_sel = self.chains[0].run(&mut old_frames, ibuf, obuf);
        let mut new_frames = *frames;
        // the buffer not holding the old output is free scratch
        let new_in_first = match old_sel {
            BufSel::In => run_effects(self.chains[1].effects_mut(), &mut new_frames, &mut self.buf, obuf),
            BufSel::Out => run_effects(self.chains[1].effects_mut(), &mut new_frames, &mut self.buf, ibuf),
        };

        let n = old_frames.min(new_frames);
        let fade_done = self.total - self.pos;
        {
            let (old_out, new_out): (&mut [Sample], &[Sample]) = match (old_sel, new_in_first) {
                (BufSel::In, true) => (ibuf, &self.buf),
                (BufSel::In, false) => (ibuf, obuf),
                (BufSel::Out, true) => (obuf, &self.buf),
                (BufSel::Out, false) => (obuf, ibuf),
            };
            for i in 0..n {
                let t = ((fade_done + i).min(self.total)) as f64 / self.total as f64;
                for k in 0..channels {
                    let idx = i * channels + k;
                    old_out[idx] = old_out[idx] * (1.0 - t) + new_out[idx] * t;
                }
            }
        }
        self.pos = self.pos.saturating_sub(n);
        *frames = n;
        old_sel
    }
}
