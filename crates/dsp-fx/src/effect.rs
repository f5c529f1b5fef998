//! The effect streaming contract.

use crate::error::ChainError;
use dsp_core::{ratio_mult_ceil, ChannelSelector, Sample, Stream};
use std::any::Any;
use std::io;
use std::path::Path;

/// Which of the two scratch buffers holds an effect's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufSel {
    /// Output is in the input buffer (in-place processing).
    In,
    /// Output is in the output buffer.
    Out,
}

/// Behavioral flags an effect exposes to the chain planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectFlags {
    /// Output channel count differs from input; plotting must flush its
    /// per-channel transfer-function accumulator here.
    pub plot_mix: bool,
    /// Commutes with other reorderable effects for merge-scan purposes.
    pub opt_reorderable: bool,
    /// Does not modify the signal in a way that makes dither useful.
    pub no_dither: bool,
}

/// Context handed to an effect init function by the chain builder.
pub struct EffectArgs<'a> {
    /// The effect name token as written.
    pub name: &'a str,
    /// Arguments following the name token.
    pub args: &'a [String],
    /// Stream arriving at this point of the chain.
    pub istream: Stream,
    /// Channels the effect should act on.
    pub selector: &'a ChannelSelector,
    /// Directory for resolving relative paths in arguments.
    pub dir: &'a Path,
}

impl EffectArgs<'_> {
    /// Usage error with this effect's name.
    pub fn usage(&self, message: impl Into<String>) -> ChainError {
        ChainError::usage(self.name, message)
    }
}

/// A processing stage in an effects chain.
///
/// `ostream` must be fully determined at construction. An effect whose
/// `istream` and `ostream` agree on rate and channel count may process in
/// place and return [`BufSel::In`]; an effect that changes the channel
/// count must set [`EffectFlags::plot_mix`].
pub trait Effect: Send {
    fn name(&self) -> &'static str;
    fn istream(&self) -> Stream;
    fn ostream(&self) -> Stream;

    fn flags(&self) -> EffectFlags {
        EffectFlags::default()
    }

    /// Transform `*frames` input frames, updating `*frames` to the number
    /// of output frames produced (possibly fewer while an internal delay
    /// line fills). Returns the buffer holding the output.
    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], obuf: &mut [Sample]) -> BufSel;

    /// Latency in frames at `ostream.fs` currently buffered inside the
    /// effect.
    fn delay(&self) -> usize {
        0
    }

    /// Discard processing history. Does not release memory.
    fn reset(&mut self) {}

    /// Asynchronous user notification (typically toggles the effect).
    fn signal(&mut self) {}

    /// Whether [`plot`](Self::plot) emits anything meaningful. Plot mode
    /// treats a `false` here as a hard error.
    fn can_plot(&self) -> bool {
        false
    }

    /// Emit per-channel transfer functions `Hk_idx(w) = ...` in gnuplot
    /// syntax, referencing `Htk_idx(f)` for the upstream response.
    fn plot(&self, _out: &mut dyn io::Write, _idx: usize) -> io::Result<()> {
        Ok(())
    }

    /// After input has ended, emit tail samples into one of the buffers.
    /// `None` means the effect has nothing (more) to drain.
    fn drain(
        &mut self,
        _frames: &mut usize,
        _buf1: &mut [Sample],
        _buf2: &mut [Sample],
    ) -> Option<BufSel> {
        None
    }

    /// Whether this effect participates in peephole merging at all.
    fn mergeable(&self) -> bool {
        false
    }

    /// Peephole fusion: absorb `src` into `self`. The optimizer guarantees
    /// identical `istream`/`ostream` on both sides. Returns whether the
    /// merge happened (in which case the caller discards `src`).
    fn merge(&mut self, _src: &dyn Effect) -> bool {
        false
    }

    /// Per-block output bound used for scratch-buffer sizing. The default
    /// covers pure rate changes; effects with dynamically adjustable
    /// sub-chains override this.
    fn buffer_frames(&mut self, in_frames: usize) -> usize {
        let (ifs, ofs) = (self.istream().fs, self.ostream().fs);
        if ifs == ofs {
            in_frames
        } else {
            let g = dsp_core::gcd(ofs, ifs);
            ratio_mult_ceil(in_frames, ofs / g, ifs / g)
        }
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Run `frames` frames through a slice of effects, ping-ponging between the
/// two scratch buffers. Returns `true` when the output ended up in `buf1`.
pub fn run_effects(
    effects: &mut [Box<dyn Effect>],
    frames: &mut usize,
    buf1: &mut [Sample],
    buf2: &mut [Sample],
) -> bool {
    let mut in_first = true;
    for e in effects.iter_mut() {
        if *frames == 0 {
            break;
        }
        let sel = if in_first {
            e.run(frames, buf1, buf2)
        } else {
            e.run(frames, buf2, buf1)
        };
        if sel == BufSel::Out {
            in_first = !in_first;
        }
    }
    in_first
}
