//! Effect abstraction, chain builder and effect catalogue for dsp.
//!
//! The pieces fit together like this:
//!
//! - [`Effect`] is the streaming contract every processing stage obeys:
//!   declared input/output [`Stream`](dsp_core::Stream)s, a block `run`
//!   method that may work in place, optional latency/drain/plot/merge
//!   hooks.
//! - [`EffectsChain`] is an ordered list of effects agreeing pairwise on
//!   their streams, with execution, drain, latency, plot and peephole-merge
//!   operations.
//! - [`build_effects_chain`] parses a chain script (selectors, nested
//!   blocks, file inclusion, failure guards) into a chain using the
//!   catalogue in [`registry`].
//! - [`watch`] hot-swaps a sub-chain from a script file via a linear
//!   crossfade when the file changes on disk.

pub mod builder;
pub mod chain;
pub mod effect;
pub mod error;
pub mod registry;

mod biquad_fx;
mod crossfeed;
mod decorrelate;
mod delay_fx;
mod dither;
mod fir;
mod gain;
mod hilbert;
mod matrix4;
mod noise;
mod remix;
mod resample;
mod st2ms;
mod stats;
pub mod watch;

pub use builder::{build_effects_chain, build_effects_chain_from_file, EFFECTS_FILE_EOF_MARKER};
pub use chain::{ChainCrossfade, EffectsChain, CHAIN_XFADE_TIME_MS};
pub use effect::{BufSel, Effect, EffectArgs, EffectFlags};
pub use error::ChainError;
pub use registry::{effect_catalogue, find_effect, EffectInfo};
