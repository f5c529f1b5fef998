//! Core types and math for the dsp effects-chain engine.
//!
//! This crate holds the pieces every other layer builds on:
//!
//! - [`Stream`] - the `(sample_rate, channels)` descriptor that flows
//!   through the effects chain
//! - [`ChannelSelector`] - bit-set over channel indices with masked
//!   parsing for nested chain blocks
//! - Parsing helpers for frequencies (`1k`), lengths (`0.5s`, `20m`,
//!   `256S`) and noise levels (`-60` dB or `16b` bits)
//! - [`tokenize`] - the shell-like tokenizer used by chain-script files
//! - [`PmRand`] - the Park-Miller PRNG pair behind TPDF noise and dither
//! - The [`Biquad`] kernel with RBJ cookbook coefficient synthesis,
//!   shared by the filter effects and crossfeed
//! - Ratio math: [`gcd`], [`ratio_mult_ceil`], dB conversions

pub mod biquad;
pub mod math;
pub mod parse;
pub mod rng;
pub mod selector;
pub mod stream;
pub mod tokenize;

pub use biquad::{Biquad, BiquadType, Width, WidthType};
pub use math::{db_to_linear, gcd, linear_to_db, ratio_mult_ceil};
pub use parse::{parse_freq, parse_len, parse_level, ParseError};
pub use rng::{tpdf_dither_mult, PmRand, TpdfNoise};
pub use selector::{ChannelSelector, SelectorError};
pub use stream::Stream;
pub use tokenize::tokenize;

/// Audio sample type. Nominal range [-1.0, +1.0]; the output sink clips
/// and counts excursions but never errors on them.
pub type Sample = f64;
