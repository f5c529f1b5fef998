//! Numeric argument parsers shared by effects and the CLI.
//!
//! All parsers accept the plain decimal form plus a unit suffix and reject
//! trailing characters.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("failed to parse {what}: {input:?}")]
    Invalid { what: &'static str, input: String },
}

impl ParseError {
    fn new(what: &'static str, input: &str) -> Self {
        Self::Invalid { what, input: input.to_string() }
    }
}

fn split_suffix(s: &str) -> (&str, &str) {
    let split = s
        .char_indices()
        .find(|&(i, c)| {
            !(c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E'
                || ((c == '+' || c == '-')
                    && (i == 0 || matches!(s.as_bytes()[i - 1], b'e' | b'E'))))
        })
        .map_or(s.len(), |(i, _)| i);
    s.split_at(split)
}

/// Parse a frequency; a `k` suffix multiplies by 1000 (`1.5k` = 1500 Hz).
pub fn parse_freq(s: &str) -> Result<f64, ParseError> {
    let (num, suffix) = split_suffix(s);
    let v: f64 = num.parse().map_err(|_| ParseError::new("frequency", s))?;
    match suffix {
        "" => Ok(v),
        "k" => Ok(v * 1000.0),
        _ => Err(ParseError::new("frequency", s)),
    }
}

/// Parse a length as a signed sample count at `fs`.
///
/// Bare numbers and an `s` suffix are seconds, `m` is milliseconds and `S`
/// is samples (`0.5` = half a second, `20m` = 20 ms, `256S` = 256 samples).
pub fn parse_len(s: &str, fs: u32) -> Result<i64, ParseError> {
    let (num, suffix) = split_suffix(s);
    let v: f64 = num.parse().map_err(|_| ParseError::new("length", s))?;
    let samples = match suffix {
        "" | "s" => v * fs as f64,
        "m" => v / 1000.0 * fs as f64,
        "S" => v,
        _ => return Err(ParseError::new("length", s)),
    };
    Ok(samples.round() as i64)
}

/// Parse a noise level as linear amplitude.
///
/// Bare numbers are decibels; a `b` suffix gives the level of one LSB at
/// that many bits (`16b` = one 16-bit quantization step).
pub fn parse_level(s: &str) -> Result<f64, ParseError> {
    let (num, suffix) = split_suffix(s);
    let v: f64 = num.parse().map_err(|_| ParseError::new("level", s))?;
    match suffix {
        "" => Ok((10.0f64).powf(v / 20.0)),
        "b" => Ok(2.0 / (2.0f64).powf(v)),
        _ => Err(ParseError::new("level", s)),
    }
}
