//! Second-order IIR filter kernel.
//!
//! Coefficient synthesis follows the RBJ Audio EQ Cookbook
//! (<http://musicdsp.org/files/Audio-EQ-Cookbook.txt>) plus the first-order
//! and pole/zero-transform variants. The filter runs in transposed direct
//! form 2.

use crate::parse::ParseError;
use crate::Sample;
use std::f64::consts::{FRAC_1_SQRT_2, LN_2, PI};

/// Filter response types for [`Biquad::design`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadType {
    Lowpass1,
    Highpass1,
    Allpass1,
    Lowshelf1,
    Highshelf1,
    Lowpass1P,
    Lowpass,
    Highpass,
    BandpassSkirt,
    BandpassPeak,
    Notch,
    Allpass,
    Peak,
    Lowshelf,
    Highshelf,
}

/// Interpretation of a width argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthType {
    /// Quality factor (`q` suffix, default).
    Q,
    /// Shelf slope (`s` suffix).
    Slope,
    /// Shelf slope in dB/octave (`d` suffix).
    SlopeDb,
    /// Bandwidth in octaves (`o` suffix).
    BwOct,
    /// Bandwidth in Hz (`h` or `k` suffix).
    BwHz,
}

/// A parsed width argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Width {
    pub value: f64,
    pub kind: WidthType,
}

impl Width {
    /// Butterworth Q (0.7071...), the default width.
    pub fn default_q() -> Self {
        Self { value: FRAC_1_SQRT_2, kind: WidthType::Q }
    }

    /// Parse a width argument.
    ///
    /// `bw<order>[.idx]` gives the Q of one conjugate pair of an
    /// order-`order` Butterworth cascade (`idx` counted from the innermost
    /// pair); otherwise a number with an optional `q|s|d|o|h|k` suffix.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::Invalid { what: "width", input: s.to_string() };
        if let Some(rest) = s.strip_prefix("bw") {
            let (order_str, idx_str) = match rest.split_once('.') {
                Some((o, i)) => (o, Some(i)),
                None => (rest, None),
            };
            let order: i32 = order_str.parse().map_err(|_| invalid())?;
            if order < 2 {
                return Err(invalid());
            }
            let n_biquads = order / 2;
            let idx: i32 = match idx_str {
                Some(i) => i.parse().map_err(|_| invalid())?,
                None => 0,
            };
            if !(0..n_biquads).contains(&idx) {
                return Err(invalid());
            }
            // index from the outermost conjugate pair
            let p = (n_biquads - idx) as f64;
            let q = 1.0 / (2.0 * (PI / order as f64 * (p - 0.5)).sin());
            return Ok(Self { value: q, kind: WidthType::Q });
        }
        let split = s
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (c == '-' && i == 0)))
            .map_or(s.len(), |(i, _)| i);
        let (num, suffix) = s.split_at(split);
        let mut value: f64 = num.parse().map_err(|_| invalid())?;
        let kind = match suffix {
            "" | "q" => WidthType::Q,
            "s" => WidthType::Slope,
            "d" => WidthType::SlopeDb,
            "o" => WidthType::BwOct,
            "h" => WidthType::BwHz,
            "k" => {
                value *= 1000.0;
                WidthType::BwHz
            }
            _ => return Err(invalid()),
        };
        Ok(Self { value, kind })
    }
}

/// Biquad filter state (transposed direct form 2).
///
/// Coefficients are stored normalized by `a0`:
///
/// ```text
/// y[n] = c0*x[n] + m0;  m0 = m1 + c1*x[n] - c3*y[n];  m1 = c2*x[n] - c4*y[n]
/// ```
#[derive(Debug, Clone, Default)]
pub struct Biquad {
    c0: Sample,
    c1: Sample,
    c2: Sample,
    c3: Sample,
    c4: Sample,
    m0: Sample,
    m1: Sample,
}

impl Biquad {
    /// Build from raw transfer-function coefficients; normalizes by `a0`.
    pub fn from_coefficients(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            c0: b0 / a0,
            c1: b1 / a0,
            c2: b2 / a0,
            c3: a1 / a0,
            c4: a2 / a0,
            m0: 0.0,
            m1: 0.0,
        }
    }

    /// Identity filter.
    pub fn identity() -> Self {
        Self::from_coefficients(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    /// Design a filter of `ty` at sample rate `fs`.
    ///
    /// `gain` is only meaningful for the shelf and peaking types.
    pub fn design(ty: BiquadType, fs: f64, f0: f64, width: Width, gain: f64) -> Self {
        let mut f0 = f0;
        let mut width = width;
        if width.kind == WidthType::SlopeDb {
            // dB-per-octave slope: convert and shift the corner
            width.kind = WidthType::Slope;
            width.value /= 12.0;
            match ty {
                BiquadType::Lowshelf => f0 *= (10.0f64).powf(gain.abs() / 80.0 / width.value),
                BiquadType::Highshelf => f0 /= (10.0f64).powf(gain.abs() / 80.0 / width.value),
                _ => {}
            }
        }

        let a = (10.0f64).powf(gain / 40.0);
        let w0 = 2.0 * PI * f0 / fs;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = match width.kind {
            WidthType::Slope => {
                sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / width.value - 1.0) + 2.0).sqrt()
            }
            WidthType::BwOct => sin_w0 * (LN_2 / 2.0 * width.value * w0 / sin_w0).sinh(),
            WidthType::BwHz => sin_w0 / (2.0 * f0 / width.value),
            WidthType::Q | WidthType::SlopeDb => sin_w0 / (2.0 * width.value),
        };

        let (b0, b1, b2, a0, a1, a2);
        match ty {
            BiquadType::Lowpass1 => {
                let c = 1.0 + cos_w0;
                b0 = sin_w0;
                b1 = sin_w0;
                b2 = 0.0;
                a0 = sin_w0 + c;
                a1 = sin_w0 - c;
                a2 = 0.0;
            }
            BiquadType::Highpass1 => {
                let c = 1.0 + cos_w0;
                b0 = c;
                b1 = -c;
                b2 = 0.0;
                a0 = sin_w0 + c;
                a1 = sin_w0 - c;
                a2 = 0.0;
            }
            BiquadType::Allpass1 => {
                let c = 1.0 + cos_w0;
                b0 = sin_w0 - c;
                b1 = sin_w0 + c;
                b2 = 0.0;
                a0 = b1;
                a1 = b0;
                a2 = 0.0;
            }
            BiquadType::Lowshelf1 => {
                let c = 1.0 + cos_w0;
                b0 = a * sin_w0 + c;
                b1 = a * sin_w0 - c;
                b2 = 0.0;
                a0 = sin_w0 / a + c;
                a1 = sin_w0 / a - c;
                a2 = 0.0;
            }
            BiquadType::Highshelf1 => {
                let c = 1.0 + cos_w0;
                b0 = sin_w0 + c * a;
                b1 = sin_w0 - c * a;
                b2 = 0.0;
                a0 = sin_w0 + c / a;
                a1 = sin_w0 - c / a;
                a2 = 0.0;
            }
            BiquadType::Lowpass1P => {
                let c = 1.0 - cos_w0;
                b0 = -c + (c * c + 2.0 * c).sqrt();
                b1 = 0.0;
                b2 = 0.0;
                a0 = 1.0;
                a1 = -1.0 + b0;
                a2 = 0.0;
            }
            BiquadType::Lowpass => {
                b0 = (1.0 - cos_w0) / 2.0;
                b1 = 1.0 - cos_w0;
                b2 = b0;
                a0 = 1.0 + alpha;
                a1 = -2.0 * cos_w0;
                a2 = 1.0 - alpha;
            }
            BiquadType::Highpass => {
                b0 = (1.0 + cos_w0) / 2.0;
                b1 = -(1.0 + cos_w0);
                b2 = b0;
                a0 = 1.0 + alpha;
                a1 = -2.0 * cos_w0;
                a2 = 1.0 - alpha;
            }
            BiquadType::BandpassSkirt => {
                b0 = sin_w0 / 2.0;
                b1 = 0.0;
                b2 = -b0;
                a0 = 1.0 + alpha;
                a1 = -2.0 * cos_w0;
                a2 = 1.0 - alpha;
            }
            BiquadType::BandpassPeak => {
                b0 = alpha;
                b1 = 0.0;
                b2 = -alpha;
                a0 = 1.0 + alpha;
                a1 = -2.0 * cos_w0;
                a2 = 1.0 - alpha;
            }
            BiquadType::Notch => {
                b0 = 1.0;
                b1 = -2.0 * cos_w0;
                b2 = 1.0;
                a0 = 1.0 + alpha;
                a1 = b1;
                a2 = 1.0 - alpha;
            }
            BiquadType::Allpass => {
                b0 = 1.0 - alpha;
                b1 = -2.0 * cos_w0;
                b2 = 1.0 + alpha;
                a0 = b2;
                a1 = b1;
                a2 = b0;
            }
            BiquadType::Peak => {
                b0 = 1.0 + alpha * a;
                b1 = -2.0 * cos_w0;
                b2 = 1.0 - alpha * a;
                a0 = 1.0 + alpha / a;
                a1 = b1;
                a2 = 1.0 - alpha / a;
            }
            BiquadType::Lowshelf => {
                let c = 2.0 * a.sqrt() * alpha;
                b0 = a * ((a + 1.0) - (a - 1.0) * cos_w0 + c);
                b1 = 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0);
                b2 = a * ((a + 1.0) - (a - 1.0) * cos_w0 - c);
                a0 = (a + 1.0) + (a - 1.0) * cos_w0 + c;
                a1 = -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0);
                a2 = (a + 1.0) + (a - 1.0) * cos_w0 - c;
            }
            BiquadType::Highshelf => {
                let c = 2.0 * a.sqrt() * alpha;
                b0 = a * ((a + 1.0) + (a - 1.0) * cos_w0 + c);
                b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0);
                b2 = a * ((a + 1.0) + (a - 1.0) * cos_w0 - c);
                a0 = (a + 1.0) - (a - 1.0) * cos_w0 + c;
                a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_w0);
                a2 = (a + 1.0) - (a - 1.0) * cos_w0 - c;
            }
        }
        Self::from_coefficients(b0, b1, b2, a0, a1, a2)
    }

    /// Design a pole/zero transform filter (`lowpass_transform`,
    /// `highpass_transform`, `linkwitz_transform`).
    pub fn design_transform(lowpass: bool, fs: f64, fz: f64, qz: f64, fp: f64, qp: f64) -> Self {
        let w0z = 2.0 * PI * fz / fs;
        let w0p = 2.0 * PI * fp / fs;
        let (cos_w0z, cos_w0p) = (w0z.cos(), w0p.cos());
        let alpha_z = w0z.sin() / (2.0 * qz);
        let alpha_p = w0p.sin() / (2.0 * qp);
        let kz = if lowpass { 2.0 / (1.0 - cos_w0z) } else { 2.0 / (1.0 + cos_w0z) };
        let kp = if lowpass { 2.0 / (1.0 - cos_w0p) } else { 2.0 / (1.0 + cos_w0p) };
        Self::from_coefficients(
            (1.0 + alpha_z) * kz,
            -2.0 * cos_w0z * kz,
            (1.0 - alpha_z) * kz,
            (1.0 + alpha_p) * kp,
            -2.0 * cos_w0p * kp,
            (1.0 - alpha_p) * kp,
        )
    }

    #[inline]
    pub fn process(&mut self, s: Sample) -> Sample {
        let r = self.c0 * s + self.m0;
        self.m0 = self.m1 + self.c1 * s - self.c3 * r;
        self.m1 = self.c2 * s - self.c4 * r;
        r
    }

    /// Clear the delay state without touching coefficients.
    pub fn reset(&mut self) {
        self.m0 = 0.0;
        self.m1 = 0.0;
    }

    /// Normalized coefficients `(b0, b1, b2, a1, a2)` for plotting.
    pub fn coefficients(&self) -> (f64, f64, f64, f64, f64) {
        (self.c0, self.c1, self.c2, self.c3, self.c4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn magnitude_at(b: &Biquad, f: f64, fs: f64) -> f64 {
        // evaluate |H(e^jw)| directly from the coefficients
        let (b0, b1, b2, a1, a2) = b.coefficients();
        let w = 2.0 * PI * f / fs;
        let (re_n, im_n) = (
            b0 + b1 * w.cos() + b2 * (2.0 * w).cos(),
            -(b1 * w.sin() + b2 * (2.0 * w).sin()),
        );
        let (re_d, im_d) = (
            1.0 + a1 * w.cos() + a2 * (2.0 * w).cos(),
            -(a1 * w.sin() + a2 * (2.0 * w).sin()),
        );
        (re_n * re_n + im_n * im_n).sqrt() / (re_d * re_d + im_d * im_d).sqrt()
    }

    #[test]
    fn lowpass_is_3db_down_at_cutoff() {
        let b = Biquad::design(BiquadType::Lowpass, 48000.0, 1000.0, Width::default_q(), 0.0);
        let mag = magnitude_at(&b, 1000.0, 48000.0);
        assert!((20.0 * mag.log10() + 3.01).abs() < 0.1, "got {} dB", 20.0 * mag.log10());
        assert!(magnitude_at(&b, 100.0, 48000.0) > 0.99);
        assert!(magnitude_at(&b, 10000.0, 48000.0) < 0.05);
    }

    #[test]
    fn allpass_is_flat() {
        let b = Biquad::design(BiquadType::Allpass, 48000.0, 2000.0, Width::default_q(), 0.0);
        for f in [100.0, 1000.0, 5000.0, 20000.0] {
            assert!((magnitude_at(&b, f, 48000.0) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn peak_gain_at_center() {
        let b = Biquad::design(BiquadType::Peak, 48000.0, 1000.0, Width::default_q(), 6.0);
        let mag_db = 20.0 * magnitude_at(&b, 1000.0, 48000.0).log10();
        assert!((mag_db - 6.0).abs() < 0.05);
    }

    #[test]
    fn impulse_response_matches_direct_form() {
        let mut b = Biquad::from_coefficients(0.5, 0.2, 0.1, 1.0, -0.3, 0.05);
        // direct-form reference
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        for n in 0..32 {
            let x = if n == 0 { 1.0 } else { 0.0 };
            let want = 0.5 * x + 0.2 * x1 + 0.1 * x2 + 0.3 * y1 - 0.05 * y2;
            let got = b.process(x);
            assert!((got - want).abs() < 1e-15);
            x2 = x1;
            x1 = x;
            y2 = y1;
            y1 = want;
        }
    }

    #[test]
    fn width_parsing() {
        assert_eq!(Width::parse("0.707").unwrap().kind, WidthType::Q);
        assert_eq!(Width::parse("0.5s").unwrap().kind, WidthType::Slope);
        assert_eq!(Width::parse("12d").unwrap().kind, WidthType::SlopeDb);
        assert_eq!(Width::parse("1.5o").unwrap().kind, WidthType::BwOct);
        let w = Width::parse("2k").unwrap();
        assert_eq!(w.kind, WidthType::BwHz);
        assert_eq!(w.value, 2000.0);
        assert!(Width::parse("x").is_err());
    }

    #[test]
    fn butterworth_width() {
        // a 2nd-order butterworth is a single pair at q = 1/sqrt(2)
        let w = Width::parse("bw2").unwrap();
        assert!((w.value - FRAC_1_SQRT_2).abs() < 1e-12);
        // order must be >= 2, index must be in range
        assert!(Width::parse("bw1").is_err());
        assert!(Width::parse("bw4.2").is_err());
        assert!(Width::parse("bw4.1").is_ok());
    }
}
