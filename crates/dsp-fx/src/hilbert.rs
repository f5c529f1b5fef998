//! `hilbert`: windowed ideal Hilbert transformer, run through the FIR
//! convolution engine.

use crate::effect::{Effect, EffectArgs};
use crate::error::ChainError;
use crate::fir::make_fir;
use crate::registry::EffectInfo;
use dsp_core::Sample;
use std::f64::consts::PI;

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    let usage = || args.usage(format!("usage: {}", info.usage));
    let mut partitioned = false;
    let mut angle = -PI / 2.0;
    let mut rest = args.args;
    loop {
        match rest.first().map(String::as_str) {
            Some("-p") => {
                partitioned = true;
                rest = &rest[1..];
            }
            Some("-a") => {
                let deg: f64 = rest
                    .get(1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| args.usage("expected argument to option 'a'"))?;
                angle = deg / 180.0 * PI;
                rest = &rest[2..];
            }
            _ => break,
        }
    }
    let [taps_str] = rest else {
        return Err(usage());
    };
    let taps: i64 = taps_str.parse().map_err(|_| usage())?;
    if taps <= 3 {
        return Err(args.usage("taps must be > 3"));
    }
    if taps % 2 == 0 {
        return Err(args.usage("taps must be odd"));
    }
    let taps = taps as usize;

    // Blackman-windowed ideal transformer, mixed with a direct path so the
    // angle selects any phase rotation between identity and quadrature
    let w_h = (-angle).sin();
    let w_d = (-angle).cos();
    let mut h: Vec<Sample> = vec![0.0; taps];
    let half = taps as i64 / 2;
    for (i, tap) in h.iter_mut().enumerate() {
        let k = i as i64 - half;
        if k == 0 {
            *tap = w_d;
        } else if k % 2 != 0 {
            let x = 2.0 * PI * i as f64 / (taps - 1) as f64;
            *tap = w_h * 2.0 / (PI * k as f64)
                * (0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos());
        }
    }
    let part_len = partitioned.then_some(4096);
    Ok(vec![make_fir(info.name, args.istream, args.selector, vec![h], part_len)?])
}
