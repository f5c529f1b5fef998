//! Property-based tests for the core utility layer.

use dsp_core::{gcd, ratio_mult_ceil, Biquad, BiquadType, ChannelSelector, Width};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// A selector survives a print/parse round trip.
    #[test]
    fn selector_display_roundtrip(bits in prop::collection::vec(any::<bool>(), 1..24)) {
        let mut sel = ChannelSelector::none(bits.len());
        for (k, &b) in bits.iter().enumerate() {
            if b {
                sel.set(k);
            }
        }
        let printed = sel.to_string();
        if sel.count() > 0 {
            let parsed = ChannelSelector::parse(&printed, bits.len()).unwrap();
            prop_assert_eq!(parsed, sel);
        } else {
            prop_assert!(printed.is_empty());
        }
    }

    /// Masked parsing never selects outside the mask, and an empty selector
    /// string selects exactly the mask.
    #[test]
    fn masked_parse_stays_inside_mask(
        mask_bits in prop::collection::vec(any::<bool>(), 2..16),
        pick in any::<u8>(),
    ) {
        let mut mask = ChannelSelector::none(mask_bits.len());
        for (k, &b) in mask_bits.iter().enumerate() {
            if b {
                mask.set(k);
            }
        }
        let all = ChannelSelector::parse_masked("", &mask).unwrap();
        prop_assert_eq!(&all, &mask);
        if mask.count() > 0 {
            let idx = usize::from(pick) % mask.count();
            let one = ChannelSelector::parse_masked(&idx.to_string(), &mask).unwrap();
            prop_assert_eq!(one.count(), 1);
            let k = one.iter_set().next().unwrap();
            prop_assert!(mask.get(k));
        }
    }

    /// `ratio_mult_ceil` is exact: the result is the smallest `r` with
    /// `r * d >= v * n`.
    #[test]
    fn ratio_mult_ceil_is_tight(v in 0usize..1_000_000, n in 1u32..1000, d in 1u32..1000) {
        let r = ratio_mult_ceil(v, n, d);
        prop_assert!(r as u128 * d as u128 >= v as u128 * n as u128);
        if r > 0 {
            prop_assert!(((r as u128 - 1) * d as u128) < (v as u128 * n as u128));
        }
    }

    /// gcd divides both arguments and preserves their ratio reduction.
    #[test]
    fn gcd_divides(a in 1u32..200_000, b in 1u32..200_000) {
        let g = gcd(a, b);
        prop_assert!(g > 0);
        prop_assert_eq!(a % g, 0);
        prop_assert_eq!(b % g, 0);
        prop_assert_eq!(gcd(a / g, b / g), 1);
    }

    /// Every standard filter design yields finite output on bounded input.
    #[test]
    fn biquad_designs_are_stable(
        f0 in 20.0f64..20_000.0,
        q in 0.1f64..10.0,
        gain in -20.0f64..20.0,
        variant in 0usize..6,
    ) {
        let ty = match variant {
            0 => BiquadType::Lowpass,
            1 => BiquadType::Highpass,
            2 => BiquadType::Notch,
            3 => BiquadType::Peak,
            4 => BiquadType::Lowshelf,
            _ => BiquadType::Highshelf,
        };
        let mut b = Biquad::design(ty, 48000.0, f0, Width { value: q, kind: dsp_core::WidthType::Q }, gain);
        let mut x = 1.0;
        for _ in 0..2048 {
            let y = b.process(x);
            prop_assert!(y.is_finite());
            x = -x;
        }
    }
}
