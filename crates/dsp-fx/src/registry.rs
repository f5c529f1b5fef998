//! The effect catalogue.

use crate::effect::{Effect, EffectArgs};
use crate::error::ChainError;

type InitFn = fn(&EffectInfo, &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError>;

/// One catalogue entry: the public name, a usage line for help output and
/// errors, and the init function.
pub struct EffectInfo {
    pub name: &'static str,
    pub usage: &'static str,
    init: InitFn,
}

impl EffectInfo {
    /// Construct the effect(s) for this entry. An init may return several
    /// effects (a short chain) or none at all (a successful no-op, e.g.
    /// `delay 0`).
    pub fn init(&self, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
        (self.init)(self, args)
    }
}

static EFFECTS: &[EffectInfo] = &[
    EffectInfo { name: "lowpass_1",          usage: "lowpass_1 f0[k]",                         init: crate::biquad_fx::init },
    EffectInfo { name: "highpass_1",         usage: "highpass_1 f0[k]",                        init: crate::biquad_fx::init },
    EffectInfo { name: "allpass_1",          usage: "allpass_1 f0[k]",                         init: crate::biquad_fx::init },
    EffectInfo { name: "lowshelf_1",         usage: "lowshelf_1 f0[k] gain",                   init: crate::biquad_fx::init },
    EffectInfo { name: "highshelf_1",        usage: "highshelf_1 f0[k] gain",                  init: crate::biquad_fx::init },
    EffectInfo { name: "lowpass_1p",         usage: "lowpass_1p f0[k]",                        init: crate::biquad_fx::init },
    EffectInfo { name: "lowpass",            usage: "lowpass f0[k] width[q|o|h|k]",            init: crate::biquad_fx::init },
    EffectInfo { name: "highpass",           usage: "highpass f0[k] width[q|o|h|k]",           init: crate::biquad_fx::init },
    EffectInfo { name: "bandpass_skirt",     usage: "bandpass_skirt f0[k] width[q|o|h|k]",     init: crate::biquad_fx::init },
    EffectInfo { name: "bandpass_peak",      usage: "bandpass_peak f0[k] width[q|o|h|k]",      init: crate::biquad_fx::init },
    EffectInfo { name: "notch",              usage: "notch f0[k] width[q|o|h|k]",              init: crate::biquad_fx::init },
    EffectInfo { name: "allpass",            usage: "allpass f0[k] width[q|o|h|k]",            init: crate::biquad_fx::init },
    EffectInfo { name: "eq",                 usage: "eq f0[k] width[q|o|h|k] gain",            init: crate::biquad_fx::init },
    EffectInfo { name: "lowshelf",           usage: "lowshelf f0[k] width[q|s|d|o|h|k] gain",  init: crate::biquad_fx::init },
    EffectInfo { name: "highshelf",          usage: "highshelf f0[k] width[q|s|d|o|h|k] gain", init: crate::biquad_fx::init },
    EffectInfo { name: "lowpass_transform",  usage: "lowpass_transform fz[k] qz fp[k] qp",     init: crate::biquad_fx::init },
    EffectInfo { name: "highpass_transform", usage: "highpass_transform fz[k] qz fp[k] qp",    init: crate::biquad_fx::init },
    EffectInfo { name: "linkwitz_transform", usage: "linkwitz_transform fz[k] qz fp[k] qp",    init: crate::biquad_fx::init },
    EffectInfo { name: "deemph",             usage: "deemph",                                  init: crate::biquad_fx::init },
    EffectInfo { name: "biquad",             usage: "biquad b0 b1 b2 a0 a1 a2",                init: crate::biquad_fx::init },
    EffectInfo { name: "gain",               usage: "gain gain_dB",                            init: crate::gain::init },
    EffectInfo { name: "mult",               usage: "mult multiplier",                         init: crate::gain::init },
    EffectInfo { name: "add",                usage: "add value",                               init: crate::gain::init },
    EffectInfo { name: "crossfeed",          usage: "crossfeed f0[k] separation",              init: crate::crossfeed::init },
    EffectInfo { name: "matrix4",            usage: "matrix4 [surround_level]",                init: crate::matrix4::init },
    EffectInfo { name: "matrix4_mb",         usage: "matrix4_mb [surround_level]",             init: crate::matrix4::init },
    EffectInfo { name: "remix",              usage: "remix channel_selector|. ...",            init: crate::remix::init },
    EffectInfo { name: "st2ms",              usage: "st2ms",                                   init: crate::st2ms::init },
    EffectInfo { name: "ms2st",              usage: "ms2st",                                   init: crate::st2ms::init },
    EffectInfo { name: "delay",              usage: "delay delay[s|m|S]",                      init: crate::delay_fx::init },
    EffectInfo { name: "resample",           usage: "resample [bandwidth] fs[k]",              init: crate::resample::init },
    EffectInfo { name: "fir",                usage: "fir [file:][~/]filter_path|coefs:list[/list...]", init: crate::fir::init },
    EffectInfo { name: "fir_p",              usage: "fir_p [max_part_len] [file:][~/]filter_path|coefs:list[/list...]", init: crate::fir::init },
    EffectInfo { name: "zita_convolver",     usage: "zita_convolver [min_part_len [max_part_len]] [~/]filter_path", init: crate::fir::init },
    EffectInfo { name: "hilbert",            usage: "hilbert [-p] [-a angle] taps",            init: crate::hilbert::init },
    EffectInfo { name: "decorrelate",        usage: "decorrelate [-m] [stages]",               init: crate::decorrelate::init },
    EffectInfo { name: "noise",              usage: "noise level[b]",                          init: crate::noise::init },
    EffectInfo { name: "dither",             usage: "dither [shape] [[quantize_bits] bits]",   init: crate::dither::init },
    EffectInfo { name: "stats",              usage: "stats [ref_level]",                       init: crate::stats::init },
    EffectInfo { name: "watch",              usage: "watch [-e] file_path",                    init: crate::watch::init },
];

/// Look a name up in the catalogue.
pub fn find_effect(name: &str) -> Option<&'static EffectInfo> {
    EFFECTS.iter().find(|e| e.name == name)
}

/// The full catalogue, in registration order.
pub fn effect_catalogue() -> &'static [EffectInfo] {
    EFFECTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_names_are_unique() {
        for (i, a) in EFFECTS.iter().enumerate() {
            for b in &EFFECTS[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn lookup_finds_registered_names() {
        assert!(find_effect("gain").is_some());
        assert!(find_effect("watch").is_some());
        assert!(find_effect("ladspa_host").is_none());
        assert!(find_effect("").is_none());
    }
}
