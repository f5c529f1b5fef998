//! Chain-level behavior: invariants, the peephole optimizer, draining and
//! buffer sizing.

use dsp_fx::{build_effects_chain, BufSel, EffectsChain};
use dsp_core::{tokenize, PmRand, Sample, Stream};
use proptest::prelude::*;
use std::path::Path;

fn build(script: &str, fs: u32, channels: usize) -> (EffectsChain, Stream) {
    let tokens = tokenize(script);
    let mut chain = EffectsChain::new();
    let mut stream = Stream::new(fs, channels);
    build_effects_chain(&tokens, &mut chain, &mut stream, Path::new("."))
        .unwrap_or_else(|e| panic!("build failed for {script:?}: {e}"));
    (chain, stream)
}

/// Push `input` through `chain` block by block, collecting the output and
/// then draining the tail.
fn run_chain(
    chain: &mut EffectsChain,
    input: &[Sample],
    in_channels: usize,
    block_frames: usize,
) -> Vec<Sample> {
    let buf_len = chain.buffer_len(block_frames, in_channels);
    let mut buf1 = vec![0.0; buf_len];
    let mut buf2 = vec![0.0; buf_len];
    let out_channels = chain
        .effects()
        .last()
        .map_or(in_channels, |e| e.ostream().channels);
    let mut out = Vec::new();
    for chunk in input.chunks(block_frames * in_channels) {
        let mut frames = chunk.len() / in_channels;
        buf1[..chunk.len()].copy_from_slice(chunk);
        let sel = chain.run(&mut frames, &mut buf1, &mut buf2);
        let src = match sel {
            BufSel::In => &buf1,
            BufSel::Out => &buf2,
        };
        out.extend_from_slice(&src[..frames * out_channels]);
    }
    loop {
        let mut frames = block_frames;
        match chain.drain(&mut frames, &mut buf1, &mut buf2) {
            None => break,
            Some(sel) => {
                let src = match sel {
                    BufSel::In => &buf1,
                    BufSel::Out => &buf2,
                };
                out.extend_from_slice(&src[..frames * out_channels]);
            }
        }
    }
    out
}

fn seeded_noise(frames: usize, channels: usize) -> Vec<Sample> {
    let mut rng = PmRand::new1();
    (0..frames * channels)
        .map(|_| f64::from(rng.next()) / f64::from(dsp_core::rng::PM_RAND_MAX) - 0.5)
        .collect()
}

#[test]
fn gain_pair_merges_to_one_effect() {
    let (mut chain, _) = build("gain -6 gain -6", 48000, 1);
    assert_eq!(chain.len(), 1, "optimizer should merge adjacent gains");

    let input = seeded_noise(4096, 1);
    let out = run_chain(&mut chain, &input, 1, 256);
    let g = dsp_core::db_to_linear(-12.0);
    assert_eq!(out.len(), input.len());
    for (x, y) in input.iter().zip(out.iter()) {
        let want = x * g;
        assert!((y - want).abs() <= want.abs() * f64::EPSILON, "{y} vs {want}");
    }
}

#[test]
fn merge_scans_past_reorderable_effects() {
    // delay is reorderable but not mergeable; the two gains around it
    // still fold together
    let (chain, _) = build("gain -3 delay 10S gain -3", 48000, 2);
    assert_eq!(chain.len(), 2);
    // a selector-coupling effect stops the scan
    let (chain, _) = build("gain -3 st2ms gain -3", 48000, 2);
    assert_eq!(chain.len(), 3);
}

#[test]
fn optimizer_preserves_transfer() {
    let script = "gain -2 mult 0.8 delay 16S gain 1.5";
    let input = seeded_noise(8192, 2);

    // unoptimized reference: build each effect as its own chain
    let mut reference = input.clone();
    for part in ["gain -2", "mult 0.8", "delay 16S", "gain 1.5"] {
        let (mut c, _) = build(part, 48000, 2);
        reference = run_chain(&mut c, &reference, 2, 512);
    }

    let (mut optimized, _) = build(script, 48000, 2);
    assert!(optimized.len() < 4);
    let got = run_chain(&mut optimized, &input, 2, 512);
    assert_eq!(got.len(), reference.len());
    for (a, b) in got.iter().zip(reference.iter()) {
        assert!((a - b).abs() <= a.abs().max(b.abs()) * 2.0 * f64::EPSILON);
    }
}

#[test]
fn block_selector_silences_one_channel() {
    // impulse on channel 1 only; the block gains channel 0 to silence
    let (mut chain, _) = build("{ :0 mult 0 }", 48000, 2);
    let mut input = vec![0.0; 64 * 2];
    input[7 * 2 + 1] = 1.0;
    input[9 * 2] = 0.5;
    let out = run_chain(&mut chain, &input, 2, 32);
    assert_eq!(out.len(), input.len());
    for frame in out.chunks_exact(2) {
        assert_eq!(frame[0], 0.0);
    }
    assert_eq!(out[7 * 2 + 1], 1.0);
}

#[test]
fn drain_then_reset_produces_silence() {
    let (mut chain, _) = build("delay 100S lowpass 2k 0.707q", 48000, 1);
    let input = seeded_noise(2048, 1);
    let _ = run_chain(&mut chain, &input, 1, 256);
    chain.reset();
    // after a reset, silence in produces silence out
    let silence = vec![0.0; 4096];
    let out = run_chain(&mut chain, &silence, 1, 256);
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn chain_delay_accumulates_across_rates() {
    let (mut chain, stream) = build("delay -480S resample 96k", 48000, 1);
    assert_eq!(stream.fs, 96000);
    // latency is reported for material actually buffered
    let len = chain.buffer_len(1024, 1);
    let mut buf1 = vec![0.0; len];
    let mut buf2 = vec![0.0; len];
    let mut frames = 1024;
    chain.run(&mut frames, &mut buf1, &mut buf2);
    // 480 frames at 48k = 10 ms, plus the resampler's own latency
    let d = chain.delay_seconds();
    assert!(d > 0.0099 && d < 0.015, "delay {d}");
}

#[test]
fn buffer_len_covers_rate_growth() {
    let (mut chain, _) = build("resample 96k", 48000, 2);
    // 2048 input frames become up to 4096 output frames of 2 channels
    assert!(chain.buffer_len(2048, 2) >= 4096 * 2);
    let (mut chain, _) = build("remix 0 1 0 1", 48000, 2);
    assert!(chain.buffer_len(2048, 2) >= 2048 * 4);
}

#[test]
fn plot_emits_gnuplot_script() {
    let (chain, _) = build("lowpass 1k 0.707q gain -3", 48000, 2);
    let mut out = Vec::new();
    chain.plot(&mut out, 48000, 2, true).unwrap();
    let script = String::from_utf8(out).unwrap();
    assert!(script.contains("set logscale x"));
    assert!(script.contains("H0_0(w)"));
    assert!(script.contains("Ht0_mag_dB"));
    assert!(script.contains("pause mouse close"));
}

#[test]
fn plot_rejects_unplottable_effects() {
    let (chain, _) = build("decorrelate 2", 48000, 2);
    let mut out = Vec::new();
    assert!(chain.plot(&mut out, 48000, 2, false).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Arbitrary scripts assembled from valid fragments always produce
    /// chains whose adjacent effects agree on the stream at the seam.
    #[test]
    fn chain_invariant_holds(
        parts in prop::collection::vec(
            prop::sample::select(vec![
                "gain -3",
                "mult 0.5",
                "add 0.01",
                "lowpass 2k 0.707q",
                "highpass 100 0.5q",
                "delay 8S",
                "remix 0,1 1 0",
                "remix 0 1",
                "resample 44.1k",
                "st2ms",
                "noise -80",
            ]),
            1..8,
        ),
    ) {
        let script = parts.join(" ");
        let tokens = tokenize(&script);
        let mut chain = EffectsChain::new();
        let mut stream = Stream::new(48000, 2);
        // st2ms needs two selected channels; scripts that narrow the
        // stream first may legitimately fail to build
        if build_effects_chain(&tokens, &mut chain, &mut stream, Path::new(".")).is_ok() {
            for pair in chain.effects().windows(2) {
                prop_assert_eq!(pair[0].ostream(), pair[1].istream());
            }
            if let Some(last) = chain.effects().last() {
                prop_assert_eq!(last.ostream(), stream);
            }
        }
    }

    /// Running a block never writes past the planned scratch size.
    #[test]
    fn buffer_adequacy(
        block in 16usize..1024,
        script in prop::sample::select(vec![
            "resample 96k",
            "resample 22.05k",
            "remix 0 1 0 1 0",
            "gain -3 resample 88.2k remix 0,1 1",
        ]),
    ) {
        let (mut chain, _) = build(script, 48000, 2);
        let len = chain.buffer_len(block, 2);
        // guard region after the declared length
        let mut buf1 = vec![0.0; len + 64];
        let mut buf2 = vec![0.0; len + 64];
        for s in buf1[len..].iter_mut().chain(buf2[len..].iter_mut()) {
            *s = 12345.0;
        }
        let mut frames = block;
        chain.run(&mut frames, &mut buf1[..len], &mut buf2[..len]);
        let mut dframes = block;
        let _ = chain.drain(&mut dframes, &mut buf1[..len], &mut buf2[..len]);
        prop_assert!(buf1[len..].iter().all(|&s| s == 12345.0));
        prop_assert!(buf2[len..].iter().all(|&s| s == 12345.0));
    }
}
