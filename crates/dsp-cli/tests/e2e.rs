//! End-to-end tests driving the `dsp` binary.

use std::path::Path;
use std::process::Command;

fn dsp_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dsp"))
}

fn write_sine_s16(path: &Path, fs: u32, freq: f64, amplitude: f64, frames: usize) -> Vec<i16> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: fs,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let mut samples = Vec::with_capacity(frames);
    for n in 0..frames {
        let s = amplitude * (std::f64::consts::TAU * freq * n as f64 / f64::from(fs)).sin();
        let v = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
        writer.write_sample(v).unwrap();
        samples.push(v);
    }
    writer.finalize().unwrap();
    samples
}

fn read_s16(path: &Path) -> Vec<i16> {
    hound::WavReader::open(path)
        .unwrap()
        .samples::<i16>()
        .map(Result::unwrap)
        .collect()
}

fn read_f32(path: &Path) -> Vec<f32> {
    hound::WavReader::open(path)
        .unwrap()
        .samples::<f32>()
        .map(Result::unwrap)
        .collect()
}

#[test]
fn identity_is_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");
    let expected = write_sine_s16(&input, 48000, 1000.0, 0.5, 48000);

    let status = dsp_bin()
        .args(["-q", "-o"])
        .arg(&output)
        .args(["-e", "s16"])
        .arg(&input)
        .status()
        .unwrap();
    assert!(status.success());

    let got = read_s16(&output);
    assert_eq!(got, expected, "identity pipeline must be bit-exact");
}

#[test]
fn gain_pair_applies_minus_twelve_db() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");
    let source = write_sine_s16(&input, 48000, 1000.0, 0.5, 48000);

    let status = dsp_bin()
        .args(["-q", "-D", "-o"])
        .arg(&output)
        .args(["-e", "s16"])
        .arg(&input)
        .args(["--", "gain", "-6", "gain", "-6"])
        .status()
        .unwrap();
    assert!(status.success());

    let got = read_s16(&output);
    assert_eq!(got.len(), source.len());
    let g = (10.0f64).powf(-12.0 / 20.0);
    for (x, y) in source.iter().zip(got.iter()) {
        let want = f64::from(*x) * g;
        assert!(
            (f64::from(*y) - want).abs() <= 1.5,
            "sample: got {y}, want {want:.2}"
        );
    }
}

#[test]
fn sgen_input_produces_tone() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.wav");

    let status = dsp_bin()
        .args(["-q", "-t", "sgen", "-r", "48k", "-c", "1", "-o"])
        .arg(&output)
        .args(["-e", "f32", "sine:freq=1k:len=4800S"])
        .status()
        .unwrap();
    assert!(status.success());

    let got = read_f32(&output);
    assert_eq!(got.len(), 4800);
    for (n, &y) in got.iter().enumerate().take(1000) {
        let want = (std::f64::consts::TAU * 1000.0 * n as f64 / 48000.0).sin();
        assert!((f64::from(y) - want).abs() < 1e-6);
    }
}

#[test]
fn block_selector_silences_channel_zero() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&input, spec).unwrap();
    for n in 0..64 {
        writer.write_sample(0.25f32).unwrap();
        writer.write_sample(if n == 7 { 1.0f32 } else { 0.0 }).unwrap();
    }
    writer.finalize().unwrap();

    let status = dsp_bin()
        .args(["-q", "-o"])
        .arg(&output)
        .args(["-e", "f32"])
        .arg(&input)
        .args(["--", "{", ":0", "mult", "0", "}"])
        .status()
        .unwrap();
    assert!(status.success());

    let got = read_f32(&output);
    assert_eq!(got.len(), 128);
    for frame in got.chunks_exact(2) {
        assert_eq!(frame[0], 0.0, "channel 0 must be silenced");
    }
    assert_eq!(got[7 * 2 + 1], 1.0, "channel 1 must be untouched");
}

#[test]
fn resample_round_trip_correlates() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44100,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&input, spec).unwrap();
    let frames = 44100;
    for n in 0..frames {
        let s = 0.5 * (std::f64::consts::TAU * 10_000.0 * n as f64 / 44100.0).sin();
        writer.write_sample(s as f32).unwrap();
    }
    writer.finalize().unwrap();

    let status = dsp_bin()
        .args(["-q", "-o"])
        .arg(&output)
        .args(["-e", "f32"])
        .arg(&input)
        .args(["--", "resample", "96k", "resample", "44.1k"])
        .status()
        .unwrap();
    assert!(status.success());

    let got = read_f32(&output);
    assert!(got.len() >= frames, "got {} frames", got.len());
    // the combined filter delay is fractional at the final rate, so
    // compensate by correlating against the quadrature pair and taking the
    // magnitude
    let lat = 23;
    let mut dot_s = 0.0;
    let mut dot_c = 0.0;
    let mut ey = 0.0;
    let mut er = 0.0;
    for n in 1000..40_000 {
        let y = f64::from(got[n + lat]);
        let phase = std::f64::consts::TAU * 10_000.0 * n as f64 / 44100.0;
        dot_s += y * phase.sin();
        dot_c += y * phase.cos();
        ey += y * y;
        er += 0.25 * phase.sin() * phase.sin();
    }
    let corr = (dot_s * dot_s + dot_c * dot_c).sqrt() * 0.5 / (ey.sqrt() * er.sqrt());
    assert!(corr >= 0.999, "correlation {corr}");
}

#[test]
fn unknown_effect_fails_unless_guarded() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    write_sine_s16(&input, 48000, 440.0, 0.25, 480);

    let status = dsp_bin()
        .args(["-q", "-n"])
        .arg(&input)
        .args(["--", "frobnicate"])
        .status()
        .unwrap();
    assert!(!status.success());

    let status = dsp_bin()
        .args(["-q", "-n"])
        .arg(&input)
        .args(["--", "!", "frobnicate", "gain", "-3"])
        .status()
        .unwrap();
    assert!(status.success());
}

#[test]
fn plot_mode_emits_gnuplot() {
    let output = dsp_bin()
        .args(["-p", "-r", "48k", "-c", "2", "--", "lowpass", "1k", "0.707q"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let script = String::from_utf8_lossy(&output.stdout);
    assert!(script.contains("set logscale x"));
    assert!(script.contains("H0_0(w)"));
}

#[test]
fn effect_catalogue_is_listed() {
    let output = dsp_bin().arg("--effects-help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["lowpass", "gain", "remix", "resample", "dither", "watch", "matrix4"] {
        assert!(stdout.contains(name), "catalogue should list {name}");
    }
}
