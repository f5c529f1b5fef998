//! FFT convolution: `fir`, `fir_p` and `zita_convolver`.
//!
//! One uniform-partitioned overlap-add engine serves all three entries.
//! `fir` uses a single partition covering the whole filter (lowest CPU,
//! latency equal to the rounded filter length); `fir_p` and
//! `zita_convolver` bound the partition length to trade CPU for latency.
//!
//! Filters load from a WAV file (one filter channel, or one per selected
//! channel) or inline as `coefs:c0,c1,.../...`.

use crate::effect::{BufSel, Effect, EffectArgs};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{ChannelSelector, Sample, Stream};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::any::Any;
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// The FFT planner is not reentrant; planning is serialized process-wide.
/// Plan execution is thread-safe and uncontended.
fn plan_fft(size: usize) -> (Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>) {
    static PLANNER: OnceLock<Mutex<FftPlanner<f64>>> = OnceLock::new();
    let mut planner = PLANNER.get_or_init(|| Mutex::new(FftPlanner::new())).lock().unwrap();
    (planner.plan_fft_forward(size), planner.plan_fft_inverse(size))
}

fn next_pow2(n: usize) -> usize {
    n.next_power_of_two()
}

/// Per-channel convolution state.
struct Kernel {
    /// Index into the filter-channel table.
    filter: usize,
    time_in: Vec<Sample>,
    out: Vec<Sample>,
    olap: Vec<Sample>,
    /// Frequency delay line, newest spectrum at the front.
    fdl: VecDeque<Vec<Complex<Sample>>>,
}

pub struct FirEffect {
    name: &'static str,
    stream: Stream,
    /// Partition length in frames; also the reported latency.
    len: usize,
    fft_size: usize,
    fft: Arc<dyn Fft<f64>>,
    ifft: Arc<dyn Fft<f64>>,
    /// Per filter channel, per partition.
    filter_fr: Vec<Vec<Vec<Complex<Sample>>>>,
    /// Original taps kept for plotting.
    filter_taps: Vec<Vec<Sample>>,
    filter_frames: usize,
    /// Convolved channels.
    kernels: Vec<Option<Kernel>>,
    /// Plain `len`-frame delay for unconvolved channels, keeping every
    /// channel aligned.
    delay_bufs: Vec<Option<Vec<Sample>>>,
    p: usize,
    has_output: bool,
    draining: Option<(usize, usize)>,
    scratch: Vec<Complex<Sample>>,
    acc: Vec<Complex<Sample>>,
}

/// Load filter coefficients: `coefs:` lists or a WAV file.
fn load_filter(spec: &str, dir: &Path) -> Result<Vec<Vec<Sample>>, String> {
    if let Some(lists) = spec.strip_prefix("coefs:") {
        let channels: Vec<Vec<Sample>> = lists
            .split('/')
            .map(|list| {
                list.split(',')
                    .map(|c| c.trim().parse::<Sample>().map_err(|_| format!("bad coefficient: {c}")))
                    .collect()
            })
            .collect::<Result<_, _>>()?;
        if channels.is_empty() || channels.iter().any(Vec::is_empty) {
            return Err("empty coefficient list".to_string());
        }
        return Ok(channels);
    }
    let path = spec.strip_prefix("file:").unwrap_or(spec);
    let path = if let Some(rest) = path.strip_prefix("~/") {
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(path),
        }
    } else {
        dir.join(path)
    };
    let mut reader = hound::WavReader::open(&path)
        .map_err(|e| format!("failed to open filter: {}: {e}", path.display()))?;
    let spec_wav = reader.spec();
    let n_channels = spec_wav.channels as usize;
    let interleaved: Vec<Sample> = match spec_wav.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<_, _>>()
            .map_err(|e| e.to_string())?,
        hound::SampleFormat::Int => {
            let norm = 1.0 / (1i64 << (spec_wav.bits_per_sample - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| f64::from(v) * norm))
                .collect::<Result<_, _>>()
                .map_err(|e| e.to_string())?
        }
    };
    let frames = interleaved.len() / n_channels;
    if frames == 0 {
        return Err(format!("empty filter: {}", path.display()));
    }
    let mut channels = vec![Vec::with_capacity(frames); n_channels];
    for frame in interleaved.chunks_exact(n_channels) {
        for (k, &s) in frame.iter().enumerate() {
            channels[k].push(s);
        }
    }
    Ok(channels)
}

/// Build a convolution effect over `filter` (time-domain taps per filter
/// channel). Shared by `fir`, `fir_p`, `zita_convolver` and `hilbert`.
pub(crate) fn make_fir(
    name: &'static str,
    istream: Stream,
    selector: &ChannelSelector,
    filter: Vec<Vec<Sample>>,
    max_part_len: Option<usize>,
) -> Result<Box<dyn Effect>, ChainError> {
    let n_selected = selector.count();
    if filter.len() != 1 && filter.len() != n_selected {
        return Err(ChainError::init(
            name,
            format!(
                "filter has {} channels but {} channels are selected",
                filter.len(),
                n_selected
            ),
        ));
    }
    let filter_frames = filter.iter().map(Vec::len).max().unwrap_or(0);
    let mut len = next_pow2(filter_frames.max(1));
    if let Some(max) = max_part_len {
        len = len.min(next_pow2(max));
    }
    let n_parts = filter_frames.div_ceil(len).max(1);
    let fft_size = len * 2;
    let (fft, ifft) = plan_fft(fft_size);

    // partitioned filter spectra
    let filter_fr: Vec<Vec<Vec<Complex<Sample>>>> = filter
        .iter()
        .map(|taps| {
            (0..n_parts)
                .map(|part| {
                    let mut buf = vec![Complex::default(); fft_size];
                    let start = part * len;
                    let end = taps.len().min(start + len);
                    for (i, &c) in taps.get(start..end).unwrap_or(&[]).iter().enumerate() {
                        buf[i].re = c;
                    }
                    fft.process(&mut buf);
                    buf
                })
                .collect()
        })
        .collect();

    let mut filter_idx = 0;
    let kernels = (0..istream.channels)
        .map(|k| {
            if !selector.get(k) {
                return None;
            }
            let idx = if filter_fr.len() == 1 { 0 } else { filter_idx };
            filter_idx += 1;
            Some(Kernel {
                filter: idx,
                time_in: vec![0.0; len],
                out: vec![0.0; len],
                olap: vec![0.0; len],
                fdl: (0..n_parts).map(|_| vec![Complex::default(); fft_size]).collect(),
            })
        })
        .collect();
    let delay_bufs = (0..istream.channels)
        .map(|k| (!selector.get(k)).then(|| vec![0.0; len]))
        .collect();

    tracing::debug!(
        "{name}: filter_frames={filter_frames} part_len={len} parts={n_parts}"
    );
    Ok(Box::new(FirEffect {
        name,
        stream: istream,
        len,
        fft_size,
        fft,
        ifft,
        filter_fr,
        filter_taps: filter,
        filter_frames,
        kernels,
        delay_bufs,
        p: 0,
        has_output: false,
        draining: None,
        scratch: vec![Complex::default(); fft_size],
        acc: vec![Complex::default(); fft_size],
    }))
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    let usage = || args.usage(format!("usage: {}", info.usage));
    let (max_part_len, filter_spec) = match args.name {
        "fir" => match args.args {
            [f] => (None, f),
            _ => return Err(usage()),
        },
        "fir_p" => match args.args {
            [f] => (Some(4096), f),
            [n, f] => {
                let n: usize = n.parse().map_err(|_| usage())?;
                if !n.is_power_of_two() {
                    return Err(args.usage("max_part_len must be a power of 2"));
                }
                (Some(n), f)
            }
            _ => return Err(usage()),
        },
        "zita_convolver" => match args.args {
            [f] => (Some(4096), f),
            [_min, f] => (Some(4096), f),
            [_min, max, f] => {
                let n: usize = max.parse().map_err(|_| usage())?;
                (Some(n), f)
            }
            _ => return Err(usage()),
        },
        other => return Err(ChainError::init(other, "not a convolution effect")),
    };
    let filter = load_filter(filter_spec, args.dir).map_err(|m| ChainError::init(args.name, m))?;
    Ok(vec![make_fir(info.name, args.istream, args.selector, filter, max_part_len)?])
}

impl FirEffect {
    fn process_block(&mut self) {
        let norm = 1.0 / self.fft_size as Sample;
        for kernel in self.kernels.iter_mut().flatten() {
            // newest input spectrum
            let mut spectrum = kernel.fdl.pop_back().unwrap();
            for (c, &s) in spectrum.iter_mut().zip(kernel.time_in.iter()) {
                *c = Complex::new(s, 0.0);
            }
            for c in spectrum.iter_mut().skip(self.len) {
                *c = Complex::default();
            }
            self.fft.process(&mut spectrum);
            kernel.fdl.push_front(spectrum);

            let parts = &self.filter_fr[kernel.filter];
            self.acc.fill(Complex::default());
            for (spec, part) in kernel.fdl.iter().zip(parts.iter()) {
                for ((a, x), h) in self.acc.iter_mut().zip(spec.iter()).zip(part.iter()) {
                    *a += x * h;
                }
            }
            self.scratch.copy_from_slice(&self.acc);
            self.ifft.process(&mut self.scratch);
            for (j, out) in kernel.out.iter_mut().enumerate() {
                *out = self.scratch[j].re * norm + kernel.olap[j];
            }
            for (j, olap) in kernel.olap.iter_mut().enumerate() {
                *olap = self.scratch[self.len + j].re * norm;
            }
        }
    }
}

impl Effect for FirEffect {
    fn name(&self) -> &'static str {
        self.name
    }
    fn istream(&self) -> Stream {
        self.stream
    }
    fn ostream(&self) -> Stream {
        self.stream
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], obuf: &mut [Sample]) -> BufSel {
        let channels = self.stream.channels;
        let mut iframes = 0;
        let mut oframes = 0;
        while iframes < *frames {
            while self.p < self.len && iframes < *frames {
                for k in 0..channels {
                    let x = ibuf[iframes * channels + k];
                    if let Some(kernel) = &mut self.kernels[k] {
                        if self.has_output {
                            obuf[oframes * channels + k] = kernel.out[self.p];
                        }
                        kernel.time_in[self.p] = x;
                    } else if let Some(delay) = &mut self.delay_bufs[k] {
                        if self.has_output {
                            obuf[oframes * channels + k] = delay[self.p];
                        }
                        delay[self.p] = x;
                    }
                }
                if self.has_output {
                    oframes += 1;
                }
                iframes += 1;
                self.p += 1;
            }
            if self.p == self.len {
                self.process_block();
                self.p = 0;
                self.has_output = true;
            }
        }
        *frames = oframes;
        BufSel::Out
    }

    fn delay(&self) -> usize {
        if self.has_output {
            self.len
        } else {
            self.p
        }
    }

    fn reset(&mut self) {
        self.p = 0;
        self.has_output = false;
        self.draining = None;
        for kernel in self.kernels.iter_mut().flatten() {
            kernel.time_in.fill(0.0);
            kernel.out.fill(0.0);
            kernel.olap.fill(0.0);
            for spec in &mut kernel.fdl {
                spec.fill(Complex::default());
            }
        }
        for delay in self.delay_bufs.iter_mut().flatten() {
            delay.fill(0.0);
        }
    }

    fn can_plot(&self) -> bool {
        true
    }

    fn plot(&self, out: &mut dyn Write, idx: usize) -> std::io::Result<()> {
        let mut filter_idx = 0;
        for k in 0..self.stream.channels {
            if self.kernels[k].is_some() {
                let taps = if self.filter_taps.len() == 1 {
                    &self.filter_taps[0]
                } else {
                    let t = &self.filter_taps[filter_idx];
                    filter_idx += 1;
                    t
                };
                write!(out, "H{k}_{idx}(w)=(abs(w)<=pi)?0.0")?;
                for (j, c) in taps.iter().enumerate() {
                    write!(out, "+exp(-j*w*{j})*{c:.15e}")?;
                }
                writeln!(out, ":0/0")?;
            } else {
                writeln!(out, "H{k}_{idx}(w)=1.0")?;
            }
        }
        Ok(())
    }

    fn drain(
        &mut self,
        frames: &mut usize,
        buf1: &mut [Sample],
        buf2: &mut [Sample],
    ) -> Option<BufSel> {
        if !self.has_output && self.p == 0 {
            return None;
        }
        let (pos, total) = *self.draining.get_or_insert_with(|| {
            let mut total = self.filter_frames + self.p;
            if self.has_output {
                total += self.len - self.p;
            }
            (0, total)
        });
        if pos >= total {
            return None;
        }
        let channels = self.stream.channels;
        buf1[..*frames * channels].fill(0.0);
        self.run(frames, buf1, buf2);
        let new_pos = pos + *frames;
        if new_pos > total {
            *frames -= new_pos - total;
        }
        self.draining = Some((new_pos, total));
        Some(BufSel::Out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
