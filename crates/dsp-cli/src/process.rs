//! The top-level block loop: inputs -> effects chain -> output.

use crate::Cli;
use anyhow::{bail, Context};
use dsp_core::{parse_freq, tokenize, tpdf_dither_mult, Sample, Stream, TpdfNoise};
use dsp_fx::{build_effects_chain, BufSel, EffectsChain};
use dsp_io::codec::{CodecInfo, CodecMode, CodecParams};
use dsp_io::{open_codec, CodecReadBuf, CodecWriteBuf};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

/// Events consumed between blocks; sample data never waits on these.
enum Event {
    Terminate,
    CodecError,
}

/// The auto-dither decision.
///
/// Dither is applied when not forced off, the sink can use it, and either
/// it is forced on or the output precision is low (< 24 bits) while the
/// signal has been touched (effects present), had more precision upstream,
/// or came from a source that cannot have been dithered itself.
fn should_dither(
    input: &CodecInfo,
    output: &CodecInfo,
    has_effects: bool,
    force: Option<bool>,
) -> bool {
    match force {
        Some(false) => false,
        force => {
            output.hints.can_dither
                && (force == Some(true)
                    || (output.precision < 24
                        && (has_effects
                            || input.precision > output.precision
                            || !input.hints.can_dither)))
        }
    }
}

/// The output sink plus everything applied on the way into it: TPDF dither
/// when no dither effect in the chain covers it, and clip accounting.
struct OutputStage {
    buf: Option<CodecWriteBuf>,
    info: CodecInfo,
    dither: TpdfNoise,
    add_dither: bool,
    clip_count: u64,
    peak: Sample,
}

impl OutputStage {
    fn open(
        cli: &Cli,
        stream: Stream,
        max_out_frames: usize,
        events: mpsc::Sender<Event>,
    ) -> anyhow::Result<(CodecWriteBuf, CodecInfo)> {
        let mut p = CodecParams::new(
            cli.output.clone().unwrap_or_else(|| "null".into()),
            CodecMode::Write,
        );
        p.kind = cli.output_type.clone();
        if cli.null_output || (cli.output.is_none() && p.kind.is_none()) {
            p.kind = Some("null".into());
        }
        p.encoding = cli.encoding.clone();
        p.fs = Some(stream.fs);
        p.channels = Some(stream.channels);
        p.block_frames = max_out_frames;
        let codec = open_codec(&p).context("error: failed to open output")?;
        if codec.fs() != stream.fs {
            bail!("error: sample rate mismatch: {}", codec.path());
        }
        if codec.channels() != stream.channels {
            bail!("error: channels mismatch: {}", codec.path());
        }
        let info = CodecInfo::of(codec.as_ref());
        log_io_info(&info, "output");
        let write_buf_blocks = cli.buf_ratio.saturating_sub(1);
        let wb = CodecWriteBuf::new(
            codec,
            max_out_frames,
            write_buf_blocks,
            Box::new(move |err| {
                tracing::error!("error: {err:?}");
                let _ = events.send(Event::CodecError);
            }),
        );
        Ok((wb, info))
    }

    fn new(
        cli: &Cli,
        stream: Stream,
        max_out_frames: usize,
        events: mpsc::Sender<Event>,
    ) -> anyhow::Result<Self> {
        let (buf, info) = Self::open(cli, stream, max_out_frames, events)?;
        let dither = TpdfNoise::new(tpdf_dither_mult(info.precision));
        Ok(Self {
            buf: Some(buf),
            info,
            dither,
            add_dither: false,
            clip_count: 0,
            peak: 0.0,
        })
    }

    fn reopen(
        &mut self,
        cli: &Cli,
        stream: Stream,
        max_out_frames: usize,
        events: mpsc::Sender<Event>,
    ) -> anyhow::Result<()> {
        self.close(true);
        let (buf, info) = Self::open(cli, stream, max_out_frames, events)?;
        self.dither.set_mult(tpdf_dither_mult(info.precision));
        self.buf = Some(buf);
        self.info = info;
        Ok(())
    }

    fn write(&mut self, frames: usize, data: &mut [Sample]) {
        let Some(buf) = self.buf.as_mut() else {
            return;
        };
        let samples = frames * self.info.channels;
        for s in &mut data[..samples] {
            if self.add_dither {
                *s += self.dither.next();
            }
            let a = s.abs();
            if a > self.peak {
                self.peak = a;
            }
            if *s > 1.0 {
                *s = 1.0;
                self.clip_count += 1;
            } else if *s < -1.0 {
                *s = -1.0;
                self.clip_count += 1;
            }
        }
        buf.write(data, frames);
    }

    fn delay_frames(&self) -> u64 {
        self.buf.as_ref().map_or(0, CodecWriteBuf::delay)
    }

    /// Flush (or discard) pending audio and release the codec so it can
    /// finalize its container.
    fn close(&mut self, flush: bool) {
        if let Some(mut buf) = self.buf.take() {
            if flush {
                buf.drain();
            } else {
                buf.drop_pending(true, true);
            }
            drop(buf.into_codec());
        }
    }
}

fn force_dither(cli: &Cli) -> Option<bool> {
    if cli.no_dither {
        Some(false)
    } else if cli.dither {
        Some(true)
    } else {
        None
    }
}

fn input_params(cli: &Cli, path: &str) -> anyhow::Result<CodecParams> {
    let mut p = CodecParams::new(path, CodecMode::Read);
    p.kind = cli.input_type.clone();
    if path == "null" && p.kind.is_none() {
        p.kind = Some("null".into());
    }
    if let Some(rate) = &cli.rate {
        let fs = parse_freq(rate).context("bad sample rate")?;
        if fs <= 0.0 {
            bail!("error: sample rate must be > 0");
        }
        p.fs = Some(fs.round() as u32);
    }
    p.channels = cli.channels;
    p.block_frames = cli.block_frames;
    p.buf_ratio = cli.buf_ratio;
    Ok(p)
}

fn log_io_info(info: &CodecInfo, label: &str) {
    let time = info.frames.map_or_else(
        || "unknown".to_string(),
        |f| {
            let s = f as f64 / f64::from(info.fs);
            format!(
                "{:02}:{:02}:{:05.2}",
                (s / 3600.0) as u64,
                ((s / 60.0) % 60.0) as u64,
                s % 60.0
            )
        },
    );
    tracing::info!(
        "{label}: {}; type={} enc={} precision={} channels={} fs={} [{time}]",
        info.path,
        info.kind,
        info.encoding,
        info.precision,
        info.channels,
        info.fs
    );
}

fn make_progress(cli: &Cli, frames: Option<u64>) -> ProgressBar {
    if cli.quiet || cli.silent {
        return ProgressBar::hidden();
    }
    let pb = match frames {
        Some(f) => ProgressBar::new(f).with_style(
            ProgressStyle::with_template(
                "{spinner} {percent:>3}%  {elapsed_precise}  -{eta_precise}  {msg}",
            )
            .unwrap(),
        ),
        None => ProgressBar::new_spinner(),
    };
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn rebuild_chain(
    tokens: &[String],
    stream: &mut Stream,
) -> anyhow::Result<EffectsChain> {
    let mut chain = EffectsChain::new();
    build_effects_chain(tokens, &mut chain, stream, Path::new("."))
        .map_err(|e| anyhow::anyhow!("error: {e}"))?;
    Ok(chain)
}

pub fn run(cli: &Cli) -> anyhow::Result<()> {
    let effect_tokens: Vec<String> = cli.effects.iter().flat_map(|t| tokenize(t)).collect();

    // open every input up front
    let mut in_codecs: Vec<Box<dyn dsp_io::Codec>> = Vec::new();
    for path in &cli.inputs {
        let p = input_params(cli, path)?;
        let codec =
            open_codec(&p).with_context(|| format!("error: failed to open input: {path}"))?;
        log_io_info(&CodecInfo::of(codec.as_ref()), "input");
        if !cli.sequence {
            if let Some(first) = in_codecs.first() {
                if (first.fs(), first.channels()) != (codec.fs(), codec.channels()) {
                    bail!(
                        "error: all inputs must have the same sample rate and channels in concatenate mode"
                    );
                }
            }
        }
        in_codecs.push(codec);
    }

    let input_stream = match in_codecs.first() {
        Some(c) => Stream::new(c.fs(), c.channels()),
        None => Stream::new(
            cli.rate
                .as_deref()
                .map(parse_freq)
                .transpose()
                .context("bad sample rate")?
                .map_or(48000, |f| f.round() as u32),
            cli.channels.unwrap_or(2),
        ),
    };

    let mut stream = input_stream;
    let mut chain = rebuild_chain(&effect_tokens, &mut stream)?;

    if cli.plot || cli.plot_phase {
        let stdout = std::io::stdout();
        chain
            .plot(
                &mut stdout.lock(),
                input_stream.fs,
                input_stream.channels,
                cli.plot_phase,
            )
            .map_err(|e| anyhow::anyhow!("plot: error: {e}"))?;
        return Ok(());
    }
    if in_codecs.is_empty() {
        bail!("error: no inputs");
    }

    let (events_tx, events) = mpsc::channel();
    {
        let tx = events_tx.clone();
        ctrlc::set_handler(move || {
            let _ = tx.send(Event::Terminate);
        })
        .context("error: could not install signal handler")?;
    }

    let mut out = OutputStage::new(
        cli,
        stream,
        chain.max_out_frames(cli.block_frames),
        events_tx.clone(),
    )?;

    let mut rb = CodecReadBuf::new(in_codecs, cli.block_frames, cli.buf_ratio);
    let mut buf_len = chain.buffer_len(cli.block_frames, input_stream.channels);
    let mut buf1 = vec![0.0; buf_len];
    let mut buf2 = vec![0.0; buf_len];

    let force = force_dither(cli);
    let mut terminated = false;

    'inputs: while let Some(in_info) = rb.current().cloned() {
        let do_dither = should_dither(&in_info, &out.info, !chain.is_empty(), force);
        out.add_dither = chain.set_dither_params(out.info.precision, do_dither);
        tracing::debug!("dither {}", if out.add_dither { "on" } else { "off" });

        let progress = make_progress(cli, in_info.frames);
        let mut pos: u64 = 0;
        loop {
            // control events are handled strictly between blocks
            while let Ok(ev) = events.try_recv() {
                match ev {
                    Event::Terminate => {
                        progress.finish_and_clear();
                        tracing::info!("terminating...");
                        terminated = true;
                        break 'inputs;
                    }
                    Event::CodecError => {
                        progress.finish_and_clear();
                        out.close(false);
                        bail!("error: output failed");
                    }
                }
            }

            let r = rb.read(&mut buf1, cli.block_frames);
            pos += r as u64;
            let mut frames = r;
            match chain.run(&mut frames, &mut buf1, &mut buf2) {
                BufSel::In => out.write(frames, &mut buf1),
                BufSel::Out => out.write(frames, &mut buf2),
            }
            let delay =
                (chain.delay_seconds() * f64::from(in_info.fs)).round() as u64 + out.delay_frames();
            progress.set_position(pos.saturating_sub(delay.min(pos)));
            if out.clip_count > 0 {
                progress.set_message(format!(
                    "peak:{:.2}dBFS clip:{}",
                    dsp_core::linear_to_db(out.peak),
                    out.clip_count
                ));
            }
            if r == 0 {
                break;
            }
        }
        progress.finish_and_clear();

        let prev = Stream::new(in_info.fs, in_info.channels);
        if let Some(next) = rb.advance().cloned() {
            let next_stream = Stream::new(next.fs, next.channels);
            if next_stream != prev {
                tracing::info!(
                    "input sample rate and/or channels changed; rebuilding effects chain"
                );
                if !cli.no_drain {
                    drain_chain(&mut chain, &mut out, cli.block_frames, &mut buf1, &mut buf2);
                }
                let mut stream = next_stream;
                chain = rebuild_chain(&effect_tokens, &mut stream)?;
                if Stream::new(out.info.fs, out.info.channels) != stream {
                    tracing::info!(
                        "output sample rate and/or channels changed; reopening output"
                    );
                    out.reopen(
                        cli,
                        stream,
                        chain.max_out_frames(cli.block_frames),
                        events_tx.clone(),
                    )?;
                }
                let new_len = chain.buffer_len(cli.block_frames, next_stream.channels);
                if new_len > buf_len {
                    buf_len = new_len;
                    buf1.resize(buf_len, 0.0);
                    buf2.resize(buf_len, 0.0);
                }
            }
        }
    }

    if !terminated {
        drain_chain(&mut chain, &mut out, cli.block_frames, &mut buf1, &mut buf2);
    }
    out.close(!terminated);
    if out.clip_count > 0 {
        tracing::warn!(
            "warning: clipped {} samples ({:.2}dBFS peak)",
            out.clip_count,
            dsp_core::linear_to_db(out.peak)
        );
    }
    drop(chain);
    if terminated {
        bail!("terminated by signal");
    }
    Ok(())
}

fn drain_chain(
    chain: &mut EffectsChain,
    out: &mut OutputStage,
    block_frames: usize,
    buf1: &mut [Sample],
    buf2: &mut [Sample],
) {
    loop {
        let mut frames = block_frames;
        match chain.drain(&mut frames, buf1, buf2) {
            None => break,
            Some(BufSel::In) => out.write(frames, buf1),
            Some(BufSel::Out) => out.write(frames, buf2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsp_io::codec::CodecHints;

    fn info(precision: u32, can_dither: bool) -> CodecInfo {
        CodecInfo {
            path: "test".into(),
            kind: "mock",
            encoding: "s16".into(),
            fs: 48000,
            channels: 2,
            precision,
            frames: None,
            hints: CodecHints { can_dither, ..CodecHints::default() },
        }
    }

    #[test]
    fn dither_decision_table() {
        // (in_prec, in_cd, out_prec, out_cd, effects, force, expected)
        let cases = [
            // forced off always wins
            (24, true, 16, true, true, Some(false), false),
            // forced on needs only a ditherable sink
            (16, true, 24, true, false, Some(true), true),
            (16, true, 24, false, false, Some(true), false),
            // high-precision sink: no auto dither
            (24, true, 24, true, true, None, false),
            // low-precision sink with effects
            (16, true, 16, true, true, None, true),
            // no effects, equal precision, dithered source: nothing to do
            (16, true, 16, true, false, None, false),
            // no effects but precision is being reduced
            (24, true, 16, true, false, None, true),
            // no effects but the source was never dithered
            (16, false, 16, true, false, None, true),
            // sink that cannot dither
            (24, true, 16, false, true, None, false),
        ];
        for (i, (ip, icd, op, ocd, fx, force, want)) in cases.into_iter().enumerate() {
            let got = should_dither(&info(ip, icd), &info(op, ocd), fx, force);
            assert_eq!(got, want, "case {i}");
        }
    }
}
