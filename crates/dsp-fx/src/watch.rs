//! `watch`: hot-reload a sub-chain from a script file, crossfading between
//! the old and new chains on change.
//!
//! All watch effects in the process share one worker thread that polls
//! `stat()` once a second. On an mtime change the worker rebuilds the
//! sub-chain against the effect's original input stream and selector, then
//! validates it: the output stream must be unchanged and the rebuilt
//! chain's scratch requirement must not exceed what was planned at startup
//! (buffers are never re-planned after startup, so a grown sub-chain is
//! rejected and logged). A valid chain is handed to the audio thread,
//! which swaps it in over a 100 ms linear crossfade.

use crate::builder::build_effects_chain_from_file;
use crate::chain::{ChainCrossfade, EffectsChain};
use crate::effect::{BufSel, Effect, EffectArgs};
use crate::error::ChainError;
use crate::registry::EffectInfo;
use dsp_core::{ratio_mult_ceil, ChannelSelector, Sample, Stream};
use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

struct WatchNode {
    id: u64,
    path: PathBuf,
    enforce_eof_marker: bool,
    istream: Stream,
    ostream: Stream,
    mask: ChannelSelector,
    state: Mutex<NodeState>,
}

struct NodeState {
    last_mtime: Option<SystemTime>,
    pending: Option<EffectsChain>,
    /// Block size and scratch bound reported to the outer chain planner.
    in_frames: usize,
    buf_len: usize,
}

#[derive(Default)]
struct Registry {
    nodes: Vec<Arc<WatchNode>>,
    worker: Option<std::thread::JoinHandle<()>>,
    stop: Option<Arc<AtomicBool>>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(Mutex::default)
}

fn next_node_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn watch_worker(stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(POLL_INTERVAL);
        let nodes: Vec<Arc<WatchNode>> = registry().lock().unwrap().nodes.clone();
        for node in nodes {
            let mtime = match std::fs::metadata(&node.path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(err) => {
                    tracing::debug!(path = %node.path.display(), %err, "stat failed");
                    continue;
                }
            };
            let changed = {
                let mut state = node.state.lock().unwrap();
                if state.last_mtime == Some(mtime) {
                    false
                } else {
                    state.last_mtime = Some(mtime);
                    true
                }
            };
            if changed {
                reload(&node);
            }
        }
    }
}

fn reload(node: &WatchNode) {
    tracing::info!(path = %node.path.display(), "reloading");
    let mut stream = node.istream;
    let mut new_chain = EffectsChain::new();
    if let Err(err) = build_effects_chain_from_file(
        &node.path,
        &mut new_chain,
        &mut stream,
        Some(&node.mask),
        node.enforce_eof_marker,
    ) {
        tracing::error!(path = %node.path.display(), %err, "reload failed");
        return;
    }
    if stream != node.ostream {
        tracing::error!(
            path = %node.path.display(),
            "reloaded chain output is {stream} but {} is required",
            node.ostream
        );
        return;
    }
    let mut state = node.state.lock().unwrap();
    let buf_len = new_chain.buffer_len(state.in_frames, node.istream.channels);
    if buf_len > state.buf_len {
        tracing::error!(
            path = %node.path.display(),
            "reloaded chain needs {buf_len} scratch samples but only {} were planned",
            state.buf_len
        );
        return;
    }
    // the outer chain supplies its own dither decision
    new_chain.set_dither_params(0, false);
    state.pending = Some(new_chain);
}

pub struct WatchEffect {
    name: &'static str,
    node: Arc<WatchNode>,
    active: EffectsChain,
    xfade: Option<ChainCrossfade>,
}

pub fn init(info: &EffectInfo, args: &EffectArgs) -> Result<Vec<Box<dyn Effect>>, ChainError> {
    let usage = || args.usage(format!("usage: {}", info.usage));
    let (enforce_eof_marker, path_str) = match args.args {
        [p] => (false, p),
        [opt, p] if opt == "-e" => (true, p),
        _ => return Err(usage()),
    };
    let path = args.dir.join(path_str);

    let mut stream = args.istream;
    let mut chain = EffectsChain::new();
    build_effects_chain_from_file(
        &path,
        &mut chain,
        &mut stream,
        Some(args.selector),
        enforce_eof_marker,
    )?;
    let last_mtime = std::fs::metadata(&path)
        .and_then(|m| m.modified())
        .map_err(|e| ChainError::init(args.name, format!("stat failed: {e}")))?;

    let node = Arc::new(WatchNode {
        id: next_node_id(),
        path,
        enforce_eof_marker,
        istream: args.istream,
        ostream: stream,
        mask: args.selector.clone(),
        state: Mutex::new(NodeState {
            last_mtime: Some(last_mtime),
            pending: None,
            in_frames: 0,
            buf_len: 0,
        }),
    });

    let mut reg = registry().lock().unwrap();
    if reg.worker.is_none() {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        reg.worker = Some(
            std::thread::Builder::new()
                .name("watch".into())
                .spawn(move || watch_worker(&worker_stop))
                .map_err(|e| ChainError::init(args.name, format!("failed to start worker: {e}")))?,
        );
        reg.stop = Some(stop);
    }
    reg.nodes.push(Arc::clone(&node));
    drop(reg);

    Ok(vec![Box::new(WatchEffect {
        name: info.name,
        node,
        active: chain,
        xfade: None,
    })])
}

impl WatchEffect {
    fn finish_xfade(&mut self) {
        if let Some(fade) = self.xfade.take() {
            self.active = fade.finish();
        }
    }
}

impl Effect for WatchEffect {
    fn name(&self) -> &'static str {
        self.name
    }
    fn istream(&self) -> Stream {
        self.node.istream
    }
    fn ostream(&self) -> Stream {
        self.node.ostream
    }

    fn run(&mut self, frames: &mut usize, ibuf: &mut [Sample], obuf: &mut [Sample]) -> BufSel {
        if self.xfade.is_none() {
            let (pending, buf_len) = {
                let mut state = self.node.state.lock().unwrap();
                (state.pending.take(), state.buf_len)
            };
            if let Some(new_chain) = pending {
                let old = std::mem::take(&mut self.active);
                let fade = ChainCrossfade::new(old, new_chain, self.node.ostream, buf_len);
                if buf_len == 0 || fade.done() {
                    self.active = fade.finish();
                } else {
                    self.xfade = Some(fade);
                }
            }
        }
        if let Some(fade) = &mut self.xfade {
            let sel = fade.run(frames, ibuf, obuf);
            if fade.done() {
                self.finish_xfade();
                tracing::debug!("{}: end of crossfade", self.name);
            }
            return sel;
        }
        self.active.run(frames, ibuf, obuf)
    }

    fn delay(&self) -> usize {
        (self.active.delay_seconds() * f64::from(self.node.ostream.fs)).round() as usize
    }

    fn reset(&mut self) {
        self.finish_xfade();
        self.active.reset();
    }

    fn signal(&mut self) {
        self.active.signal();
    }

    fn drain(
        &mut self,
        frames: &mut usize,
        buf1: &mut [Sample],
        buf2: &mut [Sample],
    ) -> Option<BufSel> {
        self.finish_xfade();
        self.active.drain(frames, buf1, buf2)
    }

    fn buffer_frames(&mut self, in_frames: usize) -> usize {
        let buf_len = self.active.buffer_len(in_frames, self.node.istream.channels);
        let buf_frames = ratio_mult_ceil(buf_len, 1, self.node.ostream.channels as u32);
        let mut state = self.node.state.lock().unwrap();
        if buf_len > state.buf_len {
            state.in_frames = in_frames;
            state.buf_len = buf_len;
        }
        buf_frames
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for WatchEffect {
    fn drop(&mut self) {
        let mut reg = registry().lock().unwrap();
        reg.nodes.retain(|n| n.id != self.node.id);
        if reg.nodes.is_empty() {
            if let Some(stop) = reg.stop.take() {
                stop.store(true, Ordering::Relaxed);
            }
            if let Some(worker) = reg.worker.take() {
                drop(reg);
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::path::Path;

    fn make(dir: &Path, script: &str) -> Box<dyn Effect> {
        let path = dir.join("chain.fx");
        std::fs::write(&path, script).unwrap();
        let info = crate::registry::find_effect("watch").unwrap();
        let selector = ChannelSelector::all(1);
        let arg_strings = vec![path.to_str().unwrap().to_string()];
        let args = EffectArgs {
            name: "watch",
            args: &arg_strings,
            istream: Stream::new(48000, 1),
            selector: &selector,
            dir: Path::new("/"),
        };
        init(info, &args).unwrap().remove(0)
    }

    #[test]
    fn runs_sub_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = make(dir.path(), "gain -6\n");
        let mut buf = vec![1.0; 16];
        let mut obuf = vec![0.0; 16];
        let mut frames = 16;
        let sel = e.run(&mut frames, &mut buf, &mut obuf);
        assert_eq!(sel, BufSel::In);
        let want = dsp_core::db_to_linear(-6.0);
        assert!((buf[0] - want).abs() < 1e-12);
    }

    #[test]
    fn crossfade_mixes_linearly() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = make(dir.path(), "mult 1.0\n");
        // size the planner state so a crossfade buffer exists
        assert_eq!(e.buffer_frames(256), 256);

        // inject a replacement chain directly, as the worker would
        let watch = e.as_any_mut().downcast_mut::<WatchEffect>().unwrap();
        let node = Arc::clone(&watch.node);
        {
            let path = node.path.clone();
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            f.write_all(b"mult 0.0\n").unwrap();
        }
        super::reload(&node);
        assert!(node.state.lock().unwrap().pending.is_some());

        // constant input: output must ramp linearly from 1 toward 0 over
        // 100 ms (4800 frames at 48 kHz)
        let mut produced = Vec::new();
        for _ in 0..20 {
            let mut buf = vec![1.0; 256];
            let mut obuf = vec![0.0; 256];
            let mut frames = 256;
            let sel = e.run(&mut frames, &mut buf, &mut obuf);
            let src = match sel {
                BufSel::In => &buf[..frames],
                BufSel::Out => &obuf[..frames],
            };
            produced.extend_from_slice(src);
        }
        let total = 4800.0;
        for (n, &y) in produced.iter().enumerate().take(4800) {
            let want = 1.0 - n as f64 / total;
            assert!(
                (y - want).abs() < 2.0 / total,
                "frame {n}: got {y}, want {want}"
            );
        }
        assert!(produced[4800..].iter().all(|&y| y == 0.0));
    }

    #[test]
    fn reload_rejects_stream_change() {
        let dir = tempfile::tempdir().unwrap();
        let e = make(dir.path(), "gain 0\n");
        let watch = e.as_any().downcast_ref::<WatchEffect>().unwrap();
        let node = Arc::clone(&watch.node);
        std::fs::write(&node.path, "remix 0 0\n").unwrap();
        super::reload(&node);
        assert!(node.state.lock().unwrap().pending.is_none());
    }
}
