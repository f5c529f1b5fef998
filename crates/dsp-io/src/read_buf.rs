//! Read-ahead codec buffer.
//!
//! A worker thread owns the input codec list and keeps a bounded ring of
//! decoded blocks ahead of the consumer. Control flows through a small
//! bounded command queue that the worker always services before producing
//! audio; `SYNC`, `SEEK` and `SKIP` are reply-bearing, `PAUSE`, `UNPAUSE`
//! and `TERM` are fire-and-forget.
//!
//! A block with zero frames and a codec index marks the end of that codec.
//! When the codec after an ended one declares the realtime hint, the worker
//! suspends until the consumer fully drains the ring, so a live source is
//! never pre-read.

use crate::codec::{Codec, CodecInfo};
use dsp_core::Sample;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Command queue capacity; a handful is plenty since every source of
/// commands either blocks on a reply or runs at human speed.
const CMD_QUEUE_LEN: usize = 8;

/// Below this ring depth, buffering is pointless and the wrapper runs as a
/// pass-through.
pub const MIN_BLOCKS: usize = 2;

enum ReadCmd {
    Sync(mpsc::Sender<()>),
    Seek(u64, mpsc::Sender<Option<u64>>),
    Pause,
    Unpause,
    Skip(mpsc::Sender<()>),
    Term,
}

struct ReadBlock {
    data: Vec<Sample>,
    /// Index of the codec this block belongs to; `None` once the list is
    /// exhausted. Zero frames with `Some` marks that codec's end.
    codec: Option<usize>,
    channels: usize,
    offset: usize,
    frames: usize,
}

struct ReadQueue {
    cmds: VecDeque<ReadCmd>,
    blocks: Vec<ReadBlock>,
    front: usize,
    back: usize,
    /// Free production slots; `len - slots` blocks are queued.
    slots: usize,
    suspended: bool,
    paused: bool,
    rt_wait: bool,
}

impl ReadQueue {
    fn occupied(&self) -> usize {
        self.blocks.len() - self.slots
    }
}

struct ReadShared {
    queue: Mutex<ReadQueue>,
    /// Worker-side wakeups: a command arrived or a slot freed up.
    work: Condvar,
    /// Consumer-side wakeups: a block arrived.
    items: Condvar,
    /// Command-queue space for (rare) blocked command pushes.
    cmd_space: Condvar,
}

enum Backend {
    /// Ring buffer with a worker thread that owns the codecs.
    Buffered {
        shared: Arc<ReadShared>,
        worker: Option<JoinHandle<()>>,
    },
    /// `n_blocks < 2` or every codec refused buffering.
    Direct { codecs: Vec<Box<dyn Codec>> },
}

/// Read-side codec buffer; also the pass-through when buffering is off.
pub struct CodecReadBuf {
    infos: Vec<CodecInfo>,
    cur: usize,
    /// Set when the current codec has ended and the consumer should move on.
    next: bool,
    backend: Backend,
}

impl CodecReadBuf {
    /// Wrap `codecs` (a concatenation or sequence input list).
    ///
    /// `n_blocks` is the ring depth; fewer than [`MIN_BLOCKS`] disables the
    /// worker, as does a list where every codec sets the `no_buf` hint.
    pub fn new(codecs: Vec<Box<dyn Codec>>, block_frames: usize, n_blocks: usize) -> Self {
        let infos: Vec<CodecInfo> = codecs.iter().map(|c| CodecInfo::of(c.as_ref())).collect();
        let do_buf =
            n_blocks >= MIN_BLOCKS && codecs.iter().any(|c| !c.hints().no_buf);
        if !do_buf {
            return Self { infos, cur: 0, next: false, backend: Backend::Direct { codecs } };
        }

        let max_block_frames = block_frames.max(8);
        let max_channels = infos.iter().map(|i| i.channels).max().unwrap_or(1);
        let blocks = (0..n_blocks)
            .map(|_| ReadBlock {
                data: vec![0.0; max_block_frames * max_channels],
                codec: None,
                channels: max_channels,
                offset: 0,
                frames: 0,
            })
            .collect();
        let shared = Arc::new(ReadShared {
            queue: Mutex::new(ReadQueue {
                cmds: VecDeque::with_capacity(CMD_QUEUE_LEN),
                blocks,
                front: 0,
                back: 0,
                slots: n_blocks,
                suspended: false,
                paused: false,
                rt_wait: false,
            }),
            work: Condvar::new(),
            items: Condvar::new(),
            cmd_space: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("codec-read".into())
            .spawn(move || read_worker(&worker_shared, codecs, max_block_frames))
            .expect("failed to spawn read worker");
        tracing::debug!("read buffer enabled");
        Self {
            infos,
            cur: 0,
            next: false,
            backend: Backend::Buffered { shared, worker: Some(worker) },
        }
    }

    /// Descriptive snapshots of the wrapped codecs, in list order.
    pub fn infos(&self) -> &[CodecInfo] {
        &self.infos
    }

    /// The codec currently being consumed.
    pub fn current(&self) -> Option<&CodecInfo> {
        self.infos.get(self.cur)
    }

    /// Read up to `frames` frames of the current codec.
    ///
    /// Returns short (possibly zero) at the end of the current codec; call
    /// [`advance`](Self::advance) to move to the next one.
    pub fn read(&mut self, buf: &mut [Sample], frames: usize) -> usize {
        if self.cur >= self.infos.len() || frames == 0 || self.next {
            return 0;
        }
        match &mut self.backend {
            Backend::Direct { codecs } => {
                let r = codecs[self.cur].read(buf, frames);
                if r != frames {
                    self.next = true;
                }
                r
            }
            Backend::Buffered { shared, .. } => {
                let (r, ended) = pull(shared, buf, frames, self.cur);
                if ended {
                    self.next = true;
                }
                r
            }
        }
    }

    /// Seek the current codec to `pos`; returns the new position.
    pub fn seek(&mut self, pos: u64) -> Option<u64> {
        if self.cur >= self.infos.len() || self.next {
            return None;
        }
        match &mut self.backend {
            Backend::Direct { codecs } => codecs[self.cur].seek(pos),
            Backend::Buffered { shared, .. } => {
                // a realtime source has no meaningful positions to return to
                if pos > 0 && self.infos[self.cur].hints.realtime {
                    return None;
                }
                let (tx, rx) = mpsc::channel();
                push_cmd(shared, ReadCmd::Seek(pos, tx));
                rx.recv().unwrap_or(None)
            }
        }
    }

    /// Frames queued ahead of the consumer for the current codec.
    pub fn delay(&self) -> u64 {
        match &self.backend {
            Backend::Direct { codecs } => codecs.get(self.cur).map_or(0, |c| c.delay()),
            Backend::Buffered { shared, .. } => {
                let q = shared.queue.lock().unwrap();
                let mut fill = 0u64;
                let mut idx = q.front;
                for _ in 0..q.occupied() {
                    let block = &q.blocks[idx];
                    if block.codec != Some(self.cur) {
                        break;
                    }
                    fill += block.frames as u64;
                    idx = (idx + 1) % q.blocks.len();
                }
                fill
            }
        }
    }

    /// Pause or resume production. `sync` waits for the worker to act.
    pub fn pause(&mut self, state: bool, sync: bool) {
        match &mut self.backend {
            Backend::Direct { codecs } => {
                if let Some(c) = codecs.get_mut(self.cur) {
                    c.pause(state);
                }
            }
            Backend::Buffered { shared, .. } => {
                push_cmd(shared, if state { ReadCmd::Pause } else { ReadCmd::Unpause });
                if sync {
                    let (tx, rx) = mpsc::channel();
                    push_cmd(shared, ReadCmd::Sync(tx));
                    let _ = rx.recv();
                }
            }
        }
    }

    /// Move to the next codec in the list, dropping anything still queued
    /// for the current one. Returns the new current codec.
    pub fn advance(&mut self) -> Option<&CodecInfo> {
        if self.cur >= self.infos.len() {
            return None;
        }
        if !self.next {
            if let Backend::Buffered { shared, .. } = &self.backend {
                let (tx, rx) = mpsc::channel();
                push_cmd(shared, ReadCmd::Skip(tx));
                let _ = rx.recv();
            }
        }
        self.cur += 1;
        self.next = false;
        self.infos.get(self.cur)
    }
}

impl Drop for CodecReadBuf {
    fn drop(&mut self) {
        if let Backend::Buffered { shared, worker } = &mut self.backend {
            push_cmd(shared, ReadCmd::Term);
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

fn push_cmd(shared: &ReadShared, cmd: ReadCmd) {
    let mut q = shared.queue.lock().unwrap();
    while q.cmds.len() >= CMD_QUEUE_LEN {
        q = shared.cmd_space.wait(q).unwrap();
    }
    q.cmds.push_back(cmd);
    shared.work.notify_one();
}

/// Consumer-side block pull. Returns `(frames_read, current_codec_ended)`.
fn pull(shared: &ReadShared, buf: &mut [Sample], frames: usize, cur: usize) -> (usize, bool) {
    let mut r = 0;
    let mut q = shared.queue.lock().unwrap();
    while r < frames {
        while q.occupied() == 0 {
            q = shared.items.wait(q).unwrap();
        }
        let len = q.blocks.len();
        let front = q.front;
        let rt_wait = q.rt_wait;
        let block = &mut q.blocks[front];
        if block.codec != Some(cur) {
            // boundary: the worker moved on to the next input
            return (r, true);
        }
        if r > 0 && block.frames == 0 && rt_wait {
            // end block ahead of a realtime source; return what we have
            // without consuming it
            return (r, false);
        }
        if block.frames > 0 {
            let width = block.channels;
            let take = block.frames.min(frames - r);
            let src = block.offset * width;
            let dst = r * width;
            buf[dst..dst + take * width].copy_from_slice(&block.data[src..src + take * width]);
            block.offset += take;
            block.frames -= take;
            r += take;
        }
        if q.blocks[front].frames == 0 {
            q.front = (front + 1) % len;
            q.slots += 1;
            if q.rt_wait && q.slots == len {
                q.rt_wait = false;
                queue_restore(&mut q);
            }
            shared.work.notify_one();
        }
    }
    (r, false)
}

fn read_worker(shared: &ReadShared, mut codecs: Vec<Box<dyn Codec>>, max_block_frames: usize) {
    // index of the codec currently being produced; past the end = None
    let mut cur: Option<usize> = if codecs.is_empty() { None } else { Some(0) };
    loop {
        let mut q = shared.queue.lock().unwrap();
        while q.cmds.is_empty() && (q.suspended || q.slots == 0) {
            q = shared.work.wait(q).unwrap();
        }
        if let Some(cmd) = q.cmds.pop_front() {
            match cmd {
                ReadCmd::Sync(reply) => {
                    let _ = reply.send(());
                }
                ReadCmd::Seek(pos, reply) => {
                    let (new_cur, result) = queue_seek(&mut q, &mut codecs, cur, pos);
                    cur = new_cur;
                    if !q.paused {
                        queue_restore(&mut q);
                    }
                    let _ = reply.send(result);
                }
                ReadCmd::Pause => {
                    if let Some(i) = cur {
                        codecs[i].pause(true);
                    }
                    q.suspended = true;
                    q.paused = true;
                }
                ReadCmd::Unpause => {
                    if let Some(i) = cur {
                        codecs[i].pause(false);
                    }
                    q.paused = false;
                    queue_restore(&mut q);
                }
                ReadCmd::Skip(reply) => {
                    cur = queue_skip(&mut q, cur, codecs.len());
                    if !q.paused {
                        queue_restore(&mut q);
                    }
                    let _ = reply.send(());
                }
                ReadCmd::Term => return,
            }
            shared.cmd_space.notify_one();
        } else {
            // produce one block
            q.slots -= 1;
            let back = q.back;
            q.back = (back + 1) % q.blocks.len();
            let mut data = std::mem::take(&mut q.blocks[back].data);
            drop(q);

            let (r, channels) = match cur {
                Some(i) => {
                    let c = &mut codecs[i];
                    (c.read(&mut data, max_block_frames), c.channels())
                }
                None => (0, 1),
            };

            let mut q = shared.queue.lock().unwrap();
            let block = &mut q.blocks[back];
            block.data = data;
            block.offset = 0;
            block.frames = r;
            block.channels = channels;
            block.codec = cur;
            if r == 0 {
                if let Some(i) = cur {
                    cur = if i + 1 < codecs.len() { Some(i + 1) } else { None };
                    // never pre-read a live source: idle until the ring drains
                    if let Some(n) = cur {
                        if codecs[n].hints().realtime {
                            q.suspended = true;
                            q.rt_wait = true;
                        }
                    }
                }
            }
            shared.items.notify_one();
        }
    }
}

fn queue_restore(q: &mut ReadQueue) {
    if q.suspended && !q.rt_wait {
        q.suspended = false;
    }
}

/// Drop queued blocks belonging to `codec`, from the front or the back.
fn queue_drop(q: &mut ReadQueue, codec: Option<usize>, from_back: bool) {
    let len = q.blocks.len();
    while q.occupied() > 0 {
        let idx = if from_back { (q.back + len - 1) % len } else { q.front };
        if q.blocks[idx].codec != codec {
            break;
        }
        q.slots += 1;
        if from_back {
            q.back = idx;
        } else {
            q.front = (idx + 1) % len;
        }
    }
}

/// Satisfy a seek from queued blocks where possible, walking backward over
/// codecs that were pre-read past the target. Non-current codecs must be
/// seekable to zero or the whole operation fails.
fn queue_seek(
    q: &mut ReadQueue,
    codecs: &mut [Box<dyn Codec>],
    cur: Option<usize>,
    pos: u64,
) -> (Option<usize>, Option<u64>) {
    let prev = cur;
    if q.occupied() == 0 {
        let result = cur.and_then(|i| codecs[i].seek(pos));
        return (cur, result);
    }
    let Some(sc) = q.blocks[q.front].codec else {
        return (cur, None);
    };
    let len = q.blocks.len();
    loop {
        let idx = (q.back + len - 1) % len;
        let back_codec = q.blocks[idx].codec;
        if back_codec == Some(sc) {
            let result = codecs[sc].seek(pos);
            if result.is_some() {
                queue_drop(q, Some(sc), false);
                if prev != Some(sc) {
                    q.rt_wait = false;
                }
            }
            return (Some(sc), result);
        }
        // a codec the worker already read past: rewind it or give up
        match back_codec {
            None => queue_drop(q, None, true),
            Some(other) => {
                if codecs[other].seek(0) == Some(0) {
                    queue_drop(q, Some(other), true);
                } else {
                    tracing::error!(
                        codec = %codecs[other].path(),
                        "cannot rewind pre-read input while seeking across a codec boundary"
                    );
                    return (Some(other), None);
                }
            }
        }
    }
}

fn queue_skip(q: &mut ReadQueue, cur: Option<usize>, codec_count: usize) -> Option<usize> {
    if q.occupied() > 0 {
        let front_codec = q.blocks[q.front].codec;
        queue_drop(q, front_codec, false);
    }
    let mut cur = cur;
    if q.occupied() == 0 {
        if !q.rt_wait {
            cur = cur.map(|i| i + 1).filter(|&i| i < codec_count);
        }
        q.rt_wait = false;
    }
    cur
}
