//! Write-behind codec buffer.
//!
//! The chain thread copies blocks into a bounded ring; a worker thread owns
//! the output codec and drains the ring into it. A short write latches a
//! sticky error: queued blocks are dropped, the error callback fires once,
//! and later pushes are silently discarded so the processing loop can wind
//! down at its own pace.
//!
//! Commands: `SYNC` and `DRAIN` block for a reply; `DROP_BLOCK_QUEUE`,
//! `DROP_ALL`, `PAUSE`, `UNPAUSE` and `TERM` are asynchronous.

use crate::codec::{Codec, CodecInfo};
use dsp_core::Sample;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

const CMD_QUEUE_LEN: usize = 8;

/// Errors reported through the write-buffer error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBufError {
    /// The codec accepted fewer frames than were pushed.
    ShortWrite,
}

/// Callback fired on write errors, from whichever thread performs the
/// write (the worker when buffered, the caller when not).
pub type ErrorCallback = Box<dyn Fn(WriteBufError) + Send>;

enum WriteCmd {
    Sync(mpsc::Sender<()>),
    DropBlockQueue,
    DropAll,
    Pause,
    Unpause,
    Drain(mpsc::Sender<()>),
    Term,
}

struct WriteBlock {
    data: Vec<Sample>,
    frames: usize,
}

struct WriteQueue {
    cmds: VecDeque<WriteCmd>,
    blocks: Vec<WriteBlock>,
    max_block_frames: usize,
    front: usize,
    back: usize,
    items: usize,
    fill_frames: u64,
    stopped: bool,
    suspended: bool,
    error: bool,
}

struct WriteShared {
    queue: Mutex<WriteQueue>,
    work: Condvar,
    slots: Condvar,
    cmd_space: Condvar,
}

enum Backend {
    Buffered {
        shared: Arc<WriteShared>,
        worker: Option<JoinHandle<Box<dyn Codec>>>,
    },
    Direct {
        codec: Option<Box<dyn Codec>>,
        error_cb: ErrorCallback,
    },
}

/// Write-side codec buffer; also the pass-through when buffering is off.
pub struct CodecWriteBuf {
    info: CodecInfo,
    backend: Backend,
}

impl CodecWriteBuf {
    /// Wrap `codec`. `n_blocks < 2` or the `no_out_buf`/`no_buf` hints run
    /// the wrapper as a direct pass-through.
    pub fn new(
        codec: Box<dyn Codec>,
        block_frames: usize,
        n_blocks: usize,
        error_cb: ErrorCallback,
    ) -> Self {
        let info = CodecInfo::of(codec.as_ref());
        let hints = info.hints;
        if n_blocks < 2 || hints.no_out_buf || hints.no_buf {
            return Self { info, backend: Backend::Direct { codec: Some(codec), error_cb } };
        }
        let max_block_frames = block_frames.max(8);
        let channels = info.channels;
        let blocks = (0..n_blocks)
            .map(|_| WriteBlock { data: vec![0.0; max_block_frames * channels], frames: 0 })
            .collect();
        let shared = Arc::new(WriteShared {
            queue: Mutex::new(WriteQueue {
                cmds: VecDeque::with_capacity(CMD_QUEUE_LEN),
                blocks,
                max_block_frames,
                front: 0,
                back: 0,
                items: 0,
                fill_frames: 0,
                stopped: true,
                suspended: false,
                error: false,
            }),
            work: Condvar::new(),
            slots: Condvar::new(),
            cmd_space: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("codec-write".into())
            .spawn(move || write_worker(&worker_shared, codec, error_cb))
            .expect("failed to spawn write worker");
        tracing::debug!("write buffer enabled");
        Self { info, backend: Backend::Buffered { shared, worker: Some(worker) } }
    }

    pub fn info(&self) -> &CodecInfo {
        &self.info
    }

    /// Copy `frames` frames into the ring, splitting into block-sized
    /// chunks. Blocks when the ring is full; discards after an error.
    pub fn write(&mut self, buf: &[Sample], frames: usize) {
        if frames == 0 {
            return;
        }
        match &mut self.backend {
            Backend::Direct { codec, error_cb } => {
                if let Some(c) = codec.as_mut() {
                    if c.write(buf, frames) != frames {
                        error_cb(WriteBufError::ShortWrite);
                    }
                }
            }
            Backend::Buffered { shared, .. } => push_blocks(shared, buf, frames, self.info.channels),
        }
    }

    /// Frames pushed but not yet handed to the codec.
    pub fn delay(&self) -> u64 {
        match &self.backend {
            Backend::Direct { codec, .. } => codec.as_ref().map_or(0, |c| c.delay()),
            Backend::Buffered { shared, .. } => shared.queue.lock().unwrap().fill_frames,
        }
    }

    /// Discard queued blocks; with `drop_all`, also the codec's own
    /// buffered frames. `sync` waits for the worker to act.
    pub fn drop_pending(&mut self, drop_all: bool, sync: bool) {
        match &mut self.backend {
            Backend::Direct { codec, .. } => {
                if let Some(c) = codec.as_mut() {
                    c.drop_pending();
                }
            }
            Backend::Buffered { shared, .. } => {
                push_cmd(shared, if drop_all { WriteCmd::DropAll } else { WriteCmd::DropBlockQueue });
                if sync {
                    self.sync();
                }
            }
        }
    }

    pub fn pause(&mut self, state: bool, sync: bool) {
        match &mut self.backend {
            Backend::Direct { codec, .. } => {
                if let Some(c) = codec.as_mut() {
                    c.pause(state);
                }
            }
            Backend::Buffered { shared, .. } => {
                push_cmd(shared, if state { WriteCmd::Pause } else { WriteCmd::Unpause });
                if sync {
                    self.sync();
                }
            }
        }
    }

    /// Barrier: returns once the worker has consumed every prior command.
    pub fn sync(&mut self) {
        if let Backend::Buffered { shared, .. } = &self.backend {
            let (tx, rx) = mpsc::channel();
            push_cmd(shared, WriteCmd::Sync(tx));
            let _ = rx.recv();
        }
    }

    /// Block until every queued frame has been written (or dropped, when
    /// paused or errored).
    pub fn drain(&mut self) {
        if let Backend::Buffered { shared, .. } = &self.backend {
            let (tx, rx) = mpsc::channel();
            push_cmd(shared, WriteCmd::Drain(tx));
            let _ = rx.recv();
        }
    }

    /// Shut the worker down and recover the codec (so the caller can let
    /// it finalize its container on drop).
    pub fn into_codec(mut self) -> Option<Box<dyn Codec>> {
        match &mut self.backend {
            Backend::Direct { codec, .. } => codec.take(),
            Backend::Buffered { shared, worker } => {
                push_cmd(shared, WriteCmd::Term);
                worker.take().and_then(|h| h.join().ok())
            }
        }
    }
}

impl Drop for CodecWriteBuf {
    fn drop(&mut self) {
        if let Backend::Buffered { shared, worker } = &mut self.backend {
            if let Some(handle) = worker.take() {
                push_cmd(shared, WriteCmd::Term);
                let _ = handle.join();
            }
        }
    }
}

fn push_cmd(shared: &WriteShared, cmd: WriteCmd) {
    let mut q = shared.queue.lock().unwrap();
    while q.cmds.len() >= CMD_QUEUE_LEN {
        q = shared.cmd_space.wait(q).unwrap();
    }
    q.cmds.push_back(cmd);
    shared.work.notify_one();
}

fn push_blocks(shared: &WriteShared, buf: &[Sample], frames: usize, channels: usize) {
    let mut remaining = frames;
    let mut offset = 0;
    while remaining > 0 {
        let mut q = shared.queue.lock().unwrap();
        let len = q.blocks.len();
        let max_block_frames = q.max_block_frames;
        while q.items == len {
            q = shared.slots.wait(q).unwrap();
        }
        let block_frames = max_block_frames.min(remaining);
        if !q.error {
            let back = q.back;
            let block = &mut q.blocks[back];
            block.frames = block_frames;
            let samples = block_frames * channels;
            block.data[..samples].copy_from_slice(&buf[offset..offset + samples]);
            q.back = (back + 1) % len;
            q.items += 1;
            q.fill_frames += block_frames as u64;
            q.stopped = false;
            shared.work.notify_one();
        }
        offset += block_frames * channels;
        remaining -= block_frames;
    }
}

fn queue_drop(q: &mut WriteQueue) {
    while q.items > 0 {
        let len = q.blocks.len();
        q.back = (q.back + len - 1) % len;
        let back = q.back;
        q.fill_frames -= q.blocks[back].frames as u64;
        q.items -= 1;
    }
    q.stopped = true;
}

fn write_worker(
    shared: &WriteShared,
    mut codec: Box<dyn Codec>,
    error_cb: ErrorCallback,
) -> Box<dyn Codec> {
    let mut done = false;
    let mut drain_reply: Option<mpsc::Sender<()>> = None;
    loop {
        let mut q = shared.queue.lock().unwrap();
        if done && q.stopped {
            return codec;
        }
        while q.cmds.is_empty() && (q.suspended || q.items == 0) {
            if done {
                return codec;
            }
            q = shared.work.wait(q).unwrap();
        }
        if let Some(cmd) = q.cmds.pop_front() {
            match cmd {
                WriteCmd::Sync(reply) => {
                    let _ = reply.send(());
                }
                WriteCmd::DropAll => {
                    if !q.error {
                        codec.drop_pending();
                    }
                    queue_drop(&mut q);
                    shared.slots.notify_all();
                }
                WriteCmd::DropBlockQueue => {
                    queue_drop(&mut q);
                    shared.slots.notify_all();
                }
                WriteCmd::Pause => {
                    if !q.error {
                        codec.pause(true);
                    }
                    q.suspended = true;
                }
                WriteCmd::Unpause => {
                    if !q.error {
                        codec.pause(false);
                    }
                    q.suspended = false;
                }
                WriteCmd::Drain(reply) => {
                    if q.suspended {
                        queue_drop(&mut q);
                        shared.slots.notify_all();
                    }
                    if q.stopped {
                        let _ = reply.send(());
                    } else {
                        drain_reply = Some(reply);
                    }
                }
                WriteCmd::Term => {
                    done = true;
                }
            }
            shared.cmd_space.notify_one();
        } else {
            let front = q.front;
            let len = q.blocks.len();
            let mut data = std::mem::take(&mut q.blocks[front].data);
            let frames = q.blocks[front].frames;
            q.front = (front + 1) % len;
            q.fill_frames -= frames as u64;
            q.items -= 1;
            let stopped = q.items == 0;
            q.stopped = stopped;
            let error = q.error;
            drop(q);

            if !error && frames > 0 && codec.write(&data, frames) != frames {
                let mut q = shared.queue.lock().unwrap();
                q.error = true;
                queue_drop(&mut q);
                drop(q);
                error_cb(WriteBufError::ShortWrite);
            }

            let mut q = shared.queue.lock().unwrap();
            q.blocks[front].data = data;
            shared.slots.notify_all();
            drop(q);
            if stopped {
                if let Some(reply) = drain_reply.take() {
                    let _ = reply.send(());
                }
            }
        }
    }
}
