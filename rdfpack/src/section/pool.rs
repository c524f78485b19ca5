//! Best-effort compression tasks on the rayon pool.
//!
//! A task is handed to rayon when created, but rayon may not get to it before
//! the writer needs the result. The writer then claims the task and runs it on
//! its own thread; if rayon already started it, the writer blocks on a
//! condition variable until it finishes.

use std::io;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::header::{BLOCK_RAW, BLOCK_ZSTD};

enum State {
    Pending(Vec<u8>),
    Running,
    Done(io::Result<Vec<u8>>),
    Taken,
}

pub(crate) struct CompressTask {
    state: Mutex<State>,
    done: Condvar,
    level: Option<i32>,
}

impl CompressTask {
    /// Queue `raw` for block encoding. `level` of `None` stores it uncompressed.
    pub(crate) fn spawn(raw: Vec<u8>, level: Option<i32>) -> Arc<Self> {
        let task = Arc::new(CompressTask {
            state: Mutex::new(State::Pending(raw)),
            done: Condvar::new(),
            level,
        });
        let worker = Arc::clone(&task);
        rayon::spawn(move || worker.run_if_pending());
        task
    }

    fn run_if_pending(&self) {
        let raw = {
            let mut st = self.state.lock();
            match std::mem::replace(&mut *st, State::Running) {
                State::Pending(raw) => raw,
                other => {
                    *st = other;
                    return;
                }
            }
        };
        let out = encode_block(raw, self.level);
        *self.state.lock() = State::Done(out);
        self.done.notify_all();
    }

    /// Wait for the encoded block, running the task here if nobody has started it.
    pub(crate) fn wait(&self) -> io::Result<Vec<u8>> {
        let mut st = self.state.lock();
        loop {
            match std::mem::replace(&mut *st, State::Taken) {
                State::Pending(raw) => {
                    drop(st);
                    return encode_block(raw, self.level);
                }
                State::Running => {
                    *st = State::Running;
                    self.done.wait(&mut st);
                }
                State::Done(out) => return out,
                State::Taken => {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "compression task consumed twice",
                    ))
                }
            }
        }
    }
}

/// Turn a raw payload into a block body: encoding byte, payload length, payload.
pub(crate) fn encode_block(raw: Vec<u8>, level: Option<i32>) -> io::Result<Vec<u8>> {
    let (enc, payload) = match level {
        Some(level) => {
            let compressed = zstd::encode_all(&raw[..], level)?;
            if compressed.len() < raw.len() {
                (BLOCK_ZSTD, compressed)
            } else {
                (BLOCK_RAW, raw)
            }
        }
        None => (BLOCK_RAW, raw),
    };
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "section too large"))?;
    let mut block = Vec::with_capacity(payload.len() + 5);
    block.push(enc);
    block.extend_from_slice(&len.to_le_bytes());
    block.extend_from_slice(&payload);
    Ok(block)
}
