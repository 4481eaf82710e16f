//! GPU command serializer.
//!
//! Only the render thread may touch the render context. Other threads that
//! need to change GPU state package the change as a closure and enqueue it
//! here; the render thread runs queued commands at the start of every tick
//! and once more at shutdown.

use super::RenderContext;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::thread::{self, ThreadId};

pub type GpuCommand = Box<dyn FnOnce(&mut dyn RenderContext) + Send + 'static>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command queue is closed")]
    Closed,
    #[error("Synchronous command issued from the render thread")]
    FromRenderThread,
    #[error("Command dropped before it ran")]
    Dropped,
}

struct Gate {
    closed: bool,
    owner: Option<ThreadId>,
}

pub struct CommandQueue {
    tx: Sender<GpuCommand>,
    rx: Receiver<GpuCommand>,
    gate: Mutex<Gate>,
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            gate: Mutex::new(Gate {
                closed: false,
                owner: None,
            }),
        }
    }

    /// Queue `command` without waiting for it to run.
    pub fn enqueue<F>(&self, command: F) -> Result<(), CommandError>
    where
        F: FnOnce(&mut dyn RenderContext) + Send + 'static,
    {
        let gate = self.gate.lock();
        if gate.closed {
            return Err(CommandError::Closed);
        }
        self.tx
            .send(Box::new(command))
            .map_err(|_| CommandError::Closed)
    }

    /// Queue `command` and return the channel its result arrives on.
    ///
    /// Refused on the draining thread, which would otherwise wait on a reply
    /// only it can produce.
    pub fn submit<F, R>(&self, command: F) -> Result<Receiver<R>, CommandError>
    where
        F: FnOnce(&mut dyn RenderContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        {
            let gate = self.gate.lock();
            if gate.closed {
                return Err(CommandError::Closed);
            }
            if gate.owner == Some(thread::current().id()) {
                return Err(CommandError::FromRenderThread);
            }
            self.tx
                .send(Box::new(move |ctx: &mut dyn RenderContext| {
                    let _ = reply_tx.send(command(ctx));
                }))
                .map_err(|_| CommandError::Closed)?;
        }
        Ok(reply_rx)
    }

    /// Run every queued command. Returns how many ran.
    pub fn drain(&self, ctx: &mut dyn RenderContext) -> usize {
        let mut ran = 0;
        while let Ok(command) = self.rx.try_recv() {
            command(ctx);
            ran += 1;
        }
        ran
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Record the calling thread as the one that drains this queue.
    pub fn claim(&self) {
        self.gate.lock().owner = Some(thread::current().id());
    }

    /// Refuse further commands. Commands queued before closing stay queued
    /// for a final [`drain`](Self::drain).
    pub fn close(&self) {
        self.gate.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.gate.lock().closed
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
