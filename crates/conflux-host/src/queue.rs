//! Worker-thread command queues.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

use conflux_core::error::{Result, StreamError};
use conflux_core::hal::{Command, HwQueue};
use conflux_core::types::EngineKind;

/// Software hardware queue: one worker thread draining an unbounded
/// in-order channel.
///
/// Dispatches run their task then complete their signal. Markers first
/// wait their dependency list, complete their signal, and only then run
/// the attached host callback, completing the callback-done signal last.
/// This reproduces the window a real queue has between hardware completion
/// and host-callback completion.
pub struct HostQueue {
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    engine_kind: EngineKind,
}

impl HostQueue {
    /// Spawns the worker thread.
    pub fn spawn(label: String, engine_kind: EngineKind) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name(label)
            .spawn(move || Self::run(receiver))
            .map_err(|e| StreamError::Engine(format!("failed to spawn queue worker: {e}")))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            engine_kind,
        })
    }

    fn run(receiver: Receiver<Command>) {
        for command in receiver {
            match command {
                Command::Dispatch { task, signal } => {
                    task();
                    signal.complete();
                }
                Command::Marker {
                    deps,
                    signal,
                    callback,
                } => {
                    for dep in &deps {
                        dep.wait(None);
                    }
                    signal.complete();
                    if let Some(cb) = callback {
                        (cb.func)(Ok(()));
                        cb.done.complete();
                    }
                }
            }
        }
        trace!("queue worker drained, exiting");
    }
}

impl HwQueue for HostQueue {
    fn submit(&self, command: Command) -> Result<()> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx
                .send(command)
                .map_err(|_| StreamError::Engine("queue worker exited".to_string())),
            None => Err(StreamError::Engine("queue is shut down".to_string())),
        }
    }

    fn engine(&self) -> EngineKind {
        self.engine_kind
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish outstanding commands.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}
