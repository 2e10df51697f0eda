//! Per-backend command stream.
//!
//! Every simulated backend owns one worker thread that executes commands in
//! submission order. The host only blocks in [`Stream::flush`]; stream-side
//! waits block the worker, never the submitting thread.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use hal_core::{tensor_copy, tensor_get, tensor_set, BackendError, Graph, ReadCompleter, Result, Tensor};
use rayon::ThreadPool;

use crate::event::EventState;

pub enum Command {
    Write {
        tensor: Tensor,
        data: Vec<u8>,
        offset: usize,
    },
    Read {
        tensor: Tensor,
        offset: usize,
        len: usize,
        done: ReadCompleter,
    },
    Copy {
        src: Tensor,
        dst: Tensor,
    },
    Compute {
        graph: Graph,
    },
    Signal {
        event: Arc<EventState>,
        generation: u64,
    },
    Wait {
        event: Arc<EventState>,
        generation: u64,
    },
    Flush {
        done: Sender<Result<()>>,
    },
}

impl Command {
    fn kind(&self) -> &'static str {
        match self {
            Command::Write { .. } => "write",
            Command::Read { .. } => "read",
            Command::Copy { .. } => "copy",
            Command::Compute { .. } => "compute",
            Command::Signal { .. } => "signal",
            Command::Wait { .. } => "wait",
            Command::Flush { .. } => "flush",
        }
    }
}

struct Worker {
    name: String,
    latency: Duration,
    pool: ThreadPool,
    // first failure since the last flush
    error: Option<BackendError>,
}

impl Worker {
    fn run(mut self, rx: Receiver<Command>) {
        for cmd in rx {
            self.execute(cmd);
        }
        tracing::debug!("{}: stream stopped", self.name);
    }

    fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::Signal { event, generation } => event.reach(generation),
            Command::Wait { event, generation } => event.wait_for(generation),
            Command::Flush { done } => {
                let _ = done.send(self.error.take().map_or(Ok(()), Err));
            }
            Command::Read {
                tensor,
                offset,
                len,
                done,
            } => {
                if let Some(e) = &self.error {
                    done.complete(Err(BackendError::Other(format!(
                        "{}: stream failed earlier: {e}",
                        self.name
                    ))));
                    return;
                }
                self.delay();
                let mut out = vec![0u8; len];
                done.complete(tensor_get(&tensor, &mut out, offset).map(|_| out));
            }
            work => {
                if self.error.is_some() {
                    tracing::debug!("{}: skipping {} after failure", self.name, work.kind());
                    return;
                }
                self.delay();
                let kind = work.kind();
                if let Err(e) = self.run_work(work) {
                    tracing::warn!("{}: {kind} failed: {e}", self.name);
                    self.error = Some(e);
                }
            }
        }
    }

    fn run_work(&self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Write {
                tensor,
                data,
                offset,
            } => tensor_set(&tensor, &data, offset),
            Command::Copy { src, dst } => tensor_copy(&src, &dst),
            Command::Compute { graph } => hal_cpu::compute::compute_graph(&self.pool, &graph),
            _ => Ok(()),
        }
    }

    fn delay(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }
}

fn stream_gone(name: &str) -> BackendError {
    BackendError::Other(format!("{name}: stream worker is gone"))
}

/// Handle to a running stream. Dropping it drains the queue and joins the
/// worker.
pub struct Stream {
    name: String,
    tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub fn spawn(name: &str, latency: Duration, n_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name({
                let name = name.to_string();
                move |i| format!("hal-sim-{name}-{i}")
            })
            .build()
            .map_err(|e| BackendError::InitializationFailure(format!("{name} thread pool: {e}")))?;
        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            name: name.to_string(),
            latency,
            pool,
            error: None,
        };
        let handle = std::thread::Builder::new()
            .name(format!("hal-sim-{name}-stream"))
            .spawn(move || worker.run(rx))
            .map_err(|e| BackendError::InitializationFailure(format!("{name} stream: {e}")))?;
        Ok(Stream {
            name: name.to_string(),
            tx: Some(tx),
            worker: Some(handle),
        })
    }

    pub fn submit(&self, cmd: Command) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or_else(|| stream_gone(&self.name))?
            .send(cmd)
            .map_err(|_| stream_gone(&self.name))
    }

    /// Queue `event`'s next generation and return it.
    pub fn signal(&self, event: &Arc<EventState>) -> Result<u64> {
        let generation = event.arm();
        let queued = self.submit(Command::Signal {
            event: Arc::clone(event),
            generation,
        });
        if queued.is_err() {
            // nothing will ever signal it, so do not leave waiters hanging
            event.reach(generation);
        }
        queued.map(|_| generation)
    }

    pub fn wait(&self, event: &Arc<EventState>, generation: u64) -> Result<()> {
        self.submit(Command::Wait {
            event: Arc::clone(event),
            generation,
        })
    }

    /// Block until every command queued so far has run. Returns the first
    /// failure since the previous flush and clears it.
    pub fn flush(&self) -> Result<()> {
        let (done, result) = mpsc::channel();
        self.submit(Command::Flush { done })?;
        result.recv().map_err(|_| stream_gone(&self.name))?
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("{}: stream worker panicked", self.name);
            }
        }
    }
}
