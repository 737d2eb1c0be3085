//! Background worker threads: projection feeding and reservation hold sweeping.

use std::sync::mpsc;
use std::thread;

pub mod hold_sweeper;
pub mod projection_worker;

pub use hold_sweeper::{HoldSweeper, SweepReport};
pub use projection_worker::ProjectionWorker;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(shutdown: mpsc::Sender<()>, join: thread::JoinHandle<()>) -> Self {
        Self {
            shutdown,
            join: Some(join),
        }
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}
