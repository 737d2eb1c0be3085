//! Periodic release of lapsed reservation holds.
//!
//! The sweeper is just another writer: it lists candidates from the sales-order
//! projection and runs each through [`FulfillmentEngine::expire_hold`], which
//! re-checks the order under its lock.

use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::command_dispatcher::DispatchError;
use crate::fulfillment::FulfillmentEngine;

use super::WorkerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub candidates: usize,
    pub expired: usize,
    /// Candidates whose hold was refreshed or pinned before the sweeper got the lock.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct HoldSweeper {
    pub interval: Duration,
}

impl Default for HoldSweeper {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl HoldSweeper {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// One pass over the orders whose hold lapsed before `now`.
    pub fn sweep_once(engine: &FulfillmentEngine, now: DateTime<Utc>) -> SweepReport {
        let candidates = engine.projection().expired_holds(now);
        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };

        for order_id in candidates {
            match engine.expire_hold(order_id) {
                Ok(Some(_)) => report.expired += 1,
                Ok(None) => report.skipped += 1,
                Err(DispatchError::LockTimeout(msg)) => {
                    // Busy order; the next pass picks it up again.
                    debug!(order_id = %order_id, reason = %msg, "order locked, deferring hold expiry");
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!(order_id = %order_id, error = %err, "hold expiry failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Run [`sweep_once`](Self::sweep_once) every `interval` until shutdown.
    pub fn spawn(&self, name: &'static str, engine: Arc<FulfillmentEngine>) -> io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let interval = self.interval.max(Duration::from_millis(10));

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || sweeper_loop(name, interval, &engine, shutdown_rx))?;

        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}

fn sweeper_loop(
    name: &'static str,
    interval: Duration,
    engine: &FulfillmentEngine,
    shutdown_rx: mpsc::Receiver<()>,
) {
    info!(worker = name, interval_ms = interval.as_millis() as u64, "hold sweeper started");
    let mut next_tick = Instant::now() + interval;

    loop {
        match shutdown_rx.recv_timeout(next_tick.saturating_duration_since(Instant::now())) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        // Keep a stable cadence even if a pass ran long.
        let now = Instant::now();
        while next_tick <= now {
            next_tick += interval;
        }

        let report = HoldSweeper::sweep_once(engine, Utc::now());
        if report.candidates > 0 {
            info!(
                worker = name,
                candidates = report.candidates,
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "hold sweep finished"
            );
        }
    }

    info!(worker = name, "hold sweeper stopped");
}
