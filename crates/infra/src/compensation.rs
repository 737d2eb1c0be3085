//! Undo log for multi-step ledger work.
//!
//! A flow that touches several stock keys records every completed step. If a
//! later step fails, [`CompensationLog::rollback`] applies the inverse of each
//! step in reverse order before the error is returned. A step that loses a race
//! is retried with its own budget; a step that still cannot be undone does not
//! stop the others, but the rollback then fails with `InvariantViolation` and
//! callers must return that instead of their original error.

use std::time::Duration;

use stockflow_inventory::StockKey;
use tracing::{error, warn};

use crate::command_dispatcher::{DispatchError, RetryPolicy};
use crate::ledger::InventoryLedger;

/// Rounds per undo step on top of the ledger's own retry policy.
const UNDO_ROUNDS: u32 = 16;

const UNDO_BACKOFF: RetryPolicy = RetryPolicy {
    max_attempts: UNDO_ROUNDS,
    base_backoff: Duration::from_millis(1),
};

/// A completed ledger movement and the quantity it moved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LedgerStep {
    Reserved { key: StockKey, quantity: u64 },
    Released { key: StockKey, quantity: u64 },
    Received { key: StockKey, quantity: u64 },
    Consumed { key: StockKey, quantity: u64 },
}

impl LedgerStep {
    fn undo(&self, ledger: &InventoryLedger) -> Result<(), DispatchError> {
        match *self {
            LedgerStep::Reserved { key, quantity } => ledger.release(key, quantity).map(|_| ()),
            LedgerStep::Released { key, quantity } => ledger.reserve(key, quantity).map(|_| ()),
            LedgerStep::Received { key, quantity } => {
                ledger.reverse_receipt(key, quantity).map(|_| ())
            }
            LedgerStep::Consumed { key, quantity } => ledger.restore(key, quantity).map(|_| ()),
        }
    }

    /// Undo, retrying while the failure is transient.
    fn undo_until_settled(&self, ledger: &InventoryLedger) -> Result<(), DispatchError> {
        let mut round = 0;
        loop {
            match self.undo(ledger) {
                Err(err) if err.is_retryable() && round + 1 < UNDO_ROUNDS => {
                    warn!(step = ?self, round, error = %err, "compensation step contended, retrying");
                    std::thread::sleep(UNDO_BACKOFF.backoff(round));
                    round += 1;
                }
                other => return other,
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct CompensationLog {
    steps: Vec<LedgerStep>,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: LedgerStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[LedgerStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps recorded after `mark` (a previous `steps().len()`), most recent last.
    pub fn split_off(&mut self, mark: usize) -> CompensationLog {
        CompensationLog {
            steps: self.steps.split_off(mark.min(self.steps.len())),
        }
    }

    /// Undo every step, newest first.
    ///
    /// Every step is attempted even after one fails. Any step left unapplied
    /// means the counters no longer match the orders, reported as
    /// `InvariantViolation` naming the stranded steps.
    pub fn rollback(self, ledger: &InventoryLedger) -> Result<(), DispatchError> {
        if self.steps.is_empty() {
            return Ok(());
        }
        warn!(steps = self.steps.len(), "compensating ledger steps");

        let mut stranded = Vec::new();
        for step in self.steps.iter().rev() {
            if let Err(err) = step.undo_until_settled(ledger) {
                error!(step = ?step, error = %err, "compensation step failed");
                stranded.push(format!("{step:?}: {err}"));
            }
        }

        if stranded.is_empty() {
            return Ok(());
        }
        Err(DispatchError::InvariantViolation(format!(
            "compensation left {} ledger step(s) unapplied: {}",
            stranded.len(),
            stranded.join("; ")
        )))
    }

    /// Keep the steps: the flow succeeded.
    pub fn commit(self) -> Vec<LedgerStep> {
        self.steps
    }
}
