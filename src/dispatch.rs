use tracing::{debug, warn};

use crate::batch::ParameterBatch;
use crate::bus::Bus;
use crate::error::{BatchError, CommError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { entries: usize },
    Failed(CommError),
}

/// Sends a parameter batch to every participating actuator in one bus write.
///
/// Best effort: a failed write is reported, never retried here. Actuators keep
/// tracking their previous goal until a later dispatch gets through.
#[derive(Debug, Default)]
pub struct SyncDispatcher {
    sent: u64,
    failed: u64,
}

impl SyncDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmits `batch` and always leaves it empty afterwards.
    pub fn transmit<B: Bus>(
        &mut self,
        bus: &mut B,
        batch: &mut ParameterBatch,
    ) -> Result<DispatchOutcome, BatchError> {
        if batch.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        let entries = batch.len();
        let result = bus.write_batch(batch.field(), batch.entries());
        batch.clear();

        match result {
            Ok(()) => {
                self.sent += 1;
                debug!(
                    "Sync write of {} entries to address {}",
                    entries,
                    batch.field().address
                );
                Ok(DispatchOutcome::Sent { entries })
            }
            Err(e) => {
                self.failed += 1;
                warn!("Sync write failed: {}", e);
                Ok(DispatchOutcome::Failed(e))
            }
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}
