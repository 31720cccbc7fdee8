pub mod builder;
pub mod horizon;

pub use builder::{PaymentBuilder, PaymentOperation, UnsignedTransaction};
pub use horizon::{AccountRecord, HorizonGateway, HorizonServer, SubmitResult};

use tokio::sync::{Mutex, MutexGuard};

/// Exclusive access to the one in-flight payment cycle.
///
/// The staging table carries operations for a single transaction at a time,
/// so the clear-then-populate sequence in the builder and the replay in the
/// reconciler must never interleave. Both acquire this lock; builds and
/// reconciles therefore serialize within the process. Multi-process
/// deployments must serialize externally.
pub struct PaymentCycle {
    lock: Mutex<()>,
}

impl PaymentCycle {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Default for PaymentCycle {
    fn default() -> Self {
        Self::new()
    }
}
