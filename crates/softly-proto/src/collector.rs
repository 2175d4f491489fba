//! The seam every soft assertion reports through.

use crate::failure::Failure;
use std::sync::Arc;

/// Accumulates assertion failures instead of panicking.
///
/// Implementations either store failures themselves or forward every
/// operation to a delegate obtained dynamically (another collector, or the
/// collector bound to the current thread).
pub trait ErrorCollector: Send + Sync {
    /// Records a failure. Never panics; append order equals call order.
    fn collect(&self, failure: Failure);

    /// Marks that at least one assertion passed. Idempotent.
    fn record_success(&self);

    /// Snapshot of every failure recorded so far, in order.
    fn failures(&self) -> Vec<Failure>;

    /// True once `record_success` has been called.
    fn had_any_success(&self) -> bool;

    /// The collector operations are currently forwarded to, if any.
    fn delegate(&self) -> Option<Arc<dyn ErrorCollector>>;

    /// Forwards all further operations to `delegate`.
    fn set_delegate(&self, delegate: Arc<dyn ErrorCollector>);

    /// True when no failure has been recorded.
    fn is_empty(&self) -> bool {
        self.failures().is_empty()
    }
}
