//! The default, storing error collector.
//!
//! A `DefaultErrorCollector` keeps failures itself until it is given a
//! delegate; from then on every operation is forwarded. Providers embed one,
//! which is what lets a provider be used on its own (`assert_all` at the end)
//! or bound to the collector of a test context by the binder.

use softly_proto::{ErrorCollector, Failure};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Hook invoked after every collected failure.
pub type FailureCallback = Arc<dyn Fn(&Failure) + Send + Sync>;

/// Thread-safe, append-only failure store with optional delegation.
#[derive(Default)]
pub struct DefaultErrorCollector {
    failures: Mutex<Vec<Failure>>,
    success: AtomicBool,
    delegate: RwLock<Option<Arc<dyn ErrorCollector>>>,
    callback: RwLock<Option<FailureCallback>>,
}

impl DefaultErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collector already forwarding to `delegate`.
    pub fn delegating_to(delegate: Arc<dyn ErrorCollector>) -> Self {
        let collector = Self::new();
        collector.set_delegate(delegate);
        collector
    }

    /// Registers a hook run after each collected failure, whether the failure
    /// was stored locally or forwarded to the delegate.
    pub fn on_failure_collected(&self, callback: impl Fn(&Failure) + Send + Sync + 'static) {
        *self
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Stops forwarding; later failures are stored locally again.
    pub fn clear_delegate(&self) {
        self.delegate
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Drains the locally stored failures.
    ///
    /// When a delegate is set the delegate is left untouched and a snapshot
    /// of its failures is returned instead.
    pub fn take_failures(&self) -> Vec<Failure> {
        match self.current_delegate() {
            Some(delegate) => delegate.failures(),
            None => std::mem::take(&mut *self.local()),
        }
    }

    fn local(&self) -> MutexGuard<'_, Vec<Failure>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_delegate(&self) -> Option<Arc<dyn ErrorCollector>> {
        self.delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_callback(&self) -> Option<FailureCallback> {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorCollector for DefaultErrorCollector {
    fn collect(&self, failure: Failure) {
        tracing::trace!(failure = %failure.message, "Collected soft assertion failure");
        let callback = self.current_callback();
        let notified = callback.as_ref().map(|_| failure.clone());
        match self.current_delegate() {
            Some(delegate) => delegate.collect(failure),
            None => self.local().push(failure),
        }
        if let (Some(callback), Some(failure)) = (callback, notified) {
            callback(&failure);
        }
    }

    fn record_success(&self) {
        match self.current_delegate() {
            Some(delegate) => delegate.record_success(),
            None => self.success.store(true, Ordering::Release),
        }
    }

    fn failures(&self) -> Vec<Failure> {
        match self.current_delegate() {
            Some(delegate) => delegate.failures(),
            None => self.local().clone(),
        }
    }

    fn had_any_success(&self) -> bool {
        match self.current_delegate() {
            Some(delegate) => delegate.had_any_success(),
            None => self.success.load(Ordering::Acquire),
        }
    }

    fn delegate(&self) -> Option<Arc<dyn ErrorCollector>> {
        self.current_delegate()
    }

    fn set_delegate(&self, delegate: Arc<dyn ErrorCollector>) {
        // Delegating to ourselves would recurse forever on the first collect.
        if std::ptr::addr_eq(Arc::as_ptr(&delegate), std::ptr::from_ref(self)) {
            tracing::warn!("Ignoring attempt to make a collector its own delegate");
            return;
        }
        *self
            .delegate
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(delegate);
    }
}

impl fmt::Debug for DefaultErrorCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultErrorCollector")
            .field("failures", &self.local().len())
            .field("success", &self.success.load(Ordering::Relaxed))
            .field("delegating", &self.current_delegate().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_failures_kept_in_call_order_with_duplicates() {
        let collector = DefaultErrorCollector::new();
        collector.collect(Failure::new("f1"));
        collector.collect(Failure::new("f2"));
        collector.collect(Failure::new("f1"));

        let messages: Vec<_> = collector.failures().into_iter().map(|f| f.message).collect();
        assert_eq!(messages, vec!["f1", "f2", "f1"]);
    }

    #[test]
    fn test_failures_is_a_read_view() {
        let collector = DefaultErrorCollector::new();
        collector.collect(Failure::new("f1"));

        assert_eq!(collector.failures().len(), 1);
        assert_eq!(collector.failures().len(), 1);
    }

    #[test]
    fn test_had_any_success_stays_true_after_failures() {
        let collector = DefaultErrorCollector::new();
        assert!(!collector.had_any_success());

        collector.record_success();
        collector.record_success();
        collector.collect(Failure::new("late failure"));

        assert!(collector.had_any_success());
    }

    #[test]
    fn test_take_failures_drains() {
        let collector = DefaultErrorCollector::new();
        collector.collect(Failure::new("f1"));

        assert_eq!(collector.take_failures().len(), 1);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_delegate_receives_everything() {
        let target = Arc::new(DefaultErrorCollector::new());
        let front = DefaultErrorCollector::delegating_to(target.clone());

        front.collect(Failure::new("forwarded"));
        front.record_success();

        assert_eq!(target.failures().len(), 1);
        assert!(target.had_any_success());
        assert_eq!(front.failures(), target.failures());
        assert!(front.had_any_success());
    }

    #[test]
    fn test_clear_delegate_stores_locally_again() {
        let target = Arc::new(DefaultErrorCollector::new());
        let front = DefaultErrorCollector::delegating_to(target.clone());
        front.clear_delegate();

        front.collect(Failure::new("local"));

        assert!(target.is_empty());
        assert_eq!(front.failures().len(), 1);
    }

    #[test]
    fn test_self_delegation_is_ignored() {
        let collector = Arc::new(DefaultErrorCollector::new());
        collector.set_delegate(collector.clone());

        collector.collect(Failure::new("still works"));
        assert!(collector.delegate().is_none());
        assert_eq!(collector.failures().len(), 1);
    }

    #[test]
    fn test_callback_runs_for_local_and_forwarded_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let collector = Arc::new(DefaultErrorCollector::new());
        let weak = Arc::downgrade(&collector);
        let visible = seen.clone();
        collector.on_failure_collected(move |_| {
            let count = weak.upgrade().map_or(0, |collector| collector.failures().len());
            visible.lock().unwrap().push(count);
        });

        collector.collect(Failure::new("local"));
        collector.set_delegate(Arc::new(DefaultErrorCollector::new()));
        collector.collect(Failure::new("forwarded"));
        collector.collect(Failure::new("forwarded again"));

        // Each call sees the failure that triggered it.
        assert_eq!(*seen.lock().unwrap(), vec![1, 1, 2]);
    }

    #[test]
    fn test_concurrent_collect_loses_nothing() {
        let collector = Arc::new(DefaultErrorCollector::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let collector = collector.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        collector.collect(Failure::new(format!("t{t}-{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let failures = collector.failures();
        assert_eq!(failures.len(), 800);

        // Per-thread order is preserved even though threads interleave.
        let thread_three: Vec<_> = failures
            .iter()
            .filter(|f| f.message.starts_with("t3-"))
            .map(|f| f.message.clone())
            .collect();
        let expected: Vec<_> = (0..100).map(|i| format!("t3-{i}")).collect();
        assert_eq!(thread_three, expected);
    }
}
