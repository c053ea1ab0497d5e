//! Observer registry with per-listener error isolation.

use std::panic::{catch_unwind, AssertUnwindSafe};

/// Opaque handle identifying a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverHandle(u64);

/// An ordered set of subscribers notified on each emitted value.
///
/// A panicking listener is caught and logged; it never prevents
/// delivery to the remaining listeners.
pub struct Observers<T> {
    handlers: Vec<(u64, Box<dyn FnMut(&T) + Send>)>,
    next_id: u64,
}

impl<T> Observers<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 1,
        }
    }

    /// Registers a listener, returning its handle.
    pub fn subscribe(&mut self, handler: impl FnMut(&T) + Send + 'static) -> ObserverHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        ObserverHandle(id)
    }

    /// Removes a listener. Returns true if it was registered.
    pub fn unsubscribe(&mut self, handle: ObserverHandle) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(id, _)| *id != handle.0);
        self.handlers.len() != before
    }

    /// Delivers a value to every listener in subscription order.
    pub fn emit(&mut self, value: &T) {
        for (id, handler) in &mut self.handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(value)));
            if outcome.is_err() {
                tracing::warn!(observer = *id, "observer panicked; continuing delivery");
            }
        }
    }

    /// Returns the number of registered listeners.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn emit_reaches_all_listeners_in_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut observers: Observers<u32> = Observers::new();

        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            observers.subscribe(move |v| seen.lock().push(format!("{tag}{v}")));
        }

        observers.emit(&1);
        assert_eq!(*seen.lock(), vec!["a1", "b1"]);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut observers: Observers<()> = Observers::new();

        let c = Arc::clone(&count);
        let handle = observers.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        observers.emit(&());
        assert!(observers.unsubscribe(handle));
        assert!(!observers.unsubscribe(handle));
        observers.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut observers: Observers<()> = Observers::new();

        observers.subscribe(|_| panic!("bad listener"));
        let c = Arc::clone(&count);
        observers.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        observers.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
