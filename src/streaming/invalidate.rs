use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Observer = Box<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Inner {
    dirty: AtomicBool,
    observers: Mutex<Vec<Observer>>,
}

/// Shared flag telling payload consumers that cached render data is stale.
///
/// Setting the flag and observing it are both transitions; each one calls
/// every registered observer once with the new value. Observers run on the
/// thread causing the transition and must not subscribe from the callback.
#[derive(Clone, Default)]
pub struct InvalidateCacheToken {
    inner: Arc<Inner>,
}

impl InvalidateCacheToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: impl Fn(bool) + Send + Sync + 'static) {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(observer));
    }

    /// Raises the flag. Does nothing if it is already raised.
    pub fn invalidate(&self) {
        if !self.inner.dirty.swap(true, Ordering::AcqRel) {
            self.notify(true);
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// Returns whether the flag was raised and lowers it.
    pub fn take(&self) -> bool {
        let was_set = self.inner.dirty.swap(false, Ordering::AcqRel);
        if was_set {
            self.notify(false);
        }
        was_set
    }

    fn notify(&self, value: bool) {
        let observers = self.inner.observers.lock().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            observer(value);
        }
    }
}

impl fmt::Debug for InvalidateCacheToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidateCacheToken")
            .field("dirty", &self.is_set())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn each_transition_notifies_once() {
        let token = InvalidateCacheToken::new();
        let raised = Arc::new(AtomicUsize::new(0));
        let lowered = Arc::new(AtomicUsize::new(0));
        {
            let raised = raised.clone();
            let lowered = lowered.clone();
            token.subscribe(move |value| {
                let counter = if value { &raised } else { &lowered };
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        token.invalidate();
        token.invalidate();
        assert!(token.is_set());
        assert_eq!(raised.load(Ordering::SeqCst), 1);

        assert!(token.take());
        assert!(!token.is_set());
        assert!(!token.take());
        assert_eq!(lowered.load(Ordering::SeqCst), 1);

        token.clone().invalidate();
        assert_eq!(raised.load(Ordering::SeqCst), 2);
    }
}
