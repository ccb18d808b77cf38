//! Event listener lists

use parking_lot::RwLock;
use std::sync::Arc;

/// Zero or more listeners for one kind of event.
///
/// Listeners run synchronously, in registration order, on the thread that
/// raised the event. They must not register new listeners on the same list.
pub struct Listeners<T: ?Sized> {
    listeners: RwLock<Vec<Arc<dyn Fn(&T) + Send + Sync>>>,
}

impl<T: ?Sized> Listeners<T> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add<F>(&self, listener: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn call(&self, value: &T) {
        for listener in self.listeners.read().iter() {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_listeners_called_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listeners: Listeners<bool> = Listeners::new();
        assert!(listeners.is_empty());

        let first = seen.clone();
        listeners.add(move |value: &bool| first.lock().push(("first", *value)));
        let second = seen.clone();
        listeners.add(move |value: &bool| second.lock().push(("second", *value)));

        listeners.call(&true);
        assert_eq!(*seen.lock(), vec![("first", true), ("second", true)]);
    }

    #[test]
    fn test_unsized_payload() {
        let total = Arc::new(Mutex::new(0usize));
        let listeners: Listeners<[u8]> = Listeners::new();
        let sink = total.clone();
        listeners.add(move |data: &[u8]| *sink.lock() += data.len());

        listeners.call(&[1, 2, 3]);
        listeners.call(&[4]);
        assert_eq!(*total.lock(), 4);
    }
}
