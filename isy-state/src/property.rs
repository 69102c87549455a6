//! Observable values
//!
//! A [`Property`] holds one value and notifies subscribers whenever it is
//! updated. Updates can be *silent*: silent updates still notify subscribers
//! but skip the property's reporter, the hook that turns a local write into a
//! command for the controller. Values arriving from the event stream are
//! written silently; writes made by the application are not.
//!
//! ```rust,ignore
//! let level = Property::new(0);
//! let subscription = level.subscribe(|value| println!("level is now {}", value));
//!
//! level.update(255, false, true);
//! subscription.unsubscribe();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: Mutex<T>,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    reporter: Mutex<Option<Listener<T>>>,
    next_id: AtomicU64,
}

/// Shared handle to an observable value. Clones refer to the same value.
pub struct Property<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Property<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(value),
                listeners: Mutex::new(Vec::new()),
                reporter: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.inner.value.lock().clone()
    }

    /// Store `value` and notify.
    ///
    /// Unchanged values are ignored unless `force` is set. The reporter runs
    /// only when `silent` is false, before subscribers are notified. Returns
    /// whether the value was stored.
    pub fn update(&self, value: T, force: bool, silent: bool) -> bool {
        {
            let mut current = self.inner.value.lock();
            if !force && *current == value {
                return false;
            }
            *current = value.clone();
        }

        if !silent {
            let reporter = self.inner.reporter.lock().clone();
            if let Some(reporter) = reporter {
                reporter(&value);
            }
        }

        // The reporter may have rewritten the value
        let value = self.get();
        let listeners: Vec<Listener<T>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&value);
        }
        true
    }

    /// Call `callback` with the new value after every stored update.
    ///
    /// The callback stays registered until the returned handle is
    /// unsubscribed or dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(callback)));

        let weak = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
                }
            })),
        }
    }

    /// Install the hook run on non-silent updates, replacing any previous one.
    pub fn set_reporter<F>(&self, reporter: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        *self.inner.reporter.lock() = Some(Arc::new(reporter));
    }

    pub fn clear_reporter(&self) {
        self.inner.reporter.lock().take();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Handle that does not keep the value alive.
    pub fn downgrade(&self) -> WeakProperty<T> {
        WeakProperty {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Property<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("value", &*self.inner.value.lock())
            .field("subscribers", &self.inner.listeners.lock().len())
            .finish()
    }
}

/// Non-owning handle to a [`Property`], for use inside its own callbacks.
pub struct WeakProperty<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for WeakProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakProperty<T> {
    pub fn upgrade(&self) -> Option<Property<T>> {
        self.inner.upgrade().map(|inner| Property { inner })
    }
}

/// Registration of a property subscriber. Unsubscribes on drop.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
