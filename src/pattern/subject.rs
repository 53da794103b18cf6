//! The publishing side of the observer pattern.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::observer::{Observer, ObserverCore};
use super::{ObserverId, SubjectId};
use crate::error::{Result, SoniaError};

// =============================================================================
// Shared core
// =============================================================================

/// State shared between a [`Subject`] handle and the back-references held by its
/// observers. Only the handle owns it.
pub(crate) struct SubjectCore<T> {
    pub(crate) id: SubjectId,
    /// Attached observers, in attachment order.
    observers: Mutex<Vec<(ObserverId, Weak<ObserverCore<T>>)>>,
}

impl<T> SubjectCore<T> {
    fn new() -> Self {
        Self {
            id: SubjectId::next(),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Link `observer` to this subject. The list lock is held for the whole
    /// operation and the subject side is mutated first.
    pub(crate) fn attach_core(self: &Arc<Self>, observer: &Arc<ObserverCore<T>>) -> Result<()> {
        let mut observers = self.observers.lock();
        if observers.iter().any(|(id, _)| *id == observer.id) {
            return Err(SoniaError::AlreadyAttached);
        }
        observers.push((observer.id, Arc::downgrade(observer)));
        observer.link(self.id, Arc::downgrade(self));
        drop(observers);

        trace!(subject = %self.id, observer = %observer.id, "attached");
        observer.listener.on_connected(self.id);
        Ok(())
    }

    /// Unlink the observer with `observer_id`, optionally firing its
    /// disconnection callback.
    pub(crate) fn detach_core(&self, observer_id: ObserverId, notify: bool) -> Result<()> {
        let mut observers = self.observers.lock();
        let position = observers
            .iter()
            .position(|(id, _)| *id == observer_id)
            .ok_or(SoniaError::NotAttached)?;
        let (_, weak) = observers.remove(position);
        let observer = weak.upgrade();
        if let Some(observer) = &observer {
            observer.unlink(self.id);
        }
        drop(observers);

        trace!(subject = %self.id, observer = %observer_id, "detached");
        if notify {
            if let Some(observer) = observer {
                observer.listener.on_disconnected(self.id);
            }
        }
        Ok(())
    }

    fn contains(&self, observer_id: ObserverId) -> bool {
        self.observers.lock().iter().any(|(id, _)| *id == observer_id)
    }

    fn live_observers(&self) -> Vec<Arc<ObserverCore<T>>> {
        self.observers
            .lock()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }
}

// =============================================================================
// Subject<T>
// =============================================================================

/// A source of notifications carrying values of type `T`.
///
/// Observers are called synchronously, in attachment order, on the thread that
/// calls [`Subject::notify`]. The observer list lock is held while the callbacks
/// run, so a callback must not attach to, detach from or notify the same subject.
///
/// Dropping a subject detaches every observer and fires their
/// [`Listener::on_disconnected`](super::Listener::on_disconnected) callback.
pub struct Subject<T> {
    core: Arc<SubjectCore<T>>,
}

impl<T> Subject<T> {
    /// Create a subject with no observers.
    pub fn new() -> Self {
        Self {
            core: Arc::new(SubjectCore::new()),
        }
    }

    /// Identity of this subject.
    pub fn id(&self) -> SubjectId {
        self.core.id
    }

    /// Number of attached observers.
    pub fn observer_count(&self) -> usize {
        self.core.observers.lock().len()
    }

    /// Whether `observer` is attached to this subject.
    pub fn is_attached(&self, observer: &Observer<T>) -> bool {
        self.core.contains(observer.id())
    }

    /// Attach `observer`.
    ///
    /// # Errors
    ///
    /// Returns [`SoniaError::AlreadyAttached`] if the pair is already linked.
    pub fn attach(&self, observer: &Observer<T>) -> Result<()> {
        self.core.attach_core(observer.core())
    }

    /// Detach `observer` and fire its disconnection callback.
    ///
    /// # Errors
    ///
    /// Returns [`SoniaError::NotAttached`] if the pair is not linked.
    pub fn detach(&self, observer: &Observer<T>) -> Result<()> {
        self.core.detach_core(observer.id(), true)
    }

    /// Detach every observer, firing each disconnection callback.
    pub fn detach_all(&self) {
        let drained: Vec<_> = self.core.observers.lock().drain(..).collect();
        for (observer_id, weak) in drained {
            trace!(subject = %self.core.id, observer = %observer_id, "detached");
            if let Some(observer) = weak.upgrade() {
                observer.unlink(self.core.id);
                observer.listener.on_disconnected(self.core.id);
            }
        }
    }

    /// Deliver `value` to every attached observer in attachment order.
    ///
    /// Delivery stops at the first observer that fails and its error is returned;
    /// observers after it do not see the value.
    pub fn notify(&self, value: &T) -> Result<()> {
        let observers = self.core.observers.lock();
        for (_, weak) in observers.iter() {
            if let Some(observer) = weak.upgrade() {
                observer
                    .listener
                    .on_notify(self.core.id, value)
                    .map_err(SoniaError::Other)?;
            }
        }
        Ok(())
    }

    pub(crate) fn core(&self) -> &Arc<SubjectCore<T>> {
        &self.core
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Subject<T> {
    /// A clone is a new subject, attached to every observer of the original.
    fn clone(&self) -> Self {
        let clone = Self::new();
        for observer in self.core.live_observers() {
            if let Err(err) = clone.core.attach_core(&observer) {
                warn!(subject = %clone.core.id, observer = %observer.id, error = %err, "could not copy link");
            }
        }
        clone
    }
}

impl<T> Drop for Subject<T> {
    fn drop(&mut self) {
        self.detach_all();
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("id", &self.core.id)
            .field("observers", &self.observer_count())
            .finish()
    }
}
