//! The receiving side of the observer pattern.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::subject::{Subject, SubjectCore};
use super::{ObserverId, SubjectId};
use crate::error::Result;

/// Callbacks invoked by the subjects an [`Observer`] is attached to.
pub trait Listener<T>: Send + Sync {
    /// Called synchronously by [`Subject::notify`]. An error aborts delivery to the
    /// remaining observers and is returned to the notifier.
    fn on_notify(&self, subject: SubjectId, value: &T) -> anyhow::Result<()>;

    /// Called after the observer has been attached to `subject`.
    fn on_connected(&self, _subject: SubjectId) {}

    /// Called after `subject` detached this observer or was dropped.
    fn on_disconnected(&self, _subject: SubjectId) {}
}

struct FnListener<F>(F);

impl<T, F> Listener<T> for FnListener<F>
where
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync,
{
    fn on_notify(&self, _subject: SubjectId, value: &T) -> anyhow::Result<()> {
        (self.0)(value)
    }
}

/// State shared between an [`Observer`] handle and the back-references held by
/// its subjects. Only the handle owns it.
pub(crate) struct ObserverCore<T> {
    pub(crate) id: ObserverId,
    pub(crate) listener: Arc<dyn Listener<T>>,
    subjects: Mutex<Vec<(SubjectId, Weak<SubjectCore<T>>)>>,
}

impl<T> ObserverCore<T> {
    pub(crate) fn link(&self, subject_id: SubjectId, subject: Weak<SubjectCore<T>>) {
        self.subjects.lock().push((subject_id, subject));
    }

    pub(crate) fn unlink(&self, subject_id: SubjectId) {
        self.subjects.lock().retain(|(id, _)| *id != subject_id);
    }

    fn live_subjects(&self) -> Vec<Arc<SubjectCore<T>>> {
        self.subjects
            .lock()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }
}

/// A receiver of notifications carrying values of type `T`.
///
/// Dropping an observer silently removes it from every subject; no
/// disconnection callback fires.
pub struct Observer<T> {
    core: Arc<ObserverCore<T>>,
}

impl<T> Observer<T> {
    /// Create an observer forwarding notifications to `listener`.
    pub fn new<L>(listener: L) -> Self
    where
        L: Listener<T> + 'static,
    {
        Self::from_listener(Arc::new(listener))
    }

    /// Create an observer around an already shared listener.
    pub fn from_listener(listener: Arc<dyn Listener<T>>) -> Self {
        Self {
            core: Arc::new(ObserverCore {
                id: ObserverId::next(),
                listener,
                subjects: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create an observer from a notification closure.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(FnListener(callback))
    }

    /// Identity of this observer.
    pub fn id(&self) -> ObserverId {
        self.core.id
    }

    /// Subscribe to `subject`. Equivalent to `subject.attach(self)`.
    pub fn observe(&self, subject: &Subject<T>) -> Result<()> {
        subject.attach(self)
    }

    /// Whether this observer is attached to `subject`.
    pub fn is_attached(&self, subject: &Subject<T>) -> bool {
        let subject_id = subject.id();
        self.core
            .subjects
            .lock()
            .iter()
            .any(|(id, _)| *id == subject_id)
    }

    /// Number of subjects this observer is attached to.
    pub fn subject_count(&self) -> usize {
        self.core.subjects.lock().len()
    }

    /// Detach from every subject, firing the disconnection callback for each.
    pub fn detach_from_all_subjects(&self) {
        self.detach_all(true);
    }

    fn detach_all(&self, notify: bool) {
        // Snapshot first: subject locks are always taken before observer locks.
        for subject in self.core.live_subjects() {
            if let Err(err) = subject.detach_core(self.core.id, notify) {
                trace!(observer = %self.core.id, subject = %subject.id, error = %err, "already detached");
            }
        }
    }

    pub(crate) fn core(&self) -> &Arc<ObserverCore<T>> {
        &self.core
    }
}

impl<T> Clone for Observer<T> {
    /// A clone is a new observer sharing the listener, subscribed to every subject
    /// of the original.
    fn clone(&self) -> Self {
        let clone = Self::from_listener(Arc::clone(&self.core.listener));
        for subject in self.core.live_subjects() {
            if let Err(err) = subject.attach_core(&clone.core) {
                warn!(observer = %clone.core.id, subject = %subject.id, error = %err, "could not copy link");
            }
        }
        clone
    }
}

impl<T> Drop for Observer<T> {
    fn drop(&mut self) {
        self.detach_all(false);
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.core.id)
            .field("subjects", &self.subject_count())
            .finish()
    }
}
