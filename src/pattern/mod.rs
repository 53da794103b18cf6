//! Subject/observer notification and worker threads.
//!
//! A [`Subject`] publishes values of one type `T` to every attached [`Observer`].
//! Links are symmetric and many-to-many: an observer is in a subject's list if and
//! only if the subject is in the observer's list. Both sides hold non-owning
//! back-references, so dropping either end tears the link down without keeping the
//! other alive.
//!
//! # Example
//!
//! ```
//! use sonia_common::pattern::{Observer, Subject};
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! let depth = Subject::<f32>::new();
//! let seen = Arc::new(AtomicU32::new(0));
//! let counter = Arc::clone(&seen);
//! let logger = Observer::from_fn(move |_depth: &f32| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     Ok(())
//! });
//!
//! logger.observe(&depth).unwrap();
//! depth.notify(&3.5).unwrap();
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod observer;
pub mod runnable;
pub mod subject;

pub use observer::{Listener, Observer};
pub use runnable::{Runnable, StopToken};
pub use subject::Subject;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Process-unique identity of a [`Subject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectId(u64);

impl SubjectId {
    pub(crate) fn next() -> Self {
        Self(next_id())
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject#{}", self.0)
    }
}

/// Process-unique identity of an [`Observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    pub(crate) fn next() -> Self {
        Self(next_id())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}
