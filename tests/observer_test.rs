//! Subject/observer fan-out, link symmetry and teardown.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::thread;

use anyhow::bail;
use parking_lot::Mutex;
use sonia_common::pattern::{Listener, Observer, Subject, SubjectId};
use sonia_common::SoniaError;

/// Appends `(tag, value)` to a shared journal on every notification.
struct Journal {
    tag: &'static str,
    entries: Arc<Mutex<Vec<(&'static str, i32)>>>,
    disconnects: Arc<Mutex<Vec<SubjectId>>>,
}

impl Listener<i32> for Journal {
    fn on_notify(&self, _subject: SubjectId, value: &i32) -> anyhow::Result<()> {
        self.entries.lock().push((self.tag, *value));
        Ok(())
    }

    fn on_disconnected(&self, subject: SubjectId) {
        self.disconnects.lock().push(subject);
    }
}

#[derive(Default)]
struct Log {
    entries: Arc<Mutex<Vec<(&'static str, i32)>>>,
    disconnects: Arc<Mutex<Vec<SubjectId>>>,
}

impl Log {
    fn observer(&self, tag: &'static str) -> Observer<i32> {
        Observer::new(Journal {
            tag,
            entries: Arc::clone(&self.entries),
            disconnects: Arc::clone(&self.disconnects),
        })
    }

    fn entries(&self) -> Vec<(&'static str, i32)> {
        self.entries.lock().clone()
    }
}

#[test]
fn notify_reaches_observers_in_attachment_order() {
    let log = Log::default();
    let subject = Subject::new();
    let a = log.observer("a");
    let b = log.observer("b");
    let c = log.observer("c");

    subject.attach(&b).unwrap();
    subject.attach(&a).unwrap();
    c.observe(&subject).unwrap();

    subject.notify(&7).unwrap();
    subject.notify(&8).unwrap();

    assert_eq!(
        log.entries(),
        vec![("b", 7), ("a", 7), ("c", 7), ("b", 8), ("a", 8), ("c", 8)]
    );
}

#[test]
fn links_are_symmetric() {
    let log = Log::default();
    let depth = Subject::new();
    let heading = Subject::new();
    let observer = log.observer("nav");

    observer.observe(&depth).unwrap();
    observer.observe(&heading).unwrap();
    assert!(depth.is_attached(&observer));
    assert!(observer.is_attached(&heading));
    assert_eq!(observer.subject_count(), 2);

    depth.detach(&observer).unwrap();
    assert!(!depth.is_attached(&observer));
    assert!(!observer.is_attached(&depth));
    assert_eq!(observer.subject_count(), 1);
    assert_eq!(*log.disconnects.lock(), vec![depth.id()]);
}

#[test]
fn duplicate_and_missing_links_are_rejected() {
    let log = Log::default();
    let subject = Subject::new();
    let observer = log.observer("x");

    subject.attach(&observer).unwrap();
    assert!(matches!(
        subject.attach(&observer),
        Err(SoniaError::AlreadyAttached)
    ));

    subject.detach(&observer).unwrap();
    assert!(matches!(
        subject.detach(&observer),
        Err(SoniaError::NotAttached)
    ));
}

#[test]
fn dropping_an_observer_unlinks_it_silently() {
    let log = Log::default();
    let subject = Subject::new();
    {
        let observer = log.observer("short-lived");
        observer.observe(&subject).unwrap();
        assert_eq!(subject.observer_count(), 1);
    }
    assert_eq!(subject.observer_count(), 0);
    assert!(log.disconnects.lock().is_empty());

    subject.notify(&1).unwrap();
    assert!(log.entries().is_empty());
}

#[test]
fn dropping_a_subject_disconnects_its_observers() {
    let log = Log::default();
    let observer = log.observer("sonar");
    let subject_id = {
        let subject = Subject::new();
        observer.observe(&subject).unwrap();
        subject.id()
    };

    assert_eq!(observer.subject_count(), 0);
    assert_eq!(*log.disconnects.lock(), vec![subject_id]);
}

#[test]
fn detach_from_all_subjects_fires_each_callback() {
    let log = Log::default();
    let first = Subject::new();
    let second = Subject::new();
    let observer = log.observer("imu");
    observer.observe(&first).unwrap();
    observer.observe(&second).unwrap();

    observer.detach_from_all_subjects();

    assert_eq!(first.observer_count(), 0);
    assert_eq!(second.observer_count(), 0);
    let mut disconnects = log.disconnects.lock().clone();
    disconnects.sort();
    let mut expected = vec![first.id(), second.id()];
    expected.sort();
    assert_eq!(disconnects, expected);
}

#[test]
fn cloned_subject_has_the_same_observers() {
    let log = Log::default();
    let original = Subject::new();
    let observer = log.observer("o");
    observer.observe(&original).unwrap();

    let copy = original.clone();
    assert_ne!(copy.id(), original.id());
    assert!(copy.is_attached(&observer));
    assert_eq!(observer.subject_count(), 2);

    copy.notify(&3).unwrap();
    assert_eq!(log.entries(), vec![("o", 3)]);
}

#[test]
fn cloned_observer_shares_the_listener() {
    let log = Log::default();
    let subject = Subject::new();
    let observer = log.observer("o");
    observer.observe(&subject).unwrap();

    let copy = observer.clone();
    assert_ne!(copy.id(), observer.id());
    assert!(subject.is_attached(&copy));

    subject.notify(&5).unwrap();
    assert_eq!(log.entries(), vec![("o", 5), ("o", 5)]);
}

#[test]
fn failing_observer_stops_delivery() {
    let log = Log::default();
    let subject = Subject::new();
    let first = log.observer("first");
    let failing = Observer::from_fn(|value: &i32| {
        if *value < 0 {
            bail!("negative depth {value}");
        }
        Ok(())
    });
    let last = log.observer("last");
    subject.attach(&first).unwrap();
    subject.attach(&failing).unwrap();
    subject.attach(&last).unwrap();

    let err = subject.notify(&-1).unwrap_err();
    assert!(matches!(err, SoniaError::Other(_)));
    assert!(err.to_string().contains("negative depth -1"));
    assert_eq!(log.entries(), vec![("first", -1)]);

    subject.notify(&2).unwrap();
    assert_eq!(log.entries(), vec![("first", -1), ("first", 2), ("last", 2)]);
}

#[test]
fn concurrent_notify_and_attach() {
    let log = Log::default();
    let subject = Arc::new(Subject::new());
    let base = log.observer("base");
    base.observe(&subject).unwrap();

    let notifier = {
        let subject = Arc::clone(&subject);
        thread::spawn(move || {
            for value in 0..200 {
                subject.notify(&value).unwrap();
            }
        })
    };

    let mut extra = Vec::new();
    for _ in 0..20 {
        let observer = log.observer("extra");
        observer.observe(&subject).unwrap();
        extra.push(observer);
    }
    extra.truncate(10);

    notifier.join().unwrap();
    assert_eq!(subject.observer_count(), 11);

    let base_values: Vec<i32> = log
        .entries()
        .into_iter()
        .filter(|(tag, _)| *tag == "base")
        .map(|(_, value)| value)
        .collect();
    assert_eq!(base_values, (0..200).collect::<Vec<_>>());
}
