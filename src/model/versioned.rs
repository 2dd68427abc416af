use std::future;
use std::pin;
use std::sync;
use std::task;

use crate::util;

pub trait Change<Object>: Clone {
    type ApplyError;
    type ApplyRecord: Clone;

    fn apply(self, object: &mut Object) -> Result<(Self, Self::ApplyRecord), Self::ApplyError>;
}

pub type ApplyError<Object> = <<Object as Versioned>::Change as Change<Object>>::ApplyError;
pub type ApplyRecord<Object> = <<Object as Versioned>::Change as Change<Object>>::ApplyRecord;

#[derive(Clone)]
pub struct Version<Object: Versioned> {
    uid: u64,
    generation: u64,
    _marker: std::marker::PhantomData<fn() -> Object>,
}

impl<Object: Versioned> std::fmt::Debug for Version<Object> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("uid", &self.uid)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T: Versioned> Default for Version<T> {
    fn default() -> Self {
        Version {
            uid: next_uid(),
            generation: next_generation(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Versioned> Version<T> {
    fn is_outdated(&self, other: &Self) -> bool {
        self.uid != other.uid ||
            self.generation != other.generation
    }
}

pub trait Versioned: Sized + Clone {
    type Change: Change<Self>;

    fn version(&self) -> &Version<Self>;
    fn version_mut(&mut self) -> &mut Version<Self>;

    fn generation(&self) -> u64 {
        self.version().generation
    }

    fn assert_same_uid(&self, other: &Self) {
        assert_eq!(self.version().uid, other.version().uid);
    }

    fn is_outdated(&self, other: &Self) -> bool {
        self.version().is_outdated(other.version())
    }

    /// Applies a change in place, without a host. On failure the object may be partially modified.
    fn change_in_place(&mut self, change: Self::Change) -> Result<(Self::Change, ApplyRecord<Self>), ApplyError<Self>> {
        let (change, record) = change.apply(self)?;
        self.version_mut().generation = next_generation();
        Ok((change, record))
    }
}

static NEXT_UID:        sync::atomic::AtomicU64 = sync::atomic::AtomicU64::new(1);
static NEXT_GENERATION: sync::atomic::AtomicU64 = sync::atomic::AtomicU64::new(1);

fn next_uid() -> u64 {
    NEXT_UID.fetch_add(1, sync::atomic::Ordering::Relaxed)
}

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, sync::atomic::Ordering::Relaxed)
}

/// Receives every successful change, synchronously, in order, before `Host::change` returns. Whoever calls
/// `Host::change` must not hold a lock the subscriber takes.
pub trait Subscriber<Object: Versioned>: Send + Sync {
    fn notify(&self, object: &sync::Arc<Object>, record: &ApplyRecord<Object>);
}

pub struct Host<Object: Versioned> {
    notifier: util::Notifier,
    current: arc_swap::ArcSwap<Object>,
    subscribers: parking_lot::Mutex<Vec<sync::Weak<dyn Subscriber<Object>>>>,
}

impl<Object: Versioned + 'static> Host<Object> {
    pub fn new(initial: Object) -> Self {
        Host {
            notifier: util::Notifier::new(),
            current: arc_swap::ArcSwap::from(sync::Arc::new(initial)),
            subscribers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn enroll(&self, cx: &task::Context) {
        self.notifier.enroll(cx);
    }

    /// Subscribers are held weakly. Dropping the last strong reference unsubscribes.
    pub fn subscribe<S: Subscriber<Object> + 'static>(&self, subscriber: &sync::Arc<S>) {
        let subscriber: sync::Arc<dyn Subscriber<Object>> = subscriber.clone();
        self.subscribers.lock().push(sync::Arc::downgrade(&subscriber));
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.strong_count() > 0);
        subscribers.len()
    }

    pub fn wait_for_update<'a>(&'a self, current: &'_ Object) -> ObjectUpdateFuture<'a, Object> {
        ObjectUpdateFuture {
            host: self,
            generation: current.generation(),
        }
    }

    pub fn borrow(&self) -> arc_swap::Guard<sync::Arc<Object>> {
        self.current.load()
    }

    pub fn get(&self) -> sync::Arc<Object> {
        self.current.load_full()
    }

    /// Applies the change to a copy of the current version and swaps it in. On failure the current version is
    /// untouched and nobody is notified.
    pub fn change(&self, change: Object::Change) -> Result<(sync::Arc<Object>, Object::Change, ApplyRecord<Object>), ApplyError<Object>> {
        let old = self.current.load();
        let mut object = (**old).clone();
        let (change, record) = change.apply(&mut object)?;

        object.version_mut().generation = next_generation();

        let new = sync::Arc::new(object);
        let swapped = self.current.compare_and_swap(&*old, new.clone());

        if !sync::Arc::ptr_eq(&*old, &swapped) {
            /* very sad, another thread updated the object. need to try again. */
            return self.change(change);
        }

        self.notifier.notify();
        self.notify_subscribers(&new, &record);

        Ok((new, change, record))
    }

    fn notify_subscribers(&self, object: &sync::Arc<Object>, record: &ApplyRecord<Object>) {
        /* collect first so a subscriber can subscribe others without deadlocking */
        let live: Vec<sync::Arc<dyn Subscriber<Object>>> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|s| s.strong_count() > 0);
            subscribers.iter().filter_map(sync::Weak::upgrade).collect()
        };

        for subscriber in live {
            subscriber.notify(object, record);
        }
    }
}

pub struct ObjectUpdateFuture<'a, Object: Versioned> {
    host: &'a Host<Object>,
    generation: u64,
}

impl<'a, Object: Versioned + 'static> future::Future for ObjectUpdateFuture<'a, Object> {
    type Output = sync::Arc<Object>;

    fn poll(self: pin::Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        let guard = self.host.current.load();
        if guard.generation() != self.generation {
            /* fast path */
            task::Poll::Ready(arc_swap::Guard::into_inner(guard))
        } else {
            /* slow path. need to enroll for change notifications... */
            std::mem::drop(guard);
            self.host.enroll(cx);

            /* check whether the object was updated while we were enrolling */
            let guard = self.host.current.load();
            if guard.generation() != self.generation {
                task::Poll::Ready(arc_swap::Guard::into_inner(guard))
            } else {
                /* still no change... we'll pick it up when our task gets woken again. */
                task::Poll::Pending
            }
        }
    }
}

impl<Object: Versioned + 'static> std::fmt::Debug for Host<Object> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(std::any::type_name::<Host<Object>>())
            .field("generation", &self.borrow().generation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::document;
    use crate::model::document::change;
    use crate::schema;

    #[derive(Default)]
    struct Counter {
        events: parking_lot::Mutex<Vec<change::Event>>,
    }

    impl Subscriber<document::Document> for Counter {
        fn notify(&self, _document: &sync::Arc<document::Document>, record: &change::Record) {
            self.events.lock().extend(record.events.iter().cloned());
        }
    }

    #[test]
    fn test_subscribers_notified_in_order() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);

        let counter = sync::Arc::new(Counter::default());
        host.subscribe(&counter);

        host.change(change::Change::update(sample.items[0], vec![("x".to_string(), 1.into())])).unwrap();
        host.change(change::Change::Detach { object: sample.items[1] }).unwrap();

        let events = counter.events.lock().clone();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], change::Event::PropertyUpdated { .. }));
        assert!(matches!(events[1], change::Event::Removed { .. }));

        /* failed changes notify nobody */
        assert!(host.change(change::Change::Detach { object: sample.items[1] }).is_err());
        assert_eq!(counter.events.lock().len(), 2);

        std::mem::drop(counter);
        assert_eq!(host.subscriber_count(), 0);
    }

    #[test]
    fn test_wait_for_update() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);

        let before = host.get();
        host.change(change::Change::update(sample.items[0], vec![("y".to_string(), 3.into())])).unwrap();

        let after = futures::executor::block_on(host.wait_for_update(&before));
        assert!(after.is_outdated(&before));
        after.assert_same_uid(&before);
    }
}
