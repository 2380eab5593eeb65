//! A versioned publish slot: an atomic pointer to an immutable, reference counted snapshot.
use std::{
    marker::PhantomData,
    ops::Deref,
    ptr::null_mut,
    sync::{
        Arc,
        atomic::{AtomicPtr, AtomicUsize, Ordering},
    },
};

use crossbeam::utils::{Backoff, CachePadded};

use crate::retire::RetirementList;

/// A value that can be published through a [PublishSlot].
///
/// Displaced values of these types are dropped by the publisher once no reader borrows them,
/// which is only allowed on a thread that may block.
pub trait Published: Send + Sync + 'static {}

/// Published values whose destruction must never happen on the render thread. When the render
/// thread displaces one it retires it to a [RetirementList] instead of dropping it.
pub trait Retire: Published {}

pub(crate) type ReaderCount = Arc<CachePadded<AtomicUsize>>;

pub struct PublishSlot<T: Published> {
    pointer: CachePadded<AtomicPtr<T>>,
    readers: ReaderCount,
    _p: PhantomData<Arc<T>>,
}

/// A borrow of the value held by a [PublishSlot].
pub struct Guard<'a, T: Published> {
    readers: &'a CachePadded<AtomicUsize>,
    pointer: *const T,
}

/// The value displaced by a publish. Dropping it waits until no reader borrows it.
#[must_use = "dropping a displaced value may block; retire it on the render thread"]
pub struct Displaced<'a, T: Published> {
    slot: &'a PublishSlot<T>,
    value: Option<Arc<T>>,
}

unsafe impl<T: Published> Send for PublishSlot<T> {}
unsafe impl<T: Published> Sync for PublishSlot<T> {}

fn into_raw<T>(value: Option<Arc<T>>) -> *mut T {
    value.map_or(null_mut(), |value| Arc::into_raw(value).cast_mut())
}

/// Spin until `readers` is zero.
pub fn quiesce(readers: &AtomicUsize) {
    let backoff = Backoff::new();
    while readers.load(Ordering::SeqCst) != 0 {
        backoff.snooze();
    }
}

impl<T: Published> PublishSlot<T> {
    pub fn new(value: Option<Arc<T>>) -> Self {
        Self {
            pointer: CachePadded::new(AtomicPtr::new(into_raw(value))),
            readers: Arc::new(CachePadded::new(AtomicUsize::new(0))),
            _p: PhantomData,
        }
    }

    /// Borrow the current value. Callable from any thread; never blocks or allocates.
    pub fn load_for_read(&self) -> Option<Guard<'_, T>> {
        // Announce the borrow before loading the pointer. A writer that swaps the pointer after
        // this increment sees a non-zero count and waits before releasing the old value.
        self.readers.fetch_add(1, Ordering::SeqCst);
        let pointer = self.pointer.load(Ordering::SeqCst);
        if pointer.is_null() {
            self.readers.fetch_sub(1, Ordering::Release);
            return None;
        }
        Some(Guard {
            readers: &self.readers,
            pointer,
        })
    }

    /// Take a new reference to the current value.
    pub fn load(&self) -> Option<Arc<T>> {
        self.load_for_read().map(|guard| guard.to_arc())
    }

    pub fn is_empty(&self) -> bool {
        self.pointer.load(Ordering::Acquire).is_null()
    }

    /// Atomically replace the value, returning the one it displaced.
    pub fn publish(&self, value: Option<Arc<T>>) -> Displaced<'_, T> {
        let old = self.pointer.swap(into_raw(value), Ordering::SeqCst);
        let value = (!old.is_null()).then(|| unsafe { Arc::from_raw(old) });
        Displaced { slot: self, value }
    }

    /// Atomically clear the slot, returning the previous value.
    pub fn take(&self) -> Displaced<'_, T> {
        self.publish(None)
    }

    /// Wait until no borrow that started before this call is still alive.
    pub fn quiesce(&self) {
        quiesce(&self.readers);
    }
}

impl<T: Published> Default for PublishSlot<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T: Published> Drop for PublishSlot<T> {
    fn drop(&mut self) {
        let pointer = *self.pointer.get_mut();
        if !pointer.is_null() {
            drop(unsafe { Arc::from_raw(pointer) });
        }
    }
}

impl<T: Published> Guard<'_, T> {
    pub fn to_arc(&self) -> Arc<T> {
        unsafe {
            Arc::increment_strong_count(self.pointer);
            Arc::from_raw(self.pointer)
        }
    }
}

impl<T: Published> Deref for Guard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.pointer }
    }
}

impl<T: Published> Drop for Guard<'_, T> {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::Release);
    }
}

impl<T: Published> Displaced<'_, T> {
    pub fn get(&self) -> Option<&Arc<T>> {
        self.value.as_ref()
    }

    pub fn is_some(&self) -> bool {
        self.value.is_some()
    }

    /// Wait for readers, then drop the value on this thread.
    pub fn release(self) {
        drop(self);
    }
}

impl<T: Retire> Displaced<'_, T> {
    /// Hand the value to `list` without waiting. Returns `true` when the caller must schedule a
    /// drain of the list.
    pub fn retire(mut self, list: &RetirementList<T>) -> bool {
        match self.value.take() {
            Some(value) => list.push(value, Some(self.slot.readers.clone())),
            None => false,
        }
    }
}

impl<T: Published> Drop for Displaced<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.slot.quiesce();
            drop(value);
        }
    }
}
