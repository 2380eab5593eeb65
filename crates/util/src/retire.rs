use std::{
    ptr::null_mut,
    sync::{
        Arc,
        atomic::{AtomicPtr, Ordering},
    },
};

use crossbeam::{queue::ArrayQueue, utils::CachePadded};

use crate::{
    slot::{ReaderCount, Retire, quiesce},
    sync::SingleFlight,
};

/// Number of list nodes allocated up front by [RetirementList::new].
pub const DEFAULT_SPARE_NODES: usize = 16;

pub struct RetirementList<T: Retire> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    spare: ArrayQueue<Box<Node<T>>>,
    flight: SingleFlight,
}

struct Node<T> {
    value: Option<Arc<T>>,
    readers: Option<ReaderCount>,
    next: *mut Node<T>,
}

/// Result of a [RetirementList::drain].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Number of values released.
    pub released: usize,
    /// `true` when values were retired during the drain and the caller must schedule another.
    pub reschedule: bool,
}

unsafe impl<T: Retire> Send for RetirementList<T> {}
unsafe impl<T: Retire> Sync for RetirementList<T> {}

impl<T> Node<T> {
    fn empty() -> Box<Self> {
        Box::new(Self {
            value: None,
            readers: None,
            next: null_mut(),
        })
    }
}

impl<T: Retire> RetirementList<T> {
    pub fn new() -> Self {
        Self::with_spare_nodes(DEFAULT_SPARE_NODES)
    }

    pub fn with_spare_nodes(count: usize) -> Self {
        let spare = ArrayQueue::new(count.max(1));
        for _ in 0..count {
            let _ = spare.push(Node::empty());
        }
        Self {
            head: CachePadded::new(AtomicPtr::new(null_mut())),
            spare,
            flight: SingleFlight::new(),
        }
    }

    /// Retire a reference that is not tied to any [crate::PublishSlot]. Returns `true` when the
    /// caller must schedule a drain.
    pub fn retire(&self, value: Arc<T>) -> bool {
        self.push(value, None)
    }

    pub(crate) fn push(&self, value: Arc<T>, readers: Option<ReaderCount>) -> bool {
        let mut node = self.spare.pop().unwrap_or_else(Node::empty);
        node.value = Some(value);
        node.readers = readers;
        let node = Box::into_raw(node);

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
        self.flight.try_begin()
    }

    /// Give back the scheduling claim returned by a push when the drain task could not be
    /// scheduled.
    pub fn unschedule(&self) {
        self.flight.finish();
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Release every retired value. Control thread only.
    pub fn drain(&self) -> Drained {
        // Clear the flag first: anything retired from here on schedules a new drain or is picked
        // up by the re-check below.
        self.flight.finish();

        let mut released = 0;
        let mut node = self.head.swap(null_mut(), Ordering::Acquire);
        while !node.is_null() {
            let mut boxed = unsafe { Box::from_raw(node) };
            node = boxed.next;
            boxed.next = null_mut();
            if let Some(readers) = boxed.readers.take() {
                quiesce(&readers);
            }
            if boxed.value.take().is_some() {
                released += 1;
            }
            let _ = self.spare.push(boxed);
        }

        let reschedule = !self.is_empty() && self.flight.try_begin();
        Drained {
            released,
            reschedule,
        }
    }
}

impl<T: Retire> Default for RetirementList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Retire> Drop for RetirementList<T> {
    fn drop(&mut self) {
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next;
        }
    }
}
