//! A wait-free single-producer single-consumer ring.
//!
//! Both ends work with transactions over a contiguous region of the ring: a [SendTxn] exposes
//! free slots to fill, a [RecvTxn] exposes queued slots to consume. Nothing becomes visible to the
//! other end until the transaction is committed.
use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, atomic::Ordering},
};

mod state;

use state::State;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("fifo capacity must be a non-zero power of two, got {0}")]
    Capacity(usize),
    #[error("fifo storage layout is invalid")]
    Layout,
}

/// The write end of a ring.
pub struct Sender<T> {
    state: Arc<State<T>>,
}

/// A write transaction. See [Sender::write].
pub struct SendTxn<'a, T> {
    writer: &'a mut Sender<T>,
    start: usize,
    length: usize,
}

/// The read end of a ring.
pub struct Receiver<T> {
    state: Arc<State<T>>,
}

/// A read transaction. See [Receiver::read].
pub struct RecvTxn<'a, T> {
    reader: &'a mut Receiver<T>,
    start: usize,
    length: usize,
}

/// Create a ring of `capacity` slots, each initialized with `init`. `align` overrides the
/// alignment of the backing storage.
pub fn channel<T>(
    capacity: usize,
    align: Option<usize>,
    init: impl Fn() -> T,
) -> Result<(Sender<T>, Receiver<T>), Error> {
    let state = Arc::new(State::new(
        capacity,
        align.unwrap_or(align_of::<T>()),
        init,
    )?);
    let sender = Sender {
        state: state.clone(),
    };
    Ok((sender, Receiver { state }))
}

impl<T> Receiver<T> {
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Number of slots queued, including any that wrap around the end of the ring.
    pub fn available(&self) -> usize {
        let head = self.state.head.load(Ordering::Acquire);
        let tail = self.state.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    pub fn sender_dropped(&self) -> bool {
        Arc::strong_count(&self.state) == 1
    }

    /// Acquire a read transaction over the longest contiguous run of queued slots. Returns `None`
    /// when the ring is empty _and_ the [Sender] has been dropped.
    pub fn read(&mut self) -> Option<RecvTxn<'_, T>> {
        // Load the cursors.
        let capacity = self.state.capacity;
        let head = self.state.head.load(Ordering::Acquire);
        let tail = self.state.tail.load(Ordering::Relaxed);

        // Compute the read region.
        let used = head.wrapping_sub(tail);
        let start = tail & (capacity - 1);
        let length = used.min(capacity - start);

        if length == 0 && self.sender_dropped() {
            return None;
        }
        Some(RecvTxn {
            reader: self,
            start,
            length,
        })
    }
}

impl<T> Sender<T> {
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Number of free slots, including any that wrap around the end of the ring.
    pub fn free(&self) -> usize {
        let head = self.state.head.load(Ordering::Relaxed);
        let tail = self.state.tail.load(Ordering::Acquire);
        self.state.capacity - head.wrapping_sub(tail)
    }

    pub fn receiver_dropped(&self) -> bool {
        Arc::strong_count(&self.state) == 1
    }

    /// Acquire a write transaction over at most `count` contiguous free slots. Returns `None` if
    /// the [Receiver] was dropped.
    pub fn write(&mut self, count: usize) -> Option<SendTxn<'_, T>> {
        if self.receiver_dropped() {
            return None;
        }

        // Load the cursors.
        let capacity = self.state.capacity;
        let head = self.state.head.load(Ordering::Relaxed);
        let tail = self.state.tail.load(Ordering::Acquire);

        // Compute the write region.
        let free = capacity - head.wrapping_sub(tail);
        let start = head & (capacity - 1);
        let length = free.min(capacity - start).min(count);

        Some(SendTxn {
            writer: self,
            start,
            length,
        })
    }
}

impl<T: Copy> Sender<T> {
    /// Copy as much of `message` as fits. Returns the number of slots written.
    pub fn send_all(&mut self, mut message: &[T]) -> usize {
        let mut count = 0;
        while !message.is_empty() {
            let Some(mut txn) = self.write(message.len()) else {
                break;
            };
            if txn.is_empty() {
                break;
            }
            let len = txn.len();
            txn.copy_from_slice(&message[..len]);
            txn.commit();
            message = &message[len..];
            count += len;
        }
        count
    }
}

impl<T> RecvTxn<'_, T> {
    /// Consume every slot in the transaction.
    pub fn commit(self) {
        let length = self.length;
        self.commit_n(length);
    }

    /// Consume the first `count` slots of the transaction.
    pub fn commit_n(self, count: usize) {
        debug_assert!(count <= self.length);
        self.reader
            .state
            .tail
            .fetch_add(count.min(self.length), Ordering::Release);
    }
}

impl<T> SendTxn<'_, T> {
    /// Publish every slot in the transaction. This _must_ be called or nothing appears in the
    /// ring.
    pub fn commit(self) {
        let length = self.length;
        self.commit_n(length);
    }

    /// Publish the first `count` slots of the transaction.
    pub fn commit_n(self, count: usize) {
        debug_assert!(count <= self.length);
        self.writer
            .state
            .head
            .fetch_add(count.min(self.length), Ordering::Release);
    }
}

impl<T> Deref for RecvTxn<'_, T> {
    type Target = [T];
    fn deref(&self) -> &Self::Target {
        unsafe {
            let data = self.reader.state.data.add(self.start);
            std::slice::from_raw_parts(data, self.length)
        }
    }
}

impl<T> Deref for SendTxn<'_, T> {
    type Target = [T];
    fn deref(&self) -> &Self::Target {
        unsafe {
            let data = self.writer.state.data.add(self.start);
            std::slice::from_raw_parts(data, self.length)
        }
    }
}

impl<T> DerefMut for SendTxn<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe {
            let data = self.writer.state.data.add(self.start);
            std::slice::from_raw_parts_mut(data, self.length)
        }
    }
}
