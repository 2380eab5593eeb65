use crossbeam::queue::ArrayQueue;
use util::sync::SingleFlight;

/// A bounded multi-producer queue plus a "flush already scheduled" flag.
///
/// Producers push with [Mailbox::try_push]; exactly one of them is told to schedule a flush until
/// the consumer runs [Mailbox::flush]. Items from one producer are delivered in push order.
pub struct Mailbox<T> {
    queue: ArrayQueue<T>,
    flight: SingleFlight,
}

impl<T> Mailbox<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            flight: SingleFlight::new(),
        }
    }

    /// Queue `item`. `Ok(true)` means the caller must schedule a flush; `Err` hands back an item
    /// that did not fit.
    pub fn try_push(&self, item: T) -> Result<bool, T> {
        self.queue.push(item)?;
        Ok(self.flight.try_begin())
    }

    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Give back a scheduling claim that could not be acted on.
    pub fn unschedule(&self) {
        self.flight.finish();
    }

    /// Deliver every queued item. Returns `true` if items arrived after the flush started and the
    /// caller must schedule another.
    pub fn flush(&self, mut deliver: impl FnMut(T)) -> bool {
        self.flight.finish();
        while let Some(item) = self.queue.pop() {
            deliver(item);
        }
        !self.queue.is_empty() && self.flight.try_begin()
    }
}
