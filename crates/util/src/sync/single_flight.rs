use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::utils::CachePadded;

/// A "task already scheduled" flag.
///
/// Any number of producers may call [SingleFlight::try_begin]; exactly one of them wins until the
/// consumer calls [SingleFlight::finish]. Consumers clear the flag *before* draining their work
/// and re-check for new work afterwards, so a producer that loses the race never strands an item.
#[derive(Default)]
pub struct SingleFlight {
    scheduled: CachePadded<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to schedule the consumer. Returns `true` for exactly one caller per flight.
    pub fn try_begin(&self) -> bool {
        self.scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// End the current flight. Called at the start of a drain, or when scheduling failed.
    pub fn finish(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }
}
