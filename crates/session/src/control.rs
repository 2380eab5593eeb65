use std::{
    sync::{Arc, Weak},
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::{Session, config::CONTROL_LOOP_CAPACITY};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Task {
    DrainRetiredGraphs,
    FlushProcessorErrors,
    FlushProcessorRegistrations,
    FlushModuleEvaluations,
    ApplyDeferredGraph,
}

enum Deferred {
    Task { session: Weak<Session>, task: Task },
    Release(Arc<Session>),
}

/// The receiving end, owned by the control thread.
pub struct ControlLoop {
    receiver: Receiver<Deferred>,
    handle: ControlHandle,
}

/// Schedules tasks onto a [ControlLoop]. Cheap to clone.
#[derive(Clone)]
pub struct ControlHandle {
    sender: Sender<Deferred>,
    thread: ThreadId,
}

impl ControlLoop {
    /// Create a loop owned by the calling thread.
    pub fn new() -> Self {
        Self::with_capacity(CONTROL_LOOP_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            receiver,
            handle: ControlHandle {
                sender,
                thread: thread::current().id(),
            },
        }
    }

    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Run every task queued so far. Returns the number run.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(deferred) = self.receiver.try_recv() {
            count += usize::from(run(deferred));
        }
        count
    }

    /// Run tasks as they arrive for `duration`. Returns the number run.
    pub fn run_for(&self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut count = 0;
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(timeout) {
                Ok(deferred) => count += usize::from(run(deferred)),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        count
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        // Queued sessions hold senders of this channel, so it would never free them.
        while let Ok(deferred) = self.receiver.try_recv() {
            drop(deferred);
        }
    }
}

impl Default for ControlLoop {
    fn default() -> Self {
        Self::new()
    }
}

fn run(deferred: Deferred) -> bool {
    match deferred {
        Deferred::Task { session, task } => {
            let Some(session) = session.upgrade() else {
                return false;
            };
            session.run_task(task);
            true
        }
        Deferred::Release(session) => {
            drop(session);
            false
        }
    }
}

impl ControlHandle {
    pub fn is_control_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    pub(crate) fn schedule(&self, session: &Weak<Session>, task: Task) -> bool {
        let deferred = Deferred::Task {
            session: session.clone(),
            task,
        };
        match self.sender.try_send(deferred) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }

    pub(crate) fn release(&self, session: Arc<Session>) {
        if self.is_control_thread() {
            drop(session);
            return;
        }
        let deferred = match self.sender.try_send(Deferred::Release(session)) {
            Ok(()) => return,
            Err(TrySendError::Full(deferred)) => match self.sender.send(deferred) {
                Ok(()) => return,
                Err(error) => error.into_inner(),
            },
            Err(TrySendError::Disconnected(deferred)) => deferred,
        };
        log::warn!("control loop is gone, releasing session off the control thread");
        drop(deferred);
    }
}
