//! The timing page: a small shared summary of render progress, plus a pipe that tells the reader
//! a new summary is available.
use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
    sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering, fence},
};

use crossbeam::utils::CachePadded;
use util::slot::quiesce;

/// Number of attempts [TimingPage::read] makes before giving up on a torn read.
const READ_ATTEMPTS: usize = 8;

/// A suspended flag and the generation of the request that set it, packed into one word so both
/// change together.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SuspendState {
    pub suspended: bool,
    pub generation: u64,
}

impl SuspendState {
    pub fn encode(self) -> u64 {
        (self.generation << 1) | u64::from(self.suspended)
    }

    pub fn decode(raw: u64) -> Self {
        Self {
            suspended: raw & 1 != 0,
            generation: raw >> 1,
        }
    }
}

/// One consistent reading of the [TimingPage].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TimingSnapshot {
    pub context_sample_rate: u32,
    pub channel_count: u32,
    pub rendered_frames: u64,
    pub underrun_frames: u64,
    pub graph_generation: u64,
    pub suspend_state: SuspendState,
}

/// Fixed-layout page written by the render thread and read by any number of peers. Writes are
/// bracketed by a sequence counter that is odd while a write is in progress.
#[repr(C)]
#[derive(Default)]
pub struct TimingPage {
    sequence: AtomicU64,
    context_sample_rate: AtomicU32,
    channel_count: AtomicU32,
    rendered_frames: AtomicU64,
    underrun_frames: AtomicU64,
    graph_generation: AtomicU64,
    suspend_state: AtomicU64,
}

impl TimingPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a snapshot. Single writer only.
    pub fn write(&self, snapshot: &TimingSnapshot) {
        let sequence = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.context_sample_rate
            .store(snapshot.context_sample_rate, Ordering::Relaxed);
        self.channel_count
            .store(snapshot.channel_count, Ordering::Relaxed);
        self.rendered_frames
            .store(snapshot.rendered_frames, Ordering::Relaxed);
        self.underrun_frames
            .store(snapshot.underrun_frames, Ordering::Relaxed);
        self.graph_generation
            .store(snapshot.graph_generation, Ordering::Relaxed);
        self.suspend_state
            .store(snapshot.suspend_state.encode(), Ordering::Relaxed);

        self.sequence
            .store(sequence.wrapping_add(2), Ordering::Release);
    }

    /// Read a consistent snapshot, or `None` if every attempt raced a write.
    pub fn read(&self) -> Option<TimingSnapshot> {
        for _ in 0..READ_ATTEMPTS {
            let before = self.sequence.load(Ordering::Acquire);
            if before & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }
            let snapshot = TimingSnapshot {
                context_sample_rate: self.context_sample_rate.load(Ordering::Relaxed),
                channel_count: self.channel_count.load(Ordering::Relaxed),
                rendered_frames: self.rendered_frames.load(Ordering::Relaxed),
                underrun_frames: self.underrun_frames.load(Ordering::Relaxed),
                graph_generation: self.graph_generation.load(Ordering::Relaxed),
                suspend_state: SuspendState::decode(self.suspend_state.load(Ordering::Relaxed)),
            };
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == before {
                return Some(snapshot);
            }
        }
        None
    }

    /// Number of completed writes.
    pub fn writes(&self) -> u64 {
        self.sequence.load(Ordering::Acquire) / 2
    }
}

/// Outcome of [TimingNotifier::notify].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Notify {
    Sent,
    /// The pipe is full. The reader has a wakeup pending already.
    Coalesced,
    /// The write failed for good and the descriptor was closed.
    Disabled,
    /// There is no descriptor.
    Closed,
}

/// The write end of the timing notification pipe.
///
/// Closing clears the descriptor and then waits for writes already in flight, so a write never
/// lands on a descriptor number the process has reused.
pub struct TimingNotifier {
    fd: AtomicI32,
    writers: CachePadded<AtomicUsize>,
}

impl TimingNotifier {
    pub fn new(fd: Option<OwnedFd>) -> Self {
        Self {
            fd: AtomicI32::new(fd.map_or(-1, IntoRawFd::into_raw_fd)),
            writers: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.fd.load(Ordering::Acquire) >= 0
    }

    /// Write a single byte. Never blocks provided the descriptor is non-blocking.
    pub fn notify(&self) -> Notify {
        // Announce the write before loading the descriptor, as slot readers do.
        self.writers.fetch_add(1, Ordering::SeqCst);
        let fd = self.fd.load(Ordering::SeqCst);
        let notify = if fd < 0 {
            Notify::Closed
        } else {
            write_byte(fd)
        };
        let detached = notify == Notify::Disabled && self.detach(fd);
        self.writers.fetch_sub(1, Ordering::Release);
        if detached {
            self.close_detached(fd);
        }
        notify
    }

    /// Close the descriptor once no write is using it. Returns `false` if it was already
    /// closed.
    pub fn close(&self) -> bool {
        let fd = self.fd.load(Ordering::Acquire);
        if fd < 0 || !self.detach(fd) {
            return false;
        }
        self.close_detached(fd);
        true
    }

    fn detach(&self, fd: RawFd) -> bool {
        self.fd
            .compare_exchange(fd, -1, Ordering::SeqCst, Ordering::Acquire)
            .is_ok()
    }

    fn close_detached(&self, fd: RawFd) {
        quiesce(&self.writers);
        drop(unsafe { OwnedFd::from_raw_fd(fd) });
    }
}

fn write_byte(fd: RawFd) -> Notify {
    let byte = 0u8;
    let rc = unsafe { libc::write(fd, (&raw const byte).cast(), 1) };
    if rc == 1 {
        return Notify::Sent;
    }
    match io::Error::last_os_error().kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Notify::Coalesced,
        _ => Notify::Disabled,
    }
}

impl Drop for TimingNotifier {
    fn drop(&mut self) {
        self.close();
    }
}

/// Create a non-blocking, close-on-exec pipe. Returns `(read, write)`.
pub fn notification_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [-1; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [&read, &write] {
        let fd = fd.as_raw_fd();
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok((read, write))
}
