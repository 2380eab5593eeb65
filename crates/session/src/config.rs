use std::{os::fd::OwnedFd, sync::Arc};

use graph::ExecutorFactory;
use processor::{AudioInputClient, WorkletHostFactory};
use stream::TimingPage;

/// Environment variable holding a comma separated list of debug categories.
pub const DEBUG_ENV: &str = "CADENZA_DEBUG";

/// Smallest and largest analyser FFT sizes.
pub const MIN_FFT_SIZE: u32 = 32;
pub const MAX_FFT_SIZE: u32 = 32768;

/// Telemetry streams hold this many blocks unless asked otherwise.
pub const DEFAULT_TELEMETRY_BLOCKS: usize = 4;
pub const MIN_TELEMETRY_BLOCKS: usize = 2;
pub const MAX_TELEMETRY_BLOCKS: usize = 32;

/// Capacity of each worklet event mailbox.
pub const MAILBOX_CAPACITY: usize = 64;

/// Capacity of the control loop's task queue.
pub const CONTROL_LOOP_CAPACITY: usize = 256;

/// Diagnostic categories. Everything is off by default.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub info: bool,
    /// Output levels, logged from the render thread at most once per second of audio.
    pub output: bool,
    pub script_processor: bool,
    pub media: bool,
}

impl DebugFlags {
    pub fn all() -> Self {
        Self {
            info: true,
            output: true,
            script_processor: true,
            media: true,
        }
    }

    /// Parse a list like `info,media`. Unknown categories are ignored.
    pub fn parse(value: &str) -> Self {
        let mut flags = Self::default();
        for category in value.split(',').map(str::trim) {
            match category {
                "info" => flags.info = true,
                "output" => flags.output = true,
                "script-processor" => flags.script_processor = true,
                "media" => flags.media = true,
                "all" => flags = Self::all(),
                "" => (),
                other => log::debug!("ignoring unknown debug category {other:?}"),
            }
        }
        flags
    }

    pub fn from_env() -> Self {
        std::env::var(DEBUG_ENV)
            .map(|value| Self::parse(&value))
            .unwrap_or_default()
    }
}

pub struct SessionOptions {
    pub session_id: u64,
    pub client_id: u64,
    pub device_sample_rate_hz: u32,
    pub device_channel_count: u32,
    pub timing_page: Option<Arc<TimingPage>>,
    /// Write end of the timing notification pipe. Should be non-blocking.
    pub timing_notify_fd: Option<OwnedFd>,
    pub debug: DebugFlags,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            session_id: 0,
            client_id: 0,
            device_sample_rate_hz: 48000,
            device_channel_count: 2,
            timing_page: None,
            timing_notify_fd: None,
            debug: DebugFlags::from_env(),
        }
    }
}

/// The external services a session builds on.
#[derive(Clone)]
pub struct Collaborators {
    pub executor_factory: Arc<dyn ExecutorFactory>,
    pub worklet_host_factory: Option<Arc<dyn WorkletHostFactory>>,
    pub audio_input: Option<Arc<dyn AudioInputClient>>,
}

impl Collaborators {
    pub fn new(executor_factory: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            executor_factory,
            worklet_host_factory: None,
            audio_input: None,
        }
    }
}

pub(crate) fn valid_fft_size(fft_size: u32) -> bool {
    (MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) && fft_size.is_power_of_two()
}

pub(crate) fn telemetry_block_count(requested: usize) -> usize {
    if requested == 0 {
        DEFAULT_TELEMETRY_BLOCKS
    } else {
        requested.clamp(MIN_TELEMETRY_BLOCKS, MAX_TELEMETRY_BLOCKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_debug_flags() {
        assert_eq!(DebugFlags::parse(""), DebugFlags::default());
        assert_eq!(
            DebugFlags::parse("info, media,bogus"),
            DebugFlags {
                info: true,
                media: true,
                ..Default::default()
            }
        );
        assert_eq!(DebugFlags::parse("all"), DebugFlags::all());
    }

    #[test]
    fn limits() {
        assert!(valid_fft_size(32));
        assert!(valid_fft_size(1024));
        assert!(valid_fft_size(32768));
        assert!(!valid_fft_size(16));
        assert!(!valid_fft_size(1000));
        assert!(!valid_fft_size(65536));

        assert_eq!(telemetry_block_count(0), DEFAULT_TELEMETRY_BLOCKS);
        assert_eq!(telemetry_block_count(1), MIN_TELEMETRY_BLOCKS);
        assert_eq!(telemetry_block_count(100), MAX_TELEMETRY_BLOCKS);
    }
}
