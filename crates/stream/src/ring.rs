//! Ring streams: interleaved sample rings that feed media sources into a graph.
//!
//! A ring carries whole frames of `channel_capacity` samples, of which the first `channel_count`
//! are meaningful. The producer (a media decoder or an audio input device) owns a [RingProducer];
//! the consuming side receives a [RingStreamDescriptor], validates it and wraps the resulting view
//! in a [MediaSourceProvider] that the graph executor reads on the render thread.
use std::{
    os::fd::OwnedFd,
    sync::atomic::{AtomicU64, Ordering},
};

use buffer::AudioBus;
use util::{cast_usize, sync::SpinLock};

/// What a producer does when the ring is full.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum OverflowPolicy {
    /// Keep the newest audio: the consumer skips ahead when it falls behind.
    #[default]
    DropOldest,
    /// Never discard queued audio: the producer writes only what fits.
    Lossless,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RingFormat {
    pub sample_rate_hz: u32,
    pub channel_count: u32,
    pub channel_capacity: u32,
    pub capacity_frames: u64,
}

impl RingFormat {
    fn capacity_samples(&self) -> Option<usize> {
        usize::try_from(self.capacity_frames)
            .ok()?
            .checked_mul(cast_usize!(self.channel_capacity))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RingStreamError {
    #[error("ring stream {0} has a zero sample rate")]
    SampleRate(u64),
    #[error("ring stream {0} has no channels")]
    NoChannels(u64),
    #[error("ring stream {stream_id} carries {channel_count} channels but holds {channel_capacity}")]
    ChannelCapacity {
        stream_id: u64,
        channel_count: u32,
        channel_capacity: u32,
    },
    #[error("ring stream {0} capacity must be a non-zero power of two")]
    Capacity(u64),
    #[error("ring stream {0} has no shared ring")]
    MissingRing(u64),
    #[error("ring stream {stream_id} ring holds {actual} samples, expected {expected}")]
    RingSize {
        stream_id: u64,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Fifo(#[from] fifo::Error),
}

/// A ring stream as received from a peer.
pub struct RingStreamDescriptor {
    pub stream_id: u64,
    pub format: RingFormat,
    pub overflow_policy: OverflowPolicy,
    pub ring: Option<fifo::Receiver<f32>>,
    pub notify_fd: Option<OwnedFd>,
}

/// A validated ring stream.
pub struct RingStreamView {
    pub stream_id: u64,
    pub format: RingFormat,
    pub overflow_policy: OverflowPolicy,
    consumer: fifo::Receiver<f32>,
    notify_fd: Option<OwnedFd>,
}

/// The write end of a ring stream.
pub struct RingProducer {
    format: RingFormat,
    sender: fifo::Sender<f32>,
}

/// Create a ring stream for `format`.
pub fn ring_stream(
    stream_id: u64,
    format: RingFormat,
    overflow_policy: OverflowPolicy,
) -> Result<(RingProducer, RingStreamDescriptor), RingStreamError> {
    let capacity = format
        .capacity_samples()
        .ok_or(RingStreamError::Capacity(stream_id))?;
    let (sender, receiver) = fifo::channel(capacity, None, || 0.0f32)?;
    let descriptor = RingStreamDescriptor {
        stream_id,
        format,
        overflow_policy,
        ring: Some(receiver),
        notify_fd: None,
    };
    Ok((RingProducer { format, sender }, descriptor))
}

/// Check a descriptor received from a peer before anything reads from it.
pub fn validate_ring_stream_descriptor(
    descriptor: RingStreamDescriptor,
) -> Result<RingStreamView, RingStreamError> {
    let RingStreamDescriptor {
        stream_id,
        format,
        overflow_policy,
        ring,
        notify_fd,
    } = descriptor;

    if format.sample_rate_hz == 0 {
        return Err(RingStreamError::SampleRate(stream_id));
    }
    if format.channel_count == 0 {
        return Err(RingStreamError::NoChannels(stream_id));
    }
    if format.channel_count > format.channel_capacity {
        return Err(RingStreamError::ChannelCapacity {
            stream_id,
            channel_count: format.channel_count,
            channel_capacity: format.channel_capacity,
        });
    }
    let expected = format
        .capacity_samples()
        .filter(|samples| *samples != 0 && samples.is_power_of_two())
        .ok_or(RingStreamError::Capacity(stream_id))?;
    let consumer = ring.ok_or(RingStreamError::MissingRing(stream_id))?;
    if consumer.capacity() != expected {
        return Err(RingStreamError::RingSize {
            stream_id,
            expected,
            actual: consumer.capacity(),
        });
    }
    Ok(RingStreamView {
        stream_id,
        format,
        overflow_policy,
        consumer,
        notify_fd,
    })
}

impl RingProducer {
    pub fn format(&self) -> RingFormat {
        self.format
    }

    /// Number of whole frames that fit right now.
    pub fn free_frames(&self) -> usize {
        self.sender.free() / cast_usize!(self.format.channel_capacity)
    }

    /// Append interleaved frames of `channels` samples. Channels beyond the ring's channel count
    /// are dropped, missing ones are zero filled. Returns the number of frames written.
    pub fn push_interleaved(&mut self, samples: &[f32], channels: usize) -> usize {
        if channels == 0 {
            return 0;
        }
        let stride = cast_usize!(self.format.channel_capacity);
        let used = channels.min(cast_usize!(self.format.channel_count));
        let frames = samples.len() / channels;

        let mut written = 0;
        while written < frames {
            let Some(mut txn) = self.sender.write((frames - written) * stride) else {
                break;
            };
            let count = txn.len() / stride;
            if count == 0 {
                break;
            }
            for (k, frame) in txn.chunks_exact_mut(stride).take(count).enumerate() {
                let source = &samples[(written + k) * channels..][..channels];
                frame[..used].copy_from_slice(&source[..used]);
                frame[used..].fill(0.0);
            }
            txn.commit_n(count * stride);
            written += count;
        }
        written
    }
}

/// A media source backed by a ring stream, read on the render thread.
pub struct MediaSourceProvider {
    provider_id: u64,
    stream_id: u64,
    format: RingFormat,
    overflow_policy: OverflowPolicy,
    consumer: SpinLock<fifo::Receiver<f32>>,
    frames_delivered: AtomicU64,
    _notify_fd: Option<OwnedFd>,
}

impl MediaSourceProvider {
    pub fn new(provider_id: u64, view: RingStreamView) -> Self {
        Self {
            provider_id,
            stream_id: view.stream_id,
            format: view.format,
            overflow_policy: view.overflow_policy,
            consumer: SpinLock::new(view.consumer),
            frames_delivered: AtomicU64::new(0),
            _notify_fd: view.notify_fd,
        }
    }

    pub fn provider_id(&self) -> u64 {
        self.provider_id
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn format(&self) -> RingFormat {
        self.format
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    /// Fill `output` with queued frames, silencing whatever the ring cannot supply. Never blocks:
    /// if another reader holds the ring the output is silent. Returns the frames delivered.
    pub fn pop_planar(&self, output: &mut AudioBus) -> usize {
        output.clear();
        let Some(mut consumer) = self.consumer.try_lock() else {
            return 0;
        };
        let stride = cast_usize!(self.format.channel_capacity);
        let channels = output
            .num_channels()
            .min(cast_usize!(self.format.channel_count));
        let wanted = output.num_frames();

        if self.overflow_policy == OverflowPolicy::DropOldest {
            // Keep at most one quantum of backlog beyond what this call consumes.
            let backlog = consumer.available() / stride;
            let excess = backlog.saturating_sub(wanted * 2);
            let mut skipped = 0;
            while skipped < excess {
                let Some(txn) = consumer.read() else {
                    break;
                };
                let count = (txn.len() / stride).min(excess - skipped);
                if count == 0 {
                    break;
                }
                txn.commit_n(count * stride);
                skipped += count;
            }
        }

        let mut delivered = 0;
        while delivered < wanted {
            let Some(txn) = consumer.read() else {
                break;
            };
            let count = (txn.len() / stride).min(wanted - delivered);
            if count == 0 {
                break;
            }
            for (k, frame) in txn.chunks_exact(stride).take(count).enumerate() {
                for (channel, sample) in frame[..channels].iter().enumerate() {
                    output.channel_mut(channel)[delivered + k] = *sample;
                }
            }
            txn.commit_n(count * stride);
            delivered += count;
        }
        self.frames_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }
}
