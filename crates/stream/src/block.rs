//! Block streams.
//!
//! A block stream owns `block_count` blocks of `block_size` bytes. Block indices circulate between
//! two rings: the free ring holds indices nobody owns, the ready ring holds indices a producer has
//! filled and submitted. Whoever pops an index owns that block until it pushes the index to one of
//! the rings again, so every index is in exactly one place at any time.
//!
//! Both rings are lock-free and bounded by the block count, so no operation blocks or allocates.
use std::{cell::UnsafeCell, sync::Arc};

use crossbeam::queue::ArrayQueue;
use util::{IsSendSync, cast_usize, saturate_u32};

use crate::{MAX_BLOCK_COUNT, StreamError};

/// A filled block waiting for the consumer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub block_index: u32,
    pub used_size: u32,
}

struct Pool {
    block_size: usize,
    block_count: usize,
    stride: usize,
    words: IsSendSync<Box<[UnsafeCell<u64>]>>,
}

/// The three shared parts of a block stream, as handed to a peer. A default value is detached and
/// fails [BlockStream::attach].
#[derive(Clone, Default)]
pub struct StreamBuffers {
    pool: Option<Arc<Pool>>,
    ready: Option<Arc<ArrayQueue<Descriptor>>>,
    free: Option<Arc<ArrayQueue<u32>>>,
}

/// One endpoint of a block stream. Cloning yields another endpoint onto the same blocks.
#[derive(Clone)]
pub struct BlockStream {
    pool: Arc<Pool>,
    ready: Arc<ArrayQueue<Descriptor>>,
    free: Arc<ArrayQueue<u32>>,
}

/// A block acquired for writing. Dropping it without [WriteBlock::submit] releases it.
pub struct WriteBlock<'a> {
    stream: &'a BlockStream,
    index: Option<u32>,
}

/// A block received for reading. Dropping it releases it.
pub struct ReadBlock<'a> {
    stream: &'a BlockStream,
    index: u32,
    used_size: usize,
}

impl Pool {
    fn new(block_size: usize, block_count: usize) -> Self {
        // Blocks start on 8 byte boundaries so snapshot headers can be cast in place.
        let stride = block_size.div_ceil(8);
        let words = (0..stride * block_count)
            .map(|_| UnsafeCell::new(0))
            .collect::<Box<[_]>>();
        Self {
            block_size,
            block_count,
            stride,
            words: IsSendSync::new(words),
        }
    }

    fn block_ptr(&self, index: u32) -> *mut u8 {
        debug_assert!(cast_usize!(index) < self.block_count);
        let offset = cast_usize!(index) * self.stride;
        unsafe { UnsafeCell::raw_get(self.words.as_ptr().add(offset)).cast() }
    }
}

impl StreamBuffers {
    pub fn is_attached(&self) -> bool {
        self.pool.is_some() && self.ready.is_some() && self.free.is_some()
    }
}

impl BlockStream {
    /// Allocate a stream with every block free.
    pub fn create(block_size: usize, block_count: usize) -> Result<Self, StreamError> {
        if block_size == 0 {
            return Err(StreamError::ZeroBlockSize);
        }
        if block_count == 0 || block_count > MAX_BLOCK_COUNT {
            return Err(StreamError::BlockCount(block_count));
        }
        let free = ArrayQueue::new(block_count);
        for index in 0..block_count {
            let _ = free.push(saturate_u32!(index));
        }
        Ok(Self {
            pool: Arc::new(Pool::new(block_size, block_count)),
            ready: Arc::new(ArrayQueue::new(block_count)),
            free: Arc::new(free),
        })
    }

    /// Attach to buffers created by a peer.
    pub fn attach(buffers: StreamBuffers) -> Result<Self, StreamError> {
        let pool = buffers.pool.ok_or(StreamError::Missing("pool buffer"))?;
        let ready = buffers.ready.ok_or(StreamError::Missing("ready ring"))?;
        let free = buffers.free.ok_or(StreamError::Missing("free ring"))?;
        if pool.block_size == 0 {
            return Err(StreamError::ZeroBlockSize);
        }
        if ready.capacity() != pool.block_count || free.capacity() != pool.block_count {
            return Err(StreamError::RingCapacity {
                ready: ready.capacity(),
                free: free.capacity(),
                blocks: pool.block_count,
            });
        }
        Ok(Self { pool, ready, free })
    }

    pub fn buffers(&self) -> StreamBuffers {
        StreamBuffers {
            pool: Some(self.pool.clone()),
            ready: Some(self.ready.clone()),
            free: Some(self.free.clone()),
        }
    }

    pub fn block_size(&self) -> usize {
        self.pool.block_size
    }

    pub fn block_count(&self) -> usize {
        self.pool.block_count
    }

    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }

    pub fn ready_blocks(&self) -> usize {
        self.ready.len()
    }

    pub fn try_acquire_block_index(&self) -> Option<u32> {
        self.free.pop()
    }

    /// Queue a held block for the consumer. Fails for an out-of-range index or size.
    pub fn try_submit_ready_block(&self, block_index: u32, used_size: u32) -> bool {
        if cast_usize!(block_index) >= self.pool.block_count
            || cast_usize!(used_size) > self.pool.block_size
        {
            return false;
        }
        self.ready
            .push(Descriptor {
                block_index,
                used_size,
            })
            .is_ok()
    }

    pub fn try_receive_ready_block(&self) -> Option<Descriptor> {
        self.ready.pop()
    }

    /// Return a held block to the free ring.
    pub fn try_release_block_index(&self, block_index: u32) -> bool {
        cast_usize!(block_index) < self.pool.block_count && self.free.push(block_index).is_ok()
    }

    /// Acquire a free block for writing.
    pub fn acquire(&self) -> Option<WriteBlock<'_>> {
        let index = self.try_acquire_block_index()?;
        Some(WriteBlock {
            stream: self,
            index: Some(index),
        })
    }

    /// Receive the oldest ready block.
    pub fn receive(&self) -> Option<ReadBlock<'_>> {
        loop {
            let descriptor = self.try_receive_ready_block()?;
            if cast_usize!(descriptor.block_index) < self.pool.block_count {
                return Some(ReadBlock {
                    stream: self,
                    index: descriptor.block_index,
                    used_size: cast_usize!(descriptor.used_size).min(self.pool.block_size),
                });
            }
        }
    }

    /// Receive the newest ready block, releasing every older one.
    pub fn receive_latest(&self) -> Option<ReadBlock<'_>> {
        let mut latest = self.receive()?;
        while let Some(next) = self.receive() {
            latest = next;
        }
        Some(latest)
    }
}

impl WriteBlock<'_> {
    pub fn index(&self) -> u32 {
        self.index.unwrap_or(u32::MAX)
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let Some(index) = self.index else {
            return &mut [];
        };
        // The index was popped from the free ring and has not been pushed anywhere since, so
        // this endpoint is the only one touching the block.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.stream.pool.block_ptr(index),
                self.stream.pool.block_size,
            )
        }
    }

    /// Queue the first `used_size` bytes for the consumer. On failure the block is released.
    pub fn submit(mut self, used_size: usize) -> bool {
        let Some(index) = self.index.take() else {
            return false;
        };
        if self
            .stream
            .try_submit_ready_block(index, saturate_u32!(used_size))
        {
            return true;
        }
        self.stream.try_release_block_index(index);
        false
    }
}

impl Drop for WriteBlock<'_> {
    fn drop(&mut self) {
        if let Some(index) = self.index.take() {
            self.stream.try_release_block_index(index);
        }
    }
}

impl ReadBlock<'_> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn used_size(&self) -> usize {
        self.used_size
    }

    /// The submitted bytes of the block.
    pub fn bytes(&self) -> &[u8] {
        // Popped from the ready ring: the producer gave up the block when it submitted it.
        unsafe {
            std::slice::from_raw_parts(self.stream.pool.block_ptr(self.index), self.used_size)
        }
    }
}

impl Drop for ReadBlock<'_> {
    fn drop(&mut self) {
        self.stream.try_release_block_index(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockStream, StreamBuffers};
    use crate::StreamError;

    #[test]
    fn create_validates() {
        assert_eq!(
            BlockStream::create(0, 4).err(),
            Some(StreamError::ZeroBlockSize)
        );
        assert_eq!(
            BlockStream::create(64, 0).err(),
            Some(StreamError::BlockCount(0))
        );
    }

    #[test]
    fn attach_rejects_detached_buffers() {
        assert!(matches!(
            BlockStream::attach(StreamBuffers::default()),
            Err(StreamError::Missing(_))
        ));
        let stream = BlockStream::create(64, 4).unwrap();
        let peer = BlockStream::attach(stream.buffers()).unwrap();
        assert_eq!(peer.block_count(), 4);
        assert_eq!(peer.block_size(), 64);
    }

    #[test]
    fn blocks_travel_between_endpoints() {
        let producer = BlockStream::create(16, 2).unwrap();
        let consumer = BlockStream::attach(producer.buffers()).unwrap();

        let mut block = producer.acquire().unwrap();
        block.bytes_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        assert!(block.submit(4));
        assert_eq!(producer.free_blocks(), 1);

        let block = consumer.receive().unwrap();
        assert_eq!(block.bytes(), &[1, 2, 3, 4]);
        drop(block);
        assert_eq!(consumer.free_blocks(), 2);
        assert_eq!(consumer.ready_blocks(), 0);
    }

    #[test]
    fn exhausted_pool_backpressures() {
        let stream = BlockStream::create(8, 2).unwrap();
        let a = stream.acquire().unwrap();
        let b = stream.acquire().unwrap();
        assert!(stream.acquire().is_none());
        drop(a);
        assert!(b.submit(8));
        assert!(stream.acquire().is_some());
    }

    #[test]
    fn rejects_oversized_submit() {
        let stream = BlockStream::create(8, 2).unwrap();
        let block = stream.acquire().unwrap();
        assert!(!block.submit(9));
        assert_eq!(stream.free_blocks(), 2);
        assert!(!stream.try_release_block_index(7));
    }

    #[test]
    fn receive_latest_releases_older() {
        let stream = BlockStream::create(8, 4).unwrap();
        for value in 0..3u8 {
            let mut block = stream.acquire().unwrap();
            block.bytes_mut()[0] = value;
            assert!(block.submit(1));
        }
        let latest = stream.receive_latest().unwrap();
        assert_eq!(latest.bytes(), &[2]);
        assert_eq!(stream.free_blocks(), 3);
        drop(latest);
        assert_eq!(stream.free_blocks(), 4);
    }
}
