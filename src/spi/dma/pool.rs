//! Budgeted pool of word-aligned staging buffers. Buffers hand their bytes
//! back to the pool when dropped.
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::spi::bus::{SpiError, SpiResult};

use super::DMA_ALIGN;

pub const DEFAULT_POOL_BYTES: usize = 128 * 1024;

#[derive(Debug)]
struct PoolInner {
    capacity: usize,
    used: AtomicUsize,
}

#[derive(Clone, Debug)]
pub struct StagingPool {
    inner: Arc<PoolInner>,
}

impl Default for StagingPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_BYTES)
    }
}

impl StagingPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                used: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn available(&self) -> usize {
        self.inner.capacity - self.inner.used.load(Ordering::Acquire)
    }

    /// Reserves a zeroed buffer of `len` bytes, rounded up to whole DMA words.
    pub fn allocate(&self, len: usize) -> SpiResult<StagingBuffer> {
        let reserved = len.div_ceil(DMA_ALIGN) * DMA_ALIGN;
        let mut used = self.inner.used.load(Ordering::Acquire);
        loop {
            let available = self.inner.capacity - used;
            if reserved > available {
                return Err(SpiError::StagingExhausted {
                    requested: reserved,
                    available,
                });
            }
            match self.inner.used.compare_exchange_weak(
                used,
                used + reserved,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => used = current,
            }
        }
        Ok(StagingBuffer {
            words: vec![0u32; reserved / DMA_ALIGN],
            len,
            pool: self.inner.clone(),
        })
    }
}

/// DMA-capable scratch memory. Backed by `u32` words so the start is always
/// word aligned.
#[derive(Debug)]
pub struct StagingBuffer {
    words: Vec<u32>,
    len: usize,
    pool: Arc<PoolInner>,
}

impl StagingBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn address(&self) -> usize {
        self.words.as_ptr() as usize
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `words` holds at least `len` bytes and every byte is a valid u8.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; the unique borrow of `self` makes the slice the
        // only live view of `words`.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        let reserved = self.words.len() * DMA_ALIGN;
        self.pool.used.fetch_sub(reserved, Ordering::AcqRel);
    }
}
