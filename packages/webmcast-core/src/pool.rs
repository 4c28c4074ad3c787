//! Bounded buffer pooling for cross-thread media handoff.
//!
//! Capture threads `commit` buffers into the pool; the encoder thread
//! `decommit`s them in arrival order. Slots cycle between a free queue and an
//! active queue so steady-state operation never reallocates payload storage:
//! a slot that already owns a buffer exchanges contents with the caller via
//! destructive swap, and only a never-used slot pays for a deep clone.
//!
//! Every operation takes the pool mutex; callers must never hold it across
//! codec or I/O calls.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::PoolError;

/// Number of slots allocated when no explicit count is given.
pub const DEFAULT_BUFFER_COUNT: usize = 4;

/// Contract pool-managed buffer types must provide.
pub trait PoolBuffer: Default + Send {
    /// True when this buffer owns payload storage (swap is possible).
    fn has_storage(&self) -> bool;

    /// Deep-copies contents into `target`, reusing `target`'s storage.
    fn clone_into_buffer(&self, target: &mut Self);

    /// Destructively swaps all contents with `other`.
    fn swap_contents(&mut self, other: &mut Self);

    /// Presentation timestamp in milliseconds.
    fn timestamp(&self) -> i64;
}

impl PoolBuffer for crate::media::AudioBuffer {
    fn has_storage(&self) -> bool {
        self.capacity() > 0
    }

    fn clone_into_buffer(&self, target: &mut Self) {
        self.clone_into_buffer(target);
    }

    fn swap_contents(&mut self, other: &mut Self) {
        self.swap_contents(other);
    }

    fn timestamp(&self) -> i64 {
        self.timestamp()
    }
}

impl PoolBuffer for crate::media::VideoFrame {
    fn has_storage(&self) -> bool {
        self.capacity() > 0
    }

    fn clone_into_buffer(&self, target: &mut Self) {
        self.clone_into_buffer(target);
    }

    fn swap_contents(&mut self, other: &mut Self) {
        self.swap_contents(other);
    }

    fn timestamp(&self) -> i64 {
        self.timestamp()
    }
}

struct PoolQueues<T> {
    free: VecDeque<T>,
    active: VecDeque<T>,
    allow_growth: bool,
}

/// Multi-producer / single-consumer buffer pool.
pub struct BufferPool<T: PoolBuffer> {
    queues: Mutex<PoolQueues<T>>,
}

impl<T: PoolBuffer> BufferPool<T> {
    /// Creates a pool with `initial_count` empty slots.
    ///
    /// With `allow_growth` false the slot count is fixed and `commit` reports
    /// [`PoolError::Full`] once every slot is active; with it true the pool
    /// allocates a new slot instead.
    pub fn new(allow_growth: bool, initial_count: usize) -> Self {
        let mut free = VecDeque::with_capacity(initial_count);
        for _ in 0..initial_count {
            free.push_back(T::default());
        }
        Self { queues: Mutex::new(PoolQueues { free, active: VecDeque::new(), allow_growth }) }
    }

    /// Moves `buffer`'s payload into a free slot and queues it as active.
    ///
    /// On success the caller's buffer holds the slot's recycled storage.
    pub fn commit(&self, buffer: &mut T) -> Result<(), PoolError> {
        let mut queues = self.queues.lock();
        if queues.free.is_empty() {
            if queues.allow_growth {
                queues.free.push_back(T::default());
            } else {
                return Err(PoolError::Full);
            }
        }

        let mut slot = queues.free.pop_front().unwrap_or_default();
        exchange(buffer, &mut slot);
        queues.active.push_back(slot);
        Ok(())
    }

    /// Moves the oldest active payload into `buffer` and recycles the slot.
    pub fn decommit(&self, buffer: &mut T) -> Result<(), PoolError> {
        let mut queues = self.queues.lock();
        let mut slot = queues.active.pop_front().ok_or(PoolError::Empty)?;
        exchange(&mut slot, buffer);
        queues.free.push_back(slot);
        Ok(())
    }

    /// Timestamp of the oldest active buffer, without removing it.
    pub fn active_timestamp(&self) -> Result<i64, PoolError> {
        let queues = self.queues.lock();
        queues.active.front().map(PoolBuffer::timestamp).ok_or(PoolError::Empty)
    }

    /// Discards the oldest active slot back to the free queue.
    pub fn drop_active(&self) {
        let mut queues = self.queues.lock();
        if let Some(slot) = queues.active.pop_front() {
            queues.free.push_back(slot);
        }
    }

    /// Moves every active slot back to the free queue.
    pub fn flush(&self) {
        let mut queues = self.queues.lock();
        while let Some(slot) = queues.active.pop_front() {
            queues.free.push_back(slot);
        }
    }

    /// True when no buffers are waiting for the consumer.
    pub fn is_empty(&self) -> bool {
        self.queues.lock().active.is_empty()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        let queues = self.queues.lock();
        queues.free.len() + queues.active.len()
    }
}

/// Moves `source`'s payload to `target`: swap when `target` already owns
/// storage, deep-clone on first use.
fn exchange<T: PoolBuffer>(source: &mut T, target: &mut T) {
    if target.has_storage() {
        target.swap_contents(source);
    } else {
        source.clone_into_buffer(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioConfig;
    use crate::media::AudioBuffer;

    fn buffer_with(data: &[u8], timestamp: i64) -> AudioBuffer {
        let mut buffer = AudioBuffer::default();
        buffer.init(AudioConfig::default(), timestamp, 10, data);
        buffer
    }

    #[test]
    fn commit_decommit_round_trips_payload() {
        let pool = BufferPool::<AudioBuffer>::new(false, DEFAULT_BUFFER_COUNT);
        let mut input = buffer_with(&[1, 2, 3, 4, 5], 42);
        pool.commit(&mut input).unwrap();

        let mut output = AudioBuffer::default();
        pool.decommit(&mut output).unwrap();
        assert_eq!(output.data(), &[1, 2, 3, 4, 5]);
        assert_eq!(output.timestamp(), 42);
    }

    #[test]
    fn fixed_pool_reports_full() {
        let pool = BufferPool::<AudioBuffer>::new(false, 2);
        let mut a = buffer_with(&[1], 1);
        let mut b = buffer_with(&[2], 2);
        let mut c = buffer_with(&[3], 3);
        pool.commit(&mut a).unwrap();
        pool.commit(&mut b).unwrap();
        assert_eq!(pool.commit(&mut c), Err(PoolError::Full));
        assert_eq!(pool.slot_count(), 2);
    }

    #[test]
    fn growing_pool_never_reports_full() {
        let pool = BufferPool::<AudioBuffer>::new(true, 1);
        for i in 0..8 {
            let mut buffer = buffer_with(&[i], i64::from(i));
            pool.commit(&mut buffer).unwrap();
        }
        assert_eq!(pool.slot_count(), 8);
    }

    #[test]
    fn decommit_preserves_fifo_order() {
        let pool = BufferPool::<AudioBuffer>::new(true, 2);
        for i in 0..4u8 {
            let mut buffer = buffer_with(&[i], i64::from(i) * 10);
            pool.commit(&mut buffer).unwrap();
        }
        let mut out = AudioBuffer::default();
        for i in 0..4u8 {
            pool.decommit(&mut out).unwrap();
            assert_eq!(out.data(), &[i]);
        }
        assert_eq!(pool.decommit(&mut out), Err(PoolError::Empty));
    }

    #[test]
    fn active_timestamp_peeks_without_removing() {
        let pool = BufferPool::<AudioBuffer>::new(false, 4);
        assert_eq!(pool.active_timestamp(), Err(PoolError::Empty));
        let mut buffer = buffer_with(&[1], 77);
        pool.commit(&mut buffer).unwrap();
        assert_eq!(pool.active_timestamp(), Ok(77));
        assert!(!pool.is_empty());
    }

    #[test]
    fn drop_active_discards_oldest() {
        let pool = BufferPool::<AudioBuffer>::new(false, 4);
        let mut a = buffer_with(&[1], 1);
        let mut b = buffer_with(&[2], 2);
        pool.commit(&mut a).unwrap();
        pool.commit(&mut b).unwrap();
        pool.drop_active();
        assert_eq!(pool.active_timestamp(), Ok(2));
    }

    #[test]
    fn flush_empties_active_queue() {
        let pool = BufferPool::<AudioBuffer>::new(false, 4);
        for i in 0..3u8 {
            let mut buffer = buffer_with(&[i], i64::from(i));
            pool.commit(&mut buffer).unwrap();
        }
        pool.flush();
        assert!(pool.is_empty());
        assert_eq!(pool.slot_count(), 4);
    }

    #[test]
    fn steady_state_commit_recycles_storage() {
        let pool = BufferPool::<AudioBuffer>::new(false, 1);
        let mut buffer = buffer_with(&vec![7u8; 1024], 0);
        pool.commit(&mut buffer).unwrap();
        let mut out = AudioBuffer::default();
        pool.decommit(&mut out).unwrap();

        // The slot now owns storage; a second commit must swap, handing the
        // slot's previous allocation back to the caller.
        let mut next = buffer_with(&[1, 2, 3], 1);
        pool.commit(&mut next).unwrap();
        assert!(next.capacity() >= 1024);
    }
}
