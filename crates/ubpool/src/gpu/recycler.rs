use tracing::trace;

use crate::frame::FrameClock;
use crate::gpu::buffer_pool::{BufferId, PooledBuffer, SizeBucketedPool, NUM_BUCKETS};

/// Holds pooled buffers back from reuse until `safe_frames` frames have passed.
///
/// Buffers registered during frame N sit in ring slot `N % safe_frames`. When
/// the clock reaches `N + safe_frames` that slot comes around again and its
/// buffers go back to the pool's free lists. There are no fences: the
/// latency bound only holds if `safe_frames` exceeds the GPU's frames in
/// flight.
pub struct FrameRecycler {
    clock: FrameClock,
    safe_frames: usize,
    // slot-major: used[slot * NUM_BUCKETS + bucket]
    used: Box<[Vec<BufferId>]>,
    in_flight: usize,
}

impl FrameRecycler {
    pub fn new(safe_frames: usize) -> Self {
        assert!(safe_frames > 0, "safe_frames must be non-zero");
        Self {
            clock: FrameClock::new(),
            safe_frames,
            used: (0..safe_frames * NUM_BUCKETS).map(|_| Vec::new()).collect(),
            in_flight: 0,
        }
    }

    pub fn safe_frames(&self) -> usize {
        self.safe_frames
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn frame(&self) -> u64 {
        self.clock.current()
    }

    fn used_index(&self, slot: usize, bucket: usize) -> usize {
        slot * NUM_BUCKETS + bucket
    }

    /// Record that `buffer` was handed out during the current frame.
    pub fn register_use<B>(&mut self, buffer: &PooledBuffer<B>) {
        let slot = self.clock.slot(self.safe_frames);
        let idx = self.used_index(slot, buffer.bucket());
        self.used[idx].push(buffer.id());
        self.in_flight += 1;
    }

    /// Advance the frame and return the slot being reused to `pool`.
    ///
    /// Returns the number of buffers that became free.
    pub fn begin_frame<B>(&mut self, pool: &mut SizeBucketedPool<B>) -> usize {
        let frame = self.clock.advance();
        let slot = self.clock.slot(self.safe_frames);

        let mut recycled = 0;
        for bucket in 0..NUM_BUCKETS {
            let idx = self.used_index(slot, bucket);
            let ids = &mut self.used[idx];
            if ids.is_empty() {
                continue;
            }
            recycled += ids.len();
            pool.recycle(bucket, ids);
        }
        self.in_flight -= recycled;

        if recycled > 0 {
            trace!("frame {frame}: recycled {recycled} uniform buffers from slot {slot}");
        }
        recycled
    }

    pub fn in_flight_len(&self, bucket: usize) -> usize {
        if bucket >= NUM_BUCKETS {
            return 0;
        }
        (0..self.safe_frames)
            .map(|slot| self.used[self.used_index(slot, bucket)].len())
            .sum()
    }

    pub fn in_flight_total(&self) -> usize {
        self.in_flight
    }

    pub fn is_in_flight(&self, id: BufferId) -> bool {
        self.used.iter().any(|ids| ids.contains(&id))
    }

    /// Forget every in-flight buffer. Used at teardown together with
    /// [`SizeBucketedPool::clear`].
    pub fn clear(&mut self) {
        for ids in self.used.iter_mut() {
            ids.clear();
        }
        self.in_flight = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::host::{HostBuffer, HostDevice};
    use wgpu::BufferUsages;

    const K: usize = 5;

    fn setup() -> (HostDevice, SizeBucketedPool<HostBuffer>, FrameRecycler) {
        (
            HostDevice::new(),
            SizeBucketedPool::new(BufferUsages::UNIFORM, K, None),
            FrameRecycler::new(K),
        )
    }

    #[test]
    fn buffer_returns_after_exactly_k_frames() {
        let (device, mut pool, mut recycler) = setup();

        let buf = pool.acquire(&device, 100, recycler.frame()).unwrap();
        recycler.register_use(&buf);
        assert!(recycler.is_in_flight(buf.id()));

        for _ in 0..K - 1 {
            assert_eq!(recycler.begin_frame(&mut pool), 0);
            assert!(!pool.is_free(buf.id()));
        }
        assert_eq!(recycler.begin_frame(&mut pool), 1);
        assert!(pool.is_free(buf.id()));
        assert!(!recycler.is_in_flight(buf.id()));
        assert_eq!(recycler.in_flight_total(), 0);
    }

    #[test]
    fn slots_only_release_their_own_frame() {
        let (device, mut pool, mut recycler) = setup();

        let first = pool.acquire(&device, 64, recycler.frame()).unwrap();
        recycler.register_use(&first);
        recycler.begin_frame(&mut pool);
        let second = pool.acquire(&device, 64, recycler.frame()).unwrap();
        recycler.register_use(&second);
        assert_eq!(recycler.in_flight_len(6), 2);

        for _ in 0..K - 1 {
            recycler.begin_frame(&mut pool);
        }
        assert!(pool.is_free(first.id()));
        assert!(!pool.is_free(second.id()));

        recycler.begin_frame(&mut pool);
        assert!(pool.is_free(second.id()));
        assert_eq!(pool.free_len(6), 2);
    }

    #[test]
    fn in_flight_len_ignores_unknown_buckets() {
        let (device, mut pool, mut recycler) = setup();
        let buf = pool.acquire(&device, 8, 0).unwrap();
        recycler.register_use(&buf);
        assert_eq!(recycler.in_flight_len(3), 1);
        assert_eq!(recycler.in_flight_len(NUM_BUCKETS), 0);
        assert_eq!(recycler.in_flight_len(40), 0);
    }

    #[test]
    fn clear_drops_in_flight_ids() {
        let (device, mut pool, mut recycler) = setup();
        let buf = pool.acquire(&device, 8, 0).unwrap();
        recycler.register_use(&buf);
        recycler.clear();
        assert_eq!(recycler.in_flight_total(), 0);
        for _ in 0..K {
            recycler.begin_frame(&mut pool);
        }
        assert_eq!(pool.free_total(), 0);
    }
}
