use std::fmt;
use std::sync::Arc;

use tracing::debug;
use wgpu::BufferUsages;

use crate::error::{PoolError, Result};
use crate::gpu::device::BufferDevice;

/// Number of power-of-two size classes: 1 byte up to 2 GiB.
pub const NUM_BUCKETS: usize = 32;

/// Largest request the pool will serve.
pub const MAX_BUCKET_SIZE: u64 = 1 << (NUM_BUCKETS - 1);

/// Size class of a request: `log2(round_up_to_power_of_two(size))`.
///
/// Zero-sized requests are a caller bug; they land in bucket 0.
pub fn bucket_index(size: u64) -> usize {
    size.max(1).next_power_of_two().trailing_zeros() as usize
}

/// Canonical byte size of a bucket.
pub fn bucket_size(index: usize) -> u64 {
    1u64 << index
}

/// Index of a buffer in the pool's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u32);

impl BufferId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Shared reference to one device buffer.
pub struct BufferHandle<B> {
    buffer: Arc<B>,
    size: u64,
}

impl<B> BufferHandle<B> {
    pub fn new(buffer: B, size: u64) -> Self {
        Self {
            buffer: Arc::new(buffer),
            size,
        }
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Size of the device allocation in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn ptr_eq(&self, other: &BufferHandle<B>) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }
}

impl<B> Clone for BufferHandle<B> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            size: self.size,
        }
    }
}

impl<B> fmt::Debug for BufferHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("size", &self.size)
            .field("ptr", &Arc::as_ptr(&self.buffer))
            .finish()
    }
}

/// A buffer handed out by [`SizeBucketedPool::acquire`].
pub struct PooledBuffer<B> {
    id: BufferId,
    bucket: usize,
    handle: BufferHandle<B>,
}

impl<B> PooledBuffer<B> {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn bucket(&self) -> usize {
        self.bucket
    }

    pub fn handle(&self) -> &BufferHandle<B> {
        &self.handle
    }

    pub fn buffer(&self) -> &B {
        self.handle.buffer()
    }

    pub fn size(&self) -> u64 {
        self.handle.size()
    }
}

impl<B> Clone for PooledBuffer<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            bucket: self.bucket,
            handle: self.handle.clone(),
        }
    }
}

impl<B> fmt::Debug for PooledBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("id", &self.id)
            .field("bucket", &self.bucket)
            .field("size", &self.handle.size)
            .finish()
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub buffers_created: u64,
    pub bytes_allocated: u64,
}

struct Slot<B> {
    handle: BufferHandle<B>,
    bucket: usize,
    last_acquired: u64,
}

/// Free lists of device buffers keyed by power-of-two size class.
///
/// Buffers are never given back to the device while the pool lives; they
/// move between the free lists and the [`FrameRecycler`] ring until
/// [`clear`](Self::clear) destroys them.
///
/// [`FrameRecycler`]: crate::gpu::recycler::FrameRecycler
pub struct SizeBucketedPool<B> {
    buffers: Vec<Slot<B>>,
    free: [Vec<BufferId>; NUM_BUCKETS],
    usage: BufferUsages,
    label: Option<String>,
    safe_frames: usize,
    stats: PoolStats,
}

impl<B> SizeBucketedPool<B> {
    pub fn new(usage: BufferUsages, safe_frames: usize, label: Option<String>) -> Self {
        Self {
            buffers: Vec::new(),
            free: std::array::from_fn(|_| Vec::new()),
            usage,
            label,
            safe_frames,
            stats: PoolStats::default(),
        }
    }

    /// Hand out a buffer of at least `size` bytes, creating one on a miss.
    ///
    /// `frame` is the current frame number, used for the debug reuse check.
    pub fn acquire<D>(&mut self, device: &D, size: u64, frame: u64) -> Result<PooledBuffer<B>>
    where
        D: BufferDevice<Buffer = B>,
    {
        debug_assert!(size > 0, "zero-sized pool request");
        if size > MAX_BUCKET_SIZE {
            return Err(PoolError::BufferTooLarge {
                size,
                limit: MAX_BUCKET_SIZE,
            });
        }

        let bucket = bucket_index(size);

        if let Some(id) = self.free[bucket].pop() {
            let slot = &mut self.buffers[id.index()];
            debug_assert!(
                frame.saturating_sub(slot.last_acquired) + 1 >= self.safe_frames as u64,
                "buffer {id:?} reused {} frames after its last use",
                frame.saturating_sub(slot.last_acquired),
            );
            slot.last_acquired = frame;
            self.stats.hits += 1;
            return Ok(PooledBuffer {
                id,
                bucket,
                handle: slot.handle.clone(),
            });
        }

        let id = u32::try_from(self.buffers.len())
            .map(BufferId)
            .map_err(|_| PoolError::TooManyBuffers(self.buffers.len()))?;
        let canonical = bucket_size(bucket);
        let label = self
            .label
            .as_ref()
            .map(|l| format!("{l} pooled {canonical}B"));
        let buffer = device.create_buffer(canonical, self.usage, label.as_deref())?;

        // Devices may round small buckets up to their copy alignment.
        let allocated = device.buffer_size(&buffer);
        let handle = BufferHandle::new(buffer, allocated);
        self.buffers.push(Slot {
            handle: handle.clone(),
            bucket,
            last_acquired: frame,
        });

        self.stats.misses += 1;
        self.stats.buffers_created += 1;
        self.stats.bytes_allocated += allocated;
        debug!(
            "uniform pool miss: {size} bytes -> new {allocated}B buffer ({} pooled, {} bytes)",
            self.buffers.len(),
            self.stats.bytes_allocated
        );

        Ok(PooledBuffer { id, bucket, handle })
    }

    /// Move every id in `ids` onto the bucket's free list, leaving `ids` empty.
    pub(crate) fn recycle(&mut self, bucket: usize, ids: &mut Vec<BufferId>) {
        self.free[bucket].append(ids);
    }

    pub fn free_len(&self, bucket: usize) -> usize {
        self.free.get(bucket).map_or(0, Vec::len)
    }

    pub fn free_total(&self) -> usize {
        self.free.iter().map(Vec::len).sum()
    }

    pub fn is_free(&self, id: BufferId) -> bool {
        self.buffers
            .get(id.index())
            .is_some_and(|slot| self.free[slot.bucket].contains(&id))
    }

    /// Whether `handle` refers to a buffer owned by this pool.
    pub fn owns(&self, handle: &BufferHandle<B>) -> bool {
        self.buffers.iter().any(|slot| slot.handle.ptr_eq(handle))
    }

    /// Number of buffers the pool has created and still owns.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Destroy every pooled buffer. Ids handed out earlier become invalid.
    pub fn clear<D>(&mut self, device: &D)
    where
        D: BufferDevice<Buffer = B>,
    {
        for slot in self.buffers.drain(..) {
            device.destroy_buffer(slot.handle.buffer());
        }
        for list in &mut self.free {
            list.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::host::HostDevice;

    fn pool() -> SizeBucketedPool<crate::gpu::host::HostBuffer> {
        SizeBucketedPool::new(BufferUsages::UNIFORM | BufferUsages::COPY_DST, 5, None)
    }

    #[test]
    fn bucket_index_rounds_up() {
        assert_eq!(bucket_index(1), 0);
        assert_eq!(bucket_index(2), 1);
        assert_eq!(bucket_index(3), 2);
        assert_eq!(bucket_index(100), 7);
        assert_eq!(bucket_index(128), 7);
        assert_eq!(bucket_index(129), 8);
        assert_eq!(bucket_size(bucket_index(100)), 128);
        assert_eq!(bucket_index(MAX_BUCKET_SIZE), NUM_BUCKETS - 1);
    }

    #[test]
    fn bucket_index_is_monotonic() {
        let mut prev = 0;
        for size in 1..=4096u64 {
            let idx = bucket_index(size);
            assert!(idx >= prev);
            assert!(bucket_size(idx) >= size);
            if idx > 0 {
                assert!(bucket_size(idx - 1) < size);
            }
            prev = idx;
        }
    }

    #[test]
    fn miss_creates_canonical_size() {
        let device = HostDevice::new();
        let mut pool = pool();

        let buf = pool.acquire(&device, 100, 0).unwrap();
        assert_eq!(buf.bucket(), 7);
        assert_eq!(buf.size(), 128);
        assert_eq!(buf.buffer().size(), 128);
        assert_eq!(pool.stats().misses, 1);
        assert_eq!(device.buffers_created(), 1);
    }

    #[test]
    fn recycled_ids_are_reused_without_device_calls() {
        let device = HostDevice::new();
        let mut pool = pool();

        let a = pool.acquire(&device, 60, 0).unwrap();
        pool.recycle(a.bucket(), &mut vec![a.id()]);
        assert!(pool.is_free(a.id()));

        let b = pool.acquire(&device, 33, 10).unwrap();
        assert_eq!(b.id(), a.id());
        assert!(b.handle().ptr_eq(a.handle()));
        assert_eq!(device.buffers_created(), 1);
        assert_eq!(pool.stats().hits, 1);
        assert!(!pool.is_free(a.id()));
    }

    #[test]
    fn reuse_after_safe_window_is_allowed() {
        let device = HostDevice::new();
        let mut pool = pool();

        let a = pool.acquire(&device, 16, 3).unwrap();
        pool.recycle(a.bucket(), &mut vec![a.id()]);
        let b = pool.acquire(&device, 16, 3 + 5).unwrap();
        assert_eq!(b.id(), a.id());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "reused 0 frames after its last use")]
    fn reuse_inside_safe_window_panics_in_debug() {
        let device = HostDevice::new();
        let mut pool = pool();

        let a = pool.acquire(&device, 16, 3).unwrap();
        pool.recycle(a.bucket(), &mut vec![a.id()]);
        let _ = pool.acquire(&device, 16, 3);
    }

    /// Rounds every allocation up to 4 bytes, like wgpu's copy alignment.
    struct AlignedDevice(HostDevice);

    impl BufferDevice for AlignedDevice {
        type Buffer = crate::gpu::host::HostBuffer;

        fn create_buffer(
            &self,
            size: u64,
            usage: BufferUsages,
            label: Option<&str>,
        ) -> Result<Self::Buffer> {
            self.0.create_buffer(size.max(4).next_multiple_of(4), usage, label)
        }

        fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()> {
            self.0.write_buffer(buffer, offset, data)
        }

        fn destroy_buffer(&self, buffer: &Self::Buffer) {
            self.0.destroy_buffer(buffer)
        }

        fn buffer_size(&self, buffer: &Self::Buffer) -> u64 {
            self.0.buffer_size(buffer)
        }
    }

    #[test]
    fn handle_reports_device_allocation_size() {
        let device = AlignedDevice(HostDevice::new());
        let mut pool = pool();

        let one = pool.acquire(&device, 1, 0).unwrap();
        let two = pool.acquire(&device, 2, 0).unwrap();
        assert_eq!((one.bucket(), one.size()), (0, 4));
        assert_eq!((two.bucket(), two.size()), (1, 4));
        assert_eq!(pool.acquire(&device, 5, 0).unwrap().size(), 8);
        assert_eq!(pool.stats().bytes_allocated, 16);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let device = HostDevice::new();
        let mut pool = pool();
        let err = pool.acquire(&device, MAX_BUCKET_SIZE + 1, 0).unwrap_err();
        assert!(matches!(err, PoolError::BufferTooLarge { .. }));
        assert!(pool.is_empty());
    }

    #[test]
    fn clear_destroys_everything() {
        let device = HostDevice::new();
        let mut pool = pool();
        let a = pool.acquire(&device, 16, 0).unwrap();
        let _b = pool.acquire(&device, 16, 0).unwrap();
        pool.recycle(a.bucket(), &mut vec![a.id()]);

        pool.clear(&device);
        assert!(pool.is_empty());
        assert_eq!(pool.free_total(), 0);
        assert_eq!(device.buffers_destroyed(), 2);
        assert!(a.buffer().is_destroyed());
    }
}
