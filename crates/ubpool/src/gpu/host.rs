use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use tracing::trace;
use wgpu::BufferUsages;

use crate::error::{PoolError, Result};
use crate::gpu::device::{check_write_range, BufferDevice};

/// A buffer living in host memory.
#[derive(Debug)]
pub struct HostBuffer {
    id: u64,
    size: u64,
    usage: BufferUsages,
    data: RwLock<Vec<u8>>,
    mapped: AtomicBool,
    destroyed: AtomicBool,
    live: Arc<AtomicUsize>,
    allocated: Arc<AtomicU64>,
}

impl HostBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn usage(&self) -> BufferUsages {
        self.usage
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Snapshot of the buffer contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Map the buffer for writing. It is unmapped when the mapping drops.
    pub fn map_mut(&self) -> HostMapping<'_> {
        let guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        self.mapped.store(true, Ordering::Release);
        HostMapping {
            guard,
            mapped: &self.mapped,
        }
    }

    /// Mark the buffer destroyed and give its bytes back. Returns false if it
    /// already was.
    fn release(&self) -> bool {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.allocated.fetch_sub(self.size, Ordering::AcqRel);
        true
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.release();
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Writable view of a mapped [`HostBuffer`].
pub struct HostMapping<'a> {
    guard: RwLockWriteGuard<'a, Vec<u8>>,
    mapped: &'a AtomicBool,
}

impl Deref for HostMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard
    }
}

impl DerefMut for HostMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard
    }
}

impl Drop for HostMapping<'_> {
    fn drop(&mut self) {
        self.mapped.store(false, Ordering::Release);
    }
}

/// Device that allocates buffers in host memory.
///
/// Used for headless runs and tests. An optional memory budget makes
/// allocation fail the way an exhausted GPU heap would. Bytes count against
/// the budget until the buffer is destroyed or dropped.
#[derive(Debug)]
pub struct HostDevice {
    next_id: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    allocated_bytes: Arc<AtomicU64>,
    budget: Option<u64>,
    live: Arc<AtomicUsize>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            allocated_bytes: Arc::new(AtomicU64::new(0)),
            budget: None,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_memory_budget(budget: u64) -> Self {
        Self {
            budget: Some(budget),
            ..Self::new()
        }
    }

    /// Buffers created since the device was constructed.
    pub fn buffers_created(&self) -> u64 {
        self.created.load(Ordering::Acquire)
    }

    /// Buffers explicitly destroyed through [`BufferDevice::destroy_buffer`].
    pub fn buffers_destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Buffers still referenced somewhere.
    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Bytes held by buffers that are neither destroyed nor dropped.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(Ordering::Acquire)
    }
}

impl BufferDevice for HostDevice {
    type Buffer = HostBuffer;

    fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsages,
        label: Option<&str>,
    ) -> Result<HostBuffer> {
        let len = usize::try_from(size).map_err(|_| PoolError::BufferTooLarge {
            size,
            limit: usize::MAX as u64,
        })?;
        let total = self.allocated_bytes.fetch_add(size, Ordering::AcqRel) + size;
        if let Some(budget) = self.budget {
            if total > budget {
                self.allocated_bytes.fetch_sub(size, Ordering::AcqRel);
                return Err(PoolError::Gpu(format!(
                    "out of device memory: {size} byte allocation exceeds the {budget} byte budget"
                )));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.created.fetch_add(1, Ordering::AcqRel);
        self.live.fetch_add(1, Ordering::AcqRel);
        trace!("host buffer #{id} created: {size} bytes ({})", label.unwrap_or("unlabeled"));

        Ok(HostBuffer {
            id,
            size,
            usage,
            data: RwLock::new(vec![0; len]),
            mapped: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            live: Arc::clone(&self.live),
            allocated: Arc::clone(&self.allocated_bytes),
        })
    }

    fn write_buffer(&self, buffer: &HostBuffer, offset: u64, data: &[u8]) -> Result<()> {
        if buffer.is_destroyed() {
            return Err(PoolError::Gpu(format!("write to destroyed buffer #{}", buffer.id)));
        }
        let end = check_write_range(offset, data.len(), buffer.size, 1)?;
        let mut view = buffer.map_mut();
        view[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: &HostBuffer) {
        if buffer.release() {
            self.destroyed.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn buffer_size(&self, buffer: &HostBuffer) -> u64 {
        buffer.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_unmaps_on_every_path() {
        let device = HostDevice::new();
        let buffer = device
            .create_buffer(8, BufferUsages::UNIFORM, None)
            .unwrap();

        device.write_buffer(&buffer, 2, &[1, 2, 3]).unwrap();
        assert!(!buffer.is_mapped());
        assert_eq!(buffer.contents(), vec![0, 0, 1, 2, 3, 0, 0, 0]);

        assert!(device.write_buffer(&buffer, 6, &[9, 9, 9]).is_err());
        assert!(device.write_buffer(&buffer, u64::MAX, &[9]).is_err());
        assert!(!buffer.is_mapped());
    }

    #[test]
    fn dropped_and_destroyed_buffers_release_their_bytes() {
        let device = HostDevice::new();
        let a = device.create_buffer(4, BufferUsages::UNIFORM, None).unwrap();
        let b = device.create_buffer(8, BufferUsages::UNIFORM, None).unwrap();
        assert_eq!(device.live_buffers(), 2);
        assert_eq!(device.allocated_bytes(), 12);

        drop(a);
        assert_eq!(device.live_buffers(), 1);
        assert_eq!(device.allocated_bytes(), 8);

        device.destroy_buffer(&b);
        device.destroy_buffer(&b);
        assert_eq!(device.buffers_destroyed(), 1);
        assert_eq!(device.allocated_bytes(), 0);

        // Dropping after destroy must not release twice.
        drop(b);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn budget_exhaustion_is_an_error() {
        let device = HostDevice::with_memory_budget(64);
        let held = device.create_buffer(64, BufferUsages::UNIFORM, None).unwrap();
        let err = device.create_buffer(1, BufferUsages::UNIFORM, None).unwrap_err();
        assert!(matches!(err, PoolError::Gpu(_)));
        assert_eq!(device.buffers_created(), 1);
        assert_eq!(device.allocated_bytes(), 64);

        drop(held);
        assert!(device.create_buffer(64, BufferUsages::UNIFORM, None).is_ok());
    }
}
