use std::sync::Arc;

use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::error::Result;
use crate::gpu::buffer_pool::{PooledBuffer, SizeBucketedPool};
use crate::gpu::device::BufferDevice;
use crate::gpu::recycler::FrameRecycler;
use crate::uniform::buffer::{UniformBuffer, UniformContents, UsageMode};
use crate::uniform::layout::UniformBufferLayout;

/// Uniform buffer allocator for one device.
///
/// Owns the size-bucketed pool, the frame recycler and the frame clock. All
/// mutation happens on the render-submission thread through `&mut self`;
/// diagnostics only need `&self`.
///
/// Per frame: call [`begin_frame`](Self::begin_frame) once, before any
/// uniform buffer for that frame is created.
pub struct UniformBufferPool<D: BufferDevice> {
    device: D,
    config: PoolConfig,
    pool: SizeBucketedPool<D::Buffer>,
    recycler: FrameRecycler,
}

impl<D: BufferDevice> UniformBufferPool<D> {
    pub fn new(device: D, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "uniform buffer pool: {} safe frames, {}",
            config.safe_frames, config.upload
        );
        Ok(Self {
            pool: SizeBucketedPool::new(config.usage, config.safe_frames, config.label.clone()),
            recycler: FrameRecycler::new(config.safe_frames),
            device,
            config,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn pool(&self) -> &SizeBucketedPool<D::Buffer> {
        &self.pool
    }

    pub fn recycler(&self) -> &FrameRecycler {
        &self.recycler
    }

    pub fn frame(&self) -> u64 {
        self.recycler.frame()
    }

    /// Start a new frame, returning the oldest ring slot's buffers to the pool.
    pub fn begin_frame(&mut self) -> u64 {
        let recycled = self.recycler.begin_frame(&mut self.pool);
        let frame = self.recycler.frame();
        debug!(
            "begin frame {frame}: {recycled} recycled, {} in flight, {} free",
            self.recycler.in_flight_total(),
            self.pool.free_total()
        );
        frame
    }

    /// Acquire a pooled buffer of at least `size` bytes for the current frame.
    pub fn acquire_transient(&mut self, size: u64) -> Result<PooledBuffer<D::Buffer>> {
        let buffer = self.pool.acquire(&self.device, size, self.recycler.frame())?;
        self.recycler.register_use(&buffer);
        Ok(buffer)
    }

    pub fn create_uniform_buffer(
        &mut self,
        layout: &Arc<UniformBufferLayout>,
        contents: UniformContents<'_>,
        usage: UsageMode,
    ) -> Result<UniformBuffer<D::Buffer>> {
        UniformBuffer::create(self, layout, contents, usage)
    }

    /// Destroy every pooled buffer. The pool stays usable and starts empty.
    pub fn shutdown(&mut self) {
        if self.pool.is_empty() {
            return;
        }
        info!(
            "uniform buffer pool shutdown: destroying {} buffers ({} bytes)",
            self.pool.len(),
            self.pool.stats().bytes_allocated
        );
        self.recycler.clear();
        self.pool.clear(&self.device);
    }
}

impl<D: BufferDevice> Drop for UniformBufferPool<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
