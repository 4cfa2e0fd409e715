use std::sync::Arc;

use tracing::warn;
use wgpu::BufferUsages;

use crate::error::{PoolError, Result};

/// The device service the pool allocates from.
///
/// Allocation failures are fatal for the caller: the pool propagates them and
/// never retries or falls back to another allocation strategy.
pub trait BufferDevice {
    type Buffer;

    /// Create an unmapped buffer of at least `size` bytes.
    fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsages,
        label: Option<&str>,
    ) -> Result<Self::Buffer>;

    /// Copy `data` into `buffer` at `offset`. The buffer is unmapped again
    /// before this returns, on every path.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;

    /// Create a buffer and fill it with `data` before the GPU can see it.
    fn create_buffer_init(
        &self,
        size: u64,
        usage: BufferUsages,
        label: Option<&str>,
        data: &[u8],
    ) -> Result<Self::Buffer> {
        let buffer = self.create_buffer(size, usage, label)?;
        self.write_buffer(&buffer, 0, data)?;
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: &Self::Buffer);

    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;
}

/// Validate a write of `len` bytes at `offset` into a `size` byte buffer.
///
/// Returns the end offset of the write.
pub(crate) fn check_write_range(offset: u64, len: usize, size: u64, alignment: u64) -> Result<u64> {
    if offset % alignment != 0 {
        return Err(PoolError::Gpu(format!(
            "write offset {offset} is not a multiple of {alignment}"
        )));
    }
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(end),
        _ => Err(PoolError::Gpu(format!(
            "write of {len} bytes at offset {offset} overflows a {size} byte buffer"
        ))),
    }
}

pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

/// Initialize a wgpu device and queue with the adapter's uniform buffer limits.
pub async fn init_gpu() -> Result<GpuContext> {
    let instance = wgpu::Instance::default();

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            ..Default::default()
        })
        .await
        .map_err(|e| {
            warn!("Failed to get adapter: {e}");
            PoolError::NoAdapter
        })?;

    let mut required_limits = wgpu::Limits::default();
    let adapter_limits = adapter.limits();

    required_limits.max_buffer_size = adapter_limits.max_buffer_size;
    required_limits.max_uniform_buffer_binding_size =
        adapter_limits.max_uniform_buffer_binding_size;
    required_limits.max_uniform_buffers_per_shader_stage =
        adapter_limits.max_uniform_buffers_per_shader_stage;

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("ubpool"),
            required_features: wgpu::Features::empty(),
            required_limits,
            ..Default::default()
        })
        .await?;

    Ok(GpuContext {
        device: Arc::new(device),
        queue: Arc::new(queue),
    })
}

/// [`BufferDevice`] backed by a wgpu device and queue.
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuDevice {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    pub fn from_context(gpu: &GpuContext) -> Self {
        Self::new(Arc::clone(&gpu.device), Arc::clone(&gpu.queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn check_size(&self, size: u64) -> Result<u64> {
        let limit = self.device.limits().max_buffer_size;
        if size > limit {
            return Err(PoolError::BufferTooLarge { size, limit });
        }
        Ok(wgpu::util::align_to(size.max(wgpu::COPY_BUFFER_ALIGNMENT), wgpu::COPY_BUFFER_ALIGNMENT))
    }
}

impl BufferDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;

    fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsages,
        label: Option<&str>,
    ) -> Result<wgpu::Buffer> {
        let size = self.check_size(size)?;
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size,
            usage,
            mapped_at_creation: false,
        }))
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        check_write_range(offset, data.len(), buffer.size(), wgpu::COPY_BUFFER_ALIGNMENT)?;
        // Queue writes must be a multiple of COPY_BUFFER_ALIGNMENT.
        let rem = data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT;
        if rem == 0 {
            self.queue.write_buffer(buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(data.len() + (wgpu::COPY_BUFFER_ALIGNMENT - rem) as usize, 0);
            self.queue.write_buffer(buffer, offset, &padded);
        }
        Ok(())
    }

    fn create_buffer_init(
        &self,
        size: u64,
        usage: BufferUsages,
        label: Option<&str>,
        data: &[u8],
    ) -> Result<wgpu::Buffer> {
        let size = self.check_size(size.max(data.len() as u64))?;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size,
            usage,
            mapped_at_creation: true,
        });
        {
            let mut view = buffer.slice(..).get_mapped_range_mut();
            view[..data.len()].copy_from_slice(data);
        }
        buffer.unmap();
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: &wgpu::Buffer) {
        buffer.destroy();
    }

    fn buffer_size(&self, buffer: &wgpu::Buffer) -> u64 {
        buffer.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_range_checks_alignment_and_bounds() {
        assert_eq!(check_write_range(4, 8, 16, 4).unwrap(), 12);
        assert_eq!(check_write_range(0, 16, 16, 4).unwrap(), 16);

        assert!(matches!(check_write_range(2, 4, 16, 4), Err(PoolError::Gpu(_))));
        assert!(matches!(check_write_range(12, 8, 16, 4), Err(PoolError::Gpu(_))));
        assert!(matches!(
            check_write_range(u64::MAX - 3, 8, u64::MAX, 4),
            Err(PoolError::Gpu(_))
        ));
    }
}
