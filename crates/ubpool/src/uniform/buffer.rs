use std::ops::Range;
use std::sync::Arc;

use tracing::trace;

use crate::config::UploadStrategy;
use crate::context::UniformBufferPool;
use crate::error::{PoolError, Result};
use crate::gpu::buffer_pool::{BufferHandle, PooledBuffer};
use crate::gpu::device::BufferDevice;
use crate::uniform::layout::{ResourceRef, UniformBufferLayout};

/// How long a uniform buffer's contents must stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsageMode {
    /// Per-draw parameters, rewritten every frame. Served from the pool.
    #[default]
    SingleFrame,
    /// Parameters kept across frames. Gets a dedicated buffer.
    MultiFrame,
}

/// Where a uniform buffer's constants live.
pub enum UniformStorage<B> {
    /// Borrowed from the pool for the current frame.
    Pooled(PooledBuffer<B>),
    /// Owned by this uniform buffer alone; freed with it.
    Dedicated(BufferHandle<B>),
    /// Kept on the CPU until a per-stage upload.
    Deferred(Vec<u8>),
}

impl<B> std::fmt::Debug for UniformStorage<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniformStorage::Pooled(buf) => f.debug_tuple("Pooled").field(buf).finish(),
            UniformStorage::Dedicated(buf) => f.debug_tuple("Dedicated").field(buf).finish(),
            UniformStorage::Deferred(bytes) => {
                f.debug_tuple("Deferred").field(&bytes.len()).finish()
            }
        }
    }
}

/// Input to [`UniformBuffer::create`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformContents<'a> {
    pub constants: Option<&'a [u8]>,
    pub resources: &'a [ResourceRef],
}

impl<'a> UniformContents<'a> {
    pub fn new(constants: &'a [u8]) -> Self {
        Self {
            constants: Some(constants),
            resources: &[],
        }
    }

    pub fn from_pod<T: bytemuck::Pod>(value: &'a T) -> Self {
        Self::new(bytemuck::bytes_of(value))
    }

    pub fn resources_only(resources: &'a [ResourceRef]) -> Self {
        Self {
            constants: None,
            resources,
        }
    }

    pub fn with_resources(mut self, resources: &'a [ResourceRef]) -> Self {
        self.resources = resources;
        self
    }
}

/// One snapshot of shader constants plus the resources bound with them.
pub struct UniformBuffer<B> {
    layout: Arc<UniformBufferLayout>,
    usage: UsageMode,
    storage: Option<UniformStorage<B>>,
    resources: Vec<ResourceRef>,
}

impl<B> UniformBuffer<B> {
    /// Create a uniform buffer from `contents`.
    ///
    /// A pooled buffer is never handed back when the uniform buffer drops;
    /// it becomes reusable only once the pool's frame ring comes around.
    pub fn create<D>(
        pool: &mut UniformBufferPool<D>,
        layout: &Arc<UniformBufferLayout>,
        contents: UniformContents<'_>,
        usage: UsageMode,
    ) -> Result<Self>
    where
        D: BufferDevice<Buffer = B>,
    {
        let constants = validate(layout, &contents)?;

        let storage = match constants {
            None => None,
            Some(bytes) => Some(match usage {
                UsageMode::MultiFrame => {
                    let size = bytes.len() as u64;
                    let label = format!("{} (multi-frame)", layout.name);
                    let buffer = pool.device().create_buffer_init(
                        size,
                        pool.config().usage,
                        Some(&label),
                        bytes,
                    )?;
                    trace!("dedicated uniform buffer for {}: {size} bytes", layout.name);
                    UniformStorage::Dedicated(BufferHandle::new(buffer, size))
                }
                UsageMode::SingleFrame => match pool.config().upload {
                    UploadStrategy::ImmediateGpuCopy => {
                        let pooled = pool.acquire_transient(bytes.len() as u64)?;
                        pool.device().write_buffer(pooled.buffer(), 0, bytes)?;
                        UniformStorage::Pooled(pooled)
                    }
                    UploadStrategy::DeferredCpuCopy => UniformStorage::Deferred(bytes.to_vec()),
                },
            }),
        };

        Ok(Self {
            layout: Arc::clone(layout),
            usage,
            storage,
            resources: contents.resources.to_vec(),
        })
    }

    pub fn layout(&self) -> &UniformBufferLayout {
        &self.layout
    }

    pub fn usage(&self) -> UsageMode {
        self.usage
    }

    /// `None` for resource-only uniform buffers.
    pub fn storage(&self) -> Option<&UniformStorage<B>> {
        self.storage.as_ref()
    }

    /// Resources in layout declaration order.
    pub fn resources(&self) -> &[ResourceRef] {
        &self.resources
    }

    /// The device buffer holding the constants, unless they are CPU-resident.
    pub fn buffer(&self) -> Option<&BufferHandle<B>> {
        match self.storage.as_ref()? {
            UniformStorage::Pooled(pooled) => Some(pooled.handle()),
            UniformStorage::Dedicated(handle) => Some(handle),
            UniformStorage::Deferred(_) => None,
        }
    }

    /// CPU copy of the constants for the deferred upload path.
    pub fn constant_data(&self) -> Result<&[u8]> {
        match self.storage.as_ref() {
            Some(UniformStorage::Deferred(bytes)) => Ok(bytes),
            _ => Err(PoolError::NotCpuResident),
        }
    }

    pub(crate) fn constant_range(&self, range: Range<usize>) -> Result<&[u8]> {
        let bytes = self.constant_data()?;
        if range.start > range.end || range.end > bytes.len() {
            return Err(PoolError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                len: bytes.len(),
            });
        }
        Ok(&bytes[range])
    }
}

impl<B> std::fmt::Debug for UniformBuffer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformBuffer")
            .field("layout", &self.layout.name)
            .field("usage", &self.usage)
            .field("storage", &self.storage)
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// Check the creation preconditions and return the constant bytes to upload.
fn validate<'a>(
    layout: &UniformBufferLayout,
    contents: &UniformContents<'a>,
) -> Result<Option<&'a [u8]>> {
    if layout.constant_buffer_size == 0 && layout.resources.is_empty() {
        return Err(PoolError::EmptyLayout);
    }

    let constants = if layout.has_constants() {
        let bytes = contents
            .constants
            .ok_or(PoolError::MissingContents(layout.constant_buffer_size))?;
        let size = layout.constant_buffer_size as usize;
        if bytes.len() < size {
            return Err(PoolError::ContentsTooSmall {
                expected: layout.constant_buffer_size,
                actual: bytes.len(),
            });
        }
        Some(&bytes[..size])
    } else {
        None
    };

    if contents.resources.len() != layout.resources.len() {
        return Err(PoolError::ResourceCountMismatch {
            expected: layout.resources.len(),
            actual: contents.resources.len(),
        });
    }
    for (index, (desc, resource)) in layout.resources.iter().zip(contents.resources).enumerate() {
        if desc.kind != resource.kind() {
            return Err(PoolError::ResourceKindMismatch {
                index,
                expected: desc.kind,
                actual: resource.kind(),
            });
        }
    }

    Ok(constants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniform::layout::ResourceKind;

    #[test]
    fn empty_layout_is_rejected() {
        let layout = UniformBufferLayout::new("empty", 0);
        let err = validate(&layout, &UniformContents::default()).unwrap_err();
        assert!(matches!(err, PoolError::EmptyLayout));
    }

    #[test]
    fn constants_are_truncated_to_layout_size() {
        let layout = UniformBufferLayout::new("params", 4);
        let bytes = [1u8, 2, 3, 4, 5, 6];
        let constants = validate(&layout, &UniformContents::new(&bytes)).unwrap();
        assert_eq!(constants, Some(&bytes[..4]));

        let err = validate(&layout, &UniformContents::new(&bytes[..3])).unwrap_err();
        assert!(matches!(err, PoolError::ContentsTooSmall { expected: 4, actual: 3 }));
    }

    #[test]
    fn resource_table_must_match_layout() {
        let sampler = Arc::new(7u32);
        let layout = UniformBufferLayout::new("tex", 0).with_resource(0, ResourceKind::Texture);

        let err = validate(&layout, &UniformContents::default()).unwrap_err();
        assert!(matches!(err, PoolError::ResourceCountMismatch { expected: 1, actual: 0 }));

        let wrong = [ResourceRef::sampler(&sampler)];
        let err = validate(&layout, &UniformContents::resources_only(&wrong)).unwrap_err();
        assert!(matches!(err, PoolError::ResourceKindMismatch { index: 0, .. }));
    }
}
