use std::ops::Range;

use tracing::trace;

use crate::context::UniformBufferPool;
use crate::error::Result;
use crate::gpu::buffer_pool::PooledBuffer;
use crate::gpu::device::BufferDevice;
use crate::uniform::buffer::UniformBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 3] = [ShaderStage::Vertex, ShaderStage::Fragment, ShaderStage::Compute];

    fn index(self) -> usize {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Fragment => 1,
            ShaderStage::Compute => 2,
        }
    }
}

#[derive(Debug, Default)]
struct StageArea {
    bytes: Vec<u8>,
    dirty: bool,
}

/// Per-stage staging for uniform buffers created with `deferred-cpu-copy`.
///
/// Each stage packs the constant ranges it consumes into one byte array and
/// uploads it through the pool when it is bound. The same constants may be
/// copied once for every stage that reads them.
#[derive(Debug, Default)]
pub struct PackedUniforms {
    stages: [StageArea; 3],
}

impl PackedUniforms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `src` of a deferred uniform buffer's constants to `dst_offset` in
    /// the stage's packed area.
    pub fn stage<B>(
        &mut self,
        stage: ShaderStage,
        dst_offset: usize,
        uniform: &UniformBuffer<B>,
        src: Range<usize>,
    ) -> Result<()> {
        let bytes = uniform.constant_range(src)?;
        let area = &mut self.stages[stage.index()];
        let end = dst_offset + bytes.len();
        if area.bytes.len() < end {
            area.bytes.resize(end, 0);
        }
        area.bytes[dst_offset..end].copy_from_slice(bytes);
        area.dirty = true;
        Ok(())
    }

    pub fn staged(&self, stage: ShaderStage) -> &[u8] {
        &self.stages[stage.index()].bytes
    }

    pub fn is_dirty(&self, stage: ShaderStage) -> bool {
        self.stages[stage.index()].dirty
    }

    /// Upload the stage's packed bytes into a pooled buffer for this frame.
    ///
    /// Returns `None` when nothing was staged since the last commit.
    pub fn commit<D>(
        &mut self,
        stage: ShaderStage,
        pool: &mut UniformBufferPool<D>,
    ) -> Result<Option<PooledBuffer<D::Buffer>>>
    where
        D: BufferDevice,
    {
        let area = &mut self.stages[stage.index()];
        if !area.dirty || area.bytes.is_empty() {
            return Ok(None);
        }

        let buffer = pool.acquire_transient(area.bytes.len() as u64)?;
        pool.device().write_buffer(buffer.buffer(), 0, &area.bytes)?;
        area.dirty = false;
        trace!("{stage:?}: uploaded {} packed uniform bytes", area.bytes.len());
        Ok(Some(buffer))
    }

    /// Drop all staged bytes, keeping the allocations.
    pub fn reset(&mut self) {
        for stage in ShaderStage::ALL {
            let area = &mut self.stages[stage.index()];
            area.bytes.clear();
            area.dirty = false;
        }
    }
}
