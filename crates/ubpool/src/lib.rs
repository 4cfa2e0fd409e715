//! # ubpool
//!
//! Transient uniform buffer pooling for wgpu renderers.
//!
//! Single-frame uniform buffers come from power-of-two size buckets and are
//! held back for `safe_frames` frames before reuse, so the CPU never writes a
//! buffer the GPU may still be reading. Multi-frame uniform buffers get a
//! dedicated allocation.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ubpool::{PoolConfig, UniformBufferLayout, UniformBufferPool, UniformContents, UsageMode, WgpuDevice};
//!
//! # async fn example() -> ubpool::Result<()> {
//! let gpu = ubpool::init_gpu().await?;
//! let mut uniforms = UniformBufferPool::new(WgpuDevice::from_context(&gpu), PoolConfig::default())?;
//! let layout = Arc::new(UniformBufferLayout::new("tint", 16));
//!
//! for _ in 0..3 {
//!     uniforms.begin_frame();
//!     let tint = [1.0f32, 0.5, 0.25, 1.0];
//!     let ub = uniforms.create_uniform_buffer(
//!         &layout,
//!         UniformContents::from_pod(&tint),
//!         UsageMode::SingleFrame,
//!     )?;
//!     let _binding = ub.buffer().map(|b| b.buffer().as_entire_binding());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod uniform;

pub use config::{PoolConfig, UploadStrategy};
pub use context::UniformBufferPool;
pub use error::{PoolError, Result};
pub use frame::FrameClock;
pub use gpu::{init_gpu, BufferDevice, GpuContext, HostDevice, WgpuDevice};
pub use uniform::{
    PackedUniforms, ResourceKind, ResourceRef, ShaderStage, UniformBuffer, UniformBufferLayout,
    UniformContents, UniformStorage, UsageMode,
};
