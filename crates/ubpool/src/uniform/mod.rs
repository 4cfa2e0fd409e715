pub mod buffer;
pub mod layout;
pub mod packed;

pub use buffer::{UniformBuffer, UniformContents, UniformStorage, UsageMode};
pub use layout::{ResourceDescriptor, ResourceKind, ResourceRef, UniformBufferLayout};
pub use packed::{PackedUniforms, ShaderStage};
