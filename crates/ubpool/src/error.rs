use thiserror::Error;

use crate::uniform::layout::ResourceKind;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Failed to request GPU adapter")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Buffer of {size} bytes exceeds the device limit of {limit} bytes")]
    BufferTooLarge { size: u64, limit: u64 },

    #[error("Pool already owns {0} buffers")]
    TooManyBuffers(usize),

    #[error("Uniform buffer layout has neither constant data nor resources")]
    EmptyLayout,

    #[error("Uniform buffer layout declares {0} constant bytes but no contents were given")]
    MissingContents(u32),

    #[error("Uniform buffer contents are {actual} bytes, layout requires {expected}")]
    ContentsTooSmall { expected: u32, actual: usize },

    #[error("Layout declares {expected} resources, {actual} were given")]
    ResourceCountMismatch { expected: usize, actual: usize },

    #[error("Resource {index} is a {actual:?}, layout expects a {expected:?}")]
    ResourceKindMismatch {
        index: usize,
        expected: ResourceKind,
        actual: ResourceKind,
    },

    #[error("Uniform buffer constants are not CPU-resident")]
    NotCpuResident,

    #[error("Range {start}..{end} is out of bounds for {len} constant bytes")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    #[error("Unknown upload strategy: \"{0}\"")]
    UnknownUploadStrategy(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        assert_eq!(PoolError::NoAdapter.to_string(), "Failed to request GPU adapter");
        assert_eq!(
            PoolError::ContentsTooSmall { expected: 64, actual: 3 }.to_string(),
            "Uniform buffer contents are 3 bytes, layout requires 64"
        );
        assert_eq!(
            PoolError::BufferTooLarge { size: 8, limit: 4 }.to_string(),
            "Buffer of 8 bytes exceeds the device limit of 4 bytes"
        );
    }
}
