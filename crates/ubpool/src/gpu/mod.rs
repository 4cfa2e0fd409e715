pub mod buffer_pool;
pub mod device;
pub mod host;
pub mod recycler;

pub use buffer_pool::{bucket_index, bucket_size, BufferHandle, BufferId, PooledBuffer, SizeBucketedPool};
pub use device::{init_gpu, BufferDevice, GpuContext, WgpuDevice};
pub use host::{HostBuffer, HostDevice};
pub use recycler::FrameRecycler;
