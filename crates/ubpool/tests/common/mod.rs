use ubpool::{HostDevice, PoolConfig, UniformBufferPool, UploadStrategy};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ubpool=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

pub fn host_pool(safe_frames: usize, upload: UploadStrategy) -> UniformBufferPool<HostDevice> {
    init_tracing();
    UniformBufferPool::new(HostDevice::new(), PoolConfig::new(safe_frames, upload).unwrap()).unwrap()
}
