use std::fmt;
use std::str::FromStr;

use wgpu::BufferUsages;

use crate::error::{PoolError, Result};

/// Environment variable consulted by [`UploadStrategy::from_env`].
pub const UPLOAD_STRATEGY_ENV: &str = "UBPOOL_UPLOAD_STRATEGY";

/// Default safe-frame count (K).
pub const DEFAULT_SAFE_FRAMES: usize = 5;

/// How single-frame uniform buffers get their constants onto the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStrategy {
    /// A pooled buffer is filled when the uniform buffer is created.
    #[default]
    ImmediateGpuCopy,
    /// Constants stay on the CPU and are copied per shader stage at bind time.
    DeferredCpuCopy,
}

impl UploadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStrategy::ImmediateGpuCopy => "immediate-gpu-copy",
            UploadStrategy::DeferredCpuCopy => "deferred-cpu-copy",
        }
    }

    /// Read the strategy from `UBPOOL_UPLOAD_STRATEGY`, falling back to the default
    /// when the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(UPLOAD_STRATEGY_ENV) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::default()),
        }
    }
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStrategy {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "immediate-gpu-copy" => Ok(UploadStrategy::ImmediateGpuCopy),
            "deferred-cpu-copy" => Ok(UploadStrategy::DeferredCpuCopy),
            other => Err(PoolError::UnknownUploadStrategy(other.to_string())),
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of frames a pooled buffer waits before it can be handed out again.
    ///
    /// Correctness-critical: must be greater than the number of frames the
    /// device may have in flight. Too small a value lets the CPU overwrite a
    /// buffer the GPU is still reading, which shows up as corrupt rendering and
    /// is not reported at runtime.
    pub safe_frames: usize,
    pub upload: UploadStrategy,
    /// Usage flags for every buffer the pool creates, pooled or dedicated.
    pub usage: BufferUsages,
    pub label: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            safe_frames: DEFAULT_SAFE_FRAMES,
            upload: UploadStrategy::default(),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            label: Some("ubpool".into()),
        }
    }
}

impl PoolConfig {
    pub fn new(safe_frames: usize, upload: UploadStrategy) -> Result<Self> {
        let config = Self {
            safe_frames,
            upload,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.safe_frames < 2 {
            return Err(PoolError::InvalidConfig(format!(
                "safe_frames must be at least 2, got {}",
                self.safe_frames
            )));
        }
        if self.usage.is_empty() {
            return Err(PoolError::InvalidConfig("buffer usage flags are empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognized_strategies() {
        assert_eq!(
            "immediate-gpu-copy".parse::<UploadStrategy>().unwrap(),
            UploadStrategy::ImmediateGpuCopy
        );
        assert_eq!(
            " deferred-cpu-copy\n".parse::<UploadStrategy>().unwrap(),
            UploadStrategy::DeferredCpuCopy
        );
        assert_eq!(UploadStrategy::DeferredCpuCopy.to_string(), "deferred-cpu-copy");
    }

    #[test]
    fn rejects_unknown_strategy() {
        let err = "real-ubs".parse::<UploadStrategy>().unwrap_err();
        assert!(matches!(err, PoolError::UnknownUploadStrategy(s) if s == "real-ubs"));
    }

    #[test]
    fn safe_frames_must_cover_a_frame_in_flight() {
        assert!(PoolConfig::new(1, UploadStrategy::ImmediateGpuCopy).is_err());
        let config = PoolConfig::new(3, UploadStrategy::DeferredCpuCopy).unwrap();
        assert_eq!(config.safe_frames, 3);
        assert!(config.usage.contains(BufferUsages::UNIFORM));
    }
}
