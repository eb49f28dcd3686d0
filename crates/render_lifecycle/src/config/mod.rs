//! Configuration system
//!
//! Every tunable of the lifecycle subsystem lives in [`LifecycleConfig`]: how many
//! frames may be in flight, how long the CPU may block on a completion fence, and
//! how the per-frame and global descriptor pools are proportioned. Configs load
//! from and save to TOML or RON depending on the file extension.

pub use serde::{Deserialize, Serialize};

use crate::render::descriptors::{PoolSizeRatio, ResourceKind, MAX_SETS_PER_POOL};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside the range the lifecycle subsystem can work with
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Sizing of one family of descriptor pools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Set count of the first pool; later pools grow from here
    pub initial_sets: u32,
    /// Per-kind descriptor ratios applied to every pool of the family
    pub ratios: Vec<PoolSizeRatio>,
}

impl PoolConfig {
    /// Create a pool configuration
    pub fn new(initial_sets: u32, ratios: Vec<PoolSizeRatio>) -> Self {
        Self { initial_sets, ratios }
    }

    /// Pools used by every frame slot: compute, uniform and texture heavy
    pub fn frame_defaults() -> Self {
        Self::new(
            1000,
            vec![
                PoolSizeRatio::new(ResourceKind::StorageImage, 3.0),
                PoolSizeRatio::new(ResourceKind::StorageBuffer, 3.0),
                PoolSizeRatio::new(ResourceKind::UniformBuffer, 3.0),
                PoolSizeRatio::new(ResourceKind::CombinedImageSampler, 4.0),
            ],
        )
    }

    /// Pools for long-lived bindings such as the draw image
    pub fn global_defaults() -> Self {
        Self::new(10, vec![PoolSizeRatio::new(ResourceKind::StorageImage, 1.0)])
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.initial_sets == 0 {
            return Err(ConfigError::Invalid(format!("{name}.initial_sets must be at least 1")));
        }
        if self.ratios.is_empty() {
            return Err(ConfigError::Invalid(format!("{name}.ratios must name at least one resource kind")));
        }
        if let Some(bad) = self.ratios.iter().find(|r| !r.ratio.is_finite() || r.ratio <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "{name}.ratios: {:?} has non-positive ratio {}",
                bad.kind, bad.ratio
            )));
        }
        Ok(())
    }
}

/// # Lifecycle Configuration
///
/// Frames-in-flight, wait timeouts and descriptor pool sizing.
///
/// Scalar fields come before the pool tables so the TOML form stays flat at
/// the top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Number of frame slots in the ring
    pub frames_in_flight: usize,
    /// Bound on the per-frame completion fence wait, in nanoseconds
    pub frame_timeout_ns: u64,
    /// Bound on the immediate-submission fence wait, in nanoseconds
    pub immediate_timeout_ns: u64,
    /// Sleep applied instead of rendering while the window is minimized
    pub minimized_throttle_ms: u64,
    /// Ceiling on the set count of any pool the growable allocators create
    pub max_sets_per_pool: u32,
    /// Per-frame growable allocator sizing
    pub frame_pools: PoolConfig,
    /// Global growable allocator sizing
    pub global_pools: PoolConfig,
}

impl LifecycleConfig {
    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the per-frame fence wait timeout
    pub fn with_frame_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.frame_timeout_ns = timeout_ns;
        self
    }

    /// Set the immediate-submission fence wait timeout
    pub fn with_immediate_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.immediate_timeout_ns = timeout_ns;
        self
    }

    /// Set the minimized-window throttle
    pub fn with_minimized_throttle_ms(mut self, millis: u64) -> Self {
        self.minimized_throttle_ms = millis;
        self
    }

    /// Set the per-pool set ceiling
    pub fn with_max_sets_per_pool(mut self, max_sets: u32) -> Self {
        self.max_sets_per_pool = max_sets;
        self
    }

    /// Set the per-frame pool sizing
    pub fn with_frame_pools(mut self, pools: PoolConfig) -> Self {
        self.frame_pools = pools;
        self
    }

    /// Set the global pool sizing
    pub fn with_global_pools(mut self, pools: PoolConfig) -> Self {
        self.global_pools = pools;
        self
    }

    /// Check the configuration for values the ring cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid("frames_in_flight must be at least 1".to_string()));
        }
        if self.frame_timeout_ns == 0 || self.immediate_timeout_ns == 0 {
            return Err(ConfigError::Invalid("fence wait timeouts must be non-zero".to_string()));
        }
        if self.max_sets_per_pool == 0 {
            return Err(ConfigError::Invalid("max_sets_per_pool must be at least 1".to_string()));
        }
        self.frame_pools.validate("frame_pools")?;
        self.global_pools.validate("global_pools")
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            frame_timeout_ns: 1_000_000_000,
            immediate_timeout_ns: 9_999_999_999,
            minimized_throttle_ms: 100,
            max_sets_per_pool: MAX_SETS_PER_POOL,
            frame_pools: PoolConfig::frame_defaults(),
            global_pools: PoolConfig::global_defaults(),
        }
    }
}

impl Config for LifecycleConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("render_lifecycle_{}_{name}", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = LifecycleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.max_sets_per_pool, 4092);
        assert_eq!(config.frame_pools.initial_sets, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_frames() {
        let config = LifecycleConfig::default().with_frames_in_flight(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_non_positive_ratio() {
        let pools = PoolConfig::new(8, vec![PoolSizeRatio::new(ResourceKind::UniformBuffer, 0.0)]);
        let config = LifecycleConfig::default().with_frame_pools(pools);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let path = temp_path("config.toml");
        let config = LifecycleConfig::default()
            .with_frames_in_flight(3)
            .with_frame_timeout_ns(250_000_000);

        config.save_to_file(&path).expect("save toml");
        let loaded = LifecycleConfig::load_from_file(&path).expect("load toml");
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_round_trip() {
        let path = temp_path("config.ron");
        let config = LifecycleConfig::default().with_global_pools(PoolConfig::new(
            32,
            vec![PoolSizeRatio::new(ResourceKind::CombinedImageSampler, 2.0)],
        ));

        config.save_to_file(&path).expect("save ron");
        let loaded = LifecycleConfig::load_from_file(&path).expect("load ron");
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = LifecycleConfig::load_from_file("lifecycle.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_)) | Err(ConfigError::UnsupportedFormat(_))));
        let save = LifecycleConfig::default().save_to_file("lifecycle.yaml");
        assert!(matches!(save, Err(ConfigError::UnsupportedFormat(_))));
    }
}
