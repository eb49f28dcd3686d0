//! Render lifecycle error types

use ash::vk;
use thiserror::Error;

use crate::config::ConfigError;
use crate::render::backend::ExhaustionCause;
use crate::render::descriptors::ResourceKind;

/// Errors raised by the lifecycle subsystem
///
/// Everything here is fatal for the current device: once backend state is
/// suspect, the "no use-after-free of GPU-visible memory" guarantee no longer
/// holds. Single-pool exhaustion inside the growable allocator is handled
/// internally and never reaches this type.
#[derive(Error, Debug)]
pub enum RenderError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Descriptor pool backing storage could not be created
    #[error("Descriptor pool creation failed for {max_sets} sets: {result:?}")]
    PoolCreationFailed {
        /// Set capacity that was requested
        max_sets: u32,
        /// Backend result code
        result: vk::Result,
    },

    /// A standalone fixed-capacity pool ran out of room
    #[error("Descriptor pool with {max_sets} sets is exhausted ({cause:?})")]
    PoolExhausted {
        /// Set capacity of the pool
        max_sets: u32,
        /// Why the pool refused the allocation
        cause: ExhaustionCause,
    },

    /// The allocation retried on a second pool still failed
    #[error("Descriptor allocation failed after rotating to a pool of {pool_sets} sets ({cause:?})")]
    AllocationRetryFailed {
        /// Set capacity of the pool used for the retry
        pool_sets: u32,
        /// Why the retry pool refused the allocation
        cause: ExhaustionCause,
    },

    /// The layout does not fit in the retry pool given the configured ratios
    #[error(
        "Layout needs {required} {kind:?} descriptors but a pool of {pool_sets} sets provides only {available}"
    )]
    LayoutUnsatisfiable {
        /// Resource kind the ratios under-provision
        kind: ResourceKind,
        /// Descriptors of that kind one set of the layout needs
        required: u32,
        /// Descriptors of that kind in the retry pool
        available: u32,
        /// Set capacity of the retry pool
        pool_sets: u32,
    },

    /// A frame slot's completion fence did not signal in time
    #[error("Frame slot {slot} completion fence not signaled within {timeout_ns} ns")]
    FrameTimeout {
        /// Ring slot that was waited on
        slot: usize,
        /// Wait bound in nanoseconds
        timeout_ns: u64,
    },

    /// The immediate-submission fence did not signal in time
    #[error("Immediate submission not completed within {timeout_ns} ns")]
    ImmediateTimeout {
        /// Wait bound in nanoseconds
        timeout_ns: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Configuration rejected at startup
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Lifecycle initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}

impl RenderError {
    /// Shorthand for [`RenderError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }

    /// Whether the device was lost
    ///
    /// A lost device runs no more work, so its objects may be destroyed even
    /// though an idle wait failed.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::Api(vk::Result::ERROR_DEVICE_LOST))
    }
}

/// Result type for lifecycle operations
pub type RenderResult<T> = Result<T, RenderError>;
