//! # Render Lifecycle
//!
//! GPU resource lifecycle management for a Vulkan rendering engine.
//!
//! GPU work executes asynchronously relative to the thread that records it, so a
//! resource released too early shows up as nondeterministic corruption rather
//! than a crash. This crate owns the pieces that make reclamation safe:
//!
//! - **Descriptor Pools**: fixed-capacity arenas and a growable allocator that
//!   rotates, grows and recycles them
//! - **Deletion Queues**: deferred release requests executed in reverse order
//! - **Frame Ring**: frames-in-flight slots gated on per-slot completion fences
//! - **Immediate Submission**: blocking one-off uploads
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use render_lifecycle::prelude::*;
//! use render_lifecycle::render::backends::headless::{HeadlessGpu, HeadlessSurface};
//!
//! fn main() -> Result<(), RenderError> {
//!     let gpu = Arc::new(HeadlessGpu::new());
//!     let mut surface = HeadlessSurface::new(3);
//!     let mut engine = LifecycleEngine::new(gpu, LifecycleConfig::default())?;
//!
//!     let mut builder = DescriptorLayoutBuilder::new();
//!     builder.add_binding(0, ResourceKind::UniformBuffer);
//!     let layout = builder.build(engine.backend(), ash::vk::ShaderStageFlags::VERTEX)?;
//!
//!     engine.draw_frame(&mut surface, |frame| {
//!         let _set = frame.allocate_set(&layout)?;
//!         Ok(())
//!     })?;
//!
//!     engine.main_deletion_queue_mut().push(layout.release_request());
//!     engine.shutdown()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, LifecycleConfig, PoolConfig},
        render::{
            backend::{
                DescriptorBackend, GpuBackend, ReleaseBackend, SubmissionBackend, SurfaceProvider,
            },
            descriptors::{
                DescriptorAllocator, DescriptorLayout, DescriptorLayoutBuilder, DescriptorWriter,
                GrowableDescriptorAllocator, PoolSizeRatio, ResourceKind,
            },
            engine::LifecycleEngine,
            error::{RenderError, RenderResult},
            lifecycle::{
                DeletionQueue, FrameContext, FrameOutcome, FrameRing, ImmediateSubmitter,
                QueueLifetime, ReleaseRequest,
            },
        },
    };
}
