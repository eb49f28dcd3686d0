//! Backend seams consumed by the lifecycle subsystem
//!
//! The allocators, deletion queues and frame ring never talk to a device
//! directly. They receive an explicit backend context at construction and call
//! through the traits below, which the Vulkan backend implements against a real
//! `ash::Device` and the headless backend implements in memory.
//!
//! Handles are plain `ash::vk` handle types so the same values flow through
//! both backends unchanged.
//!
//! ```text
//! DescriptorBackend   pools, sets, layouts, binding writes
//! SubmissionBackend   fences, semaphores, command buffers, queue submit
//! ReleaseBackend      fixed release table for deferred ReleaseRequests
//! SurfaceProvider     acquire / present / rebuild of the presentation target
//! ```

use ash::vk;

use crate::render::descriptors::{LayoutBinding, ResourceKind};
use crate::render::error::RenderResult;
use crate::render::lifecycle::ReleaseRequest;

/// Why a fixed-capacity pool refused an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionCause {
    /// Not enough remaining sets or descriptors of some kind
    OutOfPoolMemory,
    /// Enough capacity in total, but not contiguous
    FragmentedPool,
}

/// Result of asking one pool for one set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetAllocation {
    /// The pool produced a set
    Allocated(vk::DescriptorSet),
    /// The pool is full; rotate to another one
    Exhausted(ExhaustionCause),
}

/// The resource written into one binding of a set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResource {
    /// Image view and/or sampler
    Image {
        /// Image view (null for pure samplers)
        view: vk::ImageView,
        /// Sampler (null for storage/sampled images)
        sampler: vk::Sampler,
        /// Layout the image will be in when the set is used
        layout: vk::ImageLayout,
    },
    /// Buffer range
    Buffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Byte offset into the buffer
        offset: vk::DeviceSize,
        /// Byte range visible to the shader
        range: vk::DeviceSize,
    },
}

/// One pending binding write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Binding slot in the set
    pub binding: u32,
    /// Descriptor kind of the slot
    pub kind: ResourceKind,
    /// What to bind
    pub resource: WriteResource,
}

/// Descriptor pool, set and layout operations
pub trait DescriptorBackend {
    /// Create a pool able to hold `max_sets` sets and the given descriptor counts
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RenderResult<vk::DescriptorPool>;

    /// Return every set allocated from `pool` to it
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RenderResult<()>;

    /// Destroy `pool` and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Allocate one set of `layout` from `pool`
    ///
    /// Capacity exhaustion is reported as [`SetAllocation::Exhausted`], never as
    /// an error.
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RenderResult<SetAllocation>;

    /// Create a set layout with one descriptor per binding
    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
        stages: vk::ShaderStageFlags,
    ) -> RenderResult<vk::DescriptorSetLayout>;

    /// Destroy a set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Apply a batch of binding writes to one set
    fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> RenderResult<()>;
}

/// Outcome of a bounded fence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence is signaled
    Signaled,
    /// The timeout elapsed first
    TimedOut,
}

/// Command pool with its single primary command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandContext {
    /// Pool the buffer was allocated from
    pub pool: vk::CommandPool,
    /// Primary command buffer
    pub buffer: vk::CommandBuffer,
}

/// Semaphore a submission waits on, with the stage that waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSignal {
    /// Semaphore to wait on
    pub semaphore: vk::Semaphore,
    /// Pipeline stage that waits
    pub stage: vk::PipelineStageFlags,
}

/// One queue submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Recorded command buffer
    pub command_buffer: vk::CommandBuffer,
    /// Ordering signal to wait on before execution
    pub wait: Option<WaitSignal>,
    /// Ordering signal raised when execution finishes
    pub signal: Option<vk::Semaphore>,
    /// Completion fence raised when execution finishes
    pub fence: vk::Fence,
}

/// Synchronization objects, command recording and queue submission
pub trait SubmissionBackend {
    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence>;

    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);

    /// Block until `fence` signals or `timeout_ns` elapses
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RenderResult<FenceStatus>;

    /// Return `fence` to the unsignaled state
    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()>;

    /// Create a binary semaphore
    fn create_semaphore(&self) -> RenderResult<vk::Semaphore>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Create a resettable command pool with one primary buffer
    fn create_command_context(&self) -> RenderResult<CommandContext>;

    /// Destroy a command pool and its buffer
    fn destroy_command_context(&self, context: CommandContext);

    /// Reset a command buffer to the initial state
    fn reset_commands(&self, buffer: vk::CommandBuffer) -> RenderResult<()>;

    /// Begin one-time-submit recording
    fn begin_commands(&self, buffer: vk::CommandBuffer) -> RenderResult<()>;

    /// Finish recording
    fn end_commands(&self, buffer: vk::CommandBuffer) -> RenderResult<()>;

    /// Submit recorded work to the graphics queue
    fn submit(&self, submission: &Submission) -> RenderResult<()>;

    /// Block until the device has finished all submitted work
    fn wait_idle(&self) -> RenderResult<()>;
}

/// Fixed release table for deferred release requests
pub trait ReleaseBackend {
    /// Destroy the resource named by `request`
    fn release(&self, request: ReleaseRequest);
}

/// Everything the frame ring and engine need from a device
pub trait GpuBackend: DescriptorBackend + SubmissionBackend + ReleaseBackend {}

impl<T> GpuBackend for T where T: DescriptorBackend + SubmissionBackend + ReleaseBackend {}

/// Outcome of acquiring a presentation target image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image index to render into
    Acquired(u32),
    /// The target must be rebuilt before it can be used again
    Stale,
}

/// Outcome of presenting a rendered image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued for presentation
    Presented,
    /// The target must be rebuilt before the next frame
    Stale,
}

/// Presentation target (swapchain) provider
pub trait SurfaceProvider {
    /// Acquire the next image, signaling `signal` when it is ready for writing
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> RenderResult<AcquireOutcome>;

    /// Present `image_index` once `wait` is signaled
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> RenderResult<PresentOutcome>;

    /// Rebuild the target; the device is idle when this is called
    fn rebuild(&mut self) -> RenderResult<()>;
}
