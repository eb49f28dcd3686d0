//! Deferred release requests

use ash::vk;
use slotmap::new_key_type;

new_key_type! {
    /// Key of a memory-backed resource in a backend's ownership table
    pub struct AllocationKey;
}

/// A resource to destroy once the GPU can no longer reference it
///
/// Buffers and images carry their own device memory, so they are named by
/// their [`AllocationKey`]; releasing one frees both the object and its memory
/// and removes it from the owning backend's table. Every other variant is a
/// plain handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseRequest {
    /// Memory-backed buffer
    Buffer(AllocationKey),
    /// Memory-backed image
    Image(AllocationKey),
    /// Image view
    ImageView(vk::ImageView),
    /// Sampler
    Sampler(vk::Sampler),
    /// Graphics or compute pipeline
    Pipeline(vk::Pipeline),
    /// Pipeline layout
    PipelineLayout(vk::PipelineLayout),
    /// Descriptor set layout
    DescriptorSetLayout(vk::DescriptorSetLayout),
    /// Descriptor pool
    DescriptorPool(vk::DescriptorPool),
    /// Command pool and every buffer allocated from it
    CommandPool(vk::CommandPool),
    /// Fence
    Fence(vk::Fence),
    /// Semaphore
    Semaphore(vk::Semaphore),
    /// Shader module
    ShaderModule(vk::ShaderModule),
}

impl ReleaseRequest {
    /// Short name of the resource type, for logs
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Image(_) => "image",
            Self::ImageView(_) => "image view",
            Self::Sampler(_) => "sampler",
            Self::Pipeline(_) => "pipeline",
            Self::PipelineLayout(_) => "pipeline layout",
            Self::DescriptorSetLayout(_) => "descriptor set layout",
            Self::DescriptorPool(_) => "descriptor pool",
            Self::CommandPool(_) => "command pool",
            Self::Fence(_) => "fence",
            Self::Semaphore(_) => "semaphore",
            Self::ShaderModule(_) => "shader module",
        }
    }
}
