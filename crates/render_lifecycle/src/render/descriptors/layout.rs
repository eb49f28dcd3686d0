//! Descriptor set layouts and the builder that declares them

use ash::vk;

use crate::render::backend::DescriptorBackend;
use crate::render::descriptors::ResourceKind;
use crate::render::error::RenderResult;
use crate::render::lifecycle::ReleaseRequest;

/// One `(slot index, resource kind)` pair of a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    /// Binding slot index
    pub binding: u32,
    /// Kind of resource bound at the slot
    pub kind: ResourceKind,
}

/// Declared shape of a descriptor set, plus the backend handle built from it
///
/// The shape is kept alongside the handle so allocators can tell whether a
/// pool built from a given set of ratios could ever hold a set of this layout.
/// Destruction is explicit: push [`DescriptorLayout::release_request`] onto a
/// deletion queue, or call [`DescriptorLayout::destroy`] once no pipeline uses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorLayout {
    handle: vk::DescriptorSetLayout,
    bindings: Vec<LayoutBinding>,
    stages: vk::ShaderStageFlags,
}

impl DescriptorLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    /// Shader stages that can see the bindings
    pub fn stages(&self) -> vk::ShaderStageFlags {
        self.stages
    }

    /// Descriptors of `kind` one set of this layout consumes
    pub fn count_of(&self, kind: ResourceKind) -> u32 {
        let count = self.bindings.iter().filter(|b| b.kind == kind).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Distinct kinds this layout uses, in first-binding order
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds = Vec::new();
        for binding in &self.bindings {
            if !kinds.contains(&binding.kind) {
                kinds.push(binding.kind);
            }
        }
        kinds
    }

    /// Deferred release request for this layout
    pub fn release_request(&self) -> ReleaseRequest {
        ReleaseRequest::DescriptorSetLayout(self.handle)
    }

    /// Destroy the layout immediately
    pub fn destroy<B: DescriptorBackend + ?Sized>(self, backend: &B) {
        backend.destroy_descriptor_set_layout(self.handle);
    }
}

/// Descriptor set layout builder for creating reusable layouts
///
/// ```rust,ignore
/// let mut builder = DescriptorLayoutBuilder::new();
/// builder.add_binding(0, ResourceKind::StorageImage);
/// let draw_image_layout = builder.build(backend, vk::ShaderStageFlags::COMPUTE)?;
///
/// builder.clear();
/// builder.add_binding(0, ResourceKind::UniformBuffer);
/// let scene_layout = builder.build(backend, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<LayoutBinding>,
}

impl DescriptorLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding of one descriptor of `kind` at slot `binding`
    pub fn add_binding(&mut self, binding: u32, kind: ResourceKind) -> &mut Self {
        self.bindings.push(LayoutBinding { binding, kind });
        self
    }

    /// Forget all bindings so the builder can declare another layout
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Bindings declared so far
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    /// Build the layout, making every binding visible to `stages`
    pub fn build<B: DescriptorBackend + ?Sized>(
        &self,
        backend: &B,
        stages: vk::ShaderStageFlags,
    ) -> RenderResult<DescriptorLayout> {
        let handle = backend.create_descriptor_set_layout(&self.bindings, stages)?;
        log::trace!("Built descriptor set layout {:?} with {} bindings", handle, self.bindings.len());

        Ok(DescriptorLayout {
            handle,
            bindings: self.bindings.clone(),
            stages,
        })
    }
}
