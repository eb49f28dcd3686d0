//! Batched descriptor set updates

use ash::vk;

use crate::render::backend::{DescriptorBackend, DescriptorWrite, WriteResource};
use crate::render::descriptors::ResourceKind;
use crate::render::error::{RenderError, RenderResult};

/// Collects binding writes and applies them to a set in one backend call
///
/// ```rust,ignore
/// let mut writer = DescriptorWriter::new();
/// writer
///     .write_image(0, draw_view, vk::Sampler::null(), vk::ImageLayout::GENERAL, ResourceKind::StorageImage)
///     .write_buffer(1, scene_buffer, scene_size, 0, ResourceKind::UniformBuffer);
/// writer.update_set(backend, set)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DescriptorWriter {
    writes: Vec<DescriptorWrite>,
}

impl DescriptorWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an image write
    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        kind: ResourceKind,
    ) -> &mut Self {
        self.writes.push(DescriptorWrite {
            binding,
            kind,
            resource: WriteResource::Image { view, sampler, layout },
        });
        self
    }

    /// Queue a buffer write of `size` bytes starting at `offset`
    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        kind: ResourceKind,
    ) -> &mut Self {
        self.writes.push(DescriptorWrite {
            binding,
            kind,
            resource: WriteResource::Buffer {
                buffer,
                offset,
                range: size,
            },
        });
        self
    }

    /// Drop every queued write
    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Writes queued so far
    pub fn pending(&self) -> &[DescriptorWrite] {
        &self.writes
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether no writes are queued
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply every queued write to `set`
    ///
    /// The queue is kept so the same writes can target several sets; call
    /// [`Self::clear`] to start over.
    pub fn update_set<B: DescriptorBackend + ?Sized>(
        &self,
        backend: &B,
        set: vk::DescriptorSet,
    ) -> RenderResult<()> {
        for write in &self.writes {
            let matches_kind = match write.resource {
                WriteResource::Image { .. } => write.kind.is_image(),
                WriteResource::Buffer { .. } => write.kind.is_buffer(),
            };
            if !matches_kind {
                return Err(RenderError::InvalidOperation {
                    reason: format!(
                        "binding {} of kind {:?} cannot take {}",
                        write.binding,
                        write.kind,
                        match write.resource {
                            WriteResource::Image { .. } => "an image write",
                            WriteResource::Buffer { .. } => "a buffer write",
                        }
                    ),
                });
            }
        }

        if self.writes.is_empty() {
            return Ok(());
        }
        backend.update_descriptor_set(set, &self.writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::HeadlessGpu;
    use crate::render::descriptors::{DescriptorLayoutBuilder, DescriptorPoolArena, PoolSizeRatio};
    use crate::render::backend::SetAllocation;
    use ash::vk::Handle;

    #[test]
    fn test_writes_are_batched() {
        let gpu = HeadlessGpu::new();
        let mut builder = DescriptorLayoutBuilder::new();
        builder
            .add_binding(0, ResourceKind::StorageImage)
            .add_binding(1, ResourceKind::UniformBuffer);
        let layout = builder.build(&gpu, vk::ShaderStageFlags::COMPUTE).expect("layout");
        let ratios = [
            PoolSizeRatio::new(ResourceKind::StorageImage, 1.0),
            PoolSizeRatio::new(ResourceKind::UniformBuffer, 1.0),
        ];
        let arena = DescriptorPoolArena::create(&gpu, 1, &ratios).expect("arena");
        let SetAllocation::Allocated(set) = arena.allocate(&gpu, &layout).expect("set") else {
            panic!("fresh pool refused a set");
        };

        let mut writer = DescriptorWriter::new();
        writer
            .write_image(
                0,
                vk::ImageView::from_raw(7),
                vk::Sampler::null(),
                vk::ImageLayout::GENERAL,
                ResourceKind::StorageImage,
            )
            .write_buffer(1, vk::Buffer::from_raw(9), 256, 0, ResourceKind::UniformBuffer);
        assert_eq!(writer.len(), 2);

        writer.update_set(&gpu, set).expect("update");
        assert_eq!(gpu.stats().descriptor_writes, 2);

        writer.clear();
        assert!(writer.is_empty());
        arena.destroy(&gpu);
    }

    #[test]
    fn test_mismatched_write_is_rejected() {
        let gpu = HeadlessGpu::new();
        let mut writer = DescriptorWriter::new();
        writer.write_buffer(0, vk::Buffer::from_raw(3), 64, 0, ResourceKind::StorageImage);

        let err = writer
            .update_set(&gpu, vk::DescriptorSet::from_raw(1))
            .expect_err("buffer into image binding");
        assert!(matches!(err, RenderError::InvalidOperation { .. }));
        assert_eq!(gpu.stats().descriptor_writes, 0);
    }
}
