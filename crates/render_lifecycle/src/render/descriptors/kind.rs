//! Descriptor resource kinds and pool size ratios

use ash::vk;
use serde::{Deserialize, Serialize};

/// Kind of resource a descriptor binding refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Standalone sampler
    Sampler,
    /// Image view combined with a sampler
    CombinedImageSampler,
    /// Sampled image without a sampler
    SampledImage,
    /// Read/write storage image
    StorageImage,
    /// Uniform texel buffer view
    UniformTexelBuffer,
    /// Storage texel buffer view
    StorageTexelBuffer,
    /// Uniform buffer
    UniformBuffer,
    /// Storage buffer
    StorageBuffer,
    /// Uniform buffer with dynamic offset
    UniformBufferDynamic,
    /// Storage buffer with dynamic offset
    StorageBufferDynamic,
    /// Render pass input attachment
    InputAttachment,
}

impl ResourceKind {
    /// Vulkan descriptor type for this kind
    pub const fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::Sampler => vk::DescriptorType::SAMPLER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            Self::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            Self::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            Self::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        }
    }

    /// Whether bindings of this kind are written with image/sampler info
    pub const fn is_image(self) -> bool {
        matches!(
            self,
            Self::Sampler
                | Self::CombinedImageSampler
                | Self::SampledImage
                | Self::StorageImage
                | Self::InputAttachment
        )
    }

    /// Whether bindings of this kind are written with buffer range info
    pub const fn is_buffer(self) -> bool {
        matches!(
            self,
            Self::UniformBuffer
                | Self::StorageBuffer
                | Self::UniformBufferDynamic
                | Self::StorageBufferDynamic
        )
    }
}

impl From<ResourceKind> for vk::DescriptorType {
    fn from(kind: ResourceKind) -> Self {
        kind.descriptor_type()
    }
}

/// Descriptors of one kind to provision per set of pool capacity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolSizeRatio {
    /// Resource kind
    pub kind: ResourceKind,
    /// Descriptors of `kind` per set
    pub ratio: f32,
}

impl PoolSizeRatio {
    /// Create a ratio entry
    pub const fn new(kind: ResourceKind, ratio: f32) -> Self {
        Self { kind, ratio }
    }

    /// `floor(ratio * set_count)`
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn descriptor_count(&self, set_count: u32) -> u32 {
        (self.ratio * set_count as f32) as u32
    }
}

/// Pool sizes for a pool of `set_count` sets
///
/// Kinds whose count floors to zero are left out; the backend rejects empty
/// size entries.
pub fn pool_sizes(ratios: &[PoolSizeRatio], set_count: u32) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .filter_map(|ratio| {
            let descriptor_count = ratio.descriptor_count(set_count);
            if descriptor_count == 0 {
                log::warn!(
                    "Pool of {} sets gets no {:?} descriptors (ratio {})",
                    set_count,
                    ratio.kind,
                    ratio.ratio
                );
                return None;
            }
            Some(vk::DescriptorPoolSize {
                ty: ratio.kind.descriptor_type(),
                descriptor_count,
            })
        })
        .collect()
}

/// Total descriptors of `kind` a pool of `set_count` sets holds
pub fn kind_capacity(ratios: &[PoolSizeRatio], kind: ResourceKind, set_count: u32) -> u32 {
    ratios
        .iter()
        .filter(|ratio| ratio.kind == kind)
        .map(|ratio| ratio.descriptor_count(set_count))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_count_floors() {
        let ratio = PoolSizeRatio::new(ResourceKind::StorageImage, 1.5);
        assert_eq!(ratio.descriptor_count(10), 15);
        assert_eq!(ratio.descriptor_count(3), 4);

        let ratio = PoolSizeRatio::new(ResourceKind::UniformBuffer, 0.25);
        assert_eq!(ratio.descriptor_count(3), 0);
    }

    #[test]
    fn test_pool_sizes_skip_empty_kinds() {
        let ratios = [
            PoolSizeRatio::new(ResourceKind::UniformBuffer, 3.0),
            PoolSizeRatio::new(ResourceKind::Sampler, 0.1),
        ];
        let sizes = pool_sizes(&ratios, 5);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 15);
    }

    #[test]
    fn test_kind_capacity_sums_duplicates() {
        let ratios = [
            PoolSizeRatio::new(ResourceKind::StorageBuffer, 1.0),
            PoolSizeRatio::new(ResourceKind::StorageBuffer, 2.0),
        ];
        assert_eq!(kind_capacity(&ratios, ResourceKind::StorageBuffer, 10), 30);
        assert_eq!(kind_capacity(&ratios, ResourceKind::StorageImage, 10), 0);
    }

    #[test]
    fn test_image_and_buffer_kinds() {
        assert_eq!(ResourceKind::StorageImage.descriptor_type(), vk::DescriptorType::STORAGE_IMAGE);
        assert!(ResourceKind::StorageImage.is_image());
        assert!(ResourceKind::UniformBufferDynamic.is_buffer());
        assert!(!ResourceKind::UniformTexelBuffer.is_image());
        assert!(!ResourceKind::UniformTexelBuffer.is_buffer());
    }
}
