//! Vulkan backend built on `ash`

pub mod device;
pub mod swapchain;

pub use device::VulkanDevice;
pub use swapchain::{RebuildSwapchain, VulkanPresentTarget};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::{GpuBackend, SurfaceProvider};
    use crate::render::engine::LifecycleEngine;

    fn assert_gpu_backend<B: GpuBackend>() {}
    fn assert_surface<S: SurfaceProvider>() {}

    #[test]
    fn test_vulkan_types_plug_into_the_engine() {
        assert_gpu_backend::<VulkanDevice>();
        assert_surface::<VulkanPresentTarget>();
        let _ = std::mem::size_of::<LifecycleEngine<VulkanDevice>>();
    }
}
