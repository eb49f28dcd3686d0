//! Swapchain-backed presentation target

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;

use crate::render::backend::{AcquireOutcome, PresentOutcome, SurfaceProvider};
use crate::render::error::{RenderError, RenderResult};

/// Callback that builds a replacement swapchain from the old one
///
/// Receives the current swapchain (to pass as `old_swapchain`) and returns the
/// new handle. The callback owns the window extent and surface queries and is
/// responsible for destroying the old swapchain.
pub type RebuildSwapchain = Box<dyn FnMut(vk::SwapchainKHR) -> RenderResult<vk::SwapchainKHR>>;

/// Presentation target driving a `VkSwapchainKHR`
pub struct VulkanPresentTarget {
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    present_queue: vk::Queue,
    rebuild: RebuildSwapchain,
}

impl VulkanPresentTarget {
    /// Wrap an existing swapchain
    pub fn new(
        loader: SwapchainLoader,
        swapchain: vk::SwapchainKHR,
        present_queue: vk::Queue,
        rebuild: RebuildSwapchain,
    ) -> Self {
        Self {
            loader,
            swapchain,
            present_queue,
            rebuild,
        }
    }

    /// Current swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl SurfaceProvider for VulkanPresentTarget {
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> RenderResult<AcquireOutcome> {
        match unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, signal, vk::Fence::null())
        } {
            Ok((image_index, _suboptimal)) => Ok(AcquireOutcome::Acquired(image_index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(e) => Err(RenderError::Api(e)),
        }
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> RenderResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(self.present_queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(RenderError::Api(e)),
        }
    }

    fn rebuild(&mut self) -> RenderResult<()> {
        self.swapchain = (self.rebuild)(self.swapchain)?;
        log::debug!("Swapchain rebuilt: {:?}", self.swapchain);
        Ok(())
    }
}
