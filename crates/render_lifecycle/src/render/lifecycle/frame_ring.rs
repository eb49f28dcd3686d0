//! Frames-in-flight ring
//!
//! The ring owns one [`FrameSlot`] per frame the CPU may record ahead of the
//! GPU. Frame `n` always uses slot `n % slot_count`, and the slot's completion
//! fence is the only thing that decides when its resources may be reclaimed:
//!
//! ```text
//! advance():
//!   1. wait on the slot's fence (bounded)      ── timeout is fatal
//!   2. flush the slot's deletion queue
//!   3. clear the slot's descriptor pools
//!   4. acquire a target image                  ── stale: request rebuild, return
//!   5. reset + begin commands, record, end
//!   6. reset fence, submit (acquire ─► render semaphores, fence)
//!   7. present                                 ── stale: request rebuild
//!   8. frame_number += 1
//! ```
//!
//! Fences are created signaled, so the first cycle through the ring never
//! blocks. The fence is reset only right before the submit that will signal it
//! again; an iteration that bails out at step 4 leaves it signaled so the next
//! attempt on the same slot does not wait forever.
//!
//! An image acquired at step 4 always goes back to the target. When recording
//! fails, the slot submits an empty batch that waits on the acquire semaphore,
//! presents the image untouched and returns the recording error; the frame
//! number stays put and the next `advance` reuses the slot. When that recovery
//! fails, or a submit or present after recording fails, the ring is poisoned:
//! `advance` refuses to run and only `destroy` is allowed.

use std::sync::Arc;

use ash::vk;

use crate::config::LifecycleConfig;
use crate::render::backend::{
    AcquireOutcome, CommandContext, FenceStatus, GpuBackend, PresentOutcome, Submission,
    SurfaceProvider, WaitSignal,
};
use crate::render::descriptors::{DescriptorLayout, GrowableDescriptorAllocator};
use crate::render::error::{RenderError, RenderResult};
use crate::render::lifecycle::{DeletionQueue, QueueLifetime, ReleaseRequest};

/// Per-frame synchronization objects and transient resources
pub struct FrameSlot<B: GpuBackend> {
    index: usize,
    render_fence: vk::Fence,
    acquire_semaphore: vk::Semaphore,
    render_semaphore: vk::Semaphore,
    commands: CommandContext,
    deletion_queue: DeletionQueue,
    descriptors: GrowableDescriptorAllocator<B>,
}

impl<B: GpuBackend> FrameSlot<B> {
    fn create(backend: &Arc<B>, index: usize, config: &LifecycleConfig) -> RenderResult<Self> {
        let mut descriptors = GrowableDescriptorAllocator::with_capacity_ceiling(
            Arc::clone(backend),
            config.frame_pools.initial_sets,
            &config.frame_pools.ratios,
            config.max_sets_per_pool,
        )?;

        let mut created = Vec::new();
        match Self::create_sync_objects(&**backend, &mut created) {
            Ok((render_fence, acquire_semaphore, render_semaphore, commands)) => {
                log::debug!("Created frame slot {}", index);
                Ok(Self {
                    index,
                    render_fence,
                    acquire_semaphore,
                    render_semaphore,
                    commands,
                    deletion_queue: DeletionQueue::new(QueueLifetime::Frame(index)),
                    descriptors,
                })
            }
            Err(e) => {
                for request in created.into_iter().rev() {
                    backend.release(request);
                }
                descriptors.destroy_all();
                Err(e)
            }
        }
    }

    /// Create the fence, semaphores and command context, recording each
    /// object in `created` so a partial failure can be unwound
    fn create_sync_objects(
        backend: &B,
        created: &mut Vec<ReleaseRequest>,
    ) -> RenderResult<(vk::Fence, vk::Semaphore, vk::Semaphore, CommandContext)> {
        let render_fence = backend.create_fence(true)?;
        created.push(ReleaseRequest::Fence(render_fence));
        let acquire_semaphore = backend.create_semaphore()?;
        created.push(ReleaseRequest::Semaphore(acquire_semaphore));
        let render_semaphore = backend.create_semaphore()?;
        created.push(ReleaseRequest::Semaphore(render_semaphore));
        let commands = backend.create_command_context()?;
        Ok((render_fence, acquire_semaphore, render_semaphore, commands))
    }

    fn destroy(mut self, backend: &B) {
        self.deletion_queue.flush(backend);
        self.descriptors.destroy_all();
        backend.destroy_command_context(self.commands);
        backend.destroy_semaphore(self.render_semaphore);
        backend.destroy_semaphore(self.acquire_semaphore);
        backend.destroy_fence(self.render_fence);
        log::debug!("Destroyed frame slot {}", self.index);
    }

    /// Position of this slot in the ring
    pub fn index(&self) -> usize {
        self.index
    }

    /// Completion fence, signaled when the slot's last submission finished
    pub fn render_fence(&self) -> vk::Fence {
        self.render_fence
    }

    /// Semaphore signaled by target image acquisition
    pub fn acquire_semaphore(&self) -> vk::Semaphore {
        self.acquire_semaphore
    }

    /// Semaphore signaled when rendering finishes, waited on by present
    pub fn render_semaphore(&self) -> vk::Semaphore {
        self.render_semaphore
    }

    /// Primary command buffer recorded each time the slot comes around
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.commands.buffer
    }

    /// Releases waiting for this slot's fence
    pub fn deletion_queue(&self) -> &DeletionQueue {
        &self.deletion_queue
    }

    /// Per-frame descriptor allocator
    pub fn descriptors(&self) -> &GrowableDescriptorAllocator<B> {
        &self.descriptors
    }
}

/// What one ring iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Work was recorded and submitted
    Submitted {
        /// Frame number the work was recorded for
        frame_number: u64,
        /// Target image rendered into
        image_index: u32,
        /// Present reported the target stale; a rebuild is pending
        target_stale: bool,
    },
    /// Acquisition reported the target stale; nothing was submitted
    TargetStale,
    /// Rendering was skipped (minimized window)
    Skipped,
}

/// Everything the record callback may touch during one frame
pub struct FrameContext<'a, B: GpuBackend> {
    frame_number: u64,
    slot_index: usize,
    image_index: u32,
    command_buffer: vk::CommandBuffer,
    backend: &'a B,
    deletion_queue: &'a mut DeletionQueue,
    descriptors: &'a mut GrowableDescriptorAllocator<B>,
}

impl<'a, B: GpuBackend> FrameContext<'a, B> {
    /// Frame being recorded
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Ring slot in use
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    /// Target image index
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Command buffer in the recording state
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Backend context
    pub fn backend(&self) -> &'a B {
        self.backend
    }

    /// Allocate a set valid until this slot comes around again
    pub fn allocate_set(&mut self, layout: &DescriptorLayout) -> RenderResult<vk::DescriptorSet> {
        self.descriptors.allocate(layout)
    }

    /// Release `request` once this frame's work has completed
    pub fn defer_release(&mut self, request: ReleaseRequest) {
        self.deletion_queue.push(request);
    }

    /// Releases already deferred by this slot, this frame included
    pub fn pending_releases(&self) -> &[ReleaseRequest] {
        self.deletion_queue.pending()
    }
}

/// Fixed ring of frame slots
pub struct FrameRing<B: GpuBackend> {
    backend: Arc<B>,
    slots: Vec<FrameSlot<B>>,
    frame_number: u64,
    frame_timeout_ns: u64,
    reconstruction_requested: bool,
    poisoned: bool,
}

impl<B: GpuBackend> FrameRing<B> {
    /// Create `config.frames_in_flight` slots
    pub fn new(backend: Arc<B>, config: &LifecycleConfig) -> RenderResult<Self> {
        if config.frames_in_flight == 0 {
            return Err(RenderError::invalid("frame ring needs at least one slot"));
        }

        let mut slots = Vec::with_capacity(config.frames_in_flight);
        for index in 0..config.frames_in_flight {
            match FrameSlot::create(&backend, index, config) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    log::error!("Failed to create frame slot {}: {}", index, e);
                    for slot in slots {
                        slot.destroy(&backend);
                    }
                    return Err(e);
                }
            }
        }

        log::info!("Frame ring ready with {} slots", slots.len());
        Ok(Self {
            backend,
            slots,
            frame_number: 0,
            frame_timeout_ns: config.frame_timeout_ns,
            reconstruction_requested: false,
            poisoned: false,
        })
    }

    /// Run one iteration of the frame protocol on the current slot
    ///
    /// `record` is called with the slot's command buffer already in the
    /// recording state. An error from any step, including `record`, is
    /// returned without advancing the frame number. A failed `record` hands
    /// the acquired image back before returning; see the module docs for when
    /// an error poisons the ring instead.
    pub fn advance<S, F>(&mut self, surface: &mut S, record: F) -> RenderResult<FrameOutcome>
    where
        S: SurfaceProvider + ?Sized,
        F: FnOnce(&mut FrameContext<'_, B>) -> RenderResult<()>,
    {
        if self.slots.is_empty() {
            return Err(RenderError::invalid("frame ring already destroyed"));
        }
        if self.poisoned {
            return Err(RenderError::invalid("frame ring poisoned by an earlier failure; destroy it"));
        }

        let slot_index = self.current_slot_index();
        let frame_number = self.frame_number;
        let backend = &*self.backend;
        let slot = &mut self.slots[slot_index];

        match backend.wait_for_fence(slot.render_fence, self.frame_timeout_ns)? {
            FenceStatus::Signaled => {}
            FenceStatus::TimedOut => {
                log::error!(
                    "Frame {} timed out waiting on slot {} ({} releases held back)",
                    frame_number,
                    slot_index,
                    slot.deletion_queue.len()
                );
                return Err(RenderError::FrameTimeout {
                    slot: slot_index,
                    timeout_ns: self.frame_timeout_ns,
                });
            }
        }

        slot.deletion_queue.flush(backend);
        slot.descriptors.clear_all()?;

        let image_index = match surface.acquire_next_image(slot.acquire_semaphore, self.frame_timeout_ns)? {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::Stale => {
                log::warn!("Presentation target stale on acquire (frame {})", frame_number);
                self.reconstruction_requested = true;
                return Ok(FrameOutcome::TargetStale);
            }
        };

        if let Err(e) = Self::record_frame(backend, slot, frame_number, image_index, record) {
            log::error!(
                "Recording frame {} failed after acquiring image {}: {}",
                frame_number,
                image_index,
                e
            );
            match Self::hand_back_image(backend, slot, surface, image_index) {
                Ok(PresentOutcome::Presented) => {}
                Ok(PresentOutcome::Stale) => self.reconstruction_requested = true,
                Err(recovery) => {
                    log::error!("Could not hand image {} back: {}; frame ring poisoned", image_index, recovery);
                    self.poisoned = true;
                }
            }
            return Err(e);
        }

        if let Err(e) = Self::submit_frame(backend, slot) {
            log::error!("Submitting frame {} failed: {}; frame ring poisoned", frame_number, e);
            self.poisoned = true;
            return Err(e);
        }

        let target_stale = match surface.present(image_index, slot.render_semaphore) {
            Ok(PresentOutcome::Presented) => false,
            Ok(PresentOutcome::Stale) => {
                log::warn!("Presentation target stale on present (frame {})", frame_number);
                self.reconstruction_requested = true;
                true
            }
            Err(e) => {
                log::error!("Presenting frame {} failed: {}; frame ring poisoned", frame_number, e);
                self.poisoned = true;
                return Err(e);
            }
        };

        self.frame_number += 1;
        log::trace!("Frame {} submitted on slot {} (image {})", frame_number, slot_index, image_index);
        Ok(FrameOutcome::Submitted {
            frame_number,
            image_index,
            target_stale,
        })
    }

    fn record_frame<F>(
        backend: &B,
        slot: &mut FrameSlot<B>,
        frame_number: u64,
        image_index: u32,
        record: F,
    ) -> RenderResult<()>
    where
        F: FnOnce(&mut FrameContext<'_, B>) -> RenderResult<()>,
    {
        let command_buffer = slot.commands.buffer;
        backend.reset_commands(command_buffer)?;
        backend.begin_commands(command_buffer)?;
        let mut context = FrameContext {
            frame_number,
            slot_index: slot.index,
            image_index,
            command_buffer,
            backend,
            deletion_queue: &mut slot.deletion_queue,
            descriptors: &mut slot.descriptors,
        };
        record(&mut context)?;
        backend.end_commands(command_buffer)
    }

    fn submit_frame(backend: &B, slot: &FrameSlot<B>) -> RenderResult<()> {
        backend.reset_fence(slot.render_fence)?;
        backend.submit(&Submission {
            command_buffer: slot.commands.buffer,
            wait: Some(WaitSignal {
                semaphore: slot.acquire_semaphore,
                stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            }),
            signal: Some(slot.render_semaphore),
            fence: slot.render_fence,
        })
    }

    /// Consume the acquire semaphore with an empty batch and present
    /// `image_index` unchanged
    fn hand_back_image<S: SurfaceProvider + ?Sized>(
        backend: &B,
        slot: &FrameSlot<B>,
        surface: &mut S,
        image_index: u32,
    ) -> RenderResult<PresentOutcome> {
        let command_buffer = slot.commands.buffer;
        backend.reset_commands(command_buffer)?;
        backend.begin_commands(command_buffer)?;
        backend.end_commands(command_buffer)?;
        Self::submit_frame(backend, slot)?;
        surface.present(image_index, slot.render_semaphore)
    }

    /// Frames submitted so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Number of slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next [`Self::advance`] will use
    pub fn current_slot_index(&self) -> usize {
        match self.slots.len() {
            0 => 0,
            count => usize::try_from(self.frame_number % count as u64).unwrap_or(0),
        }
    }

    /// Slot the next [`Self::advance`] will use, unless the ring is destroyed
    pub fn current_slot(&self) -> Option<&FrameSlot<B>> {
        self.slots.get(self.current_slot_index())
    }

    /// Slot at `index`
    pub fn slot(&self, index: usize) -> Option<&FrameSlot<B>> {
        self.slots.get(index)
    }

    /// Whether the presentation target must be rebuilt before the next frame
    pub fn reconstruction_requested(&self) -> bool {
        self.reconstruction_requested
    }

    /// Clear and return the rebuild request
    pub fn take_reconstruction_request(&mut self) -> bool {
        std::mem::take(&mut self.reconstruction_requested)
    }

    /// Whether a failure left the ring unable to advance
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Whether [`Self::destroy`] has run
    pub fn is_destroyed(&self) -> bool {
        self.slots.is_empty()
    }

    /// Tear down every slot
    ///
    /// Waits for the device to go idle first. Each slot's pending releases run,
    /// then its pools, command pool, fence and semaphores are destroyed.
    ///
    /// A lost device runs no more work, so teardown still happens and the
    /// error is returned afterwards. Any other idle failure leaves every slot
    /// alive and returns the error; `destroy` may be called again later.
    /// Calling this after a successful teardown is a no-op.
    pub fn destroy(&mut self) -> RenderResult<()> {
        if self.slots.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.backend.wait_idle() {
            if !e.is_device_lost() {
                let held: usize = self.slots.iter().map(|slot| slot.deletion_queue.len()).sum();
                log::error!(
                    "Device idle wait failed: {}; keeping {} frame slots and {} pending releases alive",
                    e,
                    self.slots.len(),
                    held
                );
                return Err(e);
            }
            log::error!("Device lost before frame ring teardown; destroying slots anyway");
            self.destroy_slots();
            return Err(e);
        }

        self.destroy_slots();
        Ok(())
    }

    fn destroy_slots(&mut self) {
        let backend = &*self.backend;
        for slot in self.slots.drain(..) {
            slot.destroy(backend);
        }
        log::debug!("Frame ring destroyed after {} frames", self.frame_number);
    }
}

impl<B: GpuBackend> Drop for FrameRing<B> {
    fn drop(&mut self) {
        if !self.slots.is_empty() {
            log::warn!("FrameRing dropped with {} live slots; call destroy first", self.slots.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::render::backends::headless::{HeadlessGpu, HeadlessSurface};
    use crate::render::descriptors::{DescriptorLayoutBuilder, PoolSizeRatio, ResourceKind};
    use ash::vk::Handle;

    fn small_config() -> LifecycleConfig {
        LifecycleConfig::default().with_frame_pools(PoolConfig::new(
            4,
            vec![PoolSizeRatio::new(ResourceKind::UniformBuffer, 1.0)],
        ))
    }

    fn uniform_layout(gpu: &HeadlessGpu) -> DescriptorLayout {
        let mut builder = DescriptorLayoutBuilder::new();
        builder.add_binding(0, ResourceKind::UniformBuffer);
        builder.build(gpu, vk::ShaderStageFlags::VERTEX).expect("layout")
    }

    #[test]
    fn test_slots_rotate_and_frame_number_advances() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(3);
        let mut ring = FrameRing::new(Arc::clone(&gpu), &small_config()).expect("ring");
        assert_eq!(ring.slot_count(), 2);

        let mut seen = Vec::new();
        for _ in 0..5 {
            let outcome = ring
                .advance(&mut surface, |frame| {
                    seen.push((frame.frame_number(), frame.slot_index()));
                    Ok(())
                })
                .expect("advance");
            assert!(matches!(outcome, FrameOutcome::Submitted { target_stale: false, .. }));
        }

        assert_eq!(seen, vec![(0, 0), (1, 1), (2, 0), (3, 1), (4, 0)]);
        assert_eq!(ring.frame_number(), 5);
        assert_eq!(ring.current_slot_index(), 1);
        assert_eq!(gpu.stats().submissions, 5);
        ring.destroy().expect("destroy");
    }

    #[test]
    fn test_deferred_release_waits_for_slot_to_come_around() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(2);
        let mut ring = FrameRing::new(Arc::clone(&gpu), &small_config()).expect("ring");
        let sampler = ReleaseRequest::Sampler(vk::Sampler::from_raw(0xAB));

        ring.advance(&mut surface, |frame| {
            frame.defer_release(sampler);
            assert_eq!(frame.pending_releases(), &[sampler]);
            Ok(())
        })
        .expect("frame 0");
        ring.advance(&mut surface, |_| Ok(())).expect("frame 1");
        assert!(!gpu.released().contains(&sampler));
        assert_eq!(ring.slot(0).map(|s| s.deletion_queue().len()), Some(1));

        ring.advance(&mut surface, |_| Ok(())).expect("frame 2");
        assert!(gpu.released().contains(&sampler));
        assert_eq!(ring.slot(0).map(|s| s.deletion_queue().len()), Some(0));
        ring.destroy().expect("destroy");
    }

    #[test]
    fn test_frame_sets_are_recycled_each_cycle() {
        let gpu = Arc::new(HeadlessGpu::new());
        let layout = uniform_layout(&gpu);
        let mut surface = HeadlessSurface::new(2);
        let mut ring = FrameRing::new(Arc::clone(&gpu), &small_config()).expect("ring");

        for _ in 0..6 {
            ring.advance(&mut surface, |frame| {
                for _ in 0..4 {
                    frame.allocate_set(&layout)?;
                }
                Ok(())
            })
            .expect("advance");
        }

        // Four sets fit the first pool of each slot, so nothing ever grows
        for index in 0..2 {
            assert_eq!(ring.slot(index).map(|s| s.descriptors().pool_count()), Some(1));
        }
        ring.destroy().expect("destroy");
        layout.destroy(&*gpu);
    }

    #[test]
    fn test_stale_acquire_leaves_frame_untouched() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(2);
        let mut ring = FrameRing::new(Arc::clone(&gpu), &small_config()).expect("ring");

        surface.set_stale(true);
        let mut recorded = false;
        let outcome = ring
            .advance(&mut surface, |_| {
                recorded = true;
                Ok(())
            })
            .expect("stale is not an error");

        assert_eq!(outcome, FrameOutcome::TargetStale);
        assert!(!recorded);
        assert_eq!(ring.frame_number(), 0);
        assert!(ring.take_reconstruction_request());
        assert!(!ring.reconstruction_requested());

        surface.set_stale(false);
        ring.advance(&mut surface, |_| Ok(())).expect("retry does not block");
        assert_eq!(ring.frame_number(), 1);
        ring.destroy().expect("destroy");
    }

    #[test]
    fn test_stale_present_still_counts_the_frame() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(2);
        let mut ring = FrameRing::new(Arc::clone(&gpu), &small_config()).expect("ring");

        surface.stale_on_next_present();
        let outcome = ring.advance(&mut surface, |_| Ok(())).expect("advance");

        assert!(matches!(outcome, FrameOutcome::Submitted { frame_number: 0, target_stale: true, .. }));
        assert_eq!(ring.frame_number(), 1);
        assert!(ring.reconstruction_requested());
        ring.destroy().expect("destroy");
    }

    #[test]
    fn test_record_error_hands_the_image_back() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(3);
        let mut ring = FrameRing::new(Arc::clone(&gpu), &small_config()).expect("ring");
        let sampler = ReleaseRequest::Sampler(vk::Sampler::from_raw(0xCD));

        let result = ring.advance(&mut surface, |frame| {
            frame.defer_release(sampler);
            Err(RenderError::invalid("record failed"))
        });
        assert!(matches!(result, Err(RenderError::InvalidOperation { .. })));
        assert_eq!(ring.frame_number(), 0);
        assert!(!ring.is_poisoned());
        // Image 0 went back through an empty submission
        assert_eq!(surface.presented(), 1);
        assert_eq!(gpu.stats().submissions, 1);
        assert!(!gpu.released().contains(&sampler));

        let outcome = ring.advance(&mut surface, |_| Ok(())).expect("retry");
        assert_eq!(
            outcome,
            FrameOutcome::Submitted {
                frame_number: 0,
                image_index: 1,
                target_stale: false,
            }
        );
        assert_eq!(surface.presented(), 2);
        assert!(gpu.released().contains(&sampler));
        ring.destroy().expect("destroy");
    }

    #[test]
    fn test_submit_failure_poisons_the_ring() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(2);
        let mut ring = FrameRing::new(Arc::clone(&gpu), &small_config()).expect("ring");

        gpu.fail_submissions(true);
        assert!(matches!(
            ring.advance(&mut surface, |_| Ok(())),
            Err(RenderError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        gpu.fail_submissions(false);

        assert!(ring.is_poisoned());
        assert!(matches!(
            ring.advance(&mut surface, |_| Ok(())),
            Err(RenderError::InvalidOperation { .. })
        ));
        assert_eq!(surface.presented(), 0);
        ring.destroy().expect("destroy");
        assert!(ring.is_destroyed());
    }

    #[test]
    fn test_failed_hand_back_poisons_the_ring() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(2);
        let mut ring = FrameRing::new(Arc::clone(&gpu), &small_config()).expect("ring");

        let failing = Arc::clone(&gpu);
        let result = ring.advance(&mut surface, move |_| {
            failing.fail_submissions(true);
            Err(RenderError::invalid("record failed"))
        });
        gpu.fail_submissions(false);

        assert!(matches!(result, Err(RenderError::InvalidOperation { .. })));
        assert!(ring.is_poisoned());
        assert!(ring.advance(&mut surface, |_| Ok(())).is_err());
        assert_eq!(gpu.stats().submissions, 0);
        ring.destroy().expect("destroy");
    }

    #[test]
    fn test_destroy_keeps_slots_when_idle_fails() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(2);
        let mut ring = FrameRing::new(Arc::clone(&gpu), &small_config()).expect("ring");
        let sampler = ReleaseRequest::Sampler(vk::Sampler::from_raw(0xEF));
        ring.advance(&mut surface, |frame| {
            frame.defer_release(sampler);
            Ok(())
        })
        .expect("advance");

        gpu.fail_idle_with(Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert!(matches!(
            ring.destroy(),
            Err(RenderError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
        ));
        assert!(!ring.is_destroyed());
        assert!(!gpu.released().contains(&sampler));
        assert_eq!(gpu.live_fence_count(), 2);

        gpu.fail_idle_with(None);
        ring.destroy().expect("retry");
        assert!(gpu.released().contains(&sampler));
        assert_eq!(gpu.live_fence_count(), 0);
    }

    #[test]
    fn test_destroy_releases_slot_objects() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut ring = FrameRing::new(Arc::clone(&gpu), &small_config()).expect("ring");
        assert_eq!(gpu.live_pool_count(), 2);

        ring.destroy().expect("destroy");
        assert!(ring.is_destroyed());
        assert!(ring.current_slot().is_none());
        assert_eq!(gpu.live_pool_count(), 0);
        assert_eq!(gpu.live_fence_count(), 0);
        assert!(ring.destroy().is_ok());

        let mut surface = HeadlessSurface::new(2);
        assert!(ring.advance(&mut surface, |_| Ok(())).is_err());
    }
}
