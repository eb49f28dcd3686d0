//! Lifecycle engine
//!
//! Top-level owner of every lifecycle component: the frame ring, the global
//! descriptor allocator for long-lived bindings, the process-wide deletion
//! queue and the immediate submitter. All of them share one explicit backend
//! context handed in at construction.
//!
//! Shutdown order:
//!
//! ```text
//! wait idle
//!   └─► ring: per-slot queues, pools, command pools, fences, semaphores
//!         └─► global descriptor pools
//!               └─► process-wide queue (immediate submitter, user resources)
//! ```
//!
//! Nothing is released unless the idle wait succeeds or reports a lost
//! device. Any other idle failure aborts shutdown with everything still alive.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use crate::config::LifecycleConfig;
use crate::render::backend::{GpuBackend, SurfaceProvider};
use crate::render::descriptors::GrowableDescriptorAllocator;
use crate::render::error::RenderResult;
use crate::render::lifecycle::{
    DeletionQueue, FrameContext, FrameOutcome, FrameRing, ImmediateSubmitter, QueueLifetime,
};

/// Owner of the lifecycle subsystem for one device
pub struct LifecycleEngine<B: GpuBackend> {
    backend: Arc<B>,
    config: LifecycleConfig,
    ring: FrameRing<B>,
    global_descriptors: GrowableDescriptorAllocator<B>,
    main_deletion_queue: DeletionQueue,
    immediate: ImmediateSubmitter<B>,
    minimized: bool,
    is_shut_down: bool,
}

impl<B: GpuBackend> LifecycleEngine<B> {
    /// Validate `config` and build every component
    pub fn new(backend: Arc<B>, config: LifecycleConfig) -> RenderResult<Self> {
        config.validate()?;
        log::info!(
            "Initializing lifecycle engine: {} frames in flight, frame pools {} sets, global pools {} sets",
            config.frames_in_flight,
            config.frame_pools.initial_sets,
            config.global_pools.initial_sets
        );

        let mut main_deletion_queue = DeletionQueue::new(QueueLifetime::Process);

        let immediate = ImmediateSubmitter::new(Arc::clone(&backend), config.immediate_timeout_ns)?;
        for request in immediate.release_requests() {
            main_deletion_queue.push(request);
        }

        let mut global_descriptors = match GrowableDescriptorAllocator::with_capacity_ceiling(
            Arc::clone(&backend),
            config.global_pools.initial_sets,
            &config.global_pools.ratios,
            config.max_sets_per_pool,
        ) {
            Ok(allocator) => allocator,
            Err(e) => {
                main_deletion_queue.flush(&*backend);
                return Err(e);
            }
        };

        let ring = match FrameRing::new(Arc::clone(&backend), &config) {
            Ok(ring) => ring,
            Err(e) => {
                global_descriptors.destroy_all();
                main_deletion_queue.flush(&*backend);
                return Err(e);
            }
        };

        Ok(Self {
            backend,
            config,
            ring,
            global_descriptors,
            main_deletion_queue,
            immediate,
            minimized: false,
            is_shut_down: false,
        })
    }

    /// Render one frame through the ring
    ///
    /// A pending target rebuild is handled first. While minimized, nothing is
    /// recorded; the call sleeps for the configured throttle and returns
    /// [`FrameOutcome::Skipped`].
    pub fn draw_frame<S, F>(&mut self, surface: &mut S, record: F) -> RenderResult<FrameOutcome>
    where
        S: SurfaceProvider + ?Sized,
        F: FnOnce(&mut FrameContext<'_, B>) -> RenderResult<()>,
    {
        if self.minimized {
            std::thread::sleep(Duration::from_millis(self.config.minimized_throttle_ms));
            return Ok(FrameOutcome::Skipped);
        }

        if self.ring.reconstruction_requested() {
            self.reconstruct_target(surface)?;
        }

        self.ring.advance(surface, record)
    }

    /// Wait for the device to go idle and rebuild the presentation target
    pub fn reconstruct_target<S: SurfaceProvider + ?Sized>(&mut self, surface: &mut S) -> RenderResult<()> {
        self.backend.wait_idle()?;
        surface.rebuild()?;
        self.ring.take_reconstruction_request();
        log::info!("Presentation target rebuilt");
        Ok(())
    }

    /// Pause or resume rendering
    pub fn set_minimized(&mut self, minimized: bool) {
        if self.minimized != minimized {
            log::debug!("Window {}", if minimized { "minimized" } else { "restored" });
        }
        self.minimized = minimized;
    }

    /// Whether rendering is paused
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Record and run a one-off submission, blocking until it completes
    pub fn immediate_submit<F>(&mut self, record: F) -> RenderResult<()>
    where
        F: FnOnce(vk::CommandBuffer) -> RenderResult<()>,
    {
        self.immediate.submit(record)
    }

    /// Allocator for bindings that live as long as the engine
    pub fn global_allocator_mut(&mut self) -> &mut GrowableDescriptorAllocator<B> {
        &mut self.global_descriptors
    }

    /// Queue flushed once at shutdown
    pub fn main_deletion_queue_mut(&mut self) -> &mut DeletionQueue {
        &mut self.main_deletion_queue
    }

    /// Queue flushed once at shutdown
    pub fn main_deletion_queue(&self) -> &DeletionQueue {
        &self.main_deletion_queue
    }

    /// The frame ring
    pub fn ring(&self) -> &FrameRing<B> {
        &self.ring
    }

    /// The frame ring, mutably
    pub fn ring_mut(&mut self) -> &mut FrameRing<B> {
        &mut self.ring
    }

    /// Backend context shared by every component
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Active configuration
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Frames submitted so far
    pub fn frame_number(&self) -> u64 {
        self.ring.frame_number()
    }

    /// Whether [`Self::shutdown`] has run
    pub fn is_shut_down(&self) -> bool {
        self.is_shut_down
    }

    /// Wait for the device and release everything the engine owns
    ///
    /// Once teardown has run, later calls return `Ok(())`. If the device was
    /// lost, teardown still runs and the error is returned afterwards. Any other
    /// idle failure returns the error with nothing released, and shutdown may
    /// be retried.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.is_shut_down {
            return Ok(());
        }
        log::info!("Shutting down lifecycle engine after {} frames", self.ring.frame_number());

        let idle = self.ring.destroy();
        if let Err(e) = &idle {
            if !e.is_device_lost() {
                log::error!(
                    "Shutdown aborted: {} global descriptor pools and {} process-lifetime releases held back",
                    self.global_descriptors.pool_count(),
                    self.main_deletion_queue.len()
                );
                return idle;
            }
        }

        self.is_shut_down = true;
        self.global_descriptors.destroy_all();
        let released = self.main_deletion_queue.flush(&*self.backend);
        log::debug!("Released {} process-lifetime resources", released);

        idle
    }
}

impl<B: GpuBackend> Drop for LifecycleEngine<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Lifecycle engine shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::render::backends::headless::{HeadlessGpu, HeadlessSurface};
    use crate::render::descriptors::{DescriptorLayoutBuilder, PoolSizeRatio, ResourceKind};
    use crate::render::error::RenderError;
    use crate::render::lifecycle::ReleaseRequest;

    fn test_config() -> LifecycleConfig {
        LifecycleConfig::default()
            .with_minimized_throttle_ms(1)
            .with_frame_pools(PoolConfig::new(
                8,
                vec![PoolSizeRatio::new(ResourceKind::UniformBuffer, 1.0)],
            ))
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let gpu = Arc::new(HeadlessGpu::new());
        let result = LifecycleEngine::new(gpu, LifecycleConfig::default().with_frames_in_flight(0));
        assert!(matches!(result, Err(RenderError::Config(_))));
    }

    #[test]
    fn test_minimized_skips_rendering() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(2);
        let mut engine = LifecycleEngine::new(Arc::clone(&gpu), test_config()).expect("engine");

        engine.set_minimized(true);
        let outcome = engine.draw_frame(&mut surface, |_| Ok(())).expect("skip");
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(engine.frame_number(), 0);
        assert_eq!(surface.presented(), 0);

        engine.set_minimized(false);
        engine.draw_frame(&mut surface, |_| Ok(())).expect("draw");
        assert_eq!(engine.frame_number(), 1);
        engine.shutdown().expect("shutdown");
    }

    #[test]
    fn test_stale_target_is_rebuilt_before_next_frame() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(2);
        let mut engine = LifecycleEngine::new(Arc::clone(&gpu), test_config()).expect("engine");

        surface.set_stale(true);
        assert_eq!(
            engine.draw_frame(&mut surface, |_| Ok(())).expect("stale"),
            FrameOutcome::TargetStale
        );
        assert!(engine.ring().reconstruction_requested());

        surface.set_stale(false);
        engine.draw_frame(&mut surface, |_| Ok(())).expect("draw");
        assert_eq!(surface.rebuilds(), 1);
        assert!(!engine.ring().reconstruction_requested());
        engine.shutdown().expect("shutdown");
    }

    #[test]
    fn test_global_allocator_outlives_frames() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut surface = HeadlessSurface::new(2);
        let mut engine = LifecycleEngine::new(Arc::clone(&gpu), test_config()).expect("engine");

        let mut builder = DescriptorLayoutBuilder::new();
        builder.add_binding(0, ResourceKind::StorageImage);
        let layout = builder
            .build(engine.backend(), vk::ShaderStageFlags::COMPUTE)
            .expect("layout");
        engine.main_deletion_queue_mut().push(layout.release_request());

        engine.global_allocator_mut().allocate(&layout).expect("global set");
        for _ in 0..4 {
            engine.draw_frame(&mut surface, |_| Ok(())).expect("draw");
        }
        assert_eq!(engine.global_allocator_mut().pool_count(), 1);

        engine.shutdown().expect("shutdown");
        assert_eq!(gpu.live_layout_count(), 0);
        assert_eq!(gpu.live_pool_count(), 0);
    }

    #[test]
    fn test_shutdown_holds_everything_back_when_idle_fails() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut engine = LifecycleEngine::new(Arc::clone(&gpu), test_config()).expect("engine");
        let image = gpu.create_image(4096);
        engine.main_deletion_queue_mut().push(ReleaseRequest::Image(image));

        gpu.fail_idle_with(Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert!(matches!(
            engine.shutdown(),
            Err(RenderError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert!(!engine.is_shut_down());
        assert!(gpu.released().is_empty());
        assert_eq!(gpu.live_allocations(), 1);
        assert!(gpu.live_pool_count() > 0);

        gpu.fail_idle_with(None);
        engine.shutdown().expect("retry");
        assert!(engine.is_shut_down());
        assert_eq!(gpu.live_allocations(), 0);
        assert_eq!(gpu.live_pool_count(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut engine = LifecycleEngine::new(Arc::clone(&gpu), test_config()).expect("engine");

        engine.shutdown().expect("first");
        let released = gpu.released().len();
        engine.shutdown().expect("second");
        drop(engine);
        assert_eq!(gpu.released().len(), released);
    }
}
