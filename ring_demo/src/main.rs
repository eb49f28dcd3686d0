//! Frame ring demo application
//!
//! Runs the lifecycle engine against the headless backend: per-frame descriptor
//! sets and transient buffers, a one-off upload, a stale presentation target
//! and a minimized window, then a full shutdown.
//!
//! ```text
//! ring_demo [config.toml | config.ron] [frames]
//! ```

use std::sync::Arc;

use ash::vk;
use render_lifecycle::foundation::logging;
use render_lifecycle::prelude::*;
use render_lifecycle::render::backends::headless::{HeadlessGpu, HeadlessSurface};

const DEFAULT_FRAMES: u64 = 240;

struct RingDemo {
    gpu: Arc<HeadlessGpu>,
    surface: HeadlessSurface,
    engine: LifecycleEngine<HeadlessGpu>,
    scene_layout: DescriptorLayout,
    material_layout: DescriptorLayout,
}

impl RingDemo {
    fn new(config: LifecycleConfig) -> RenderResult<Self> {
        let gpu = Arc::new(HeadlessGpu::new());
        let surface = HeadlessSurface::new(3);
        let mut engine = LifecycleEngine::new(Arc::clone(&gpu), config)?;

        let mut builder = DescriptorLayoutBuilder::new();
        builder.add_binding(0, ResourceKind::UniformBuffer);
        let scene_layout = builder.build(
            engine.backend(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )?;
        engine.main_deletion_queue_mut().push(scene_layout.release_request());

        builder.clear();
        builder
            .add_binding(0, ResourceKind::CombinedImageSampler)
            .add_binding(1, ResourceKind::StorageBuffer);
        let material_layout = builder.build(engine.backend(), vk::ShaderStageFlags::FRAGMENT)?;
        engine.main_deletion_queue_mut().push(material_layout.release_request());

        Ok(Self {
            gpu,
            surface,
            engine,
            scene_layout,
            material_layout,
        })
    }

    fn upload_draw_image(&mut self) -> RenderResult<()> {
        let draw_image = self.gpu.create_image(1280 * 720 * 8);
        self.engine.main_deletion_queue_mut().push(ReleaseRequest::Image(draw_image));

        let staging = self.gpu.create_buffer(1280 * 720 * 4);
        self.engine.immediate_submit(|_cmd| Ok(()))?;
        // The upload has completed, so the staging buffer can go right away
        self.gpu.release(ReleaseRequest::Buffer(staging));

        let mut builder = DescriptorLayoutBuilder::new();
        builder.add_binding(0, ResourceKind::StorageImage);
        let draw_image_layout = builder.build(self.engine.backend(), vk::ShaderStageFlags::COMPUTE)?;
        self.engine
            .main_deletion_queue_mut()
            .push(draw_image_layout.release_request());
        self.engine.global_allocator_mut().allocate(&draw_image_layout)?;

        log::info!("Draw image uploaded");
        Ok(())
    }

    fn run(&mut self, frames: u64) -> RenderResult<()> {
        let mut stale = 0;
        let mut skipped = 0;

        for tick in 0..frames {
            if tick == frames / 3 {
                self.surface.set_stale(true);
            }
            self.engine.set_minimized(tick % 97 == 50);

            let scene_layout = &self.scene_layout;
            let material_layout = &self.material_layout;
            let gpu = &self.gpu;
            let outcome = self.engine.draw_frame(&mut self.surface, |frame| {
                frame.allocate_set(scene_layout)?;
                // Material count varies so some frames force pool growth
                let materials = 200 + (frame.frame_number() % 5) * 300;
                for _ in 0..materials {
                    frame.allocate_set(material_layout)?;
                }

                let uniforms = gpu.create_buffer(256);
                frame.defer_release(ReleaseRequest::Buffer(uniforms));
                Ok(())
            })?;

            match outcome {
                FrameOutcome::Submitted { target_stale: true, .. } | FrameOutcome::TargetStale => stale += 1,
                FrameOutcome::Skipped => skipped += 1,
                FrameOutcome::Submitted { .. } => {}
            }
        }

        log::info!(
            "Ran {} ticks: {} frames submitted, {} stale, {} skipped",
            frames,
            self.engine.frame_number(),
            stale,
            skipped
        );
        Ok(())
    }

    fn report(&self) {
        let ring = self.engine.ring();
        for index in 0..ring.slot_count() {
            if let Some(slot) = ring.slot(index) {
                let descriptors = slot.descriptors();
                log::info!(
                    "Slot {}: {} pools, {} sets of capacity, next pool {} sets",
                    index,
                    descriptors.pool_count(),
                    descriptors.total_capacity(),
                    descriptors.next_capacity()
                );
            }
        }

        let stats = self.gpu.stats();
        log::info!(
            "Backend: {} pools created, {} resets, {} sets, {} submissions, {} fence waits",
            stats.pools_created,
            stats.pools_reset,
            stats.sets_allocated,
            stats.submissions,
            stats.fence_waits
        );
    }

    fn shutdown(&mut self) -> RenderResult<()> {
        self.engine.shutdown()?;
        log::info!(
            "Shutdown complete: {} pools, {} buffers/images still live",
            self.gpu.live_pool_count(),
            self.gpu.live_allocations()
        );
        Ok(())
    }
}

fn parse_args() -> Result<(LifecycleConfig, u64), Box<dyn std::error::Error>> {
    let mut config = LifecycleConfig::default().with_minimized_throttle_ms(5);
    let mut frames = DEFAULT_FRAMES;

    for arg in std::env::args().skip(1) {
        if let Ok(count) = arg.parse::<u64>() {
            frames = count;
        } else {
            log::info!("Loading configuration from {}", arg);
            config = LifecycleConfig::load_from_file(&arg)?;
        }
    }

    Ok((config, frames))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_with_default_filter("info");

    log::info!("Starting frame ring demo");
    let (config, frames) = parse_args()?;

    let mut demo = RingDemo::new(config)?;
    let result = demo.upload_draw_image().and_then(|()| demo.run(frames));
    demo.report();

    if let Err(e) = &result {
        log::error!("Frame loop failed: {}", e);
    }
    demo.shutdown()?;
    result?;

    log::info!("Frame ring demo finished");
    Ok(())
}
