//! Fixed-capacity descriptor pools
//!
//! A [`DescriptorPoolArena`] is one bounded arena: it can hand out up to
//! `max_sets` sets, with per-kind descriptor capacity `floor(ratio * max_sets)`,
//! and then refuses further allocations until it is reset. Capacity never
//! changes after creation.
//!
//! Two owners use arenas:
//! - [`GrowableDescriptorAllocator`](super::GrowableDescriptorAllocator) treats
//!   exhaustion as the signal to rotate to another arena
//! - [`DescriptorAllocator`] wraps a single arena for bindings whose count is
//!   known up front, where exhaustion is a configuration bug

use std::sync::Arc;

use ash::vk;

use crate::render::backend::{DescriptorBackend, SetAllocation};
use crate::render::descriptors::{pool_sizes, DescriptorLayout, PoolSizeRatio};
use crate::render::error::{RenderError, RenderResult};

/// One bounded descriptor pool
#[derive(Debug)]
pub struct DescriptorPoolArena {
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPoolArena {
    /// Create a pool holding `max_sets` sets, proportioned by `ratios`
    pub fn create<B: DescriptorBackend + ?Sized>(
        backend: &B,
        max_sets: u32,
        ratios: &[PoolSizeRatio],
    ) -> RenderResult<Self> {
        let sizes = pool_sizes(ratios, max_sets);
        let pool = backend.create_descriptor_pool(max_sets, &sizes)?;
        log::debug!("Created descriptor pool {:?} ({} sets, {} kinds)", pool, max_sets, sizes.len());

        Ok(Self { pool, max_sets })
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Set capacity of this pool
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Allocate one set of `layout`, or report exhaustion
    pub fn allocate<B: DescriptorBackend + ?Sized>(
        &self,
        backend: &B,
        layout: &DescriptorLayout,
    ) -> RenderResult<SetAllocation> {
        backend.allocate_descriptor_set(self.pool, layout.handle())
    }

    /// Free every set allocated from this pool, keeping its capacity
    ///
    /// No submitted GPU work may still reference sets from this pool.
    pub fn reset<B: DescriptorBackend + ?Sized>(&self, backend: &B) -> RenderResult<()> {
        backend.reset_descriptor_pool(self.pool)
    }

    /// Destroy the pool permanently
    pub fn destroy<B: DescriptorBackend + ?Sized>(self, backend: &B) {
        log::trace!("Destroying descriptor pool {:?}", self.pool);
        backend.destroy_descriptor_pool(self.pool);
    }
}

/// Single-pool descriptor allocator
///
/// Used for long-lived bindings whose count is known at startup. Running out of
/// room is reported as [`RenderError::PoolExhausted`].
pub struct DescriptorAllocator<B: DescriptorBackend> {
    backend: Arc<B>,
    arena: Option<DescriptorPoolArena>,
}

impl<B: DescriptorBackend> DescriptorAllocator<B> {
    /// Create the allocator and its pool
    pub fn new(backend: Arc<B>, max_sets: u32, ratios: &[PoolSizeRatio]) -> RenderResult<Self> {
        let arena = DescriptorPoolArena::create(&*backend, max_sets, ratios)?;
        Ok(Self {
            backend,
            arena: Some(arena),
        })
    }

    fn arena(&self) -> RenderResult<&DescriptorPoolArena> {
        self.arena
            .as_ref()
            .ok_or_else(|| RenderError::invalid("descriptor allocator pool already destroyed"))
    }

    /// Allocate one set of `layout`
    pub fn allocate(&self, layout: &DescriptorLayout) -> RenderResult<vk::DescriptorSet> {
        let arena = self.arena()?;
        match arena.allocate(&*self.backend, layout)? {
            SetAllocation::Allocated(set) => Ok(set),
            SetAllocation::Exhausted(cause) => Err(RenderError::PoolExhausted {
                max_sets: arena.max_sets(),
                cause,
            }),
        }
    }

    /// Free every set allocated so far
    pub fn clear_descriptors(&self) -> RenderResult<()> {
        self.arena()?.reset(&*self.backend)
    }

    /// Destroy the pool; later allocations fail
    pub fn destroy_pool(&mut self) {
        if let Some(arena) = self.arena.take() {
            arena.destroy(&*self.backend);
        }
    }

    /// Set capacity of the pool, or zero once destroyed
    pub fn max_sets(&self) -> u32 {
        self.arena.as_ref().map_or(0, DescriptorPoolArena::max_sets)
    }
}

impl<B: DescriptorBackend> Drop for DescriptorAllocator<B> {
    fn drop(&mut self) {
        if let Some(arena) = &self.arena {
            log::warn!(
                "DescriptorAllocator dropped with live pool {:?}; call destroy_pool after the GPU is idle",
                arena.handle()
            );
        }
    }
}
