//! Growable descriptor allocator
//!
//! Presents a single "allocate a set" operation backed by an unbounded sequence
//! of [`DescriptorPoolArena`]s.
//!
//! # Pool Rotation
//!
//! ```text
//!  ready (LIFO)            exhausted
//!  ┌───┬───┬───┐           ┌───┐
//!  │ A │ B │ C │ ◄─ pop    │ D │
//!  └───┴───┴───┘           └───┘
//!        ▲                   ▲
//!        │ success           │ pool refused the set
//!        └──── allocate ─────┘
//! ```
//!
//! - `allocate` pops the top ready pool (or creates one when none is ready) and
//!   tries it. On success the pool goes back on top of the ready stack.
//! - When the pool is full it moves to the exhausted list and the allocation is
//!   retried exactly once on the next pool. A fresh pool always has headroom,
//!   so a second refusal is fatal.
//! - New pools are sized from a growth counter that doubles on every creation
//!   and is clamped at a ceiling ([`MAX_SETS_PER_POOL`] by default), so
//!   allocation-heavy frames ramp up quickly without unbounded memory.
//! - `clear_all` resets every pool and moves the exhausted ones back to ready.
//!   Pools are never destroyed in steady state; their capacity is recycled.
//!
//! All pools live in one arena of pool records keyed by [`PoolKey`], each tagged
//! with its [`PoolStatus`]; the ready and exhausted lists only hold keys.

use std::sync::Arc;

use ash::vk;
use slotmap::{new_key_type, SlotMap};

use crate::render::backend::{DescriptorBackend, ExhaustionCause, SetAllocation};
use crate::render::descriptors::{
    kind_capacity, DescriptorLayout, DescriptorPoolArena, PoolSizeRatio,
};
use crate::render::error::{RenderError, RenderResult};

/// Default ceiling on the set count of any pool a growable allocator creates
pub const MAX_SETS_PER_POOL: u32 = 4092;

new_key_type! {
    /// Key of a pool record owned by a growable allocator
    pub struct PoolKey;
}

/// Where a pool currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Available for allocation
    Ready,
    /// Refused at least one allocation since the last clear
    Exhausted,
    /// Checked out by an allocation in progress
    InUse,
}

#[derive(Debug)]
struct PoolRecord {
    arena: DescriptorPoolArena,
    status: PoolStatus,
}

/// Descriptor allocator that grows by adding pools
pub struct GrowableDescriptorAllocator<B: DescriptorBackend> {
    backend: Arc<B>,
    ratios: Vec<PoolSizeRatio>,
    pools: SlotMap<PoolKey, PoolRecord>,
    ready: Vec<PoolKey>,
    exhausted: Vec<PoolKey>,
    next_capacity: u32,
    capacity_ceiling: u32,
}

impl<B: DescriptorBackend> GrowableDescriptorAllocator<B> {
    /// Create the allocator with one pool of `initial_sets` sets
    pub fn new(backend: Arc<B>, initial_sets: u32, ratios: &[PoolSizeRatio]) -> RenderResult<Self> {
        Self::with_capacity_ceiling(backend, initial_sets, ratios, MAX_SETS_PER_POOL)
    }

    /// Create the allocator with a custom per-pool set ceiling
    pub fn with_capacity_ceiling(
        backend: Arc<B>,
        initial_sets: u32,
        ratios: &[PoolSizeRatio],
        capacity_ceiling: u32,
    ) -> RenderResult<Self> {
        if initial_sets == 0 || capacity_ceiling == 0 {
            return Err(RenderError::invalid(
                "growable allocator needs a non-zero initial set count and ceiling",
            ));
        }

        let mut allocator = Self {
            backend,
            ratios: ratios.to_vec(),
            pools: SlotMap::with_key(),
            ready: Vec::new(),
            exhausted: Vec::new(),
            next_capacity: initial_sets.saturating_mul(2).min(capacity_ceiling),
            capacity_ceiling,
        };

        let arena = DescriptorPoolArena::create(&*allocator.backend, initial_sets, &allocator.ratios)?;
        let key = allocator.pools.insert(PoolRecord {
            arena,
            status: PoolStatus::Ready,
        });
        allocator.ready.push(key);

        log::debug!(
            "Growable descriptor allocator ready: first pool {} sets, next {}, ceiling {}",
            initial_sets,
            allocator.next_capacity,
            capacity_ceiling
        );
        Ok(allocator)
    }

    /// Take a ready pool, or create one at the current growth size
    ///
    /// The returned pool is checked out: it is in neither list until the caller
    /// hands it back with [`Self::return_pool`].
    fn get_or_create_pool(&mut self) -> RenderResult<PoolKey> {
        if let Some(key) = self.ready.pop() {
            self.set_status(key, PoolStatus::InUse);
            return Ok(key);
        }

        let sets = self.next_capacity;
        let arena = DescriptorPoolArena::create(&*self.backend, sets, &self.ratios)?;
        self.next_capacity = self.next_capacity.saturating_mul(2).min(self.capacity_ceiling);
        log::debug!(
            "Descriptor pools exhausted; grew by {} sets (next pool {} sets)",
            sets,
            self.next_capacity
        );

        Ok(self.pools.insert(PoolRecord {
            arena,
            status: PoolStatus::InUse,
        }))
    }

    fn set_status(&mut self, key: PoolKey, status: PoolStatus) {
        if let Some(record) = self.pools.get_mut(key) {
            record.status = status;
        }
    }

    fn return_pool(&mut self, key: PoolKey, status: PoolStatus) {
        self.set_status(key, status);
        match status {
            PoolStatus::Ready => self.ready.push(key),
            PoolStatus::Exhausted => self.exhausted.push(key),
            PoolStatus::InUse => {}
        }
    }

    fn try_pool(&self, key: PoolKey, layout: &DescriptorLayout) -> RenderResult<(SetAllocation, u32)> {
        let record = self
            .pools
            .get(key)
            .ok_or_else(|| RenderError::invalid("checked-out descriptor pool vanished"))?;
        let outcome = record.arena.allocate(&*self.backend, layout)?;
        Ok((outcome, record.arena.max_sets()))
    }

    /// Allocate one set of `layout`, growing the pool collection as needed
    pub fn allocate(&mut self, layout: &DescriptorLayout) -> RenderResult<vk::DescriptorSet> {
        let key = self.get_or_create_pool()?;
        match self.try_pool(key, layout) {
            Ok((SetAllocation::Allocated(set), _)) => {
                self.return_pool(key, PoolStatus::Ready);
                return Ok(set);
            }
            Ok((SetAllocation::Exhausted(cause), sets)) => {
                log::trace!("Descriptor pool of {} sets exhausted ({:?}); rotating", sets, cause);
                self.return_pool(key, PoolStatus::Exhausted);
            }
            Err(e) => {
                self.return_pool(key, PoolStatus::Ready);
                return Err(e);
            }
        }

        let retry_key = self.get_or_create_pool()?;
        match self.try_pool(retry_key, layout) {
            Ok((SetAllocation::Allocated(set), _)) => {
                self.return_pool(retry_key, PoolStatus::Ready);
                Ok(set)
            }
            Ok((SetAllocation::Exhausted(cause), sets)) => {
                self.return_pool(retry_key, PoolStatus::Exhausted);
                let error = self.diagnose_retry_failure(layout, sets, cause);
                log::error!("Descriptor allocation failed after pool rotation: {}", error);
                Err(error)
            }
            Err(e) => {
                self.return_pool(retry_key, PoolStatus::Ready);
                Err(e)
            }
        }
    }

    /// Distinguish a layout the ratios can never satisfy from backend pressure
    fn diagnose_retry_failure(
        &self,
        layout: &DescriptorLayout,
        pool_sets: u32,
        cause: ExhaustionCause,
    ) -> RenderError {
        for kind in layout.kinds() {
            let required = layout.count_of(kind);
            let available = kind_capacity(&self.ratios, kind, pool_sets);
            if available < required {
                if kind_capacity(&self.ratios, kind, self.capacity_ceiling) >= required {
                    log::debug!(
                        "{:?} fits only pools larger than {} sets; growth has not reached that yet",
                        kind,
                        pool_sets
                    );
                }
                return RenderError::LayoutUnsatisfiable {
                    kind,
                    required,
                    available,
                    pool_sets,
                };
            }
        }
        RenderError::AllocationRetryFailed { pool_sets, cause }
    }

    /// Reset every pool and make all of them ready again
    ///
    /// No submitted GPU work may still reference sets from this allocator.
    pub fn clear_all(&mut self) -> RenderResult<()> {
        for key in self.ready.iter().chain(self.exhausted.iter()) {
            if let Some(record) = self.pools.get(*key) {
                record.arena.reset(&*self.backend)?;
            }
        }

        let recycled = self.exhausted.len();
        let exhausted = std::mem::take(&mut self.exhausted);
        for key in exhausted {
            self.return_pool(key, PoolStatus::Ready);
        }

        if recycled > 0 {
            log::trace!("Recycled {} exhausted descriptor pools", recycled);
        }
        Ok(())
    }

    /// Destroy every pool
    ///
    /// The allocator stays usable; the next allocation creates a pool at the
    /// current growth size.
    pub fn destroy_all(&mut self) {
        let destroyed = self.pools.len();
        for (_, record) in self.pools.drain() {
            record.arena.destroy(&*self.backend);
        }
        self.ready.clear();
        self.exhausted.clear();

        if destroyed > 0 {
            log::debug!("Destroyed {} descriptor pools", destroyed);
        }
    }

    /// Set count of the next pool this allocator will create
    pub fn next_capacity(&self) -> u32 {
        self.next_capacity
    }

    /// Ceiling on the set count of created pools
    pub fn capacity_ceiling(&self) -> u32 {
        self.capacity_ceiling
    }

    /// Ratios every pool is proportioned by
    pub fn ratios(&self) -> &[PoolSizeRatio] {
        &self.ratios
    }

    /// Number of pools owned
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Number of ready pools
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Number of exhausted pools
    pub fn exhausted_count(&self) -> usize {
        self.exhausted.len()
    }

    /// Status of a pool, if this allocator owns it
    pub fn pool_status(&self, key: PoolKey) -> Option<PoolStatus> {
        self.pools.get(key).map(|record| record.status)
    }

    fn capacity_of(&self, keys: &[PoolKey]) -> u64 {
        keys.iter()
            .filter_map(|key| self.pools.get(*key))
            .map(|record| u64::from(record.arena.max_sets()))
            .sum()
    }

    /// Total set capacity across ready pools
    pub fn ready_capacity(&self) -> u64 {
        self.capacity_of(&self.ready)
    }

    /// Total set capacity across exhausted pools
    pub fn exhausted_capacity(&self) -> u64 {
        self.capacity_of(&self.exhausted)
    }

    /// Total set capacity across all pools
    pub fn total_capacity(&self) -> u64 {
        self.pools
            .values()
            .map(|record| u64::from(record.arena.max_sets()))
            .sum()
    }
}

impl<B: DescriptorBackend> Drop for GrowableDescriptorAllocator<B> {
    fn drop(&mut self) {
        if !self.pools.is_empty() {
            log::warn!(
                "GrowableDescriptorAllocator dropped with {} live pools; call destroy_all after the GPU is idle",
                self.pools.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::HeadlessGpu;
    use crate::render::descriptors::{DescriptorLayoutBuilder, ResourceKind};

    fn kind_a_ratios() -> [PoolSizeRatio; 1] {
        [PoolSizeRatio::new(ResourceKind::StorageImage, 1.0)]
    }

    fn kind_a_layout(gpu: &HeadlessGpu) -> DescriptorLayout {
        let mut builder = DescriptorLayoutBuilder::new();
        builder.add_binding(0, ResourceKind::StorageImage);
        builder.build(gpu, vk::ShaderStageFlags::COMPUTE).expect("layout")
    }

    fn assert_partitioned(allocator: &GrowableDescriptorAllocator<HeadlessGpu>) {
        assert_eq!(allocator.ready_count() + allocator.exhausted_count(), allocator.pool_count());
        for key in &allocator.ready {
            assert_eq!(allocator.pool_status(*key), Some(PoolStatus::Ready));
            assert!(!allocator.exhausted.contains(key));
        }
        for key in &allocator.exhausted {
            assert_eq!(allocator.pool_status(*key), Some(PoolStatus::Exhausted));
        }
    }

    #[test]
    fn test_init_creates_one_ready_pool() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut allocator =
            GrowableDescriptorAllocator::new(Arc::clone(&gpu), 10, &kind_a_ratios()).expect("init");

        assert_eq!(allocator.pool_count(), 1);
        assert_eq!(allocator.ready_count(), 1);
        assert_eq!(allocator.next_capacity(), 20);
        assert_eq!(allocator.ready_capacity(), 10);
        assert_eq!(gpu.stats().pools_created, 1);
        allocator.destroy_all();
    }

    #[test]
    fn test_exhaustion_scenario_grows_then_recycles() {
        let gpu = Arc::new(HeadlessGpu::new());
        let layout = kind_a_layout(&gpu);
        let mut allocator =
            GrowableDescriptorAllocator::new(Arc::clone(&gpu), 10, &kind_a_ratios()).expect("init");

        for _ in 0..10 {
            allocator.allocate(&layout).expect("first pool");
        }
        assert_eq!(allocator.pool_count(), 1);

        allocator.allocate(&layout).expect("rotated");
        assert_eq!(allocator.pool_count(), 2);
        assert_eq!(allocator.next_capacity(), 40);
        assert_eq!(allocator.exhausted_count(), 1);
        assert_eq!(allocator.exhausted_capacity(), 10);
        assert_eq!(allocator.ready_capacity(), 20);
        assert_partitioned(&allocator);

        allocator.clear_all().expect("clear");
        assert_eq!(allocator.ready_capacity(), 30);
        assert_eq!(allocator.exhausted_count(), 0);
        assert_eq!(allocator.pool_count(), 2);
        assert_partitioned(&allocator);

        allocator.destroy_all();
        assert_eq!(gpu.live_pool_count(), 0);
    }

    #[test]
    fn test_growth_doubles_and_clamps_at_ceiling() {
        let gpu = Arc::new(HeadlessGpu::new());
        let layout = kind_a_layout(&gpu);
        let mut allocator =
            GrowableDescriptorAllocator::with_capacity_ceiling(Arc::clone(&gpu), 4, &kind_a_ratios(), 24)
                .expect("init");

        let mut observed = vec![allocator.next_capacity()];
        for _ in 0..200 {
            allocator.allocate(&layout).expect("allocate");
            if observed.last() != Some(&allocator.next_capacity()) {
                observed.push(allocator.next_capacity());
            }
        }

        assert_eq!(observed, vec![8, 16, 24]);
        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
        assert!(allocator.pools.values().all(|r| r.arena.max_sets() <= 24));
        allocator.destroy_all();
    }

    #[test]
    fn test_initial_growth_counter_respects_ceiling() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut allocator =
            GrowableDescriptorAllocator::new(Arc::clone(&gpu), 3000, &kind_a_ratios()).expect("init");
        assert_eq!(allocator.next_capacity(), MAX_SETS_PER_POOL);
        allocator.destroy_all();
    }

    #[test]
    fn test_recycled_pools_are_reused_before_growing() {
        let gpu = Arc::new(HeadlessGpu::new());
        let layout = kind_a_layout(&gpu);
        let mut allocator =
            GrowableDescriptorAllocator::new(Arc::clone(&gpu), 2, &kind_a_ratios()).expect("init");

        for _ in 0..6 {
            allocator.allocate(&layout).expect("allocate");
        }
        let created = gpu.stats().pools_created;
        allocator.clear_all().expect("clear");

        for _ in 0..6 {
            allocator.allocate(&layout).expect("allocate after clear");
        }
        assert_eq!(gpu.stats().pools_created, created);
        assert_partitioned(&allocator);
        allocator.destroy_all();
    }

    #[test]
    fn test_unsatisfiable_layout_is_diagnosed() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut builder = DescriptorLayoutBuilder::new();
        builder.add_binding(0, ResourceKind::UniformBuffer);
        let layout = builder.build(&*gpu, vk::ShaderStageFlags::VERTEX).expect("layout");

        let mut allocator =
            GrowableDescriptorAllocator::new(Arc::clone(&gpu), 4, &kind_a_ratios()).expect("init");

        let err = allocator.allocate(&layout).expect_err("no uniform buffers in ratios");
        assert!(matches!(
            err,
            RenderError::LayoutUnsatisfiable {
                kind: ResourceKind::UniformBuffer,
                required: 1,
                available: 0,
                pool_sets: 8,
            }
        ));
        assert_partitioned(&allocator);
        allocator.destroy_all();
    }

    #[test]
    fn test_undersized_retry_pool_is_a_layout_error() {
        let gpu = Arc::new(HeadlessGpu::new());
        let layout = kind_a_layout(&gpu);
        let ratios = [PoolSizeRatio::new(ResourceKind::StorageImage, 0.25)];
        let mut allocator = GrowableDescriptorAllocator::new(Arc::clone(&gpu), 1, &ratios).expect("init");

        // A pool of 2 sets holds floor(0.25 * 2) = 0 storage images even
        // though a ceiling-sized pool would hold plenty
        let err = allocator.allocate(&layout).expect_err("retry pool too small");
        assert!(matches!(
            err,
            RenderError::LayoutUnsatisfiable {
                kind: ResourceKind::StorageImage,
                required: 1,
                available: 0,
                pool_sets: 2,
            }
        ));
        assert_eq!(allocator.exhausted_count(), 2);
        assert_partitioned(&allocator);
        allocator.destroy_all();
    }

    #[test]
    fn test_retry_failure_under_backend_pressure() {
        let gpu = Arc::new(HeadlessGpu::new());
        let layout = kind_a_layout(&gpu);
        let mut allocator =
            GrowableDescriptorAllocator::new(Arc::clone(&gpu), 1, &kind_a_ratios()).expect("init");

        allocator.allocate(&layout).expect("first");
        gpu.fragment_new_pools(true);
        let err = allocator.allocate(&layout).expect_err("fresh pool refuses");
        assert!(matches!(
            err,
            RenderError::AllocationRetryFailed {
                pool_sets: 2,
                cause: ExhaustionCause::FragmentedPool,
            }
        ));
        gpu.fragment_new_pools(false);
        allocator.destroy_all();
    }

    #[test]
    fn test_pool_creation_failure_propagates() {
        let gpu = Arc::new(HeadlessGpu::new());
        let layout = kind_a_layout(&gpu);
        let mut allocator =
            GrowableDescriptorAllocator::new(Arc::clone(&gpu), 1, &kind_a_ratios()).expect("init");
        allocator.allocate(&layout).expect("first");

        gpu.fail_pool_creation(true);
        assert!(matches!(
            allocator.allocate(&layout),
            Err(RenderError::PoolCreationFailed { max_sets: 2, .. })
        ));
        assert_partitioned(&allocator);
        gpu.fail_pool_creation(false);
        allocator.destroy_all();
    }
}
