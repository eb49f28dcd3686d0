//! In-memory backend
//!
//! `HeadlessGpu` implements every backend trait without a device. It tracks
//! live objects, enforces descriptor pool capacity the way a driver does, and
//! models the graphics queue as an ordered list of in-flight fences that
//! complete when someone waits on them. Tests use the knobs (`set_hung`,
//! `fail_idle_with`, `fail_submissions`, `fail_pool_creation`,
//! `fragment_new_pools`) to reproduce the failure paths
//! a real device only shows under load.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk::{self, Handle};
use slotmap::SlotMap;

use crate::render::backend::{
    AcquireOutcome, CommandContext, DescriptorBackend, DescriptorWrite, ExhaustionCause,
    FenceStatus, PresentOutcome, ReleaseBackend, SetAllocation, Submission, SubmissionBackend,
    SurfaceProvider,
};
use crate::render::descriptors::{LayoutBinding, ResourceKind};
use crate::render::error::{RenderError, RenderResult};
use crate::render::lifecycle::{AllocationKey, ReleaseRequest};

/// Counters of backend calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Descriptor pools created
    pub pools_created: usize,
    /// Descriptor pool resets
    pub pools_reset: usize,
    /// Descriptor pools destroyed or released
    pub pools_destroyed: usize,
    /// Descriptor sets handed out
    pub sets_allocated: usize,
    /// Queue submissions
    pub submissions: usize,
    /// Fence waits, including timed-out ones
    pub fence_waits: usize,
    /// Individual binding writes applied
    pub descriptor_writes: usize,
}

#[derive(Debug)]
struct PoolState {
    max_sets: u32,
    capacity: HashMap<vk::DescriptorType, u32>,
    remaining_sets: u32,
    remaining: HashMap<vk::DescriptorType, u32>,
    fragmented: bool,
    sets: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocationKind {
    Buffer,
    Image,
}

#[derive(Debug)]
struct HeadlessAllocation {
    kind: AllocationKind,
    size: vk::DeviceSize,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_handle: u64,
    pools: HashMap<u64, PoolState>,
    layouts: HashMap<u64, Vec<LayoutBinding>>,
    sets: HashMap<u64, (u64, u64)>,
    fences: HashMap<u64, bool>,
    semaphores: HashSet<u64>,
    command_pools: HashMap<u64, u64>,
    command_buffers: HashMap<u64, CommandState>,
    in_flight: VecDeque<u64>,
    allocations: SlotMap<AllocationKey, HeadlessAllocation>,
    released: Vec<ReleaseRequest>,
    stats: HeadlessStats,
    hung: bool,
    idle_failure: Option<vk::Result>,
    fail_submissions: bool,
    fail_pool_creation: bool,
    fragment_new_pools: bool,
}

impl HeadlessState {
    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn remove_pool(&mut self, raw: u64) {
        if let Some(pool) = self.pools.remove(&raw) {
            for set in pool.sets {
                self.sets.remove(&set);
            }
            self.stats.pools_destroyed += 1;
        } else {
            log::warn!("Headless: destroying unknown descriptor pool {:#x}", raw);
        }
    }

    fn remove_command_pool(&mut self, raw: u64) {
        if let Some(buffer) = self.command_pools.remove(&raw) {
            self.command_buffers.remove(&buffer);
        } else {
            log::warn!("Headless: destroying unknown command pool {:#x}", raw);
        }
    }

    fn complete_until(&mut self, fence: u64) {
        while let Some(done) = self.in_flight.pop_front() {
            if let Some(signaled) = self.fences.get_mut(&done) {
                *signaled = true;
            }
            if done == fence {
                break;
            }
        }
    }

    fn complete_all(&mut self) {
        while let Some(done) = self.in_flight.pop_front() {
            if let Some(signaled) = self.fences.get_mut(&done) {
                *signaled = true;
            }
        }
    }
}

/// Device-less backend for tests and the demo
#[derive(Debug, Default)]
pub struct HeadlessGpu {
    state: Mutex<HeadlessState>,
}

impl HeadlessGpu {
    /// Create an idle backend with no objects
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a memory-backed buffer of `size` bytes
    pub fn create_buffer(&self, size: vk::DeviceSize) -> AllocationKey {
        self.state().allocations.insert(HeadlessAllocation {
            kind: AllocationKind::Buffer,
            size,
        })
    }

    /// Register a memory-backed image of `size` bytes
    pub fn create_image(&self, size: vk::DeviceSize) -> AllocationKey {
        self.state().allocations.insert(HeadlessAllocation {
            kind: AllocationKind::Image,
            size,
        })
    }

    /// Number of live buffers and images
    pub fn live_allocations(&self) -> usize {
        self.state().allocations.len()
    }

    /// Bytes held by live buffers and images
    pub fn live_allocation_bytes(&self) -> vk::DeviceSize {
        self.state().allocations.values().map(|a| a.size).sum()
    }

    /// Whether `key` names a live buffer
    pub fn is_live_buffer(&self, key: AllocationKey) -> bool {
        self.state()
            .allocations
            .get(key)
            .is_some_and(|a| a.kind == AllocationKind::Buffer)
    }

    /// Every request released so far, in execution order
    pub fn released(&self) -> Vec<ReleaseRequest> {
        self.state().released.clone()
    }

    /// Call counters
    pub fn stats(&self) -> HeadlessStats {
        self.state().stats
    }

    /// Number of live descriptor pools
    pub fn live_pool_count(&self) -> usize {
        self.state().pools.len()
    }

    /// Number of live descriptor set layouts
    pub fn live_layout_count(&self) -> usize {
        self.state().layouts.len()
    }

    /// Number of live fences
    pub fn live_fence_count(&self) -> usize {
        self.state().fences.len()
    }

    /// Number of live semaphores
    pub fn live_semaphore_count(&self) -> usize {
        self.state().semaphores.len()
    }

    /// Number of live command pools
    pub fn live_command_pool_count(&self) -> usize {
        self.state().command_pools.len()
    }

    /// Submissions whose fence has not been observed yet
    pub fn in_flight_count(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Whether `fence` is currently signaled
    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state().fences.get(&fence.as_raw()).copied().unwrap_or(false)
    }

    /// Stop completing submitted work; waits time out and idle fails
    pub fn set_hung(&self, hung: bool) {
        self.state().hung = hung;
    }

    /// Make idle waits fail with `result` until cleared with `None`
    pub fn fail_idle_with(&self, result: Option<vk::Result>) {
        self.state().idle_failure = result;
    }

    /// Make queue submissions fail
    pub fn fail_submissions(&self, fail: bool) {
        self.state().fail_submissions = fail;
    }

    /// Make descriptor pool creation fail
    pub fn fail_pool_creation(&self, fail: bool) {
        self.state().fail_pool_creation = fail;
    }

    /// Make pools created from now on refuse every allocation as fragmented
    pub fn fragment_new_pools(&self, fragment: bool) {
        self.state().fragment_new_pools = fragment;
    }

    /// Finish all submitted work, even while hung
    pub fn complete_all(&self) {
        self.state().complete_all();
    }
}

fn unknown(what: &str, raw: u64) -> RenderError {
    RenderError::invalid(format!("unknown {what} {raw:#x}"))
}

impl DescriptorBackend for HeadlessGpu {
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RenderResult<vk::DescriptorPool> {
        let mut state = self.state();
        if state.fail_pool_creation || max_sets == 0 {
            return Err(RenderError::PoolCreationFailed {
                max_sets,
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            });
        }

        let mut capacity = HashMap::new();
        for size in pool_sizes {
            *capacity.entry(size.ty).or_insert(0) += size.descriptor_count;
        }

        let raw = state.mint();
        let fragmented = state.fragment_new_pools;
        state.pools.insert(
            raw,
            PoolState {
                max_sets,
                remaining: capacity.clone(),
                capacity,
                remaining_sets: max_sets,
                fragmented,
                sets: Vec::new(),
            },
        );
        state.stats.pools_created += 1;
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RenderResult<()> {
        let mut state = self.state();
        let raw = pool.as_raw();
        let freed = {
            let pool_state = state.pools.get_mut(&raw).ok_or_else(|| unknown("descriptor pool", raw))?;
            pool_state.remaining = pool_state.capacity.clone();
            pool_state.remaining_sets = pool_state.max_sets;
            std::mem::take(&mut pool_state.sets)
        };
        for set in freed {
            state.sets.remove(&set);
        }
        state.stats.pools_reset += 1;
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state().remove_pool(pool.as_raw());
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RenderResult<SetAllocation> {
        let mut state = self.state();
        let layout_raw = layout.as_raw();
        let needs: Vec<vk::DescriptorType> = state
            .layouts
            .get(&layout_raw)
            .ok_or_else(|| unknown("descriptor set layout", layout_raw))?
            .iter()
            .map(|b| b.kind.descriptor_type())
            .collect();

        let pool_raw = pool.as_raw();
        let set_raw = state.mint();
        {
            let pool_state = state
                .pools
                .get_mut(&pool_raw)
                .ok_or_else(|| unknown("descriptor pool", pool_raw))?;
            if pool_state.fragmented {
                return Ok(SetAllocation::Exhausted(ExhaustionCause::FragmentedPool));
            }
            if pool_state.remaining_sets == 0 {
                return Ok(SetAllocation::Exhausted(ExhaustionCause::OutOfPoolMemory));
            }

            let mut remaining = pool_state.remaining.clone();
            for ty in &needs {
                match remaining.get_mut(ty) {
                    Some(count) if *count > 0 => *count -= 1,
                    _ => return Ok(SetAllocation::Exhausted(ExhaustionCause::OutOfPoolMemory)),
                }
            }
            pool_state.remaining = remaining;
            pool_state.remaining_sets -= 1;
            pool_state.sets.push(set_raw);
        }

        state.sets.insert(set_raw, (pool_raw, layout_raw));
        state.stats.sets_allocated += 1;
        Ok(SetAllocation::Allocated(vk::DescriptorSet::from_raw(set_raw)))
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
        _stages: vk::ShaderStageFlags,
    ) -> RenderResult<vk::DescriptorSetLayout> {
        let mut state = self.state();
        let raw = state.mint();
        state.layouts.insert(raw, bindings.to_vec());
        Ok(vk::DescriptorSetLayout::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        if self.state().layouts.remove(&layout.as_raw()).is_none() {
            log::warn!("Headless: destroying unknown descriptor set layout {:?}", layout);
        }
    }

    fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> RenderResult<()> {
        let mut state = self.state();
        let set_raw = set.as_raw();
        let (_, layout_raw) = *state.sets.get(&set_raw).ok_or_else(|| unknown("descriptor set", set_raw))?;
        let bindings = state
            .layouts
            .get(&layout_raw)
            .ok_or_else(|| unknown("descriptor set layout", layout_raw))?;

        for write in writes {
            let declared: Option<ResourceKind> = bindings
                .iter()
                .find(|b| b.binding == write.binding)
                .map(|b| b.kind);
            if declared != Some(write.kind) {
                return Err(RenderError::invalid(format!(
                    "write of {:?} to binding {} declared as {:?}",
                    write.kind, write.binding, declared
                )));
            }
        }

        state.stats.descriptor_writes += writes.len();
        Ok(())
    }
}

impl SubmissionBackend for HeadlessGpu {
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let mut state = self.state();
        let raw = state.mint();
        state.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        let raw = fence.as_raw();
        state.fences.remove(&raw);
        state.in_flight.retain(|f| *f != raw);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> RenderResult<FenceStatus> {
        let mut state = self.state();
        let raw = fence.as_raw();
        state.stats.fence_waits += 1;

        match state.fences.get(&raw).copied() {
            None => Err(unknown("fence", raw)),
            Some(true) => Ok(FenceStatus::Signaled),
            Some(false) if state.hung || !state.in_flight.contains(&raw) => Ok(FenceStatus::TimedOut),
            Some(false) => {
                state.complete_until(raw);
                Ok(FenceStatus::Signaled)
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        let mut state = self.state();
        let raw = fence.as_raw();
        if state.in_flight.contains(&raw) {
            return Err(RenderError::invalid("resetting a fence still in flight"));
        }
        let signaled = state.fences.get_mut(&raw).ok_or_else(|| unknown("fence", raw))?;
        *signaled = false;
        Ok(())
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let mut state = self.state();
        let raw = state.mint();
        state.semaphores.insert(raw);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().semaphores.remove(&semaphore.as_raw());
    }

    fn create_command_context(&self) -> RenderResult<CommandContext> {
        let mut state = self.state();
        let pool = state.mint();
        let buffer = state.mint();
        state.command_pools.insert(pool, buffer);
        state.command_buffers.insert(buffer, CommandState::Initial);
        Ok(CommandContext {
            pool: vk::CommandPool::from_raw(pool),
            buffer: vk::CommandBuffer::from_raw(buffer),
        })
    }

    fn destroy_command_context(&self, context: CommandContext) {
        self.state().remove_command_pool(context.pool.as_raw());
    }

    fn reset_commands(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut state = self.state();
        let raw = buffer.as_raw();
        let command = state.command_buffers.get_mut(&raw).ok_or_else(|| unknown("command buffer", raw))?;
        *command = CommandState::Initial;
        Ok(())
    }

    fn begin_commands(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut state = self.state();
        let raw = buffer.as_raw();
        let command = state.command_buffers.get_mut(&raw).ok_or_else(|| unknown("command buffer", raw))?;
        if *command == CommandState::Recording {
            return Err(RenderError::invalid("command buffer is already recording"));
        }
        *command = CommandState::Recording;
        Ok(())
    }

    fn end_commands(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut state = self.state();
        let raw = buffer.as_raw();
        let command = state.command_buffers.get_mut(&raw).ok_or_else(|| unknown("command buffer", raw))?;
        if *command != CommandState::Recording {
            return Err(RenderError::invalid("command buffer is not recording"));
        }
        *command = CommandState::Executable;
        Ok(())
    }

    fn submit(&self, submission: &Submission) -> RenderResult<()> {
        let mut state = self.state();
        if state.fail_submissions {
            return Err(RenderError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        let buffer = submission.command_buffer.as_raw();
        if state.command_buffers.get(&buffer) != Some(&CommandState::Executable) {
            return Err(RenderError::invalid("submitting a command buffer that is not executable"));
        }

        let fence = submission.fence.as_raw();
        match state.fences.get(&fence).copied() {
            None => return Err(unknown("fence", fence)),
            Some(true) => return Err(RenderError::invalid("submitting with a signaled fence")),
            Some(false) if state.in_flight.contains(&fence) => {
                return Err(RenderError::invalid("fence already attached to pending work"));
            }
            Some(false) => {}
        }

        state.in_flight.push_back(fence);
        state.stats.submissions += 1;
        Ok(())
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut state = self.state();
        if let Some(result) = state.idle_failure {
            return Err(RenderError::Api(result));
        }
        if state.hung {
            return Err(RenderError::Api(vk::Result::ERROR_DEVICE_LOST));
        }
        state.complete_all();
        Ok(())
    }
}

impl ReleaseBackend for HeadlessGpu {
    fn release(&self, request: ReleaseRequest) {
        let mut state = self.state();
        match request {
            ReleaseRequest::Buffer(key) | ReleaseRequest::Image(key) => {
                if state.allocations.remove(key).is_none() {
                    log::warn!("Headless: {} {:?} released twice", request.label(), key);
                }
            }
            ReleaseRequest::DescriptorSetLayout(layout) => {
                state.layouts.remove(&layout.as_raw());
            }
            ReleaseRequest::DescriptorPool(pool) => state.remove_pool(pool.as_raw()),
            ReleaseRequest::CommandPool(pool) => state.remove_command_pool(pool.as_raw()),
            ReleaseRequest::Fence(fence) => {
                let raw = fence.as_raw();
                state.fences.remove(&raw);
                state.in_flight.retain(|f| *f != raw);
            }
            ReleaseRequest::Semaphore(semaphore) => {
                state.semaphores.remove(&semaphore.as_raw());
            }
            ReleaseRequest::ImageView(_)
            | ReleaseRequest::Sampler(_)
            | ReleaseRequest::Pipeline(_)
            | ReleaseRequest::PipelineLayout(_)
            | ReleaseRequest::ShaderModule(_) => {}
        }
        state.released.push(request);
    }
}

/// Presentation target without a window
///
/// Hands out image indices round-robin. Staleness is switched on by the test:
/// either persistently for acquisition, or for the next present only.
#[derive(Debug)]
pub struct HeadlessSurface {
    image_count: u32,
    next_image: u32,
    stale: bool,
    stale_on_present: bool,
    rebuilds: usize,
    presented: usize,
}

impl HeadlessSurface {
    /// Create a target with `image_count` images
    pub fn new(image_count: u32) -> Self {
        Self {
            image_count: image_count.max(1),
            next_image: 0,
            stale: false,
            stale_on_present: false,
            rebuilds: 0,
            presented: 0,
        }
    }

    /// Make acquisition report a stale target until cleared or rebuilt
    pub fn set_stale(&mut self, stale: bool) {
        self.stale = stale;
    }

    /// Make the next present report a stale target
    pub fn stale_on_next_present(&mut self) {
        self.stale_on_present = true;
    }

    /// Number of rebuilds performed
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    /// Number of images presented
    pub fn presented(&self) -> usize {
        self.presented
    }

    /// Number of images in the target
    pub fn image_count(&self) -> u32 {
        self.image_count
    }
}

impl SurfaceProvider for HeadlessSurface {
    fn acquire_next_image(
        &mut self,
        _signal: vk::Semaphore,
        _timeout_ns: u64,
    ) -> RenderResult<AcquireOutcome> {
        if self.stale {
            return Ok(AcquireOutcome::Stale);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(AcquireOutcome::Acquired(index))
    }

    fn present(&mut self, image_index: u32, _wait: vk::Semaphore) -> RenderResult<PresentOutcome> {
        if image_index >= self.image_count {
            return Err(RenderError::invalid(format!("present of unknown image {image_index}")));
        }
        if std::mem::take(&mut self.stale_on_present) {
            return Ok(PresentOutcome::Stale);
        }
        self.presented += 1;
        Ok(PresentOutcome::Presented)
    }

    fn rebuild(&mut self) -> RenderResult<()> {
        self.rebuilds += 1;
        self.stale = false;
        self.next_image = 0;
        log::debug!("Headless surface rebuilt ({} images)", self.image_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fences_complete_in_submission_order() {
        let gpu = HeadlessGpu::new();
        let first = gpu.create_fence(false).expect("fence");
        let second = gpu.create_fence(false).expect("fence");
        let commands = gpu.create_command_context().expect("commands");

        for fence in [first, second] {
            gpu.reset_commands(commands.buffer).expect("reset");
            gpu.begin_commands(commands.buffer).expect("begin");
            gpu.end_commands(commands.buffer).expect("end");
            gpu.submit(&Submission {
                command_buffer: commands.buffer,
                wait: None,
                signal: None,
                fence,
            })
            .expect("submit");
        }

        assert_eq!(gpu.wait_for_fence(first, 0).expect("wait"), FenceStatus::Signaled);
        assert!(!gpu.fence_signaled(second));
        assert_eq!(gpu.in_flight_count(), 1);
        assert_eq!(gpu.wait_for_fence(second, 0).expect("wait"), FenceStatus::Signaled);

        gpu.destroy_command_context(commands);
        gpu.destroy_fence(first);
        gpu.destroy_fence(second);
    }

    #[test]
    fn test_unsubmitted_fence_times_out() {
        let gpu = HeadlessGpu::new();
        let fence = gpu.create_fence(false).expect("fence");
        assert_eq!(gpu.wait_for_fence(fence, 10).expect("wait"), FenceStatus::TimedOut);
        gpu.destroy_fence(fence);
    }

    #[test]
    fn test_release_frees_owned_allocations() {
        let gpu = HeadlessGpu::new();
        let buffer = gpu.create_buffer(1024);
        let image = gpu.create_image(4096);
        assert_eq!(gpu.live_allocation_bytes(), 5120);
        assert!(gpu.is_live_buffer(buffer));

        gpu.release(ReleaseRequest::Buffer(buffer));
        assert!(!gpu.is_live_buffer(buffer));
        gpu.release(ReleaseRequest::Image(image));
        assert_eq!(gpu.live_allocations(), 0);
        assert_eq!(gpu.released().len(), 2);
    }

    #[test]
    fn test_wait_idle_fails_when_hung() {
        let gpu = HeadlessGpu::new();
        gpu.set_hung(true);
        assert!(matches!(gpu.wait_idle(), Err(RenderError::Api(vk::Result::ERROR_DEVICE_LOST))));
        gpu.set_hung(false);
        assert!(gpu.wait_idle().is_ok());

        gpu.fail_idle_with(Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert!(matches!(gpu.wait_idle(), Err(RenderError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY))));
        gpu.fail_idle_with(None);
        assert!(gpu.wait_idle().is_ok());
    }
}
