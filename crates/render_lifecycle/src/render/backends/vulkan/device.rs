//! Vulkan implementation of the backend traits
//!
//! Wraps an already-initialized logical device and its graphics queue. Instance
//! and device creation stay with the application; this type only creates and
//! destroys the objects the lifecycle subsystem asks for.

use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::{vk, Device, Instance};
use slotmap::SlotMap;

use crate::render::backend::{
    CommandContext, DescriptorBackend, DescriptorWrite, ExhaustionCause, FenceStatus,
    ReleaseBackend, SetAllocation, Submission, SubmissionBackend, WriteResource,
};
use crate::render::descriptors::LayoutBinding;
use crate::render::error::{RenderError, RenderResult};
use crate::render::lifecycle::{AllocationKey, ReleaseRequest};

#[derive(Debug, Clone, Copy)]
enum AllocatedResource {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

#[derive(Debug)]
struct VulkanAllocation {
    resource: AllocatedResource,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

/// Logical device, graphics queue and the table of memory-backed resources
pub struct VulkanDevice {
    instance: Instance,
    device: Device,
    physical_device: vk::PhysicalDevice,
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    allocations: Mutex<SlotMap<AllocationKey, VulkanAllocation>>,
}

impl VulkanDevice {
    /// Wrap an existing device
    pub fn new(
        instance: Instance,
        device: Device,
        physical_device: vk::PhysicalDevice,
        graphics_queue: vk::Queue,
        graphics_queue_family: u32,
    ) -> Self {
        Self {
            instance,
            device,
            physical_device,
            graphics_queue,
            graphics_queue_family,
            allocations: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Raw `ash` device
    pub fn raw_device(&self) -> &Device {
        &self.device
    }

    /// Graphics queue used for every submission
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Queue family of the graphics queue
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    fn allocations(&self) -> MutexGuard<'_, SlotMap<AllocationKey, VulkanAllocation>> {
        self.allocations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<vk::DeviceMemory> {
        let memory_type_index = find_memory_type(
            &self.instance,
            self.physical_device,
            requirements.memory_type_bits,
            properties,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(RenderError::Api)
    }

    /// Create a buffer with its own memory, registered for deferred release
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<(AllocationKey, vk::Buffer)> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(RenderError::Api)?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let memory = match self.allocate_memory(requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(RenderError::Api(e));
        }

        let key = self.allocations().insert(VulkanAllocation {
            resource: AllocatedResource::Buffer(buffer),
            memory,
            size: requirements.size,
        });
        log::trace!("Created buffer {:?} ({} bytes) as {:?}", buffer, size, key);
        Ok((key, buffer))
    }

    /// Create an image with its own memory, registered for deferred release
    pub fn create_image(
        &self,
        image_info: &vk::ImageCreateInfo,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<(AllocationKey, vk::Image)> {
        let image = unsafe { self.device.create_image(image_info, None) }.map_err(RenderError::Api)?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let memory = match self.allocate_memory(requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { self.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
            }
            return Err(RenderError::Api(e));
        }

        let key = self.allocations().insert(VulkanAllocation {
            resource: AllocatedResource::Image(image),
            memory,
            size: requirements.size,
        });
        Ok((key, image))
    }

    /// Bytes of device memory held by registered buffers and images
    pub fn allocated_bytes(&self) -> vk::DeviceSize {
        self.allocations().values().map(|a| a.size).sum()
    }

    fn free_allocation(&self, key: AllocationKey) {
        let Some(allocation) = self.allocations().remove(key) else {
            log::warn!("Allocation {:?} released twice", key);
            return;
        };

        unsafe {
            match allocation.resource {
                AllocatedResource::Buffer(buffer) => self.device.destroy_buffer(buffer, None),
                AllocatedResource::Image(image) => self.device.destroy_image(image, None),
            }
            self.device.free_memory(allocation.memory, None);
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let live = self.allocations().len();
        if live > 0 {
            log::warn!("VulkanDevice dropped with {} unreleased buffers/images", live);
        }
    }
}

/// Find memory type index that satisfies the requirements
fn find_memory_type(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    let mem_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

    (0..mem_properties.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && mem_properties.memory_types[i as usize].property_flags.contains(properties)
        })
        .ok_or_else(|| RenderError::InitializationFailed(format!("no memory type with {properties:?}")))
}

impl DescriptorBackend for VulkanDevice {
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RenderResult<vk::DescriptorPool> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        unsafe { self.device.create_descriptor_pool(&pool_info, None) }
            .map_err(|result| RenderError::PoolCreationFailed { max_sets, result })
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RenderResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(RenderError::Api)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RenderResult<SetAllocation> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        match unsafe { self.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets
                .into_iter()
                .next()
                .map(SetAllocation::Allocated)
                .ok_or(RenderError::Api(vk::Result::ERROR_UNKNOWN)),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => {
                Ok(SetAllocation::Exhausted(ExhaustionCause::OutOfPoolMemory))
            }
            Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                Ok(SetAllocation::Exhausted(ExhaustionCause::FragmentedPool))
            }
            Err(e) => Err(RenderError::Api(e)),
        }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
        stages: vk::ShaderStageFlags,
    ) -> RenderResult<vk::DescriptorSetLayout> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.kind.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(stages)
                    .build()
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);

        unsafe { self.device.create_descriptor_set_layout(&layout_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> RenderResult<()> {
        // Info structs must stay put while the write structs point into them
        let mut image_infos = Vec::new();
        let mut buffer_infos = Vec::new();
        for write in writes {
            match write.resource {
                WriteResource::Image { view, sampler, layout } => image_infos.push(
                    vk::DescriptorImageInfo::builder()
                        .image_view(view)
                        .sampler(sampler)
                        .image_layout(layout)
                        .build(),
                ),
                WriteResource::Buffer { buffer, offset, range } => buffer_infos.push(
                    vk::DescriptorBufferInfo::builder()
                        .buffer(buffer)
                        .offset(offset)
                        .range(range)
                        .build(),
                ),
            }
        }

        let mut next_image = 0;
        let mut next_buffer = 0;
        let mut vk_writes = Vec::with_capacity(writes.len());
        for write in writes {
            let builder = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(write.binding)
                .descriptor_type(write.kind.descriptor_type());
            let vk_write = match write.resource {
                WriteResource::Image { .. } => {
                    next_image += 1;
                    builder.image_info(std::slice::from_ref(&image_infos[next_image - 1]))
                }
                WriteResource::Buffer { .. } => {
                    next_buffer += 1;
                    builder.buffer_info(std::slice::from_ref(&buffer_infos[next_buffer - 1]))
                }
            };
            vk_writes.push(vk_write.build());
        }

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }
}

impl SubmissionBackend for VulkanDevice {
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&fence_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RenderResult<FenceStatus> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(e) => Err(RenderError::Api(e)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.map_err(RenderError::Api)
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&semaphore_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_command_context(&self) -> RenderResult<CommandContext> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { self.device.create_command_pool(&pool_info, None) }.map_err(RenderError::Api)?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { self.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers.into_iter().next(),
            Err(e) => {
                unsafe { self.device.destroy_command_pool(pool, None) };
                return Err(RenderError::Api(e));
            }
        };

        match buffer {
            Some(buffer) => Ok(CommandContext { pool, buffer }),
            None => {
                unsafe { self.device.destroy_command_pool(pool, None) };
                Err(RenderError::Api(vk::Result::ERROR_UNKNOWN))
            }
        }
    }

    fn destroy_command_context(&self, context: CommandContext) {
        unsafe { self.device.destroy_command_pool(context.pool, None) };
    }

    fn reset_commands(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(RenderError::Api)
    }

    fn begin_commands(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(buffer, &begin_info) }.map_err(RenderError::Api)
    }

    fn end_commands(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        unsafe { self.device.end_command_buffer(buffer) }.map_err(RenderError::Api)
    }

    fn submit(&self, submission: &Submission) -> RenderResult<()> {
        let command_buffers = [submission.command_buffer];
        let wait_semaphores: Vec<vk::Semaphore> = submission.wait.iter().map(|w| w.semaphore).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = submission.wait.iter().map(|w| w.stage).collect();
        let signal_semaphores: Vec<vk::Semaphore> = submission.signal.into_iter().collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info.build()], submission.fence)
        }
        .map_err(RenderError::Api)
    }

    fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(RenderError::Api)
    }
}

impl ReleaseBackend for VulkanDevice {
    fn release(&self, request: ReleaseRequest) {
        match request {
            ReleaseRequest::Buffer(key) | ReleaseRequest::Image(key) => self.free_allocation(key),
            ReleaseRequest::ImageView(view) => unsafe { self.device.destroy_image_view(view, None) },
            ReleaseRequest::Sampler(sampler) => unsafe { self.device.destroy_sampler(sampler, None) },
            ReleaseRequest::Pipeline(pipeline) => unsafe { self.device.destroy_pipeline(pipeline, None) },
            ReleaseRequest::PipelineLayout(layout) => unsafe {
                self.device.destroy_pipeline_layout(layout, None);
            },
            ReleaseRequest::DescriptorSetLayout(layout) => self.destroy_descriptor_set_layout(layout),
            ReleaseRequest::DescriptorPool(pool) => self.destroy_descriptor_pool(pool),
            ReleaseRequest::CommandPool(pool) => unsafe { self.device.destroy_command_pool(pool, None) },
            ReleaseRequest::Fence(fence) => self.destroy_fence(fence),
            ReleaseRequest::Semaphore(semaphore) => self.destroy_semaphore(semaphore),
            ReleaseRequest::ShaderModule(module) => unsafe {
                self.device.destroy_shader_module(module, None);
            },
        }
    }
}
