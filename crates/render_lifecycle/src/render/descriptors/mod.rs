//! Descriptor layouts, pools and allocators
//!
//! - [`kind`]: resource kinds and the per-kind ratios pools are sized by
//! - [`layout`]: layout declaration and the builder
//! - [`pool`]: one fixed-capacity pool, and the single-pool allocator
//! - [`growable`]: the allocator that rotates through pools and grows them
//! - [`writer`]: batched binding writes

pub mod growable;
pub mod kind;
pub mod layout;
pub mod pool;
pub mod writer;

pub use growable::{GrowableDescriptorAllocator, PoolKey, PoolStatus, MAX_SETS_PER_POOL};
pub use kind::{kind_capacity, pool_sizes, PoolSizeRatio, ResourceKind};
pub use layout::{DescriptorLayout, DescriptorLayoutBuilder, LayoutBinding};
pub use pool::{DescriptorAllocator, DescriptorPoolArena};
pub use writer::DescriptorWriter;
