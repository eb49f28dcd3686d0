//! Resource lifetime management
//!
//! Deferred releases, the frames-in-flight ring that decides when they may run,
//! and the blocking submission path used outside the ring.

pub mod deletion_queue;
pub mod frame_ring;
pub mod immediate;
pub mod release;

pub use deletion_queue::{DeletionQueue, QueueLifetime};
pub use frame_ring::{FrameContext, FrameOutcome, FrameRing, FrameSlot};
pub use immediate::ImmediateSubmitter;
pub use release::{AllocationKey, ReleaseRequest};
