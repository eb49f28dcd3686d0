//! Backend implementations
//!
//! - [`vulkan`]: a real device through `ash`
//! - [`headless`]: an in-memory device for tests and the demo

pub mod headless;
pub mod vulkan;
