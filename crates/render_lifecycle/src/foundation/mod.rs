//! Foundation module - Core utilities shared by the render subsystems
//!
//! - Logging utilities

pub mod logging;
