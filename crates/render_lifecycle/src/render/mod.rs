//! Rendering-side lifecycle: backend seams, descriptors, frame pacing

pub mod backend;
pub mod backends;
pub mod descriptors;
pub mod engine;
pub mod error;
pub mod lifecycle;

#[cfg(test)]
mod tests;
