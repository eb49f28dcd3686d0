//! Blocking one-off GPU submissions
//!
//! Uploads and layout transitions that must finish before the caller continues
//! go through an [`ImmediateSubmitter`]: one command buffer, one fence, and a
//! bounded wait after every submit. It never touches the frame ring.

use std::sync::Arc;

use ash::vk;

use crate::render::backend::{CommandContext, FenceStatus, SubmissionBackend, Submission};
use crate::render::error::{RenderError, RenderResult};
use crate::render::lifecycle::ReleaseRequest;

/// Command buffer and fence for synchronous submissions
pub struct ImmediateSubmitter<B: SubmissionBackend> {
    backend: Arc<B>,
    fence: vk::Fence,
    commands: CommandContext,
    timeout_ns: u64,
}

impl<B: SubmissionBackend> ImmediateSubmitter<B> {
    /// Create the submitter's command context and a pre-signaled fence
    pub fn new(backend: Arc<B>, timeout_ns: u64) -> RenderResult<Self> {
        let fence = backend.create_fence(true)?;
        let commands = match backend.create_command_context() {
            Ok(commands) => commands,
            Err(e) => {
                backend.destroy_fence(fence);
                return Err(e);
            }
        };

        Ok(Self {
            backend,
            fence,
            commands,
            timeout_ns,
        })
    }

    /// Record with `record`, submit, and block until the GPU finishes
    ///
    /// The command buffer passed to `record` is already recording with
    /// one-time-submit usage.
    pub fn submit<F>(&mut self, record: F) -> RenderResult<()>
    where
        F: FnOnce(vk::CommandBuffer) -> RenderResult<()>,
    {
        let buffer = self.commands.buffer;
        self.backend.reset_fence(self.fence)?;
        self.backend.reset_commands(buffer)?;
        self.backend.begin_commands(buffer)?;
        record(buffer)?;
        self.backend.end_commands(buffer)?;

        self.backend.submit(&Submission {
            command_buffer: buffer,
            wait: None,
            signal: None,
            fence: self.fence,
        })?;

        match self.backend.wait_for_fence(self.fence, self.timeout_ns)? {
            FenceStatus::Signaled => Ok(()),
            FenceStatus::TimedOut => {
                log::error!("Immediate submission did not finish within {} ns", self.timeout_ns);
                Err(RenderError::ImmediateTimeout {
                    timeout_ns: self.timeout_ns,
                })
            }
        }
    }

    /// Fence guarding the last submission
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Release requests for the submitter's fence and command pool
    ///
    /// The engine pushes these onto the process-wide queue right after
    /// creating the submitter.
    pub fn release_requests(&self) -> [ReleaseRequest; 2] {
        [
            ReleaseRequest::Fence(self.fence),
            ReleaseRequest::CommandPool(self.commands.pool),
        ]
    }
}
