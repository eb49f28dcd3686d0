//! Deferred destruction
//!
//! A resource referenced by submitted GPU work cannot be destroyed when the CPU
//! is done with it; the release is queued here and executed once the owning
//! completion fence proves the GPU is done too.
//!
//! Requests run in reverse registration order, so a resource created from
//! another (a view from an image, a pipeline from its layout) is always
//! released before the resource it was built from.

use crate::render::backend::ReleaseBackend;
use crate::render::lifecycle::ReleaseRequest;

/// When a queue is flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLifetime {
    /// Flushed once at shutdown, after the device is idle
    Process,
    /// Flushed every ring cycle once the slot's fence has signaled
    Frame(usize),
}

/// Ordered list of pending releases
#[derive(Debug)]
pub struct DeletionQueue {
    lifetime: QueueLifetime,
    requests: Vec<ReleaseRequest>,
}

impl DeletionQueue {
    /// Create an empty queue
    pub fn new(lifetime: QueueLifetime) -> Self {
        Self {
            lifetime,
            requests: Vec::new(),
        }
    }

    /// Register a release to run at the next flush
    pub fn push(&mut self, request: ReleaseRequest) {
        self.requests.push(request);
    }

    /// Execute every pending release, newest first, and empty the queue
    ///
    /// Returns how many releases ran.
    pub fn flush<R: ReleaseBackend + ?Sized>(&mut self, releaser: &R) -> usize {
        let count = self.requests.len();
        for request in self.requests.drain(..).rev() {
            log::trace!("Releasing {} {:?}", request.label(), request);
            releaser.release(request);
        }

        if count > 0 {
            log::debug!("Flushed {} releases from {:?} deletion queue", count, self.lifetime);
        }
        count
    }

    /// Which lifetime this queue serves
    pub fn lifetime(&self) -> QueueLifetime {
        self.lifetime
    }

    /// Pending releases, oldest first
    pub fn pending(&self) -> &[ReleaseRequest] {
        &self.requests
    }

    /// Number of pending releases
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.requests.is_empty() {
            log::warn!(
                "{:?} deletion queue dropped with {} unreleased resources",
                self.lifetime,
                self.requests.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::{self, Handle};
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingReleaser {
        released: RefCell<Vec<ReleaseRequest>>,
    }

    impl ReleaseBackend for RecordingReleaser {
        fn release(&self, request: ReleaseRequest) {
            self.released.borrow_mut().push(request);
        }
    }

    fn sampler(raw: u64) -> ReleaseRequest {
        ReleaseRequest::Sampler(vk::Sampler::from_raw(raw))
    }

    #[test]
    fn test_flush_runs_in_reverse_order() {
        let releaser = RecordingReleaser::default();
        let mut queue = DeletionQueue::new(QueueLifetime::Process);
        queue.push(sampler(1));
        queue.push(sampler(2));
        queue.push(sampler(3));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.flush(&releaser), 3);
        assert_eq!(*releaser.released.borrow(), vec![sampler(3), sampler(2), sampler(1)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_second_flush_is_a_no_op() {
        let releaser = RecordingReleaser::default();
        let mut queue = DeletionQueue::new(QueueLifetime::Frame(0));
        queue.push(ReleaseRequest::Fence(vk::Fence::from_raw(5)));
        queue.flush(&releaser);

        assert_eq!(queue.flush(&releaser), 0);
        assert_eq!(releaser.released.borrow().len(), 1);
    }

    #[test]
    fn test_pushes_after_flush_start_a_new_batch() {
        let releaser = RecordingReleaser::default();
        let mut queue = DeletionQueue::new(QueueLifetime::Frame(1));
        queue.push(sampler(1));
        queue.flush(&releaser);
        queue.push(sampler(2));

        assert_eq!(queue.pending(), &[sampler(2)]);
        assert_eq!(queue.lifetime(), QueueLifetime::Frame(1));
        queue.flush(&releaser);
        assert_eq!(*releaser.released.borrow(), vec![sampler(1), sampler(2)]);
    }
}
