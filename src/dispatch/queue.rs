use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use super::future::FutureResult;
use crate::domain::{Submission, SubmissionResult};

/// A submission waiting for (or retrying on) a builder.
pub struct QueuedSubmission {
    pub submission: Arc<Submission>,
    pub future: Arc<FutureResult<SubmissionResult>>,
    /// Times a builder has been handed this submission.
    pub attempts: u32,
    pub enqueued_at: std::time::Instant,
}

/// FIFO of pending submissions shared by all worker sessions.
///
/// Retried submissions go back at the head so one flaky builder
/// cannot starve a submission behind fresh arrivals.
pub struct SubmissionQueue {
    entries: Mutex<VecDeque<QueuedSubmission>>,
    notify: Notify,
    closed: AtomicBool,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn put(&self, entry: QueuedSubmission) {
        self.entries.lock().unwrap().push_back(entry);
        self.notify.notify_one();
    }

    /// Re-enqueue at the head, ahead of newer submissions.
    pub fn put_front(&self, entry: QueuedSubmission) {
        self.entries.lock().unwrap().push_front(entry);
        self.notify.notify_one();
    }

    /// Take the next submission, waiting up to `timeout`. `None` on
    /// timeout or when the queue has been closed.
    pub async fn take(&self, timeout: Duration) -> Option<QueuedSubmission> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            let notified = self.notify.notified();
            if let Some(entry) = self.entries.lock().unwrap().pop_front() {
                return Some(entry);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the queue and fail everything still pending.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.entries.lock().unwrap().drain(..).collect();
        for entry in drained {
            entry.future.fail(super::DispatchError::ShuttingDown);
        }
        self.notify.notify_waiters();
    }
}

impl Default for SubmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}
