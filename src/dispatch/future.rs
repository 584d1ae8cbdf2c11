use std::sync::Mutex;
use tokio::sync::Notify;

use super::DispatchError;

/// A one-shot result slot the submitting side can poll or await while
/// a builder works on the submission.
///
/// Unlike a oneshot channel, the value survives being observed: any
/// number of tasks can poll it after resolution. The mutex is only
/// ever held for a field access, so holding it in async code is fine.
#[derive(Debug)]
pub struct FutureResult<T: Clone> {
    slot: Mutex<Option<Result<T, DispatchError>>>,
    notify: Notify,
}

impl<T: Clone> FutureResult<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Non-blocking check, `None` while still in flight.
    pub fn poll(&self) -> Option<Result<T, DispatchError>> {
        self.slot.lock().unwrap().clone()
    }

    pub fn resolve(&self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(&self, error: DispatchError) {
        self.complete(Err(error));
    }

    fn complete(&self, outcome: Result<T, DispatchError>) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_some() {
            // First completion wins; a retry racing a shutdown must
            // not overwrite the delivered result.
            return;
        }
        *slot = Some(outcome);
        drop(slot);
        self.notify.notify_waiters();
    }

    /// Wait until the submission completes, giving up after `timeout`.
    pub async fn wait_for(&self, timeout: std::time::Duration) -> Option<Result<T, DispatchError>> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Wait until the submission completes.
    pub async fn wait(&self) -> Result<T, DispatchError> {
        loop {
            // Register before checking, so a completion between the
            // check and the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(outcome) = self.poll() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl<T: Clone> Default for FutureResult<T> {
    fn default() -> Self {
        Self::new()
    }
}
