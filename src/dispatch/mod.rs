//! Dispatcher: accepts builder connections, queues submissions and
//! farms them out, one at a time per builder.

pub mod future;
pub mod queue;
pub mod server;
pub mod worker;

use thiserror::Error;

pub use future::FutureResult;
pub use queue::{QueuedSubmission, SubmissionQueue};
pub use server::{DispatchService, HealthData};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("no builders are connected")]
    NoWorkers,
    #[error("submission failed after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}
