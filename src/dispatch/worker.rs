use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use super::queue::SubmissionQueue;
use super::DispatchError;
use crate::config::DispatchConfig;
use crate::domain::{Submission, SubmissionResult};
use crate::protocol::{
    read_frame, write_frame, ProblemAndTestCases, ProtocolError, KEEPALIVE_PROBLEM_ID,
};

/// One connected builder. Pulls submissions off the shared queue and
/// runs the wire exchange for each, one at a time.
///
/// A builder that drops mid-exchange gets its submission re-enqueued
/// at the head of the queue for another builder to pick up, until the
/// attempt cap is hit.
pub struct WorkerSession<S> {
    id: Uuid,
    stream: S,
    queue: Arc<SubmissionQueue>,
    config: DispatchConfig,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> WorkerSession<S> {
    pub fn new(stream: S, queue: Arc<SubmissionQueue>, config: DispatchConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream,
            queue,
            config,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Serve the builder until it disconnects or the queue closes.
    pub async fn run(mut self) {
        let poll = Duration::from_millis(self.config.queue_poll_interval_ms);
        let keepalive_after = Duration::from_millis(self.config.idle_keepalive_ms);
        let mut idle = Duration::ZERO;

        loop {
            if self.queue.is_closed() {
                break;
            }
            let Some(mut entry) = self.queue.take(poll).await else {
                idle += poll;
                if idle >= keepalive_after {
                    idle = Duration::ZERO;
                    if let Err(e) = write_frame(&mut self.stream, &KEEPALIVE_PROBLEM_ID).await {
                        tracing::info!(worker = %self.id, error = %e, "builder lost on keepalive");
                        break;
                    }
                }
                continue;
            };

            idle = Duration::ZERO;
            if entry.attempts >= self.config.max_attempts {
                tracing::warn!(
                    worker = %self.id,
                    problem_id = entry.submission.problem.id,
                    attempts = entry.attempts,
                    "giving up on submission"
                );
                entry.future.fail(DispatchError::AttemptsExhausted {
                    attempts: entry.attempts,
                });
                continue;
            }
            entry.attempts += 1;

            match self.exchange(&entry.submission).await {
                Ok(result) => {
                    tracing::debug!(
                        worker = %self.id,
                        problem_id = entry.submission.problem.id,
                        passed = result.num_tests_passed(),
                        queued_for = ?entry.enqueued_at.elapsed(),
                        "submission result received"
                    );
                    entry.future.resolve(result);
                }
                Err(e) => {
                    tracing::info!(
                        worker = %self.id,
                        problem_id = entry.submission.problem.id,
                        error = %e,
                        "builder failed mid-exchange, re-enqueueing"
                    );
                    self.queue.put_front(entry);
                    break;
                }
            }
        }
        tracing::info!(worker = %self.id, "worker session finished");
    }

    async fn exchange(
        &mut self,
        submission: &Submission,
    ) -> Result<SubmissionResult, ProtocolError> {
        write_frame(&mut self.stream, &submission.problem.id).await?;
        let has_cached: bool = read_frame(&mut self.stream).await?;
        if !has_cached {
            let payload = ProblemAndTestCases {
                problem: submission.problem.clone(),
                test_cases: submission.test_cases.clone(),
            };
            write_frame(&mut self.stream, &payload).await?;
        }
        write_frame(&mut self.stream, &submission.program_text).await?;
        read_frame(&mut self.stream).await
    }
}
