//! Builder worker: connects out to the dispatcher, keeps a local
//! problem cache, and tests whatever it is handed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::config::{BuildConfig, BuilderConfig};
use crate::domain::{Problem, SubmissionResult, TestCase};
use crate::pipeline::BuildContext;
use crate::protocol::{read_frame, write_frame, IoStream, ProblemAndTestCases, ProtocolError};
use crate::testers::tester_for;
use crate::tls;

/// Tests one submission to completion. The production implementation
/// runs the tester pipeline; anything that panics or errors inside is
/// converted to a builder-error result rather than poisoning the
/// connection.
#[async_trait]
pub trait SubmissionTester: Send + Sync {
    async fn test(
        &self,
        problem: &Problem,
        test_cases: &[TestCase],
        program_text: &str,
    ) -> SubmissionResult;
}

/// The real tester: assembles the pipeline for the problem type and
/// runs it, always running cleanup, whatever the outcome.
pub struct PipelineTester {
    build: BuildConfig,
}

impl PipelineTester {
    pub fn new(build: BuildConfig) -> Self {
        Self { build }
    }
}

#[async_trait]
impl SubmissionTester for PipelineTester {
    async fn test(
        &self,
        problem: &Problem,
        test_cases: &[TestCase],
        program_text: &str,
    ) -> SubmissionResult {
        let mut ctx = BuildContext::new(
            problem.clone(),
            test_cases.to_vec(),
            program_text.to_string(),
            self.build.clone(),
        );
        let pipeline = tester_for(problem.problem_type);
        let outcome = pipeline.run(&mut ctx).await;
        ctx.apply_result_hooks();
        ctx.run_cleanup();

        match outcome {
            Ok(()) => ctx
                .submission_result
                .take()
                .unwrap_or_else(SubmissionResult::builder_error),
            Err(e) => {
                tracing::error!(problem_id = problem.id, error = %e, "tester pipeline failed");
                SubmissionResult::builder_error()
            }
        }
    }
}

/// A builder process: maintains the connection to the dispatcher and
/// serves the submission exchange over it.
pub struct Builder<T: SubmissionTester> {
    config: BuilderConfig,
    tester: T,
    cache: HashMap<i32, ProblemAndTestCases>,
}

impl<T: SubmissionTester> Builder<T> {
    pub fn new(config: BuilderConfig, tester: T) -> Self {
        Self {
            config,
            tester,
            cache: HashMap::new(),
        }
    }

    /// Connect and serve, reconnecting after failures, until the
    /// shutdown signal fires.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let reconnect_delay = Duration::from_millis(self.config.reconnect_delay_ms);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.connect().await {
                Ok(mut stream) => {
                    tracing::info!(
                        host = %self.config.server_host,
                        port = self.config.server_port,
                        "connected to dispatcher"
                    );
                    match self.serve(&mut stream, &mut shutdown).await {
                        Ok(()) => break, // shutdown requested
                        Err(e) if e.is_disconnect() => {
                            tracing::info!("dispatcher closed the connection");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "connection to dispatcher failed");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot reach dispatcher");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("builder stopped");
    }

    async fn connect(&self) -> Result<IoStream, BuilderError> {
        let addr = (self.config.server_host.as_str(), self.config.server_port);
        let tcp = TcpStream::connect(addr).await?;
        match &self.config.tls {
            Some(tls_config) => {
                let (connector, server_name) = tls::client_connector(tls_config)?;
                let stream = connector.connect(server_name, tcp).await?;
                Ok(Box::new(stream))
            }
            None => Ok(Box::new(tcp)),
        }
    }

    /// Serve submission exchanges until the connection drops or a
    /// shutdown is requested.
    pub async fn serve<S>(
        &mut self,
        stream: &mut S,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ProtocolError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        loop {
            let problem_id: i32 = tokio::select! {
                frame = read_frame(stream) => frame?,
                _ = shutdown.changed() => return Ok(()),
            };
            if problem_id < 0 {
                tracing::trace!("keepalive from dispatcher");
                continue;
            }
            self.handle_submission(stream, problem_id).await?;
        }
    }

    async fn handle_submission<S>(
        &mut self,
        stream: &mut S,
        problem_id: i32,
    ) -> Result<(), ProtocolError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        let has_cached = self.cache.contains_key(&problem_id);
        write_frame(stream, &has_cached).await?;
        if !has_cached {
            let payload: ProblemAndTestCases = read_frame(stream).await?;
            self.cache.insert(problem_id, payload);
        }
        let program_text: String = read_frame(stream).await?;

        let result = match self.cache.get(&problem_id) {
            Some(entry) => {
                tracing::info!(problem_id, "testing submission");
                self.tester
                    .test(&entry.problem, &entry.test_cases, &program_text)
                    .await
            }
            // Unreachable unless the cache was poisoned; answer with
            // a builder error instead of stalling the dispatcher.
            None => SubmissionResult::builder_error(),
        };
        write_frame(stream, &result).await
    }
}

#[derive(Debug, thiserror::Error)]
enum BuilderError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tls(#[from] tls::TlsError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompilationResult, ProblemType};
    use crate::matching::OutputComparison;
    use crate::protocol::KEEPALIVE_PROBLEM_ID;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubTester {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SubmissionTester for StubTester {
        async fn test(&self, _: &Problem, _: &[TestCase], program_text: &str) -> SubmissionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut result = SubmissionResult::new(CompilationResult::success(), vec![]);
            result.annotate("program_len", program_text.len().to_string());
            result
        }
    }

    fn problem_payload(id: i32) -> ProblemAndTestCases {
        ProblemAndTestCases {
            problem: Problem {
                id,
                problem_type: ProblemType::ScriptProgram,
                testname: String::new(),
                output_comparison: OutputComparison::Exact,
            },
            test_cases: vec![],
        }
    }

    /// Drives the dispatcher's half of one exchange against a builder
    /// running on the other end of a duplex pipe.
    async fn dispatch_one<S>(
        stream: &mut S,
        id: i32,
        program: &str,
    ) -> (bool, SubmissionResult)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        write_frame(stream, &id).await.unwrap();
        let has_cached: bool = read_frame(stream).await.unwrap();
        if !has_cached {
            write_frame(stream, &problem_payload(id)).await.unwrap();
        }
        write_frame(stream, &program.to_string()).await.unwrap();
        let result: SubmissionResult = read_frame(stream).await.unwrap();
        (has_cached, result)
    }

    #[tokio::test]
    async fn test_problem_cached_after_first_submission() {
        let (mut dispatcher_side, mut builder_side) = tokio::io::duplex(64 * 1024);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Builder::new(
            BuilderConfig::default(),
            StubTester {
                calls: calls.clone(),
            },
        );
        let (_tx, mut shutdown) = watch::channel(false);
        let serving = tokio::spawn(async move {
            let _ = builder.serve(&mut builder_side, &mut shutdown).await;
        });

        let (cached_first, result) = dispatch_one(&mut dispatcher_side, 7, "print(1)").await;
        assert!(!cached_first);
        assert!(result.is_compiled());

        let (cached_second, _) = dispatch_one(&mut dispatcher_side, 7, "print(2)").await;
        assert!(cached_second);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(dispatcher_side);
        serving.await.unwrap();
    }

    #[tokio::test]
    async fn test_keepalive_is_ignored() {
        let (mut dispatcher_side, mut builder_side) = tokio::io::duplex(64 * 1024);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Builder::new(
            BuilderConfig::default(),
            StubTester {
                calls: calls.clone(),
            },
        );
        let (_tx, mut shutdown) = watch::channel(false);
        let serving = tokio::spawn(async move {
            let _ = builder.serve(&mut builder_side, &mut shutdown).await;
        });

        write_frame(&mut dispatcher_side, &KEEPALIVE_PROBLEM_ID)
            .await
            .unwrap();
        // A real submission still works after the keepalive.
        let (_, result) = dispatch_one(&mut dispatcher_side, 3, "x = 1").await;
        assert_eq!(result.annotations.get("program_len"), Some(&"5".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(dispatcher_side);
        serving.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_ends_serve_loop() {
        let (_dispatcher_side, mut builder_side) = tokio::io::duplex(64 * 1024);
        let mut builder = Builder::new(
            BuilderConfig::default(),
            StubTester {
                calls: Arc::new(AtomicUsize::new(0)),
            },
        );
        let (tx, mut shutdown) = watch::channel(false);
        let serving = tokio::spawn(async move {
            builder.serve(&mut builder_side, &mut shutdown).await
        });

        tx.send(true).unwrap();
        assert!(serving.await.unwrap().is_ok());
    }
}
