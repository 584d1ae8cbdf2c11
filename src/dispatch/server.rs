use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use uuid::Uuid;

use super::future::FutureResult;
use super::queue::{QueuedSubmission, SubmissionQueue};
use super::worker::WorkerSession;
use super::DispatchError;
use crate::config::DispatchConfig;
use crate::domain::{Submission, SubmissionResult};
use crate::tls::{self, TlsError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
}

/// Periodic snapshot of dispatcher load.
#[derive(Clone, Copy, Debug, Default)]
pub struct HealthData {
    pub queue_depth: usize,
    pub num_workers: usize,
}

/// The dispatcher service: listens for builder connections, maintains
/// the submission queue, and tracks which builders are alive.
///
/// Submitting is rejected outright when no builder is connected, so
/// callers get an immediate error instead of a submission that hangs
/// forever.
pub struct DispatchService {
    config: DispatchConfig,
    queue: Arc<SubmissionQueue>,
    workers: Arc<DashMap<Uuid, ()>>,
    sessions: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    health: Arc<std::sync::Mutex<HealthData>>,
    shutdown: watch::Sender<bool>,
}

impl DispatchService {
    pub fn new(config: DispatchConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            queue: Arc::new(SubmissionQueue::new()),
            workers: Arc::new(DashMap::new()),
            sessions: std::sync::Mutex::new(Vec::new()),
            health: Arc::new(std::sync::Mutex::new(HealthData::default())),
            shutdown,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Queue a submission for testing. The returned future resolves
    /// once some builder has produced a result.
    pub fn submit(
        &self,
        submission: Submission,
    ) -> Result<Arc<FutureResult<SubmissionResult>>, DispatchError> {
        if self.queue.is_closed() {
            return Err(DispatchError::ShuttingDown);
        }
        if self.workers.is_empty() {
            return Err(DispatchError::NoWorkers);
        }
        let future = Arc::new(FutureResult::new());
        self.queue.put(QueuedSubmission {
            submission: Arc::new(submission),
            future: future.clone(),
            attempts: 0,
            enqueued_at: std::time::Instant::now(),
        });
        Ok(future)
    }

    /// Latest health sample. Zeroes until the first sampler tick.
    pub fn health(&self) -> HealthData {
        self.health.lock().unwrap().clone()
    }

    /// Bind the configured port and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        self.serve(listener).await
    }

    /// Serve builder connections on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let acceptor = match &self.config.tls {
            Some(tls_config) => Some(tls::server_acceptor(tls_config)?),
            None => None,
        };
        tracing::info!(addr = %listener.local_addr()?, tls = acceptor.is_some(), "dispatcher listening");

        self.spawn_health_sampler();
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown.changed() => break,
            };

            // Plain TCP is only open to loopback and the explicit
            // allowlist; TLS connections authenticate themselves.
            if acceptor.is_none() && !peer_allowed(peer.ip(), &self.config.allowed_hosts) {
                tracing::warn!(peer = %peer, "rejected builder connection");
                continue;
            }

            tracing::info!(peer = %peer, "builder connected");
            match &acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => self.spawn_worker(tls_stream),
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "TLS handshake failed");
                    }
                },
                None => self.spawn_worker(stream),
            }
        }

        self.queue.close();

        // Let every session finish its in-flight exchange before the
        // listener is released; results already on the wire must not
        // be dropped by a shutdown.
        let handles: Vec<_> = self.sessions.lock().unwrap().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "worker session task failed");
            }
        }
        Ok(())
    }

    fn spawn_worker<S>(&self, stream: S)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let session = WorkerSession::new(stream, self.queue.clone(), self.config.clone());
        let id = session.id();
        let workers = self.workers.clone();
        workers.insert(id, ());
        let handle = tokio::spawn(async move {
            session.run().await;
            workers.remove(&id);
        });
        self.sessions.lock().unwrap().push(handle);
    }

    fn spawn_health_sampler(&self) {
        let queue = self.queue.clone();
        let workers = self.workers.clone();
        let health = self.health.clone();
        let interval = Duration::from_millis(self.config.health_sample_interval_ms);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let sample = HealthData {
                            queue_depth: queue.len(),
                            num_workers: workers.len(),
                        };
                        *health.lock().unwrap() = sample;
                        tracing::info!(
                            queue_depth = sample.queue_depth,
                            workers = sample.num_workers,
                            "dispatcher health"
                        );
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Stop accepting connections, close the queue, and fail whatever
    /// is still pending. `serve` joins the remaining worker sessions
    /// before it returns.
    pub fn shutdown(&self) {
        self.queue.close();
        let _ = self.shutdown.send(true);
    }
}

fn peer_allowed(peer: IpAddr, allowed_hosts: &[String]) -> bool {
    peer.is_loopback()
        || allowed_hosts
            .iter()
            .any(|host| host.parse::<IpAddr>().map(|ip| ip == peer).unwrap_or(false))
}
