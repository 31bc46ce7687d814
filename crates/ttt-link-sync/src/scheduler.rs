//! Receive polling
//!
//! `PollScheduler` turns the inbound byte stream into discrete events, one
//! bounded receive attempt per tick. It can be driven two ways:
//! - cooperatively, by calling [`PollScheduler::tick`] from the caller's own loop
//! - by a [`PollWorker`], a tokio task that ticks at a fixed period until cancelled
//!
//! A permission or device-loss failure latches the scheduler into
//! [`PollState::FatalError`]; no further receive is attempted until `reset`.

use crate::config::LinkConfig;
use crate::state::GameSyncState;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use ttt_link_bridge::{ConnectionInfo, LinkManager, protocol};
use ttt_link_core::{InboundEvent, IoError};

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Created or reset, no receive attempted yet
    Idle,
    Polling,
    /// Latched by a fatal link error
    FatalError,
    /// The link was closed underneath the scheduler
    Stopped,
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No complete frame arrived within the receive timeout
    NoData,
    /// One decoded frame; decode failures arrive as `ProtocolError`
    Event(InboundEvent),
    /// The link failed fatally on this tick. Reported once.
    Fatal { endpoint: String, error: IoError },
    /// The scheduler is latched or stopped; nothing was attempted
    Halted,
}

/// Single-flight receive poller
///
/// `tick` takes `&mut self`, so at most one receive is in flight per scheduler.
pub struct PollScheduler {
    link: Arc<LinkManager>,
    endpoint: String,
    state: PollState,
    receive_timeout: Duration,
    period: Duration,
    attempts: u64,
}

impl PollScheduler {
    pub fn new(link: Arc<LinkManager>, connection: &ConnectionInfo, config: &LinkConfig) -> Self {
        Self {
            link,
            endpoint: connection.endpoint.name.clone(),
            state: PollState::Idle,
            receive_timeout: config.receive_timeout,
            period: config.poll_period,
            attempts: 0,
        }
    }

    /// Make one bounded receive attempt
    pub async fn tick(&mut self) -> PollOutcome {
        match self.state {
            PollState::FatalError | PollState::Stopped => return PollOutcome::Halted,
            PollState::Idle => {
                debug!("Polling {} every {:?}", self.endpoint, self.period);
                self.state = PollState::Polling;
            }
            PollState::Polling => {}
        }

        self.attempts += 1;
        match self.link.try_receive_line(self.receive_timeout).await {
            Ok(None) | Err(IoError::Timeout) => PollOutcome::NoData,
            Ok(Some(line)) => match protocol::decode(&line) {
                Ok(event) => PollOutcome::Event(event),
                Err(e) => {
                    warn!("Dropping frame from {}: {}", self.endpoint, e);
                    PollOutcome::Event(e.into())
                }
            },
            Err(IoError::NotConnected) => {
                info!("Link to {} closed, poller stopping", self.endpoint);
                self.state = PollState::Stopped;
                PollOutcome::Halted
            }
            Err(error) => {
                error!(
                    "Link to {} failed, polling stopped until reconnect: {}",
                    self.endpoint, error
                );
                self.state = PollState::FatalError;
                PollOutcome::Fatal {
                    endpoint: self.endpoint.clone(),
                    error,
                }
            }
        }
    }

    /// Clear a latch after the link has been reopened
    pub fn reset(&mut self) {
        debug!("Poller for {} reset from {:?}", self.endpoint, self.state);
        self.state = PollState::Idle;
    }

    pub fn stop(&mut self) {
        self.state = PollState::Stopped;
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Whether further ticks are no-ops
    pub fn is_latched(&self) -> bool {
        matches!(self.state, PollState::FatalError | PollState::Stopped)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Receive attempts made so far
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

/// Fold a tick outcome into the shared state
pub(crate) async fn reconcile(state: &Mutex<GameSyncState>, outcome: &PollOutcome) {
    match outcome {
        PollOutcome::Event(event) => {
            state.lock().await.apply(event.clone());
        }
        PollOutcome::Fatal { endpoint, error } => {
            state.lock().await.link_fault(format!("{}: {}", endpoint, error));
        }
        PollOutcome::NoData | PollOutcome::Halted => {}
    }
}

/// Cooperative stop signal, observed at the top of the next tick
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Scheduler running on its own tokio task
pub struct PollWorker {
    cancel: CancelToken,
    handle: Option<JoinHandle<PollScheduler>>,
}

impl PollWorker {
    /// Move the scheduler onto a task that ticks every `period`
    pub fn spawn(scheduler: PollScheduler, state: Arc<Mutex<GameSyncState>>) -> Self {
        let cancel = CancelToken::new();
        let handle = tokio::spawn(run_worker(scheduler, state, cancel.clone()));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel the task and wait for it, handing the scheduler back
    ///
    /// Returns `None` if the task panicked.
    pub async fn stop(mut self) -> Option<PollScheduler> {
        self.cancel.cancel();
        let handle = self.handle.take()?;
        match handle.await {
            Ok(scheduler) => Some(scheduler),
            Err(e) => {
                error!("Poll worker ended abnormally: {}", e);
                None
            }
        }
    }

    /// True once the task has exited, e.g. after a fatal error
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for PollWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    mut scheduler: PollScheduler,
    state: Arc<Mutex<GameSyncState>>,
    cancel: CancelToken,
) -> PollScheduler {
    debug!("Poll worker started for {}", scheduler.endpoint);

    loop {
        if cancel.is_cancelled() {
            debug!("Poll worker for {} cancelled", scheduler.endpoint);
            break;
        }

        let outcome = scheduler.tick().await;
        reconcile(&state, &outcome).await;
        if scheduler.is_latched() {
            debug!(
                "Poll worker for {} exiting in state {:?}",
                scheduler.endpoint,
                scheduler.state()
            );
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(scheduler.period()) => {}
            _ = cancel.cancelled() => {}
        }
    }

    scheduler
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttt_link_bridge::MemoryBackend;
    use ttt_link_core::{BaudRate, Cell, Endpoint};

    fn fast_config() -> LinkConfig {
        LinkConfig {
            receive_timeout: Duration::from_millis(10),
            poll_period: Duration::from_millis(5),
            ..LinkConfig::default()
        }
    }

    async fn connected(backend: &MemoryBackend) -> (Arc<LinkManager>, PollScheduler) {
        let link = Arc::new(LinkManager::new(Arc::new(backend.clone())));
        let connection = link
            .open(Endpoint::new("COM3", BaudRate::B9600), Duration::from_secs(1))
            .await
            .unwrap();
        let scheduler = PollScheduler::new(link.clone(), &connection, &fast_config());
        (link, scheduler)
    }

    #[tokio::test]
    async fn test_tick_delivers_events_in_order() {
        let backend = MemoryBackend::new();
        let (_link, mut scheduler) = connected(&backend).await;
        assert_eq!(scheduler.state(), PollState::Idle);

        backend.push_line(r#"{"type":"game_status","message":"Game reset."}"#);
        backend.push_line(r#"{"board":[[" "," "," "],[" "," "," "],[" "," "," "]]}"#);

        assert_eq!(
            scheduler.tick().await,
            PollOutcome::Event(InboundEvent::StatusMessage {
                text: "Game reset.".into()
            })
        );
        assert_eq!(scheduler.state(), PollState::Polling);
        assert!(matches!(
            scheduler.tick().await,
            PollOutcome::Event(InboundEvent::BoardUpdate { .. })
        ));
        assert_eq!(scheduler.tick().await, PollOutcome::NoData);
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_stop_polling() {
        let backend = MemoryBackend::new();
        let (_link, mut scheduler) = connected(&backend).await;

        backend.push_line(r#"{"board":[[" "," "," "],[" "," "," "]]}"#);
        backend.push_line(r#"{"type":"win_status","message":"O wins!"}"#);

        assert!(matches!(
            scheduler.tick().await,
            PollOutcome::Event(InboundEvent::ProtocolError { .. })
        ));
        assert_eq!(scheduler.state(), PollState::Polling);
        assert_eq!(
            scheduler.tick().await,
            PollOutcome::Event(InboundEvent::WinStatus {
                text: "O wins!".into()
            })
        );
    }

    #[tokio::test]
    async fn test_fatal_error_latches_scheduler() {
        let backend = MemoryBackend::new();
        let (_link, mut scheduler) = connected(&backend).await;

        backend.push_error(IoError::PermissionDenied("Access is denied.".into()));
        match scheduler.tick().await {
            PollOutcome::Fatal { endpoint, error } => {
                assert_eq!(endpoint, "COM3");
                assert!(matches!(error, IoError::PermissionDenied(_)));
            }
            other => panic!("Expected Fatal, got {:?}", other),
        }
        assert_eq!(scheduler.state(), PollState::FatalError);

        let reads_after_fault = backend.read_calls();
        let attempts_after_fault = scheduler.attempts();
        for _ in 0..100 {
            assert_eq!(scheduler.tick().await, PollOutcome::Halted);
        }
        assert_eq!(backend.read_calls(), reads_after_fault);
        assert_eq!(scheduler.attempts(), attempts_after_fault);
    }

    #[tokio::test]
    async fn test_reset_after_reopen_resumes_polling() {
        let backend = MemoryBackend::new();
        let (link, mut scheduler) = connected(&backend).await;

        backend.push_error(IoError::DeviceLost("unplugged".into()));
        assert!(matches!(scheduler.tick().await, PollOutcome::Fatal { .. }));

        link.open(Endpoint::new("COM3", BaudRate::B9600), Duration::from_secs(1))
            .await
            .unwrap();
        scheduler.reset();
        backend.push_line(r#"{"board":[["X"," "," "],[" "," "," "],[" "," "," "]]}"#);

        match scheduler.tick().await {
            PollOutcome::Event(InboundEvent::BoardUpdate { cells }) => {
                assert_eq!(cells[0][0], Cell::X)
            }
            other => panic!("Expected BoardUpdate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_link_stops_scheduler() {
        let backend = MemoryBackend::new();
        let (link, mut scheduler) = connected(&backend).await;

        link.close().await;
        assert_eq!(scheduler.tick().await, PollOutcome::Halted);
        assert_eq!(scheduler.state(), PollState::Stopped);
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        assert!(!token.is_cancelled());
        token.cancel();
        task.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_worker_publishes_and_stops() {
        let backend = MemoryBackend::new();
        let (_link, scheduler) = connected(&backend).await;
        let state = Arc::new(Mutex::new(GameSyncState::new()));
        let mut updates = state.lock().await.subscribe();

        let worker = PollWorker::spawn(scheduler, state.clone());
        backend.push_line(r#"{"board":[["X"," "," "],[" "," "," "],[" "," "," "]]}"#);

        tokio::time::timeout(Duration::from_secs(2), updates.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updates.borrow().board[0][0], Cell::X);

        let scheduler = worker.stop().await.unwrap();
        assert_eq!(scheduler.state(), PollState::Polling);
        assert!(scheduler.attempts() >= 1);
    }

    #[tokio::test]
    async fn test_worker_exits_on_fatal_error() {
        let backend = MemoryBackend::new();
        let (_link, scheduler) = connected(&backend).await;
        let state = Arc::new(Mutex::new(GameSyncState::new()));

        let worker = PollWorker::spawn(scheduler, state.clone());
        backend.push_error(IoError::PermissionDenied("revoked".into()));

        tokio::time::timeout(Duration::from_secs(2), async {
            while !worker.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let reads = backend.read_calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.read_calls(), reads);

        let scheduler = worker.stop().await.unwrap();
        assert_eq!(scheduler.state(), PollState::FatalError);
        assert!(state.lock().await.take_notice().is_some());
        assert!(state.lock().await.take_notice().is_none());
    }
}
