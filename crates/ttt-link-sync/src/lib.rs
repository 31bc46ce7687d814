//! # ttt-link-sync
//!
//! Keeps the host's view of a tic-tac-toe device in step with the device.
//!
//! This crate provides:
//! - `LinkConfig` for rate and timing settings
//! - `PollScheduler` and `PollWorker` for receive polling
//! - `GameSyncState` for folding inbound events into a `SyncView`
//! - `GameLink`, the facade a front end talks to

pub mod config;
pub mod scheduler;
pub mod state;

pub use config::LinkConfig;
pub use scheduler::{CancelToken, PollOutcome, PollScheduler, PollState, PollWorker};
pub use state::{GameSyncState, LinkHealth, Notice, NoticeKind, SyncView};

use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use ttt_link_bridge::{ConnectionInfo, LinkBackend, LinkManager, SerialBackend, protocol};
use ttt_link_core::{BaudRate, Endpoint, GameMode, IoError, LinkError, OutboundCommand, Result};

/// Who drives the scheduler, if anyone
enum Poller {
    Inactive,
    /// Ticked by the caller through [`GameLink::tick`]
    Cooperative(PollScheduler),
    /// Ticked by a background task
    Worker(PollWorker),
}

/// Connection, polling and game state for one device
pub struct GameLink {
    link: Arc<LinkManager>,
    state: Arc<Mutex<GameSyncState>>,
    config: LinkConfig,
    poller: Poller,
}

impl GameLink {
    pub fn new(backend: Arc<dyn LinkBackend>, config: LinkConfig) -> Self {
        Self {
            link: Arc::new(LinkManager::new(backend)),
            state: Arc::new(Mutex::new(GameSyncState::new())),
            config,
            poller: Poller::Inactive,
        }
    }

    /// Link over the host's serial ports
    pub fn serial(config: LinkConfig) -> Self {
        Self::new(Arc::new(SerialBackend::new()), config)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Device names currently visible; callable at any time
    pub fn list_endpoints(&self) -> Vec<String> {
        self.link.enumerate()
    }

    /// Open `name` at `rate`, replacing any current connection
    ///
    /// A successful connect starts a fresh scheduler in the cooperative model,
    /// so a previous fatal latch no longer applies.
    pub async fn connect(&mut self, name: &str, rate: BaudRate) -> Result<ConnectionInfo> {
        self.halt_poller().await;

        let opened = self
            .link
            .open(Endpoint::new(name, rate), self.config.io_timeout)
            .await;
        let mut state = self.state.lock().await;
        match opened {
            Ok(connection) => {
                self.config.rate = rate;
                if state.current_view().health == LinkHealth::FatalError {
                    state.link_closed();
                }
                state.link_opened();
                self.poller = Poller::Cooperative(PollScheduler::new(
                    self.link.clone(),
                    &connection,
                    &self.config,
                ));
                Ok(connection)
            }
            Err(e) if e.is_fatal() => {
                state.link_fault(e.to_string());
                Err(e.into())
            }
            Err(e) => {
                if state.current_view().health == LinkHealth::Connected {
                    state.link_closed();
                }
                state.link_error(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Stop polling and release the device
    pub async fn disconnect(&mut self) {
        self.halt_poller().await;
        self.link.close().await;
        self.state.lock().await.link_closed();
    }

    /// Change the transfer rate
    ///
    /// While disconnected this only sets the rate for the next `connect`.
    pub async fn set_rate(&mut self, rate: BaudRate) -> Result<()> {
        self.config.rate = rate;
        if self.link.connection().await.is_none() {
            debug!("Not connected, {} baud will be used on next connect", rate);
            return Ok(());
        }

        let resume = self.pause_worker().await;
        match self.link.set_rate(rate).await {
            Ok(_) => {
                if let Poller::Cooperative(scheduler) = &mut self.poller {
                    scheduler.reset();
                }
                let mut state = self.state.lock().await;
                if state.current_view().health == LinkHealth::FatalError {
                    state.link_closed();
                }
                state.link_opened();
                drop(state);
                if resume {
                    self.start_worker()?;
                }
                Ok(())
            }
            Err(e) => {
                self.poller = Poller::Inactive;
                let mut state = self.state.lock().await;
                if e.is_fatal() {
                    state.link_fault(e.to_string());
                } else {
                    state.link_closed();
                    state.link_error(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Encode and send one command
    ///
    /// A fatal write takes the link down; the scheduler latches on its next tick.
    pub async fn issue(&self, command: OutboundCommand) -> Result<()> {
        info!("Sending {}", command.name());
        let frame = protocol::encode(&command);
        match self.link.send(&frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Failed to send {}: {}", command.name(), e);
                if e.is_fatal() {
                    let endpoint = self
                        .link
                        .connection()
                        .await
                        .map(|c| c.endpoint.name)
                        .unwrap_or_default();
                    self.state
                        .lock()
                        .await
                        .link_fault(format!("{}: {}", endpoint, e));
                }
                Err(e.into())
            }
        }
    }

    /// Place a mark; `row` and `col` must be 0..=2
    pub async fn make_move(&self, row: u8, col: u8) -> Result<()> {
        self.issue(OutboundCommand::play(row, col)?).await
    }

    pub async fn set_mode(&self, mode: GameMode) -> Result<()> {
        self.issue(OutboundCommand::SetMode { mode }).await
    }

    pub async fn reset_game(&self) -> Result<()> {
        self.issue(OutboundCommand::Reset).await
    }

    /// Run one scheduler tick and fold the outcome into the view
    ///
    /// Returns `Halted` when no cooperative scheduler is installed, e.g. while
    /// the worker owns it.
    pub async fn tick(&mut self) -> PollOutcome {
        match &mut self.poller {
            Poller::Cooperative(scheduler) => {
                let outcome = scheduler.tick().await;
                scheduler::reconcile(&self.state, &outcome).await;
                outcome
            }
            Poller::Inactive | Poller::Worker(_) => PollOutcome::Halted,
        }
    }

    /// Hand the scheduler to a background task
    pub fn start_worker(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.poller, Poller::Inactive) {
            Poller::Cooperative(scheduler) => {
                info!("Starting poll worker every {:?}", scheduler.period());
                self.poller = Poller::Worker(PollWorker::spawn(scheduler, self.state.clone()));
                Ok(())
            }
            Poller::Worker(worker) => {
                self.poller = Poller::Worker(worker);
                Ok(())
            }
            Poller::Inactive => Err(LinkError::Io(IoError::NotConnected)),
        }
    }

    /// Cancel the background task and return to cooperative ticking
    pub async fn stop_worker(&mut self) {
        self.pause_worker().await;
    }

    pub fn is_worker_running(&self) -> bool {
        matches!(&self.poller, Poller::Worker(worker) if !worker.is_finished())
    }

    /// State of the cooperative scheduler, if one is installed
    pub fn poll_state(&self) -> Option<PollState> {
        match &self.poller {
            Poller::Cooperative(scheduler) => Some(scheduler.state()),
            Poller::Inactive | Poller::Worker(_) => None,
        }
    }

    pub async fn current_view(&self) -> SyncView {
        self.state.lock().await.current_view()
    }

    /// Receiver that changes whenever `current_view` would
    pub async fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.state.lock().await.subscribe()
    }

    /// The pending notable event, handed out once
    pub async fn take_notice(&self) -> Option<Notice> {
        self.state.lock().await.take_notice()
    }

    /// Stop the worker, keeping its scheduler. Returns whether one was running.
    async fn pause_worker(&mut self) -> bool {
        match std::mem::replace(&mut self.poller, Poller::Inactive) {
            Poller::Worker(worker) => {
                if let Some(scheduler) = worker.stop().await {
                    self.poller = Poller::Cooperative(scheduler);
                }
                true
            }
            other => {
                self.poller = other;
                false
            }
        }
    }

    /// Stop and drop any scheduler before the handle goes away
    async fn halt_poller(&mut self) {
        if let Poller::Worker(worker) = std::mem::replace(&mut self.poller, Poller::Inactive) {
            worker.stop().await;
        }
    }
}
