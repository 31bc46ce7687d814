//! Game state reconciliation
//!
//! Folds inbound events into the host's view of the board and the link,
//! and keeps the one-shot notice that an observer consumes.

use tokio::sync::watch;
use tracing::{debug, info, warn};
use ttt_link_core::{BoardView, GameMode, InboundEvent};

/// Health of the device link as seen by the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkHealth {
    #[default]
    Disconnected,
    Connected,
    /// Permission loss or device loss; cleared only by an explicit disconnect
    FatalError,
}

/// Snapshot handed to observers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncView {
    pub board: BoardView,
    pub health: LinkHealth,
    /// Text of the last status, win or mode message
    pub last_message: Option<String>,
    /// Last protocol or link error
    pub last_error: Option<String>,
    /// Mode last acknowledged by the device
    pub mode: Option<GameMode>,
}

/// What kind of notable event happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Status,
    Win,
    Mode,
    LinkFault,
}

/// A notable event, delivered to the observer once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

/// Reconciliation state machine
pub struct GameSyncState {
    view: SyncView,
    notice: Option<Notice>,
    updates: watch::Sender<SyncView>,
}

impl Default for GameSyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameSyncState {
    /// Empty board, link disconnected
    pub fn new() -> Self {
        let (updates, _) = watch::channel(SyncView::default());
        Self {
            view: SyncView::default(),
            notice: None,
            updates,
        }
    }

    /// Fold one inbound event into the view
    ///
    /// Returns whether the view changed.
    pub fn apply(&mut self, event: InboundEvent) -> bool {
        let before = self.view.clone();

        match event {
            InboundEvent::BoardUpdate { cells } => {
                self.view.board = cells;
            }
            InboundEvent::StatusMessage { text } => {
                self.raise(NoticeKind::Status, &text);
                self.view.last_message = Some(text);
            }
            InboundEvent::WinStatus { text } => {
                info!("Game over: {}", text);
                self.raise(NoticeKind::Win, &text);
                self.view.last_message = Some(text);
            }
            InboundEvent::ModeAck { mode, text } => {
                if mode.is_some() {
                    self.view.mode = mode;
                }
                self.raise(NoticeKind::Mode, &text);
                self.view.last_message = Some(text);
            }
            InboundEvent::ProtocolError { text } => {
                warn!("Protocol error: {}", text);
                self.view.last_error = Some(text);
            }
        }

        self.publish_if_changed(before)
    }

    /// Link opened successfully
    pub fn link_opened(&mut self) -> bool {
        let before = self.view.clone();
        self.view.health = LinkHealth::Connected;
        self.view.last_error = None;
        self.publish_if_changed(before)
    }

    /// Link closed on request
    pub fn link_closed(&mut self) -> bool {
        let before = self.view.clone();
        self.view.health = LinkHealth::Disconnected;
        self.publish_if_changed(before)
    }

    /// Fatal link failure
    ///
    /// Raises a notice only on the transition into `FatalError`. While the
    /// link stays failed, later faults just replace `last_error`.
    pub fn link_fault(&mut self, text: String) -> bool {
        let before = self.view.clone();
        if self.view.health == LinkHealth::FatalError {
            debug!("Link already failed, not notifying again: {}", text);
            self.view.last_error = Some(text);
            return self.publish_if_changed(before);
        }

        self.raise(NoticeKind::LinkFault, &text);
        self.view.health = LinkHealth::FatalError;
        self.view.last_error = Some(text);
        self.publish_if_changed(before)
    }

    /// Recoverable link failure (e.g. a busy port); health is unchanged
    pub fn link_error(&mut self, text: String) -> bool {
        let before = self.view.clone();
        self.view.last_error = Some(text);
        self.publish_if_changed(before)
    }

    pub fn current_view(&self) -> SyncView {
        self.view.clone()
    }

    /// Take the pending notice; later calls return `None` until a new one is raised
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    pub fn has_notice(&self) -> bool {
        self.notice.is_some()
    }

    /// Receiver that observes every view change
    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.updates.subscribe()
    }

    fn raise(&mut self, kind: NoticeKind, text: &str) {
        self.notice = Some(Notice {
            kind,
            text: text.to_string(),
        });
    }

    fn publish_if_changed(&mut self, before: SyncView) -> bool {
        if self.view == before {
            return false;
        }
        self.updates.send_replace(self.view.clone());
        true
    }
}
