use std::sync::mpsc;
use std::time::{Duration, Instant};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::clipboard_access::{ClipboardAccess, ClipboardError};
use crate::clipboard_store::{content_hash, ContentStore};
use crate::model::ClipboardItem;

const LOG_TARGET: &str = "clipboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Idle,
    Running,
    Paused,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
        }
    }
}

pub trait CaptureObserver: Send {
    fn on_state_changed(&self, state: ServiceState);
    fn on_item_added(&self, item: &ClipboardItem);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    StateChanged(ServiceState),
    ItemAdded(ClipboardItem),
}

/// Forwards detector notifications into a channel.
pub struct ChannelObserver {
    sender: mpsc::Sender<CaptureEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::Receiver<CaptureEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl CaptureObserver for ChannelObserver {
    fn on_state_changed(&self, state: ServiceState) {
        let _ = self.sender.send(CaptureEvent::StateChanged(state));
    }

    fn on_item_added(&self, item: &ClipboardItem) {
        let _ = self.sender.send(CaptureEvent::ItemAdded(item.clone()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub debounce: Duration,
    pub max_chars: usize,
    pub duplicate_window: TimeDelta,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(150),
            max_chars: 10_000,
            duplicate_window: TimeDelta::hours(3),
        }
    }
}

/// Turns raw clipboard-change notifications into stored history items.
///
/// The detector never owns a thread or a timer. The event loop reports
/// changes through [`ChangeDetector::on_clipboard_changed`] and calls
/// [`ChangeDetector::tick`] to fire the debounce deadline, so there is no
/// race between a new change and a firing timer.
pub struct ChangeDetector {
    store: ContentStore,
    clipboard: Box<dyn ClipboardAccess>,
    settings: CaptureSettings,
    state: ServiceState,
    pending: Option<String>,
    debounce_deadline: Option<Instant>,
    ignore_next_change: bool,
    observers: Vec<Box<dyn CaptureObserver>>,
}

impl ChangeDetector {
    pub fn new(
        store: ContentStore,
        clipboard: Box<dyn ClipboardAccess>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            store,
            clipboard,
            settings,
            state: ServiceState::Idle,
            pending: None,
            debounce_deadline: None,
            ignore_next_change: false,
            observers: Vec::new(),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn settings(&self) -> CaptureSettings {
        self.settings
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn subscribe(&mut self, observer: Box<dyn CaptureObserver>) {
        self.observers.push(observer);
    }

    pub fn clipboard_change_token(&self) -> Option<u64> {
        self.clipboard.change_token()
    }

    pub fn start_listening(&mut self) -> bool {
        if self.state != ServiceState::Idle {
            return false;
        }
        self.set_state(ServiceState::Running)
    }

    /// Drops any pending content without storing it.
    pub fn stop_listening(&mut self) -> bool {
        if self.state == ServiceState::Idle {
            return false;
        }
        self.cancel_pending();
        self.set_state(ServiceState::Idle)
    }

    pub fn pause(&mut self) -> bool {
        if self.state != ServiceState::Running {
            return false;
        }
        self.cancel_pending();
        self.set_state(ServiceState::Paused)
    }

    pub fn resume(&mut self) -> bool {
        if self.state != ServiceState::Paused {
            return false;
        }
        self.set_state(ServiceState::Running)
    }

    pub fn ignore_next_change(&mut self) {
        self.ignore_next_change = true;
    }

    pub fn is_ignoring_next_change(&self) -> bool {
        self.ignore_next_change
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounce_deadline
    }

    pub fn on_clipboard_changed(&mut self, now: Instant) {
        if self.state != ServiceState::Running {
            return;
        }

        if self.ignore_next_change {
            self.ignore_next_change = false;
            log::debug!(target: LOG_TARGET, "ignored self-initiated clipboard change");
            return;
        }

        let text = match self.clipboard.read_text() {
            Ok(Some(text)) => text,
            Ok(None) => return,
            Err(error) => {
                log::warn!(target: LOG_TARGET, "clipboard read failed: {error}");
                return;
            }
        };

        if text.trim().is_empty() {
            return;
        }
        let char_count = text.chars().count();
        if char_count > self.settings.max_chars {
            log::debug!(
                target: LOG_TARGET,
                "skipping clipboard text of {char_count} chars (max {})",
                self.settings.max_chars
            );
            return;
        }

        self.pending = Some(text.trim().to_string());
        self.debounce_deadline = Some(now + self.settings.debounce);
    }

    /// Fires the debounce timer when its deadline has passed. Returns the
    /// stored item, if one was stored.
    pub fn tick(&mut self, now: Instant) -> Option<ClipboardItem> {
        let deadline = self.debounce_deadline?;
        if now < deadline {
            return None;
        }
        self.debounce_deadline = None;

        let content = self.pending.take()?;
        self.commit(content)
    }

    /// Writes `text` to the clipboard without letting that write re-enter
    /// the history.
    pub fn recopy(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.ignore_next_change();
        if let Err(error) = self.clipboard.write_text(text) {
            self.ignore_next_change = false;
            log::warn!(target: LOG_TARGET, "clipboard write failed: {error}");
            return Err(error);
        }
        Ok(())
    }

    fn commit(&mut self, content: String) -> Option<ClipboardItem> {
        let hash = content_hash(&content);
        match self
            .store
            .hash_exists_within(&hash, self.settings.duplicate_window)
        {
            Ok(true) => {
                log::debug!(target: LOG_TARGET, "duplicate clipboard content suppressed");
                return None;
            }
            Ok(false) => {}
            Err(error) => {
                log::error!(target: LOG_TARGET, "duplicate check failed: {error}");
                return None;
            }
        }

        match self.store.add(&content) {
            Ok(item) => {
                log::info!(
                    target: LOG_TARGET,
                    "stored clipboard item id={} chars={}",
                    item.id,
                    item.content.chars().count()
                );
                for observer in &self.observers {
                    observer.on_item_added(&item);
                }
                Some(item)
            }
            Err(error) => {
                log::error!(target: LOG_TARGET, "error storing clipboard item: {error}");
                None
            }
        }
    }

    fn cancel_pending(&mut self) {
        self.pending = None;
        self.debounce_deadline = None;
    }

    fn set_state(&mut self, next: ServiceState) -> bool {
        if self.state == next {
            return false;
        }
        log::info!(
            target: LOG_TARGET,
            "capture state {} -> {}",
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
        for observer in &self.observers {
            observer.on_state_changed(next);
        }
        true
    }
}
