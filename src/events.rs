//! Cross-view notifications: task change broadcasts and user-facing notices.

use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

/// A change to a task that other views should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Created { id: String },
    Updated { id: String },
    Deleted { id: String },
    Migrated { old_id: String, new_id: String },
}

/// Fan-out of task events to every subscriber.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<TaskEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<TaskEvent> {
        let (tx, rx) = channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Deliver `event` to all live subscribers. Returns how many received it.
    pub fn publish(&self, event: &TaskEvent) -> usize {
        let Ok(mut subs) = self.subscribers.lock() else {
            return 0;
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::debug!(?event, listeners = subs.len(), "task event published");
        subs.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient message for the user (a toast in the browser dashboard).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

/// Sink for notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Prints notices to stderr and mirrors them into the log.
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => {
                tracing::error!(message = %notice.message, "notice");
                eprintln!("error: {}", notice.message);
            }
            NoticeLevel::Warning => {
                tracing::warn!(message = %notice.message, "notice");
                eprintln!("warning: {}", notice.message);
            }
            NoticeLevel::Success => eprintln!("\u{2713} {}", notice.message),
            NoticeLevel::Info => eprintln!("{}", notice.message),
        }
    }
}

/// Collects notices in memory.
#[derive(Default)]
pub struct NoticeLog {
    notices: Mutex<Vec<Notice>>,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|mut n| std::mem::take(&mut *n))
            .unwrap_or_default()
    }
}

impl Notifier for NoticeLog {
    fn notify(&self, notice: Notice) {
        if let Ok(mut n) = self.notices.lock() {
            n.push(notice);
        }
    }
}
