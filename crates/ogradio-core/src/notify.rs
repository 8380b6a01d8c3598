//! User-visible notifications (toasts).
//!
//! The store never returns errors to its callers; anything the user should
//! know about goes through a `Notifier`.  `NoticeBoard` keeps the recent,
//! unexpired ones for surfaces that poll instead of subscribing.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ogradio_proto::protocol::{Notice, Severity};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn push(&self, notice: Notice) {
        match notice.severity {
            Severity::Warning | Severity::Error => {
                warn!("notice: {}: {}", notice.title, notice.detail)
            }
            Severity::Info | Severity::Success => {
                info!("notice: {}: {}", notice.title, notice.detail)
            }
        }
        // no receivers is OK
        let _ = self.tx.send(notice);
    }

    pub fn info(&self, title: impl Into<String>, detail: impl Into<String>) {
        self.push(Notice::new(Severity::Info, title, detail));
    }

    pub fn success(&self, title: impl Into<String>, detail: impl Into<String>) {
        self.push(Notice::new(Severity::Success, title, detail));
    }

    pub fn warning(&self, title: impl Into<String>, detail: impl Into<String>) {
        self.push(Notice::new(Severity::Warning, title, detail));
    }

    pub fn error(&self, title: impl Into<String>, detail: impl Into<String>) {
        self.push(Notice::new(Severity::Error, title, detail));
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

fn lifetime(severity: Severity) -> Duration {
    match severity {
        Severity::Info | Severity::Success => Duration::from_secs(3),
        Severity::Warning => Duration::from_secs(4),
        Severity::Error => Duration::from_secs(5),
    }
}

struct Posted {
    notice: Notice,
    expires: Instant,
}

/// Recent notices, newest last, de-duplicated by title and detail.
pub struct NoticeBoard {
    posted: VecDeque<Posted>,
    max_visible: usize,
}

impl NoticeBoard {
    pub fn new(max_visible: usize) -> Self {
        Self {
            posted: VecDeque::new(),
            max_visible: max_visible.max(1),
        }
    }

    pub fn post(&mut self, notice: Notice) {
        self.post_at(notice, Instant::now());
    }

    fn post_at(&mut self, notice: Notice, now: Instant) {
        self.posted
            .retain(|p| p.notice.title != notice.title || p.notice.detail != notice.detail);
        self.posted.push_back(Posted {
            expires: now + lifetime(notice.severity),
            notice,
        });
        while self.posted.len() > self.max_visible {
            self.posted.pop_front();
        }
    }

    /// Drop expired notices and return the rest, newest first.
    pub fn visible(&mut self) -> Vec<Notice> {
        self.visible_at(Instant::now())
    }

    fn visible_at(&mut self, now: Instant) -> Vec<Notice> {
        self.posted.retain(|p| p.expires > now);
        self.posted.iter().rev().map(|p| p.notice.clone()).collect()
    }
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new(4)
    }
}
