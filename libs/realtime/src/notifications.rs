//! Notification feed: inbox entries, the unread counter, and the transient
//! toast shown while the feed panel is closed.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::RealtimeConfig;
use crate::dispatcher::{EventDispatcher, Subscription};
use crate::events::{DomainEvent, EventKind, NotificationEntry};
use crate::rest::{RestApi, RestError};

#[derive(Debug, Clone)]
struct Toast {
    entry: NotificationEntry,
    shown_at: Instant,
}

#[derive(Default)]
struct FeedState {
    /// Newest first.
    entries: Vec<NotificationEntry>,
    unread: u64,
    next_cursor: Option<String>,
    feed_open: bool,
    toast: Option<Toast>,
}

/// Aggregates live notification events with pages fetched over REST. The
/// local unread counter is plain arithmetic; a `notification_count_updated`
/// broadcast always overwrites it, so drift self-heals on the next push.
pub struct NotificationFeed {
    rest: Arc<dyn RestApi>,
    config: Arc<RealtimeConfig>,
    state: Mutex<FeedState>,
}

impl NotificationFeed {
    pub fn new(rest: Arc<dyn RestApi>, config: Arc<RealtimeConfig>) -> Arc<Self> {
        Arc::new(Self {
            rest,
            config,
            state: Mutex::new(FeedState::default()),
        })
    }

    pub fn attach(self: &Arc<Self>, dispatcher: &Arc<EventDispatcher>) -> Vec<Subscription> {
        let mut subs = Vec::new();

        let feed = self.clone();
        subs.push(
            dispatcher.subscribe(EventKind::NotificationCreated, move |event| {
                if let DomainEvent::NotificationCreated { entry } = event {
                    feed.on_created(entry.clone());
                }
            }),
        );
        let feed = self.clone();
        subs.push(
            dispatcher.subscribe(EventKind::NotificationCountChanged, move |event| {
                if let DomainEvent::NotificationCountChanged { unread } = event {
                    feed.on_count(*unread);
                }
            }),
        );

        subs
    }

    fn on_created(&self, entry: NotificationEntry) {
        let mut state = self.state.lock();
        if state.entries.iter().any(|e| e.id == entry.id) {
            tracing::debug!(notification_id = %entry.id, "duplicate notification ignored");
            return;
        }
        if !entry.read {
            state.unread += 1;
        }
        if state.feed_open {
            let position = state
                .entries
                .iter()
                .position(|e| e.created_at <= entry.created_at)
                .unwrap_or(state.entries.len());
            state.entries.insert(position, entry);
        } else {
            // A newer notification replaces whatever toast is showing; the
            // entry itself arrives with the next page fetch.
            state.toast = Some(Toast {
                entry,
                shown_at: Instant::now(),
            });
        }
    }

    fn on_count(&self, unread: u64) {
        let mut state = self.state.lock();
        if state.unread != unread {
            tracing::debug!(
                local = state.unread,
                server = unread,
                "unread count corrected by the server"
            );
        }
        state.unread = unread;
    }

    /// Fetch one page and merge it into the feed. `None` starts over from
    /// the newest; pass [`NotificationFeed::next_cursor`] to continue.
    /// Returns how many entries were new.
    pub async fn load_page(&self, cursor: Option<&str>) -> Result<usize, RestError> {
        let page = self
            .rest
            .list_notifications(cursor, self.config.notification_page_size)
            .await?;
        let mut state = self.state.lock();
        if cursor.is_none() {
            state.entries.clear();
        }
        let mut added = 0;
        for entry in page.entries {
            if !state.entries.iter().any(|e| e.id == entry.id) {
                state.entries.push(entry);
                added += 1;
            }
        }
        state.entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        state.next_cursor = page.next_cursor;
        if let Some(total) = page.unread_total {
            state.unread = total;
        }
        Ok(added)
    }

    /// Mark one entry read: the counter and the entry flip immediately, the
    /// server call follows. A failed call leaves the optimistic state; the
    /// next count broadcast or page fetch squares it away.
    pub async fn mark_read(&self, notification_id: &str) -> Result<(), RestError> {
        {
            let mut state = self.state.lock();
            if let Some(entry) = state
                .entries
                .iter_mut()
                .find(|e| e.id == notification_id && !e.read)
            {
                entry.read = true;
                state.unread = state.unread.saturating_sub(1);
            }
        }
        self.rest.mark_notification_read(notification_id).await
    }

    /// Mark everything read. The unread count is exactly zero afterwards no
    /// matter how many entries the feed has paged in.
    pub async fn mark_all_read(&self) -> Result<(), RestError> {
        {
            let mut state = self.state.lock();
            for entry in state.entries.iter_mut() {
                entry.read = true;
            }
            state.unread = 0;
        }
        self.rest.mark_all_notifications_read().await
    }

    pub async fn delete(&self, notification_id: &str) -> Result<(), RestError> {
        {
            let mut state = self.state.lock();
            if let Some(index) = state.entries.iter().position(|e| e.id == notification_id) {
                let entry = state.entries.remove(index);
                if !entry.read {
                    state.unread = state.unread.saturating_sub(1);
                }
            }
        }
        self.rest.delete_notification(notification_id).await
    }

    pub async fn refresh_unread_count(&self) -> Result<u64, RestError> {
        let count = self.rest.notification_unread_count().await?;
        self.state.lock().unread = count;
        Ok(count)
    }

    pub fn unread_count(&self) -> u64 {
        self.state.lock().unread
    }

    pub fn entries(&self) -> Vec<NotificationEntry> {
        self.state.lock().entries.clone()
    }

    pub fn next_cursor(&self) -> Option<String> {
        self.state.lock().next_cursor.clone()
    }

    /// Opening the feed dismisses any toast; closing it arms toasts again.
    pub fn set_feed_open(&self, open: bool) {
        let mut state = self.state.lock();
        state.feed_open = open;
        if open {
            state.toast = None;
        }
    }

    /// The toast to render right now, if one is still within its display
    /// window. Expiry is lazy; expired toasts are dropped on access.
    pub fn active_toast(&self) -> Option<NotificationEntry> {
        let mut state = self.state.lock();
        match &state.toast {
            Some(toast) if toast.shown_at.elapsed() < self.config.toast_duration => {
                Some(toast.entry.clone())
            }
            Some(_) => {
                state.toast = None;
                None
            }
            None => None,
        }
    }

    pub fn dismiss_toast(&self) {
        self.state.lock().toast = None;
    }
}
