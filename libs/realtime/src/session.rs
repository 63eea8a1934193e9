//! Session context: one dispatcher, one connection, and every collaboration
//! component wired together for a signed-in user.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use taskora_common::id::{prefix, prefixed_ulid};

use crate::channels::ChannelCoordinator;
use crate::config::RealtimeConfig;
use crate::connection::{ConnectionManager, ConnectionState, GatewaySender};
use crate::dispatcher::{EventDispatcher, Subscription};
use crate::events::{DomainEvent, EventKind};
use crate::notifications::NotificationFeed;
use crate::outbox::{LocalPendingRecord, Outbox, WriteAction};
use crate::presence::PresenceTracker;
use crate::rest::{RestApi, SocialPostDraft};
use crate::store::MessageStore;
use crate::transport::Transport;

/// The realtime layer for one signed-in user. Components talk to each other
/// only through the dispatcher and the gateway seam, so the session is the
/// single place that knows the whole graph and owns its lifetime.
pub struct RealtimeSession {
    session_id: String,
    user_id: String,
    config: Arc<RealtimeConfig>,
    dispatcher: Arc<EventDispatcher>,
    connection: Arc<ConnectionManager>,
    store: Arc<MessageStore>,
    presence: Arc<PresenceTracker>,
    channels: Arc<ChannelCoordinator>,
    outbox: Arc<Outbox>,
    notifications: Arc<NotificationFeed>,
    subscriptions: Mutex<Vec<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeSession {
    /// Build the component graph. Must run inside a Tokio runtime; the
    /// session spawns its resync listener here.
    pub fn new(
        config: RealtimeConfig,
        user_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        rest: Arc<dyn RestApi>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let user_id = user_id.into();
        let dispatcher = EventDispatcher::new();
        let connection = ConnectionManager::new(config.clone(), transport, dispatcher.clone());
        let gateway: Arc<dyn GatewaySender> = connection.clone();
        let store = Arc::new(MessageStore::new());
        let presence = PresenceTracker::new(gateway.clone());
        let channels = ChannelCoordinator::new(gateway.clone());
        let outbox = Outbox::new(
            user_id.clone(),
            gateway,
            rest.clone(),
            dispatcher.clone(),
            store.clone(),
            config.clone(),
            connection.resync_sender(),
        );
        let notifications = NotificationFeed::new(rest, config.clone());

        let session = Arc::new(Self {
            session_id: prefixed_ulid(prefix::SESSION),
            user_id,
            config,
            dispatcher,
            connection,
            store,
            presence,
            channels,
            outbox,
            notifications,
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        });
        session.wire();
        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            "realtime session built"
        );
        session
    }

    fn wire(self: &Arc<Self>) {
        let mut subs = Vec::new();

        let store = self.store.clone();
        subs.push(
            self.dispatcher
                .subscribe(EventKind::MessageReceived, move |event| {
                    if let DomainEvent::MessageReceived {
                        channel_id,
                        message,
                    } = event
                    {
                        store.apply_wire_message(channel_id, message);
                    }
                }),
        );
        let store = self.store.clone();
        subs.push(
            self.dispatcher
                .subscribe(EventKind::MessageUpdated, move |event| {
                    if let DomainEvent::MessageUpdated {
                        channel_id,
                        message,
                    } = event
                    {
                        store.apply_wire_update(channel_id, message);
                    }
                }),
        );
        let store = self.store.clone();
        subs.push(
            self.dispatcher
                .subscribe(EventKind::MessageDeleted, move |event| {
                    if let DomainEvent::MessageDeleted {
                        channel_id,
                        message_id,
                    } = event
                    {
                        store.apply_wire_delete(channel_id, message_id);
                    }
                }),
        );

        subs.extend(self.presence.attach(&self.dispatcher));
        subs.extend(self.channels.attach(&self.dispatcher));
        subs.extend(self.outbox.attach(&self.dispatcher));
        subs.extend(self.notifications.attach(&self.dispatcher));
        self.subscriptions.lock().extend(subs);

        // Every fresh connection re-declares rooms first, then presence
        // interest, so snapshots land after the server knows our rooms.
        let channels = self.channels.clone();
        let presence = self.presence.clone();
        let mut resync_rx = self.connection.subscribe_resync();
        let task = tokio::spawn(async move {
            loop {
                match resync_rx.recv().await {
                    Ok(epoch) => {
                        tracing::info!(epoch, "resynchronizing after reconnect");
                        channels.resynchronize();
                        presence.resynchronize();
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "resync listener lagged; resynchronizing once");
                        channels.resynchronize();
                        presence.resynchronize();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().push(task);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn connect(&self, credential: &str) {
        self.connection.connect(credential);
    }

    /// Tear the session down: stop deliveries, close the socket, drop every
    /// queued intent and subscription. Pending writes are not flushed; they
    /// belong to this session and die with it.
    pub async fn shutdown(&self) {
        self.outbox.shutdown();
        self.connection.disconnect().await;
        self.channels.clear_pending();
        for sub in self.subscriptions.lock().drain(..) {
            sub.release();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!(session_id = %self.session_id, "realtime session shut down");
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub fn send_message(
        &self,
        channel_id: impl Into<String>,
        content: impl Into<String>,
        reply_to: Option<String>,
    ) -> LocalPendingRecord {
        self.outbox
            .write(WriteAction::chat_message(channel_id, content, reply_to))
    }

    pub fn edit_message(
        &self,
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
        content: impl Into<String>,
    ) -> LocalPendingRecord {
        self.outbox
            .write(WriteAction::edit_message(channel_id, message_id, content))
    }

    pub fn delete_message(
        &self,
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> LocalPendingRecord {
        self.outbox
            .write(WriteAction::delete_message(channel_id, message_id))
    }

    pub fn create_social_post(&self, draft: SocialPostDraft) -> LocalPendingRecord {
        self.outbox.write(WriteAction::social_post(draft))
    }

    pub fn add_member(
        &self,
        project_id: impl Into<String>,
        member_id: impl Into<String>,
    ) -> LocalPendingRecord {
        self.outbox
            .write(WriteAction::add_member(project_id, member_id))
    }

    pub fn remove_member(
        &self,
        project_id: impl Into<String>,
        member_id: impl Into<String>,
        reason: Option<String>,
    ) -> LocalPendingRecord {
        self.outbox
            .write(WriteAction::remove_member(project_id, member_id, reason))
    }

    pub fn retry_write(&self, local_id: &str) -> bool {
        self.outbox.retry(local_id)
    }

    pub fn discard_write(&self, local_id: &str) -> bool {
        self.outbox.discard(local_id)
    }

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn channels(&self) -> &Arc<ChannelCoordinator> {
        &self.channels
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    pub fn notifications(&self) -> &Arc<NotificationFeed> {
        &self.notifications
    }
}
