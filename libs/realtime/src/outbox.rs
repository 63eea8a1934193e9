//! Offline reconciliation: user writes apply optimistically and always
//! resolve to confirmed, failed, or rejected; none are silently dropped.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time;

use taskora_common::id::{is_local_id, prefix, prefixed_ulid};

use crate::config::RealtimeConfig;
use crate::connection::{ConnectionState, GatewaySender};
use crate::dispatcher::{EventDispatcher, Subscription};
use crate::events::{ClientEvent, DomainEvent, EventKind, WireMessage};
use crate::rest::{CreateMessageRequest, RestApi, RestError, SocialPostDraft};
use crate::store::{Message, MessageStatus, MessageStore};

// ---------------------------------------------------------------------------
// Write actions
// ---------------------------------------------------------------------------

/// What a write does. Chat messages and member removals have a wire form;
/// everything else goes straight to REST.
#[derive(Debug, Clone, PartialEq)]
pub enum WritePayload {
    ChatMessage {
        channel_id: String,
        content: String,
        reply_to: Option<String>,
    },
    MessageEdit {
        channel_id: String,
        message_id: String,
        content: String,
    },
    MessageDelete {
        channel_id: String,
        message_id: String,
    },
    SocialPostCreate {
        draft: SocialPostDraft,
    },
    SocialPostUpdate {
        post_id: String,
        draft: SocialPostDraft,
    },
    SocialPostDelete {
        post_id: String,
    },
    MemberAdd {
        project_id: String,
        member_id: String,
    },
    MemberRemove {
        project_id: String,
        member_id: String,
        reason: Option<String>,
    },
}

/// A user-initiated write plus the idempotency key minted the moment the
/// user acted, so a delivery retried over any path cannot double-create.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAction {
    pub idempotency_key: String,
    pub payload: WritePayload,
}

impl WriteAction {
    pub fn new(payload: WritePayload) -> Self {
        Self {
            idempotency_key: prefixed_ulid(prefix::IDEMPOTENCY),
            payload,
        }
    }

    pub fn chat_message(
        channel_id: impl Into<String>,
        content: impl Into<String>,
        reply_to: Option<String>,
    ) -> Self {
        Self::new(WritePayload::ChatMessage {
            channel_id: channel_id.into(),
            content: content.into(),
            reply_to,
        })
    }

    pub fn edit_message(
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(WritePayload::MessageEdit {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
            content: content.into(),
        })
    }

    pub fn delete_message(
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self::new(WritePayload::MessageDelete {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        })
    }

    pub fn social_post(draft: SocialPostDraft) -> Self {
        Self::new(WritePayload::SocialPostCreate { draft })
    }

    pub fn update_social_post(post_id: impl Into<String>, draft: SocialPostDraft) -> Self {
        Self::new(WritePayload::SocialPostUpdate {
            post_id: post_id.into(),
            draft,
        })
    }

    pub fn delete_social_post(post_id: impl Into<String>) -> Self {
        Self::new(WritePayload::SocialPostDelete {
            post_id: post_id.into(),
        })
    }

    pub fn add_member(project_id: impl Into<String>, member_id: impl Into<String>) -> Self {
        Self::new(WritePayload::MemberAdd {
            project_id: project_id.into(),
            member_id: member_id.into(),
        })
    }

    pub fn remove_member(
        project_id: impl Into<String>,
        member_id: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self::new(WritePayload::MemberRemove {
            project_id: project_id.into(),
            member_id: member_id.into(),
            reason,
        })
    }
}

/// Where a pending write stands. Confirmed records leave the outbox
/// entirely; the canonical entity lives in the store by then.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteStatus {
    Pending,
    /// Every path failed inside the retry window; the user may retry or
    /// discard.
    Failed { reason: String },
    /// The server refused outright; optimistic state was rolled back.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalPendingRecord {
    pub local_id: String,
    pub idempotency_key: String,
    pub payload: WritePayload,
    pub status: WriteStatus,
    pub created_at: chrono::DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Undoing an optimistic effect if the server rejects the write.
enum Rollback {
    PendingMessage { channel_id: String },
    Content {
        channel_id: String,
        message_id: String,
        prior: String,
    },
    Removed { message: Message },
    MemberRemove {
        project_id: String,
        member_id: String,
    },
    MemberAdd {
        project_id: String,
        member_id: String,
    },
    None,
}

struct PendingWrite {
    record: LocalPendingRecord,
    rollback: Rollback,
    in_flight: bool,
}

enum Ack {
    Message(WireMessage),
    Done,
}

enum Attempt {
    Resolved,
    Retry(String),
}

/// The reconciliation layer. Exactly one `LocalPendingRecord` exists per
/// write until it resolves; one delivery task runs per record; duplicate
/// confirmations for the same key are discarded silently.
pub struct Outbox {
    user_id: String,
    gateway: Arc<dyn GatewaySender>,
    rest: Arc<dyn RestApi>,
    dispatcher: Arc<EventDispatcher>,
    store: Arc<MessageStore>,
    config: Arc<RealtimeConfig>,
    resync: broadcast::Sender<u64>,
    records: DashMap<String, PendingWrite>,
    by_key: DashMap<String, String>,
    waiters: DashMap<String, oneshot::Sender<Ack>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Outbox {
    pub fn new(
        user_id: impl Into<String>,
        gateway: Arc<dyn GatewaySender>,
        rest: Arc<dyn RestApi>,
        dispatcher: Arc<EventDispatcher>,
        store: Arc<MessageStore>,
        config: Arc<RealtimeConfig>,
        resync: broadcast::Sender<u64>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            user_id: user_id.into(),
            gateway,
            rest,
            dispatcher,
            store,
            config,
            resync,
            records: DashMap::new(),
            by_key: DashMap::new(),
            waiters: DashMap::new(),
            shutdown_tx,
        })
    }

    /// Register for the wire events that acknowledge in-flight writes.
    pub fn attach(self: &Arc<Self>, dispatcher: &Arc<EventDispatcher>) -> Vec<Subscription> {
        let mut subs = Vec::new();

        let outbox = self.clone();
        subs.push(dispatcher.subscribe(EventKind::MessageReceived, move |event| {
            if let DomainEvent::MessageReceived { message, .. } = event {
                outbox.observe_message(message);
            }
        }));
        let outbox = self.clone();
        subs.push(dispatcher.subscribe(EventKind::MemberRemoved, move |event| {
            if let DomainEvent::MemberRemoved {
                project_id,
                member_id,
            } = event
            {
                outbox.observe_member_removed(project_id, member_id);
            }
        }));

        subs
    }

    /// Accept a write: apply its optimistic effect, mint the pending record,
    /// and start delivering. Re-entering with an idempotency key that is
    /// still unresolved returns the existing record instead of minting a
    /// second one.
    pub fn write(self: &Arc<Self>, action: WriteAction) -> LocalPendingRecord {
        if let Some(local_id) = self
            .by_key
            .get(&action.idempotency_key)
            .map(|entry| entry.value().clone())
        {
            if let Some(existing) = self.records.get(&local_id) {
                tracing::debug!(local_id = %local_id, "write re-entered while still pending");
                return existing.record.clone();
            }
        }

        let local_id = prefixed_ulid(prefix::LOCAL);
        // Optimistic effects run before the record is registered, so the
        // membership event synthesized here cannot acknowledge this write.
        let rollback = self.apply_optimistic(&local_id, &action.payload);
        let record = LocalPendingRecord {
            local_id: local_id.clone(),
            idempotency_key: action.idempotency_key.clone(),
            payload: action.payload,
            status: WriteStatus::Pending,
            created_at: Utc::now(),
        };
        self.by_key
            .insert(action.idempotency_key, local_id.clone());
        self.records.insert(
            local_id.clone(),
            PendingWrite {
                record: record.clone(),
                rollback,
                in_flight: false,
            },
        );
        tracing::debug!(local_id = %local_id, "write accepted");
        self.spawn_delivery(local_id);
        record
    }

    /// Restart delivery for a failed record with a fresh retry window.
    pub fn retry(self: &Arc<Self>, local_id: &str) -> bool {
        let mut resumed = false;
        let mut chat_channel = None;
        if let Some(mut pending) = self.records.get_mut(local_id) {
            if matches!(pending.record.status, WriteStatus::Failed { .. }) {
                pending.record.status = WriteStatus::Pending;
                if let WritePayload::ChatMessage { channel_id, .. } = &pending.record.payload {
                    chat_channel = Some(channel_id.clone());
                }
                resumed = true;
            }
        }
        if let Some(channel_id) = chat_channel {
            self.store
                .set_status(&channel_id, local_id, MessageStatus::Pending);
        }
        if resumed {
            tracing::info!(local_id, "failed write retried by the user");
            self.spawn_delivery(local_id.to_string());
        }
        resumed
    }

    /// Drop a record and undo whatever optimistic state it left behind.
    pub fn discard(&self, local_id: &str) -> bool {
        let Some((_, pending)) = self.records.remove(local_id) else {
            return false;
        };
        self.by_key.remove(&pending.record.idempotency_key);
        // A rejected write already rolled its optimistic state back.
        if !matches!(pending.record.status, WriteStatus::Rejected { .. }) {
            self.apply_rollback(local_id, pending.rollback);
        }
        tracing::info!(local_id, "pending write discarded");
        true
    }

    pub fn record(&self, local_id: &str) -> Option<LocalPendingRecord> {
        self.records.get(local_id).map(|p| p.record.clone())
    }

    pub fn pending(&self) -> Vec<LocalPendingRecord> {
        self.records.iter().map(|p| p.record.clone()).collect()
    }

    /// Stop every delivery task. Unresolved records stay as they are; the
    /// session owning this outbox is going away with them.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    // -----------------------------------------------------------------------
    // Optimistic effects and rollback
    // -----------------------------------------------------------------------

    fn apply_optimistic(&self, local_id: &str, payload: &WritePayload) -> Rollback {
        match payload {
            WritePayload::ChatMessage {
                channel_id,
                content,
                reply_to,
            } => {
                self.store.insert_pending(Message {
                    id: local_id.to_string(),
                    channel_id: channel_id.clone(),
                    sender_id: self.user_id.clone(),
                    content: content.clone(),
                    reply_to: reply_to.clone(),
                    created_at: Utc::now(),
                    status: MessageStatus::Pending,
                });
                Rollback::PendingMessage {
                    channel_id: channel_id.clone(),
                }
            }
            WritePayload::MessageEdit {
                channel_id,
                message_id,
                content,
            } => match self.store.update_content(channel_id, message_id, content) {
                Some(prior) => Rollback::Content {
                    channel_id: channel_id.clone(),
                    message_id: message_id.clone(),
                    prior,
                },
                None => Rollback::None,
            },
            WritePayload::MessageDelete {
                channel_id,
                message_id,
            } => match self.store.remove(channel_id, message_id) {
                Some(message) => Rollback::Removed { message },
                None => Rollback::None,
            },
            WritePayload::MemberRemove {
                project_id,
                member_id,
                ..
            } => {
                self.dispatcher.emit_local(DomainEvent::MemberRemoved {
                    project_id: project_id.clone(),
                    member_id: member_id.clone(),
                });
                Rollback::MemberRemove {
                    project_id: project_id.clone(),
                    member_id: member_id.clone(),
                }
            }
            WritePayload::MemberAdd {
                project_id,
                member_id,
            } => {
                self.dispatcher.emit_local(DomainEvent::MemberAdded {
                    project_id: project_id.clone(),
                    member_id: member_id.clone(),
                });
                Rollback::MemberAdd {
                    project_id: project_id.clone(),
                    member_id: member_id.clone(),
                }
            }
            // Social posts have no local cache to mutate optimistically.
            WritePayload::SocialPostCreate { .. }
            | WritePayload::SocialPostUpdate { .. }
            | WritePayload::SocialPostDelete { .. } => Rollback::None,
        }
    }

    fn apply_rollback(&self, local_id: &str, rollback: Rollback) {
        match rollback {
            Rollback::PendingMessage { channel_id } => {
                self.store.remove(&channel_id, local_id);
            }
            Rollback::Content {
                channel_id,
                message_id,
                prior,
            } => {
                self.store.update_content(&channel_id, &message_id, &prior);
            }
            Rollback::Removed { message } => self.store.reinsert(message),
            Rollback::MemberRemove {
                project_id,
                member_id,
            } => self.dispatcher.emit_local(DomainEvent::MemberAdded {
                project_id,
                member_id,
            }),
            Rollback::MemberAdd {
                project_id,
                member_id,
            } => self.dispatcher.emit_local(DomainEvent::MemberRemoved {
                project_id,
                member_id,
            }),
            Rollback::None => {}
        }
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    fn spawn_delivery(self: &Arc<Self>, local_id: String) {
        {
            let Some(mut pending) = self.records.get_mut(&local_id) else {
                return;
            };
            if pending.in_flight {
                return;
            }
            pending.in_flight = true;
        }
        let outbox = self.clone();
        tokio::spawn(async move { outbox.deliver(local_id).await });
    }

    async fn deliver(self: Arc<Self>, local_id: String) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut resync_rx = self.resync.subscribe();
        let deadline = Instant::now() + self.config.retry_window;
        loop {
            if *shutdown_rx.borrow() {
                self.clear_in_flight(&local_id);
                return;
            }
            match self.attempt_once(&local_id).await {
                Attempt::Resolved => return,
                Attempt::Retry(reason) => {
                    if Instant::now() >= deadline {
                        self.fail(&local_id, &reason);
                        return;
                    }
                    tracing::debug!(local_id = %local_id, %reason, "delivery attempt failed; will retry");
                    tokio::select! {
                        _ = time::sleep(self.config.retry_interval) => {}
                        result = resync_rx.recv() => {
                            if matches!(result, Err(broadcast::error::RecvError::Closed)) {
                                time::sleep(self.config.retry_interval).await;
                            }
                        }
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }
    }

    /// One full delivery pass: transport (when the payload has a wire form
    /// and the connection is live), then REST.
    async fn attempt_once(&self, local_id: &str) -> Attempt {
        let (payload, key) = {
            let Some(pending) = self.records.get(local_id) else {
                return Attempt::Resolved;
            };
            if pending.record.status != WriteStatus::Pending {
                return Attempt::Resolved;
            }
            (
                pending.record.payload.clone(),
                pending.record.idempotency_key.clone(),
            )
        };

        // A write referencing a provisional id cannot go out on any path;
        // confirming the target rewrites the pointer and the next pass
        // delivers it.
        if Self::references_provisional_id(&payload) {
            return Attempt::Retry("references a provisional id".into());
        }

        if self.gateway.state() == ConnectionState::Connected {
            if let Some(event) = Self::wire_event(&payload, local_id, &key) {
                let (ack_tx, ack_rx) = oneshot::channel();
                self.waiters.insert(local_id.to_string(), ack_tx);
                if self.gateway.send(event) {
                    match time::timeout(self.config.ack_timeout, ack_rx).await {
                        Ok(Ok(Ack::Message(message))) => {
                            self.confirm_message(local_id, &message, false);
                            return Attempt::Resolved;
                        }
                        Ok(Ok(Ack::Done)) => {
                            self.confirm_simple(local_id, None, None);
                            return Attempt::Resolved;
                        }
                        Ok(Err(_)) | Err(_) => {
                            self.waiters.remove(local_id);
                            tracing::debug!(
                                local_id,
                                "no gateway acknowledgment in time; falling back to rest"
                            );
                        }
                    }
                } else {
                    self.waiters.remove(local_id);
                }
            }
        }

        match self.attempt_rest(local_id, &payload, &key).await {
            Ok(()) => Attempt::Resolved,
            Err(error) if error.is_permission_denied() => {
                self.reject(local_id, &error.to_string());
                Attempt::Resolved
            }
            Err(error) if error.is_permanent() => {
                self.fail(local_id, &error.to_string());
                Attempt::Resolved
            }
            Err(error) => Attempt::Retry(error.to_string()),
        }
    }

    async fn attempt_rest(
        &self,
        local_id: &str,
        payload: &WritePayload,
        key: &str,
    ) -> Result<(), RestError> {
        match payload {
            WritePayload::ChatMessage {
                channel_id,
                content,
                reply_to,
            } => {
                let request = CreateMessageRequest {
                    channel_id: channel_id.clone(),
                    content: content.clone(),
                    reply_to: reply_to.clone(),
                };
                let mut canonical = self.rest.create_message(key, &request).await?;
                if canonical.channel_id.is_empty() {
                    canonical.channel_id = channel_id.clone();
                }
                self.confirm_message(local_id, &canonical, true);
            }
            WritePayload::MessageEdit {
                channel_id,
                message_id,
                content,
            } => {
                let mut canonical = self.rest.update_message(message_id, content).await?;
                if canonical.channel_id.is_empty() {
                    canonical.channel_id = channel_id.clone();
                }
                let follow_up = DomainEvent::MessageUpdated {
                    channel_id: canonical.channel_id.clone(),
                    message: canonical,
                };
                self.confirm_simple(local_id, Some(message_id.clone()), Some(follow_up));
            }
            WritePayload::MessageDelete {
                channel_id,
                message_id,
            } => {
                self.rest.delete_message(message_id).await?;
                let follow_up = DomainEvent::MessageDeleted {
                    channel_id: channel_id.clone(),
                    message_id: message_id.clone(),
                };
                self.confirm_simple(local_id, Some(message_id.clone()), Some(follow_up));
            }
            WritePayload::SocialPostCreate { draft } => {
                let post = self.rest.create_social_post(key, draft).await?;
                self.confirm_simple(local_id, Some(post.id), None);
            }
            WritePayload::SocialPostUpdate { post_id, draft } => {
                let post = self.rest.update_social_post(post_id, draft).await?;
                self.confirm_simple(local_id, Some(post.id), None);
            }
            WritePayload::SocialPostDelete { post_id } => {
                self.rest.delete_social_post(post_id).await?;
                self.confirm_simple(local_id, Some(post_id.clone()), None);
            }
            WritePayload::MemberAdd {
                project_id,
                member_id,
            } => {
                self.rest
                    .add_project_member(key, project_id, member_id)
                    .await?;
                self.confirm_simple(local_id, None, None);
            }
            WritePayload::MemberRemove {
                project_id,
                member_id,
                reason,
            } => {
                self.rest
                    .remove_project_member(project_id, member_id, reason.as_deref())
                    .await?;
                self.confirm_simple(local_id, None, None);
            }
        }
        Ok(())
    }

    fn references_provisional_id(payload: &WritePayload) -> bool {
        match payload {
            WritePayload::ChatMessage {
                reply_to: Some(reply),
                ..
            } => is_local_id(reply),
            WritePayload::MessageEdit { message_id, .. }
            | WritePayload::MessageDelete { message_id, .. } => is_local_id(message_id),
            _ => false,
        }
    }

    fn wire_event(payload: &WritePayload, local_id: &str, key: &str) -> Option<ClientEvent> {
        match payload {
            WritePayload::ChatMessage {
                channel_id,
                content,
                reply_to,
            } => Some(ClientEvent::SendMessage {
                channel_id: channel_id.clone(),
                content: content.clone(),
                reply_to: reply_to.clone(),
                client_temp_id: local_id.to_string(),
                idempotency_key: key.to_string(),
            }),
            WritePayload::MemberRemove {
                project_id,
                member_id,
                reason,
            } => Some(ClientEvent::RemoveProjectMember {
                project_id: project_id.clone(),
                member_id: member_id.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Resolve a chat-message record against its canonical broadcast. The
    /// first confirmation wins; any later one finds no record and is
    /// discarded. `republish` is set on the REST path, where no wire event
    /// ever flowed through the dispatcher for this message.
    fn confirm_message(&self, local_id: &str, canonical: &WireMessage, republish: bool) {
        let Some((_, pending)) = self.records.remove(local_id) else {
            tracing::debug!(local_id, "redundant confirmation discarded");
            return;
        };
        self.by_key.remove(&pending.record.idempotency_key);
        self.store.confirm(local_id, canonical);
        self.rewrite_queued_references(local_id, &canonical.id);
        tracing::debug!(local_id, server_id = %canonical.id, "write confirmed");
        self.dispatcher.emit_local(DomainEvent::WriteConfirmed {
            local_id: local_id.to_string(),
            server_id: Some(canonical.id.clone()),
        });
        if republish {
            self.dispatcher.emit_local(DomainEvent::MessageReceived {
                channel_id: canonical.channel_id.clone(),
                message: canonical.clone(),
            });
        }
    }

    /// Resolve a non-chat record, optionally republishing the canonical
    /// domain event for consumers that never saw a wire form of it.
    fn confirm_simple(
        &self,
        local_id: &str,
        server_id: Option<String>,
        follow_up: Option<DomainEvent>,
    ) {
        let Some((_, pending)) = self.records.remove(local_id) else {
            tracing::debug!(local_id, "redundant confirmation discarded");
            return;
        };
        self.by_key.remove(&pending.record.idempotency_key);
        tracing::debug!(local_id, ?server_id, "write confirmed");
        if let Some(event) = follow_up {
            self.dispatcher.emit_local(event);
        }
        self.dispatcher.emit_local(DomainEvent::WriteConfirmed {
            local_id: local_id.to_string(),
            server_id,
        });
    }

    fn fail(&self, local_id: &str, reason: &str) {
        let mut chat_channel = None;
        {
            let Some(mut pending) = self.records.get_mut(local_id) else {
                return;
            };
            pending.record.status = WriteStatus::Failed {
                reason: reason.to_string(),
            };
            pending.in_flight = false;
            if let WritePayload::ChatMessage { channel_id, .. } = &pending.record.payload {
                chat_channel = Some(channel_id.clone());
            }
        }
        if let Some(channel_id) = chat_channel {
            self.store
                .set_status(&channel_id, local_id, MessageStatus::Failed);
        }
        tracing::warn!(
            local_id,
            reason,
            "write failed on every path; awaiting user retry or discard"
        );
        self.dispatcher.emit_local(DomainEvent::WriteFailed {
            local_id: local_id.to_string(),
            reason: reason.to_string(),
        });
    }

    fn reject(&self, local_id: &str, reason: &str) {
        let rollback;
        {
            let Some(mut pending) = self.records.get_mut(local_id) else {
                return;
            };
            pending.record.status = WriteStatus::Rejected {
                reason: reason.to_string(),
            };
            pending.in_flight = false;
            rollback = std::mem::replace(&mut pending.rollback, Rollback::None);
        }
        self.apply_rollback(local_id, rollback);
        tracing::warn!(local_id, reason, "write rejected; optimistic state rolled back");
        self.dispatcher.emit_local(DomainEvent::WriteRejected {
            local_id: local_id.to_string(),
            reason: reason.to_string(),
        });
    }

    fn clear_in_flight(&self, local_id: &str) {
        if let Some(mut pending) = self.records.get_mut(local_id) {
            pending.in_flight = false;
        }
    }

    /// Queued writes that reference the freshly confirmed message, whether as
    /// a reply target or as the subject of an edit or delete, must point at
    /// its canonical id before their own delivery goes out.
    fn rewrite_queued_references(&self, temp_id: &str, server_id: &str) {
        for mut entry in self.records.iter_mut() {
            match &mut entry.value_mut().record.payload {
                WritePayload::ChatMessage {
                    reply_to: Some(reply),
                    ..
                } if reply.as_str() == temp_id => {
                    *reply = server_id.to_string();
                }
                WritePayload::MessageEdit { message_id, .. }
                | WritePayload::MessageDelete { message_id, .. }
                    if message_id.as_str() == temp_id =>
                {
                    *message_id = server_id.to_string();
                }
                _ => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Wire acknowledgments
    // -----------------------------------------------------------------------

    fn observe_message(&self, message: &WireMessage) {
        let Some(temp) = message.client_temp_id.as_deref() else {
            return;
        };
        if let Some((_, waiter)) = self.waiters.remove(temp) {
            let _ = waiter.send(Ack::Message(message.clone()));
        } else if self.records.contains_key(temp) {
            // The echo landed outside an ack window, e.g. while the REST
            // fallback was running. Confirm directly; the store dedups.
            self.confirm_message(temp, message, false);
        }
    }

    /// Only an armed waiter resolves here: the optimistic removal event is
    /// emitted before the record exists and must not acknowledge itself,
    /// and a REST retry of an already-applied removal is idempotent anyway.
    fn observe_member_removed(&self, project_id: &str, member_id: &str) {
        let waiting: Vec<String> = self
            .records
            .iter()
            .filter(|entry| {
                matches!(
                    &entry.value().record.payload,
                    WritePayload::MemberRemove {
                        project_id: p,
                        member_id: m,
                        ..
                    } if p == project_id && m == member_id
                )
            })
            .map(|entry| entry.key().clone())
            .collect();
        for local_id in waiting {
            if let Some((_, waiter)) = self.waiters.remove(&local_id) {
                let _ = waiter.send(Ack::Done);
            }
        }
    }
}
