//! Channel membership: live room subscriptions and members of record.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::connection::{ConnectionState, GatewaySender};
use crate::dispatcher::{EventDispatcher, Subscription};
use crate::events::{ChannelInfo, ClientEvent, DomainEvent, EventKind};

#[derive(Default)]
struct ChannelEntry {
    /// Live room subscription on the current connection.
    joined_locally: bool,
    project_id: Option<String>,
    /// Members of record from channel events; independent of
    /// `joined_locally` and allowed to disagree during reconnection.
    members: HashSet<String>,
}

/// Join/leave semantics for broadcast channels. Room subscriptions are
/// connection-scoped on the server, so joins issued while offline are held
/// as desired state and replayed on resync; a leave simply cancels the
/// queued join, which is how any offline join/leave sequence collapses to at
/// most one wire request.
pub struct ChannelCoordinator {
    gateway: Arc<dyn GatewaySender>,
    channels: DashMap<String, ChannelEntry>,
    pending_joins: Mutex<HashSet<String>>,
}

impl ChannelCoordinator {
    pub fn new(gateway: Arc<dyn GatewaySender>) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            channels: DashMap::new(),
            pending_joins: Mutex::new(HashSet::new()),
        })
    }

    pub fn attach(self: &Arc<Self>, dispatcher: &Arc<EventDispatcher>) -> Vec<Subscription> {
        let mut subs = Vec::new();

        let coordinator = self.clone();
        subs.push(dispatcher.subscribe(EventKind::ChannelCreated, move |event| {
            if let DomainEvent::ChannelCreated { channel } = event {
                coordinator.apply_channel(channel);
            }
        }));
        let coordinator = self.clone();
        subs.push(dispatcher.subscribe(EventKind::ChannelUpdated, move |event| {
            if let DomainEvent::ChannelUpdated { channel } = event {
                coordinator.apply_channel(channel);
            }
        }));
        let coordinator = self.clone();
        subs.push(dispatcher.subscribe(EventKind::MemberRemoved, move |event| {
            if let DomainEvent::MemberRemoved {
                project_id,
                member_id,
            } = event
            {
                coordinator.apply_member_removed(project_id, member_id);
            }
        }));

        subs
    }

    /// Subscribe to a channel's live room. Idempotent; queued while not
    /// connected and replayed on the next resync.
    pub fn join(&self, channel_id: &str) {
        if self.is_joined(channel_id) {
            return;
        }
        if self.gateway.state() == ConnectionState::Connected
            && self.gateway.send(ClientEvent::JoinChannel {
                channel_id: channel_id.to_string(),
            })
        {
            self.channels
                .entry(channel_id.to_string())
                .or_default()
                .joined_locally = true;
            return;
        }
        self.pending_joins.lock().insert(channel_id.to_string());
    }

    /// Leave a channel's live room. Idempotent; a leave for a channel that
    /// was never joined does nothing, and one that only cancels a queued
    /// join never reaches the wire.
    pub fn leave(&self, channel_id: &str) {
        self.pending_joins.lock().remove(channel_id);
        let was_joined = match self.channels.get_mut(channel_id) {
            Some(mut entry) if entry.joined_locally => {
                entry.joined_locally = false;
                true
            }
            _ => false,
        };
        if was_joined
            && !self.gateway.send(ClientEvent::LeaveChannel {
                channel_id: channel_id.to_string(),
            })
        {
            tracing::debug!(channel_id, "leave_channel not sent; the room dies with the link");
        }
    }

    pub fn is_joined(&self, channel_id: &str) -> bool {
        self.channels
            .get(channel_id)
            .map(|entry| entry.joined_locally)
            .unwrap_or(false)
    }

    /// Members of record for a channel, regardless of local join state.
    pub fn members(&self, channel_id: &str) -> HashSet<String> {
        self.channels
            .get(channel_id)
            .map(|entry| entry.members.clone())
            .unwrap_or_default()
    }

    pub fn set_typing(&self, channel_id: &str, typing: bool) -> bool {
        let event = if typing {
            ClientEvent::TypingStart {
                channel_id: channel_id.to_string(),
            }
        } else {
            ClientEvent::TypingStop {
                channel_id: channel_id.to_string(),
            }
        };
        self.gateway.send(event)
    }

    pub fn mark_messages_read(&self, channel_id: &str, message_ids: Vec<String>) -> bool {
        self.gateway.send(ClientEvent::MarkMessagesRead {
            channel_id: channel_id.to_string(),
            message_ids,
        })
    }

    /// Re-declare every live room after a reconnect: everything joined on
    /// the previous connection plus whatever was queued while offline.
    pub fn resynchronize(&self) {
        let mut to_join: Vec<String> = self
            .channels
            .iter()
            .filter(|entry| entry.value().joined_locally)
            .map(|entry| entry.key().clone())
            .collect();
        {
            let mut pending = self.pending_joins.lock();
            for channel_id in pending.drain() {
                if !to_join.contains(&channel_id) {
                    to_join.push(channel_id);
                }
            }
        }
        for channel_id in to_join {
            if self.gateway.send(ClientEvent::JoinChannel {
                channel_id: channel_id.clone(),
            }) {
                self.channels
                    .entry(channel_id)
                    .or_default()
                    .joined_locally = true;
            } else {
                // Link dropped mid-resync; the next epoch picks it up.
                self.pending_joins.lock().insert(channel_id);
            }
        }
    }

    /// Drop queued joins that have not reached the wire. Called at logout.
    pub fn clear_pending(&self) {
        self.pending_joins.lock().clear();
    }

    fn apply_channel(&self, channel: &ChannelInfo) {
        let mut entry = self.channels.entry(channel.id.clone()).or_default();
        entry.project_id = channel.project_id.clone();
        entry.members = channel.members.iter().cloned().collect();
    }

    fn apply_member_removed(&self, project_id: &str, member_id: &str) {
        for mut entry in self.channels.iter_mut() {
            if entry.value().project_id.as_deref() == Some(project_id) {
                entry.value_mut().members.remove(member_id);
            }
        }
    }
}
