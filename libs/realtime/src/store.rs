//! Local, in-memory message state per channel.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use taskora_common::id::is_local_id;

use crate::events::WireMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Written locally, not yet acknowledged by the server.
    Pending,
    Confirmed,
    /// Every delivery path failed; awaiting user retry or discard.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Server id once confirmed; a `local_` temporary id while pending.
    pub id: String,
    pub channel_id: String,
    pub sender_id: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    pub fn from_wire(wire: &WireMessage, status: MessageStatus) -> Self {
        Self {
            id: wire.id.clone(),
            channel_id: wire.channel_id.clone(),
            sender_id: wire.sender_id.clone(),
            content: wire.content.clone(),
            reply_to: wire.reply_to.clone(),
            created_at: wire.created_at,
            status,
        }
    }
}

#[derive(Default)]
struct StoreState {
    /// Messages per channel in arrival order.
    channels: HashMap<String, Vec<Message>>,
    /// Temporary ids already replaced by a server id. Consulted so a late
    /// duplicate of an already-reconciled write cannot insert a second row.
    reconciled: HashMap<String, String>,
}

/// Per-channel message lists with the reconciliation rules the rest of the
/// layer relies on: duplicate deliveries deduplicate by server id, and a
/// broadcast echoing a pending entry's temporary id confirms that entry
/// instead of inserting a new one.
#[derive(Default)]
pub struct MessageStore {
    state: RwLock<StoreState>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one `new_message` delivery.
    pub fn apply_wire_message(&self, channel_id: &str, wire: &WireMessage) {
        let mut state = self.state.write();
        if let Some(temp) = wire.client_temp_id.as_deref().filter(|id| is_local_id(id)) {
            match state.reconciled.get(temp) {
                // This write was already reconciled. Same server id falls
                // through to the id dedup below; a different one means the
                // second delivery path also created the entity server-side.
                Some(server_id) if server_id != &wire.id => {
                    tracing::debug!(temp, server_id = %wire.id, "redundant confirmation discarded");
                    return;
                }
                Some(_) => {}
                None => {
                    if state.channels.values().flatten().any(|m| m.id == temp) {
                        confirm_in(&mut state, temp, wire);
                        return;
                    }
                }
            }
        }
        let messages = state.channels.entry(channel_id.to_string()).or_default();
        if messages.iter().any(|m| m.id == wire.id) {
            tracing::debug!(message_id = %wire.id, "duplicate message delivery ignored");
            return;
        }
        messages.push(Message::from_wire(wire, MessageStatus::Confirmed));
    }

    /// Apply one `message_updated` delivery. Unknown ids are ignored.
    pub fn apply_wire_update(&self, channel_id: &str, wire: &WireMessage) {
        let mut state = self.state.write();
        if let Some(message) = state
            .channels
            .get_mut(channel_id)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.id == wire.id))
        {
            message.content = wire.content.clone();
            message.reply_to = wire.reply_to.clone();
        }
    }

    /// Apply one `message_deleted` delivery. Unknown ids are ignored.
    pub fn apply_wire_delete(&self, channel_id: &str, message_id: &str) {
        let mut state = self.state.write();
        if let Some(messages) = state.channels.get_mut(channel_id) {
            messages.retain(|m| m.id != message_id);
        }
    }

    /// Insert an optimistic pending message minted by the reconciliation
    /// layer.
    pub fn insert_pending(&self, message: Message) {
        let mut state = self.state.write();
        state
            .channels
            .entry(message.channel_id.clone())
            .or_default()
            .push(message);
    }

    /// Replace the temporary id with the canonical one everywhere it
    /// appears, adopt the server's content and timestamp, and flip the entry
    /// to `Confirmed`. Returns false when no entry carries the temporary id
    /// (the confirmation already happened through another path).
    pub fn confirm(&self, temp_id: &str, canonical: &WireMessage) -> bool {
        let mut state = self.state.write();
        confirm_in(&mut state, temp_id, canonical)
    }

    /// Flip a message between `Pending` and `Failed` as its delivery runs
    /// out of paths or gets retried by the user.
    pub fn set_status(&self, channel_id: &str, message_id: &str, status: MessageStatus) -> bool {
        let mut state = self.state.write();
        if let Some(message) = state
            .channels
            .get_mut(channel_id)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.id == message_id))
        {
            message.status = status;
            return true;
        }
        false
    }

    /// Remove a message outright, returning it for a later rollback.
    pub fn remove(&self, channel_id: &str, message_id: &str) -> Option<Message> {
        let mut state = self.state.write();
        let messages = state.channels.get_mut(channel_id)?;
        let index = messages.iter().position(|m| m.id == message_id)?;
        Some(messages.remove(index))
    }

    /// Put a previously removed message back, keeping timestamp order.
    pub fn reinsert(&self, message: Message) {
        let mut state = self.state.write();
        let messages = state.channels.entry(message.channel_id.clone()).or_default();
        let position = messages
            .iter()
            .position(|m| m.created_at > message.created_at)
            .unwrap_or(messages.len());
        messages.insert(position, message);
    }

    /// Optimistically replace a message's content, returning the prior
    /// content for rollback.
    pub fn update_content(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Option<String> {
        let mut state = self.state.write();
        let message = state
            .channels
            .get_mut(channel_id)?
            .iter_mut()
            .find(|m| m.id == message_id)?;
        let prior = std::mem::replace(&mut message.content, content.to_string());
        Some(prior)
    }

    pub fn messages(&self, channel_id: &str) -> Vec<Message> {
        self.state
            .read()
            .channels
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, channel_id: &str, message_id: &str) -> Option<Message> {
        self.state
            .read()
            .channels
            .get(channel_id)?
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }
}

fn confirm_in(state: &mut StoreState, temp_id: &str, canonical: &WireMessage) -> bool {
    let mut found = false;
    for messages in state.channels.values_mut() {
        for message in messages.iter_mut() {
            if message.id == temp_id {
                message.id = canonical.id.clone();
                message.content = canonical.content.clone();
                message.created_at = canonical.created_at;
                message.status = MessageStatus::Confirmed;
                found = true;
            }
            if message.reply_to.as_deref() == Some(temp_id) {
                message.reply_to = Some(canonical.id.clone());
            }
        }
    }
    if found {
        state
            .reconciled
            .insert(temp_id.to_string(), canonical.id.clone());
    }
    found
}
