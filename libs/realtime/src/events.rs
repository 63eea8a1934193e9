//! Wire vocabulary: the gateway envelope, outbound client events, and the
//! closed domain-event enum every downstream component consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One JSON text frame on the gateway socket: `{"event": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Client-to-server event names.
pub struct ClientEventName;

impl ClientEventName {
    pub const JOIN_CHANNEL: &'static str = "join_channel";
    pub const LEAVE_CHANNEL: &'static str = "leave_channel";
    pub const SEND_MESSAGE: &'static str = "send_message";
    pub const TYPING_START: &'static str = "typing_start";
    pub const TYPING_STOP: &'static str = "typing_stop";
    pub const MARK_MESSAGES_READ: &'static str = "mark_messages_read";
    pub const JOIN_PROJECT: &'static str = "join_project";
    pub const LEAVE_PROJECT: &'static str = "leave_project";
    pub const REQUEST_PROJECT_ONLINE_USERS: &'static str = "request_project_online_users";
    pub const REMOVE_PROJECT_MEMBER: &'static str = "remove_project_member";
}

/// Server-to-client event names.
pub struct ServerEventName;

impl ServerEventName {
    pub const NEW_MESSAGE: &'static str = "new_message";
    pub const MESSAGE_UPDATED: &'static str = "message_updated";
    pub const MESSAGE_DELETED: &'static str = "message_deleted";
    pub const TYPING_START: &'static str = "typing_start";
    pub const TYPING_STOP: &'static str = "typing_stop";
    pub const PROJECT_ONLINE_USERS: &'static str = "project_online_users";
    pub const USER_JOINED_PROJECT: &'static str = "user_joined_project";
    pub const USER_LEFT_PROJECT: &'static str = "user_left_project";
    pub const MEMBER_ADDED: &'static str = "member_added";
    pub const MEMBER_REMOVED: &'static str = "member_removed";
    pub const CHANNEL_CREATED: &'static str = "channel_created";
    pub const CHANNEL_UPDATED: &'static str = "channel_updated";
    pub const NEW_NOTIFICATION: &'static str = "new_notification";
    pub const NOTIFICATION_COUNT_UPDATED: &'static str = "notification_count_updated";
    pub const TASK_UPDATED: &'static str = "task_updated";
    pub const PROJECT_UPDATED: &'static str = "project_updated";
}

// ---------------------------------------------------------------------------
// Shared payload types
// ---------------------------------------------------------------------------

/// A chat message as carried on the wire and in REST responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    /// Backfilled from the enclosing payload when the server nests the
    /// message under a `channel_id` field instead of repeating it.
    #[serde(default)]
    pub channel_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Echoed back to the author so the client that sent the message can
    /// match the broadcast against its pending record. Absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,
}

/// Channel metadata from `channel_created` / `channel_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskUpdate,
    Assignment,
    Comment,
    Mention,
    DueDate,
    ProjectChange,
    SocialPost,
    /// Kinds this client version does not know yet.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub id: String,
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Client events (outbound)
// ---------------------------------------------------------------------------

/// Everything this client can put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinChannel {
        channel_id: String,
    },
    LeaveChannel {
        channel_id: String,
    },
    SendMessage {
        channel_id: String,
        content: String,
        reply_to: Option<String>,
        client_temp_id: String,
        idempotency_key: String,
    },
    TypingStart {
        channel_id: String,
    },
    TypingStop {
        channel_id: String,
    },
    MarkMessagesRead {
        channel_id: String,
        message_ids: Vec<String>,
    },
    JoinProject {
        project_id: String,
    },
    LeaveProject {
        project_id: String,
    },
    RequestProjectOnlineUsers {
        project_id: String,
    },
    RemoveProjectMember {
        project_id: String,
        member_id: String,
        reason: Option<String>,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinChannel { .. } => ClientEventName::JOIN_CHANNEL,
            ClientEvent::LeaveChannel { .. } => ClientEventName::LEAVE_CHANNEL,
            ClientEvent::SendMessage { .. } => ClientEventName::SEND_MESSAGE,
            ClientEvent::TypingStart { .. } => ClientEventName::TYPING_START,
            ClientEvent::TypingStop { .. } => ClientEventName::TYPING_STOP,
            ClientEvent::MarkMessagesRead { .. } => ClientEventName::MARK_MESSAGES_READ,
            ClientEvent::JoinProject { .. } => ClientEventName::JOIN_PROJECT,
            ClientEvent::LeaveProject { .. } => ClientEventName::LEAVE_PROJECT,
            ClientEvent::RequestProjectOnlineUsers { .. } => {
                ClientEventName::REQUEST_PROJECT_ONLINE_USERS
            }
            ClientEvent::RemoveProjectMember { .. } => ClientEventName::REMOVE_PROJECT_MEMBER,
        }
    }

    pub fn into_envelope(self) -> WireEnvelope {
        let event = self.name().to_string();
        let data = match self {
            ClientEvent::JoinChannel { channel_id }
            | ClientEvent::LeaveChannel { channel_id }
            | ClientEvent::TypingStart { channel_id }
            | ClientEvent::TypingStop { channel_id } => json!({ "channel_id": channel_id }),
            ClientEvent::SendMessage {
                channel_id,
                content,
                reply_to,
                client_temp_id,
                idempotency_key,
            } => json!({
                "channel_id": channel_id,
                "content": content,
                "reply_to": reply_to,
                "client_temp_id": client_temp_id,
                "idempotency_key": idempotency_key,
            }),
            ClientEvent::MarkMessagesRead {
                channel_id,
                message_ids,
            } => json!({ "channel_id": channel_id, "message_ids": message_ids }),
            ClientEvent::JoinProject { project_id }
            | ClientEvent::LeaveProject { project_id }
            | ClientEvent::RequestProjectOnlineUsers { project_id } => {
                json!({ "project_id": project_id })
            }
            ClientEvent::RemoveProjectMember {
                project_id,
                member_id,
                reason,
            } => json!({
                "project_id": project_id,
                "member_id": member_id,
                "reason": reason,
            }),
        };
        WireEnvelope { event, data }
    }
}

// ---------------------------------------------------------------------------
// Domain events (inbound + locally synthesized)
// ---------------------------------------------------------------------------

/// Discriminant used for dispatcher registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageReceived,
    MessageUpdated,
    MessageDeleted,
    TypingStarted,
    TypingStopped,
    PresenceSnapshot,
    UserJoinedProject,
    UserLeftProject,
    MemberAdded,
    MemberRemoved,
    ChannelCreated,
    ChannelUpdated,
    NotificationCreated,
    NotificationCountChanged,
    TaskUpdated,
    ProjectUpdated,
    WriteConfirmed,
    WriteFailed,
    WriteRejected,
}

/// The closed event enum fanned out by the dispatcher. Wire events translate
/// into the first group; the `Write*` variants are synthesized locally by the
/// reconciliation layer and never arrive off the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    MessageReceived {
        channel_id: String,
        message: WireMessage,
    },
    MessageUpdated {
        channel_id: String,
        message: WireMessage,
    },
    MessageDeleted {
        channel_id: String,
        message_id: String,
    },
    TypingStarted {
        channel_id: String,
        user_id: String,
        user_name: Option<String>,
    },
    TypingStopped {
        channel_id: String,
        user_id: String,
        user_name: Option<String>,
    },
    PresenceSnapshot {
        project_id: String,
        users: Vec<String>,
    },
    UserJoinedProject {
        project_id: String,
        user_id: String,
    },
    UserLeftProject {
        project_id: String,
        user_id: String,
    },
    MemberAdded {
        project_id: String,
        member_id: String,
    },
    MemberRemoved {
        project_id: String,
        member_id: String,
    },
    ChannelCreated {
        channel: ChannelInfo,
    },
    ChannelUpdated {
        channel: ChannelInfo,
    },
    NotificationCreated {
        entry: NotificationEntry,
    },
    NotificationCountChanged {
        unread: u64,
    },
    TaskUpdated {
        project_id: String,
        task_id: String,
    },
    ProjectUpdated {
        project_id: String,
    },
    WriteConfirmed {
        local_id: String,
        server_id: Option<String>,
    },
    WriteFailed {
        local_id: String,
        reason: String,
    },
    WriteRejected {
        local_id: String,
        reason: String,
    },
}

#[derive(Deserialize)]
struct ChannelMessagePayload {
    channel_id: String,
    message: WireMessage,
}

#[derive(Deserialize)]
struct MessageDeletedPayload {
    channel_id: String,
    message_id: String,
}

#[derive(Deserialize)]
struct TypingPayload {
    channel_id: String,
    user_id: String,
    #[serde(default)]
    user_name: Option<String>,
}

#[derive(Deserialize)]
struct ProjectUsersPayload {
    project_id: String,
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Deserialize)]
struct ProjectUserPayload {
    project_id: String,
    user_id: String,
}

#[derive(Deserialize)]
struct ProjectMemberPayload {
    project_id: String,
    member_id: String,
}

#[derive(Deserialize)]
struct ChannelPayload {
    channel: ChannelInfo,
}

#[derive(Deserialize)]
struct CountPayload {
    count: u64,
}

#[derive(Deserialize)]
struct TaskUpdatedPayload {
    project_id: String,
    task_id: String,
}

#[derive(Deserialize)]
struct ProjectUpdatedPayload {
    project_id: String,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::MessageReceived { .. } => EventKind::MessageReceived,
            DomainEvent::MessageUpdated { .. } => EventKind::MessageUpdated,
            DomainEvent::MessageDeleted { .. } => EventKind::MessageDeleted,
            DomainEvent::TypingStarted { .. } => EventKind::TypingStarted,
            DomainEvent::TypingStopped { .. } => EventKind::TypingStopped,
            DomainEvent::PresenceSnapshot { .. } => EventKind::PresenceSnapshot,
            DomainEvent::UserJoinedProject { .. } => EventKind::UserJoinedProject,
            DomainEvent::UserLeftProject { .. } => EventKind::UserLeftProject,
            DomainEvent::MemberAdded { .. } => EventKind::MemberAdded,
            DomainEvent::MemberRemoved { .. } => EventKind::MemberRemoved,
            DomainEvent::ChannelCreated { .. } => EventKind::ChannelCreated,
            DomainEvent::ChannelUpdated { .. } => EventKind::ChannelUpdated,
            DomainEvent::NotificationCreated { .. } => EventKind::NotificationCreated,
            DomainEvent::NotificationCountChanged { .. } => EventKind::NotificationCountChanged,
            DomainEvent::TaskUpdated { .. } => EventKind::TaskUpdated,
            DomainEvent::ProjectUpdated { .. } => EventKind::ProjectUpdated,
            DomainEvent::WriteConfirmed { .. } => EventKind::WriteConfirmed,
            DomainEvent::WriteFailed { .. } => EventKind::WriteFailed,
            DomainEvent::WriteRejected { .. } => EventKind::WriteRejected,
        }
    }

    /// Translate one inbound envelope. Unknown names and malformed payloads
    /// are logged and dropped; they must never tear the connection down.
    pub fn from_wire(envelope: &WireEnvelope) -> Option<DomainEvent> {
        let event = envelope.event.as_str();
        let data = &envelope.data;
        let translated = match event {
            ServerEventName::NEW_MESSAGE => {
                let mut payload: ChannelMessagePayload = parse(event, data)?;
                payload.message.channel_id = payload.channel_id.clone();
                DomainEvent::MessageReceived {
                    channel_id: payload.channel_id,
                    message: payload.message,
                }
            }
            ServerEventName::MESSAGE_UPDATED => {
                let mut payload: ChannelMessagePayload = parse(event, data)?;
                payload.message.channel_id = payload.channel_id.clone();
                DomainEvent::MessageUpdated {
                    channel_id: payload.channel_id,
                    message: payload.message,
                }
            }
            ServerEventName::MESSAGE_DELETED => {
                let payload: MessageDeletedPayload = parse(event, data)?;
                DomainEvent::MessageDeleted {
                    channel_id: payload.channel_id,
                    message_id: payload.message_id,
                }
            }
            ServerEventName::TYPING_START => {
                let payload: TypingPayload = parse(event, data)?;
                DomainEvent::TypingStarted {
                    channel_id: payload.channel_id,
                    user_id: payload.user_id,
                    user_name: payload.user_name,
                }
            }
            ServerEventName::TYPING_STOP => {
                let payload: TypingPayload = parse(event, data)?;
                DomainEvent::TypingStopped {
                    channel_id: payload.channel_id,
                    user_id: payload.user_id,
                    user_name: payload.user_name,
                }
            }
            ServerEventName::PROJECT_ONLINE_USERS => {
                let payload: ProjectUsersPayload = parse(event, data)?;
                DomainEvent::PresenceSnapshot {
                    project_id: payload.project_id,
                    users: payload.users,
                }
            }
            ServerEventName::USER_JOINED_PROJECT => {
                let payload: ProjectUserPayload = parse(event, data)?;
                DomainEvent::UserJoinedProject {
                    project_id: payload.project_id,
                    user_id: payload.user_id,
                }
            }
            ServerEventName::USER_LEFT_PROJECT => {
                let payload: ProjectUserPayload = parse(event, data)?;
                DomainEvent::UserLeftProject {
                    project_id: payload.project_id,
                    user_id: payload.user_id,
                }
            }
            ServerEventName::MEMBER_ADDED => {
                let payload: ProjectMemberPayload = parse(event, data)?;
                DomainEvent::MemberAdded {
                    project_id: payload.project_id,
                    member_id: payload.member_id,
                }
            }
            ServerEventName::MEMBER_REMOVED => {
                let payload: ProjectMemberPayload = parse(event, data)?;
                DomainEvent::MemberRemoved {
                    project_id: payload.project_id,
                    member_id: payload.member_id,
                }
            }
            ServerEventName::CHANNEL_CREATED => {
                let payload: ChannelPayload = parse(event, data)?;
                DomainEvent::ChannelCreated {
                    channel: payload.channel,
                }
            }
            ServerEventName::CHANNEL_UPDATED => {
                let payload: ChannelPayload = parse(event, data)?;
                DomainEvent::ChannelUpdated {
                    channel: payload.channel,
                }
            }
            ServerEventName::NEW_NOTIFICATION => {
                let entry: NotificationEntry = parse(event, data)?;
                DomainEvent::NotificationCreated { entry }
            }
            ServerEventName::NOTIFICATION_COUNT_UPDATED => {
                let payload: CountPayload = parse(event, data)?;
                DomainEvent::NotificationCountChanged {
                    unread: payload.count,
                }
            }
            ServerEventName::TASK_UPDATED => {
                let payload: TaskUpdatedPayload = parse(event, data)?;
                DomainEvent::TaskUpdated {
                    project_id: payload.project_id,
                    task_id: payload.task_id,
                }
            }
            ServerEventName::PROJECT_UPDATED => {
                let payload: ProjectUpdatedPayload = parse(event, data)?;
                DomainEvent::ProjectUpdated {
                    project_id: payload.project_id,
                }
            }
            _ => {
                tracing::warn!(event, "unknown gateway event dropped");
                return None;
            }
        };
        Some(translated)
    }
}

fn parse<T: serde::de::DeserializeOwned>(event: &str, data: &Value) -> Option<T> {
    match serde_json::from_value(data.clone()) {
        Ok(payload) => Some(payload),
        Err(error) => {
            tracing::warn!(event, %error, "malformed gateway payload dropped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_envelope_carries_correlation_ids() {
        let envelope = ClientEvent::SendMessage {
            channel_id: "chn_1".into(),
            content: "hello".into(),
            reply_to: None,
            client_temp_id: "local_01".into(),
            idempotency_key: "idem_01".into(),
        }
        .into_envelope();

        assert_eq!(envelope.event, "send_message");
        assert_eq!(envelope.data["channel_id"], "chn_1");
        assert_eq!(envelope.data["client_temp_id"], "local_01");
        assert_eq!(envelope.data["idempotency_key"], "idem_01");
    }

    #[test]
    fn join_and_leave_share_the_channel_payload_shape() {
        let join = ClientEvent::JoinChannel {
            channel_id: "chn_9".into(),
        }
        .into_envelope();
        let leave = ClientEvent::LeaveChannel {
            channel_id: "chn_9".into(),
        }
        .into_envelope();

        assert_eq!(join.event, "join_channel");
        assert_eq!(leave.event, "leave_channel");
        assert_eq!(join.data, leave.data);
    }

    #[test]
    fn new_message_backfills_channel_id_into_the_nested_message() {
        let envelope = WireEnvelope {
            event: "new_message".into(),
            data: serde_json::json!({
                "channel_id": "chn_1",
                "message": {
                    "id": "msg_1",
                    "sender_id": "usr_1",
                    "content": "hi",
                    "created_at": "2026-03-01T10:00:00Z",
                },
            }),
        };

        let Some(DomainEvent::MessageReceived {
            channel_id,
            message,
        }) = DomainEvent::from_wire(&envelope)
        else {
            panic!("expected a message event");
        };
        assert_eq!(channel_id, "chn_1");
        assert_eq!(message.channel_id, "chn_1");
        assert_eq!(message.client_temp_id, None);
    }

    #[test]
    fn echoed_client_temp_id_survives_translation() {
        let envelope = WireEnvelope {
            event: "new_message".into(),
            data: serde_json::json!({
                "channel_id": "chn_1",
                "message": {
                    "id": "msg_2",
                    "sender_id": "usr_1",
                    "content": "mine",
                    "created_at": "2026-03-01T10:00:01Z",
                    "client_temp_id": "local_abc",
                },
            }),
        };

        let Some(DomainEvent::MessageReceived { message, .. }) =
            DomainEvent::from_wire(&envelope)
        else {
            panic!("expected a message event");
        };
        assert_eq!(message.client_temp_id.as_deref(), Some("local_abc"));
    }

    #[test]
    fn unknown_event_is_dropped() {
        let envelope = WireEnvelope {
            event: "server_maintenance".into(),
            data: serde_json::json!({}),
        };
        assert!(DomainEvent::from_wire(&envelope).is_none());
    }

    #[test]
    fn malformed_payload_is_dropped_not_fatal() {
        let envelope = WireEnvelope {
            event: "user_joined_project".into(),
            data: serde_json::json!({ "project_id": 42 }),
        };
        assert!(DomainEvent::from_wire(&envelope).is_none());
    }

    #[test]
    fn notification_entry_translates_with_unknown_kind() {
        let envelope = WireEnvelope {
            event: "new_notification".into(),
            data: serde_json::json!({
                "id": "ntf_1",
                "kind": "billing_alert",
                "priority": "urgent",
                "title": "Invoice overdue",
                "read": false,
                "created_at": "2026-03-01T09:00:00Z",
            }),
        };

        let Some(DomainEvent::NotificationCreated { entry }) = DomainEvent::from_wire(&envelope)
        else {
            panic!("expected a notification event");
        };
        assert_eq!(entry.kind, NotificationKind::Other);
        assert_eq!(entry.priority, NotificationPriority::Urgent);
    }

    #[test]
    fn presence_snapshot_translates_user_list() {
        let envelope = WireEnvelope {
            event: "project_online_users".into(),
            data: serde_json::json!({ "project_id": "prj_1", "users": ["usr_1", "usr_2"] }),
        };

        assert_eq!(
            DomainEvent::from_wire(&envelope),
            Some(DomainEvent::PresenceSnapshot {
                project_id: "prj_1".into(),
                users: vec!["usr_1".into(), "usr_2".into()],
            })
        );
    }

    #[test]
    fn every_translated_event_reports_a_matching_kind() {
        let event = DomainEvent::NotificationCountChanged { unread: 3 };
        assert_eq!(event.kind(), EventKind::NotificationCountChanged);
        let event = DomainEvent::WriteConfirmed {
            local_id: "local_1".into(),
            server_id: Some("msg_1".into()),
        };
        assert_eq!(event.kind(), EventKind::WriteConfirmed);
    }
}
