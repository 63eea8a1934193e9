//! Per-project presence: who is online now and when they were last seen.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::connection::{ConnectionState, GatewaySender};
use crate::dispatcher::{EventDispatcher, Subscription};
use crate::events::{ClientEvent, DomainEvent, EventKind};

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Tracks presence for every watched project. Incremental join/leave events
/// mutate the records; a full `project_online_users` snapshot is
/// authoritative and replaces the online set wholesale, which is what makes
/// reconnection safe regardless of the events missed while offline.
pub struct PresenceTracker {
    gateway: Arc<dyn GatewaySender>,
    projects: DashMap<String, HashMap<String, PresenceRecord>>,
    watched: RwLock<HashSet<String>>,
}

impl PresenceTracker {
    pub fn new(gateway: Arc<dyn GatewaySender>) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            projects: DashMap::new(),
            watched: RwLock::new(HashSet::new()),
        })
    }

    /// Register the event handlers. The returned subscriptions must outlive
    /// the session; dropping them detaches the tracker.
    pub fn attach(self: &Arc<Self>, dispatcher: &Arc<EventDispatcher>) -> Vec<Subscription> {
        let mut subs = Vec::new();

        let tracker = self.clone();
        subs.push(dispatcher.subscribe(EventKind::PresenceSnapshot, move |event| {
            if let DomainEvent::PresenceSnapshot { project_id, users } = event {
                tracker.apply_snapshot(project_id, users);
            }
        }));
        let tracker = self.clone();
        subs.push(dispatcher.subscribe(EventKind::UserJoinedProject, move |event| {
            if let DomainEvent::UserJoinedProject {
                project_id,
                user_id,
            } = event
            {
                tracker.apply_user_joined(project_id, user_id);
            }
        }));
        let tracker = self.clone();
        subs.push(dispatcher.subscribe(EventKind::UserLeftProject, move |event| {
            if let DomainEvent::UserLeftProject {
                project_id,
                user_id,
            } = event
            {
                tracker.apply_user_left(project_id, user_id);
            }
        }));
        let tracker = self.clone();
        subs.push(dispatcher.subscribe(EventKind::MemberAdded, move |event| {
            if let DomainEvent::MemberAdded {
                project_id,
                member_id,
            } = event
            {
                tracker.apply_member_added(project_id, member_id);
            }
        }));
        let tracker = self.clone();
        subs.push(dispatcher.subscribe(EventKind::MemberRemoved, move |event| {
            if let DomainEvent::MemberRemoved {
                project_id,
                member_id,
            } = event
            {
                tracker.apply_member_removed(project_id, member_id);
            }
        }));

        subs
    }

    /// Start tracking a project: declares interest on the wire when
    /// connected, otherwise the next resync declares it.
    pub fn watch_project(&self, project_id: &str) {
        let newly_watched = self.watched.write().insert(project_id.to_string());
        self.projects.entry(project_id.to_string()).or_default();
        if newly_watched && self.gateway.state() == ConnectionState::Connected {
            self.declare(project_id);
        }
    }

    /// Stop tracking a project and drop its cached records.
    pub fn unwatch_project(&self, project_id: &str) {
        if !self.watched.write().remove(project_id) {
            return;
        }
        self.projects.remove(project_id);
        if !self.gateway.send(ClientEvent::LeaveProject {
            project_id: project_id.to_string(),
        }) {
            tracing::debug!(project_id, "leave_project not sent; rooms are connection-scoped");
        }
    }

    /// Ask the server for a fresh snapshot. Returns false when not
    /// connected.
    pub fn request_refresh(&self, project_id: &str) -> bool {
        self.gateway.send(ClientEvent::RequestProjectOnlineUsers {
            project_id: project_id.to_string(),
        })
    }

    /// Re-declare every watched project after a reconnect. The snapshots
    /// that come back overwrite whatever went stale while offline.
    pub fn resynchronize(&self) {
        let watched: Vec<String> = self.watched.read().iter().cloned().collect();
        for project_id in watched {
            self.declare(&project_id);
        }
    }

    pub fn online_users(&self, project_id: &str) -> HashSet<String> {
        self.projects
            .get(project_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, r)| r.is_online)
                    .map(|(user, _)| user.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_online(&self, project_id: &str, user_id: &str) -> bool {
        self.projects
            .get(project_id)
            .and_then(|records| records.get(user_id).map(|r| r.is_online))
            .unwrap_or(false)
    }

    pub fn last_seen(&self, project_id: &str, user_id: &str) -> Option<DateTime<Utc>> {
        self.projects
            .get(project_id)?
            .get(user_id)
            .map(|r| r.last_seen)
    }

    fn declare(&self, project_id: &str) {
        let joined = self.gateway.send(ClientEvent::JoinProject {
            project_id: project_id.to_string(),
        });
        let refreshed = self.request_refresh(project_id);
        if !(joined && refreshed) {
            tracing::debug!(project_id, "presence interest not declared; awaiting resync");
        }
    }

    fn apply_snapshot(&self, project_id: &str, users: &[String]) {
        if !self.watched.read().contains(project_id) {
            tracing::debug!(project_id, "snapshot for unwatched project ignored");
            return;
        }
        let mut records = self.projects.entry(project_id.to_string()).or_default();
        let now = Utc::now();
        for record in records.values_mut() {
            if record.is_online {
                record.last_seen = now;
            }
            record.is_online = false;
        }
        for user in users {
            records
                .entry(user.clone())
                .and_modify(|r| {
                    r.is_online = true;
                    r.last_seen = now;
                })
                .or_insert(PresenceRecord {
                    is_online: true,
                    last_seen: now,
                });
        }
    }

    fn apply_user_joined(&self, project_id: &str, user_id: &str) {
        if !self.watched.read().contains(project_id) {
            return;
        }
        let mut records = self.projects.entry(project_id.to_string()).or_default();
        let now = Utc::now();
        records
            .entry(user_id.to_string())
            .and_modify(|r| {
                r.is_online = true;
                r.last_seen = now;
            })
            .or_insert(PresenceRecord {
                is_online: true,
                last_seen: now,
            });
    }

    fn apply_user_left(&self, project_id: &str, user_id: &str) {
        if !self.watched.read().contains(project_id) {
            return;
        }
        if let Some(mut records) = self.projects.get_mut(project_id) {
            if let Some(record) = records.get_mut(user_id) {
                record.is_online = false;
                record.last_seen = Utc::now();
            }
        }
    }

    fn apply_member_added(&self, project_id: &str, member_id: &str) {
        if !self.watched.read().contains(project_id) {
            return;
        }
        self.projects
            .entry(project_id.to_string())
            .or_default()
            .entry(member_id.to_string())
            .or_insert(PresenceRecord {
                is_online: false,
                last_seen: Utc::now(),
            });
    }

    /// Removal is an idempotent no-op when the user was never tracked.
    fn apply_member_removed(&self, project_id: &str, member_id: &str) {
        if let Some(mut records) = self.projects.get_mut(project_id) {
            records.remove(member_id);
        }
    }
}
