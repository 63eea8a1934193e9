//! Client-side realtime collaboration layer: connection lifecycle, presence,
//! channel rooms, offline write reconciliation, and notification state over
//! one gateway socket with a REST fallback.

pub mod channels;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod notifications;
pub mod outbox;
pub mod presence;
pub mod rest;
pub mod session;
pub mod store;
pub mod transport;

pub use channels::ChannelCoordinator;
pub use config::RealtimeConfig;
pub use connection::{ConnectionManager, ConnectionState, GatewaySender};
pub use dispatcher::{EventDispatcher, Subscription};
pub use error::RealtimeError;
pub use events::{ClientEvent, DomainEvent, EventKind};
pub use notifications::NotificationFeed;
pub use outbox::{LocalPendingRecord, Outbox, WriteAction, WritePayload, WriteStatus};
pub use presence::PresenceTracker;
pub use rest::{HttpRestClient, RestApi, RestError};
pub use session::RealtimeSession;
pub use store::{Message, MessageStatus, MessageStore};
pub use transport::{Transport, TransportLink, WsTransport};
