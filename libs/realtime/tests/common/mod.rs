use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskora_realtime::config::RealtimeConfig;
use taskora_realtime::connection::ConnectionState;
use taskora_realtime::error::RealtimeError;
use taskora_realtime::events::{WireEnvelope, WireMessage};
use taskora_realtime::rest::{
    CreateMessageRequest, NotificationPage, RestApi, RestError, SocialPostDraft, SocialPostRecord,
};
use taskora_realtime::session::RealtimeSession;
use taskora_realtime::transport::{Transport, TransportLink};

/// Install a log subscriber once so RUST_LOG works while debugging tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Timings tight enough that reconnect and retry paths run inside a test.
pub fn test_config() -> RealtimeConfig {
    RealtimeConfig {
        reconnect_base_delay: Duration::from_millis(5),
        reconnect_max_delay: Duration::from_millis(40),
        reconnect_max_attempts: 4,
        ack_timeout: Duration::from_millis(60),
        retry_window: Duration::from_millis(400),
        retry_interval: Duration::from_millis(25),
        ..RealtimeConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Fake gateway transport
// ---------------------------------------------------------------------------

/// The far side of one fake link: what the gateway server would hold.
pub struct ServerEnd {
    pub to_client: mpsc::Sender<WireEnvelope>,
    pub from_client: mpsc::Receiver<WireEnvelope>,
}

impl ServerEnd {
    /// Push one server event down to the client.
    pub async fn send(&self, event: &str, data: serde_json::Value) {
        self.to_client
            .send(WireEnvelope {
                event: event.to_string(),
                data,
            })
            .await
            .expect("client link gone");
    }

    /// Read frames until the named client event shows up, returning its
    /// payload. Unrelated frames in between are skipped.
    pub async fn expect_event(&mut self, name: &str) -> serde_json::Value {
        time::timeout(Duration::from_secs(2), async {
            loop {
                let envelope = self.from_client.recv().await.expect("client hung up");
                if envelope.event == name {
                    return envelope.data;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("client never sent {name}"))
    }

    /// Read exactly `count` frames in arrival order.
    pub async fn collect(&mut self, count: usize) -> Vec<WireEnvelope> {
        time::timeout(Duration::from_secs(2), async {
            let mut frames = Vec::with_capacity(count);
            while frames.len() < count {
                frames.push(self.from_client.recv().await.expect("client hung up"));
            }
            frames
        })
        .await
        .unwrap_or_else(|_| panic!("client sent fewer than {count} frames"))
    }
}

/// In-memory transport: every `open` hands the test a fresh [`ServerEnd`].
pub struct FakeTransport {
    links: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (links, accepted) = mpsc::unbounded_channel();
        (Arc::new(Self { links }), accepted)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _credential: &str) -> Result<TransportLink, RealtimeError> {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let _ = self.links.send(ServerEnd {
            to_client: inbound_tx,
            from_client: outbound_rx,
        });
        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

pub async fn accept_link(accepted: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    time::timeout(Duration::from_secs(2), accepted.recv())
        .await
        .expect("client never dialed")
        .expect("transport dropped")
}

/// Transport whose every dial is refused, for exercising reconnect limits.
pub struct RefusingTransport {
    opens: AtomicU32,
}

impl RefusingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            opens: AtomicU32::new(0),
        })
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RefusingTransport {
    async fn open(&self, _credential: &str) -> Result<TransportLink, RealtimeError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Err(RealtimeError::Connection("connection refused".into()))
    }
}

// ---------------------------------------------------------------------------
// Scriptable REST backend
// ---------------------------------------------------------------------------

/// REST double for session tests: message creation is scriptable and
/// recorded; every other endpoint reports a retriable transport error.
#[derive(Default)]
pub struct StubRest {
    create_message_results: Mutex<VecDeque<Result<WireMessage, RestError>>>,
    pub create_message_calls: Mutex<Vec<(String, CreateMessageRequest)>>,
}

impl StubRest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_create_message(&self, result: Result<WireMessage, RestError>) {
        self.create_message_results.lock().push_back(result);
    }

    fn not_scripted<T>() -> Result<T, RestError> {
        Err(RestError::Transport("not scripted".into()))
    }
}

#[async_trait]
impl RestApi for StubRest {
    async fn create_message(
        &self,
        idempotency_key: &str,
        request: &CreateMessageRequest,
    ) -> Result<WireMessage, RestError> {
        self.create_message_calls
            .lock()
            .push((idempotency_key.to_string(), request.clone()));
        self.create_message_results
            .lock()
            .pop_front()
            .unwrap_or_else(Self::not_scripted)
    }

    async fn update_message(
        &self,
        _message_id: &str,
        _content: &str,
    ) -> Result<WireMessage, RestError> {
        Self::not_scripted()
    }

    async fn delete_message(&self, _message_id: &str) -> Result<(), RestError> {
        Self::not_scripted()
    }

    async fn create_social_post(
        &self,
        _idempotency_key: &str,
        _draft: &SocialPostDraft,
    ) -> Result<SocialPostRecord, RestError> {
        Self::not_scripted()
    }

    async fn update_social_post(
        &self,
        _post_id: &str,
        _draft: &SocialPostDraft,
    ) -> Result<SocialPostRecord, RestError> {
        Self::not_scripted()
    }

    async fn delete_social_post(&self, _post_id: &str) -> Result<(), RestError> {
        Self::not_scripted()
    }

    async fn list_social_posts(&self, _project_id: &str) -> Result<Vec<SocialPostRecord>, RestError> {
        Self::not_scripted()
    }

    async fn add_project_member(
        &self,
        _idempotency_key: &str,
        _project_id: &str,
        _member_id: &str,
    ) -> Result<(), RestError> {
        Self::not_scripted()
    }

    async fn remove_project_member(
        &self,
        _project_id: &str,
        _member_id: &str,
        _reason: Option<&str>,
    ) -> Result<(), RestError> {
        Self::not_scripted()
    }

    async fn list_notifications(
        &self,
        _cursor: Option<&str>,
        _limit: u32,
    ) -> Result<NotificationPage, RestError> {
        Self::not_scripted()
    }

    async fn mark_notification_read(&self, _notification_id: &str) -> Result<(), RestError> {
        Self::not_scripted()
    }

    async fn mark_all_notifications_read(&self) -> Result<(), RestError> {
        Self::not_scripted()
    }

    async fn delete_notification(&self, _notification_id: &str) -> Result<(), RestError> {
        Self::not_scripted()
    }

    async fn notification_unread_count(&self) -> Result<u64, RestError> {
        Self::not_scripted()
    }
}

// ---------------------------------------------------------------------------
// Waiting helpers
// ---------------------------------------------------------------------------

/// Poll until `check` passes; panics after two seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    time::timeout(Duration::from_secs(2), async {
        while !check() {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

pub async fn wait_for_state(session: &RealtimeSession, want: ConnectionState) {
    let mut rx = session.subscribe_state();
    time::timeout(Duration::from_secs(2), async {
        loop {
            if *rx.borrow_and_update() == want {
                return;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"));
}

/// A `new_message` payload's nested message object.
pub fn message_json(
    id: &str,
    channel_id: &str,
    content: &str,
    client_temp_id: Option<&str>,
) -> serde_json::Value {
    let mut message = serde_json::json!({
        "id": id,
        "channel_id": channel_id,
        "sender_id": "usr_other",
        "content": content,
        "created_at": chrono::Utc::now().to_rfc3339(),
    });
    if let Some(temp) = client_temp_id {
        message["client_temp_id"] = serde_json::Value::String(temp.to_string());
    }
    message
}

/// A REST `create_message` response for the given ids.
pub fn rest_message(id: &str, channel_id: &str, content: &str) -> WireMessage {
    WireMessage {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        sender_id: "usr_me".to_string(),
        content: content.to_string(),
        reply_to: None,
        created_at: chrono::Utc::now(),
        client_temp_id: None,
    }
}
