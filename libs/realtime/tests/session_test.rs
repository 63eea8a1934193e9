mod common;

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use tokio::time;

use taskora_realtime::connection::ConnectionState;
use taskora_realtime::outbox::WriteStatus;
use taskora_realtime::session::RealtimeSession;
use taskora_realtime::store::MessageStatus;

#[tokio::test]
async fn sending_while_connected_confirms_through_the_gateway_echo() {
    common::init_tracing();
    let (transport, mut accepted) = common::FakeTransport::new();
    let rest = common::StubRest::new();
    let session = RealtimeSession::new(common::test_config(), "usr_me", transport, rest);

    session.connect("tok_live");
    let mut server = common::accept_link(&mut accepted).await;
    common::wait_for_state(&session, ConnectionState::Connected).await;

    session.channels().join("chn_1");
    let join = server.expect_event("join_channel").await;
    assert_eq!(join["channel_id"], "chn_1");

    let record = session.send_message("chn_1", "hello", None);
    // Pending bubble is visible before the server answers.
    let pending = session.store().messages("chn_1");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, MessageStatus::Pending);
    assert_eq!(pending[0].sender_id, "usr_me");

    let sent = server.expect_event("send_message").await;
    assert_eq!(sent["channel_id"], "chn_1");
    assert_eq!(sent["content"], "hello");
    assert_eq!(sent["client_temp_id"], record.local_id.as_str());
    assert_eq!(sent["idempotency_key"], record.idempotency_key.as_str());

    server
        .send(
            "new_message",
            json!({
                "channel_id": "chn_1",
                "message": common::message_json("msg_1", "chn_1", "hello", Some(&record.local_id)),
            }),
        )
        .await;

    common::wait_until(|| session.outbox().record(&record.local_id).is_none()).await;
    let messages = session.store().messages("chn_1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "msg_1");
    assert_eq!(messages[0].status, MessageStatus::Confirmed);

    session.shutdown().await;
}

#[tokio::test]
async fn offline_write_reconciles_over_rest_and_survives_the_late_echo() {
    common::init_tracing();
    let (transport, mut accepted) = common::FakeTransport::new();
    let rest = common::StubRest::new();
    rest.script_create_message(Ok(common::rest_message("srv-123", "chn_1", "offline test")));
    let session = RealtimeSession::new(common::test_config(), "usr_me", transport, rest.clone());

    // No connection yet: the write queues and the bubble shows immediately.
    let record = session.send_message("chn_1", "offline test", None);
    let pending = session.store().messages("chn_1");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, record.local_id);
    assert_eq!(pending[0].status, MessageStatus::Pending);

    common::wait_until(|| session.outbox().record(&record.local_id).is_none()).await;
    let messages = session.store().messages("chn_1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "srv-123");
    assert_eq!(messages[0].status, MessageStatus::Confirmed);
    {
        let calls = rest.create_message_calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, record.idempotency_key);
        assert_eq!(calls[0].1.content, "offline test");
    }

    // Reconnect later; the broadcast replay of the same write must not
    // insert a second row.
    session.connect("tok_live");
    let server = common::accept_link(&mut accepted).await;
    common::wait_for_state(&session, ConnectionState::Connected).await;
    server
        .send(
            "new_message",
            json!({
                "channel_id": "chn_1",
                "message": common::message_json("srv-123", "chn_1", "offline test", Some(&record.local_id)),
            }),
        )
        .await;
    // Give the pump a moment to route the frame.
    time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.store().messages("chn_1").len(), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn reconnect_replays_rooms_and_presence_interest() {
    common::init_tracing();
    let (transport, mut accepted) = common::FakeTransport::new();
    let session =
        RealtimeSession::new(common::test_config(), "usr_me", transport, common::StubRest::new());

    session.connect("tok_live");
    let mut server = common::accept_link(&mut accepted).await;
    common::wait_for_state(&session, ConnectionState::Connected).await;

    session.channels().join("chn_1");
    session.presence().watch_project("prj_1");
    server.expect_event("join_channel").await;
    server.expect_event("join_project").await;
    server.expect_event("request_project_online_users").await;

    // Kill the link; the manager redials and the session re-declares
    // everything on the fresh connection.
    drop(server);
    let mut server = common::accept_link(&mut accepted).await;
    let replayed: HashSet<String> = server
        .collect(3)
        .await
        .into_iter()
        .map(|envelope| envelope.event)
        .collect();
    let expected: HashSet<String> = [
        "join_channel",
        "join_project",
        "request_project_online_users",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(replayed, expected);
    assert!(session.channels().is_joined("chn_1"));

    session.shutdown().await;
}

#[tokio::test]
async fn presence_snapshot_overrides_incremental_state() {
    common::init_tracing();
    let (transport, mut accepted) = common::FakeTransport::new();
    let session =
        RealtimeSession::new(common::test_config(), "usr_me", transport, common::StubRest::new());

    session.connect("tok_live");
    let mut server = common::accept_link(&mut accepted).await;
    common::wait_for_state(&session, ConnectionState::Connected).await;

    session.presence().watch_project("prj_1");
    server.expect_event("join_project").await;

    server
        .send(
            "user_joined_project",
            json!({ "project_id": "prj_1", "user_id": "usr_9" }),
        )
        .await;
    common::wait_until(|| session.presence().is_online("prj_1", "usr_9")).await;

    // An authoritative snapshot without usr_9 replaces what the incremental
    // events built; the vanished user keeps a last-seen timestamp.
    server
        .send(
            "project_online_users",
            json!({ "project_id": "prj_1", "users": ["usr_1"] }),
        )
        .await;
    common::wait_until(|| session.presence().is_online("prj_1", "usr_1")).await;

    let online = session.presence().online_users("prj_1");
    assert_eq!(online, HashSet::from(["usr_1".to_string()]));
    assert!(!session.presence().is_online("prj_1", "usr_9"));
    assert!(session.presence().last_seen("prj_1", "usr_9").is_some());

    session.shutdown().await;
}

#[tokio::test]
async fn dialing_gives_up_after_the_configured_attempts() {
    common::init_tracing();
    let transport = common::RefusingTransport::new();
    let session = RealtimeSession::new(
        common::test_config(),
        "usr_me",
        transport.clone(),
        common::StubRest::new(),
    );

    session.connect("tok_live");
    common::wait_until(|| {
        transport.opens() == 4 && session.state() == ConnectionState::Disconnected
    })
    .await;

    // A write made now still resolves: REST keeps failing, so the record
    // lands in Failed with its bubble kept for retry, never dropped.
    let record = session.send_message("chn_1", "while down", None);
    common::wait_until(|| {
        matches!(
            session.outbox().record(&record.local_id),
            Some(r) if matches!(r.status, WriteStatus::Failed { .. })
        )
    })
    .await;
    let messages = session.store().messages("chn_1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Failed);

    session.shutdown().await;
}

#[tokio::test]
async fn notifications_flow_into_toast_and_count() {
    common::init_tracing();
    let (transport, mut accepted) = common::FakeTransport::new();
    let session =
        RealtimeSession::new(common::test_config(), "usr_me", transport, common::StubRest::new());

    session.connect("tok_live");
    let server = common::accept_link(&mut accepted).await;
    common::wait_for_state(&session, ConnectionState::Connected).await;

    server
        .send(
            "new_notification",
            json!({
                "id": "ntf_1",
                "kind": "comment",
                "priority": "normal",
                "title": "New comment on your task",
                "read": false,
                "created_at": chrono::Utc::now().to_rfc3339(),
            }),
        )
        .await;
    common::wait_until(|| session.notifications().unread_count() == 1).await;
    // The feed panel is closed, so the entry surfaces as a toast.
    assert_eq!(
        session.notifications().active_toast().map(|e| e.id),
        Some("ntf_1".to_string())
    );
    assert!(session.notifications().entries().is_empty());

    server
        .send("notification_count_updated", json!({ "count": 5 }))
        .await;
    common::wait_until(|| session.notifications().unread_count() == 5).await;

    session.shutdown().await;
}

#[tokio::test]
async fn member_removal_round_trips_over_the_wire() {
    common::init_tracing();
    let (transport, mut accepted) = common::FakeTransport::new();
    let session =
        RealtimeSession::new(common::test_config(), "usr_me", transport, common::StubRest::new());

    session.connect("tok_live");
    let mut server = common::accept_link(&mut accepted).await;
    common::wait_for_state(&session, ConnectionState::Connected).await;

    session.presence().watch_project("prj_1");
    server.expect_event("join_project").await;
    server
        .send(
            "user_joined_project",
            json!({ "project_id": "prj_1", "user_id": "usr_2" }),
        )
        .await;
    common::wait_until(|| session.presence().is_online("prj_1", "usr_2")).await;

    let record = session.remove_member("prj_1", "usr_2", Some("left the team".into()));
    // Optimistic removal is immediate.
    assert!(!session.presence().is_online("prj_1", "usr_2"));

    let sent = server.expect_event("remove_project_member").await;
    assert_eq!(sent["project_id"], "prj_1");
    assert_eq!(sent["member_id"], "usr_2");
    assert_eq!(sent["reason"], "left the team");

    server
        .send(
            "member_removed",
            json!({ "project_id": "prj_1", "member_id": "usr_2" }),
        )
        .await;
    common::wait_until(|| session.outbox().record(&record.local_id).is_none()).await;
    assert!(!session.presence().is_online("prj_1", "usr_2"));

    session.shutdown().await;
}
