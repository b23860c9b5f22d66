//! Shared helpers for dispatcher and gateway integration tests.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use parley_api::auth::Identity;
use parley_api::gateway::dispatcher::Dispatcher;
use parley_api::gateway::events::{ClientFrame, EventName, ServerFrame};
use parley_api::gateway::session::ConnectionSession;
use parley_api::store::{MemoryStore, Store, User};

pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn test_env() -> TestEnv {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();
    let dispatcher = Arc::new(Dispatcher::new(store_dyn, 50, 5000));
    TestEnv { store, dispatcher }
}

pub async fn create_user(env: &TestEnv, username: &str) -> User {
    env.store
        .create_user(username, &format!("tok_{username}"))
        .await
        .expect("create user")
}

/// Open a session for a user and run the connect lifecycle. Returns the
/// session handle and the receiving end of its outbound queue.
pub async fn connect(
    env: &TestEnv,
    user: &User,
) -> (Arc<ConnectionSession>, UnboundedReceiver<ServerFrame>) {
    let identity = Identity {
        user_id: user.id.clone(),
        username: user.username.clone(),
    };
    let (session, rx) = ConnectionSession::new(identity);
    env.dispatcher.connect(&session).await.expect("connect");
    (session, rx)
}

/// Drain every frame currently queued for a session.
pub fn drain(rx: &mut UnboundedReceiver<ServerFrame>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

/// Send one inbound event with an ack id and return the resulting ack frame
/// plus any event frames delivered to the caller before it.
pub async fn request(
    env: &TestEnv,
    session: &Arc<ConnectionSession>,
    rx: &mut UnboundedReceiver<ServerFrame>,
    event: &str,
    data: serde_json::Value,
) -> (ServerFrame, Vec<ServerFrame>) {
    env.dispatcher
        .handle_frame(
            session,
            ClientFrame {
                event: event.to_string(),
                ack: Some(1),
                data,
            },
        )
        .await;

    let mut events = Vec::new();
    for frame in drain(rx) {
        if frame.event == EventName::ACK {
            return (frame, events);
        }
        events.push(frame);
    }
    panic!("no ack frame received for {event}");
}

/// Send an inbound event that carries no ack (typing indicators).
pub async fn fire(env: &TestEnv, session: &Arc<ConnectionSession>, event: &str, data: serde_json::Value) {
    env.dispatcher
        .handle_frame(
            session,
            ClientFrame {
                event: event.to_string(),
                ack: None,
                data,
            },
        )
        .await;
}

pub fn frames_named<'a>(frames: &'a [ServerFrame], name: &str) -> Vec<&'a ServerFrame> {
    frames.iter().filter(|f| f.event == name).collect()
}

pub fn assert_ack_ok(ack: &ServerFrame) {
    assert_eq!(ack.success, Some(true), "expected success ack: {ack:?}");
}

pub fn assert_ack_err(ack: &ServerFrame, kind: &str) {
    assert_eq!(ack.success, Some(false), "expected failure ack: {ack:?}");
    let err = ack.error.as_ref().expect("error payload");
    assert_eq!(err.kind, kind);
}
