//! End-to-end scenarios over the in-memory store: two clients sharing
//! one backend, exercising screens, chat, and the call-signaling flow.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use huddle_core::call::{CALL_DOC_ID, CallMedium, CallPhase};
use huddle_core::client::Client;
use huddle_core::config::ServiceConfig;
use huddle_core::errors::{CallError, MediaError};
use huddle_core::events::{ClientEvent, ClientEventListener};
use huddle_core::media::NullMediaDevices;
use huddle_core::store::memory::MemoryStore;
use huddle_core::store::{CollectionPath, DocumentStore};
use huddle_core::{Identity, Screen};

struct Probe {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientEventListener for Probe {
    fn on_event(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

fn probe(client: &Client) -> mpsc::UnboundedReceiver<ClientEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.add_listener(Arc::new(Probe { tx }));
    rx
}

async fn expect_event<F>(
    rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    what: &str,
    mut pred: F,
) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

fn identity(uid: &str, email: &str) -> Identity {
    Identity {
        uid: uid.into(),
        email: email.into(),
        id_token: "tok".into(),
    }
}

fn client_on(store: Arc<MemoryStore>) -> Client {
    Client::with_backends(
        ServiceConfig::default(),
        store,
        Arc::new(NullMediaDevices::granting()),
    )
}

fn call_doc(code: &str) -> huddle_core::store::DocumentPath {
    CollectionPath::root("rooms")
        .doc(code)
        .collection("calls")
        .doc(CALL_DOC_ID)
}

// Scenario A: signing in flips Login -> RoomList exactly once, with
// no intermediate flash of the chat screen.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sign_in_transitions_login_to_room_list_exactly_once() {
    let client = client_on(Arc::new(MemoryStore::new()));
    let mut events = probe(&client);

    client.restore_session(identity("u1", "alice@example.com"));

    let screens: Vec<Screen> = {
        let mut seen = Vec::new();
        // Drain everything emitted so far; the transition is synchronous.
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::ScreenChanged(screen) = event {
                seen.push(screen);
            }
        }
        seen
    };

    assert_eq!(screens, vec![Screen::RoomList]);
    assert_eq!(client.screen().current(), Screen::RoomList);
}

// Scenario B: a message from A becomes visible, in order, in B's
// subscribed view without any refresh.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn message_from_a_reaches_b_in_order() {
    let store = Arc::new(MemoryStore::new());
    let alice = client_on(store.clone());
    let bob = client_on(store.clone());

    alice.restore_session(identity("u-alice", "alice@example.com"));
    bob.restore_session(identity("u-bob", "bob@example.com"));

    let session_a = alice.create_room("standup", "").await.unwrap();
    let code = session_a.code().to_string();
    bob.join_room(&code, "").await.unwrap();
    let mut bob_events = probe(&bob);

    session_a.chat().send_text("first").await.unwrap();
    session_a.chat().send_text("second").await.unwrap();

    let first = expect_event(&mut bob_events, "first message", |e| {
        matches!(e, ClientEvent::MessageReceived(_))
    })
    .await;
    let ClientEvent::MessageReceived(first) = first else { unreachable!() };
    assert_eq!(first.content, "first");
    assert_eq!(first.author_uid, "u-alice");
    assert_eq!(first.author_email, "alice@example.com");

    let second = expect_event(&mut bob_events, "second message", |e| {
        matches!(e, ClientEvent::MessageReceived(_))
    })
    .await;
    let ClientEvent::MessageReceived(second) = second else { unreachable!() };
    assert_eq!(second.content, "second");
    assert!(second.timestamp >= first.timestamp);
}

// Late joiners get the full history replayed, oldest first.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_joiner_receives_backfill() {
    let store = Arc::new(MemoryStore::new());
    let alice = client_on(store.clone());
    let bob = client_on(store.clone());

    alice.restore_session(identity("u-alice", "alice@example.com"));
    bob.restore_session(identity("u-bob", "bob@example.com"));

    let session_a = alice.create_room("standup", "").await.unwrap();
    let code = session_a.code().to_string();
    session_a.chat().send_text("before bob joined").await.unwrap();

    // Give the write a moment to land before the late join.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut bob_events = probe(&bob);
    let session_b = bob.join_room(&code, "").await.unwrap();

    expect_event(&mut bob_events, "backfilled message", |e| {
        matches!(e, ClientEvent::MessageReceived(m) if m.content == "before bob joined")
    })
    .await;
    assert_eq!(session_b.chat().messages().await.len(), 1);
}

// Scenario C: caller sees local capture before the callee confirms;
// after acceptance the negotiation completes and the caller reaches
// Connected, with the answer merged into the signaling record.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn video_call_negotiates_through_the_store() {
    let store = Arc::new(MemoryStore::new());
    let alice = client_on(store.clone());
    let bob = client_on(store.clone());

    alice.restore_session(identity("u-alice", "alice@example.com"));
    bob.restore_session(identity("u-bob", "bob@example.com"));

    let session_a = alice.create_room("standup", "").await.unwrap();
    let code = session_a.code().to_string();
    let session_b = bob.join_room(&code, "").await.unwrap();

    let mut alice_events = probe(&alice);
    let mut bob_events = probe(&bob);

    session_a.calls().start_call(CallMedium::Video).await.unwrap();

    // Local capture is live for the caller before anyone answers.
    expect_event(&mut alice_events, "caller local stream", |e| {
        matches!(e, ClientEvent::LocalStreamStarted { medium: CallMedium::Video })
    })
    .await;
    assert_eq!(session_a.calls().phase().await, CallPhase::AwaitingAnswer);

    // The offer reaches Bob as an incoming call with the caller name.
    let incoming = expect_event(&mut bob_events, "incoming call", |e| {
        matches!(e, ClientEvent::IncomingCall { .. })
    })
    .await;
    let ClientEvent::IncomingCall { medium, caller_uid, caller_name } = incoming else {
        unreachable!()
    };
    assert_eq!(medium, CallMedium::Video);
    assert_eq!(caller_uid, "u-alice");
    assert_eq!(caller_name, "alice");

    session_b.calls().accept_incoming().await.unwrap();
    expect_event(&mut bob_events, "answerer local stream", |e| {
        matches!(e, ClientEvent::LocalStreamStarted { medium: CallMedium::Video })
    })
    .await;

    // The answer lands at the caller and the flow reports Connected.
    expect_event(&mut alice_events, "caller connected", |e| {
        matches!(e, ClientEvent::CallPhaseChanged(CallPhase::Connected))
    })
    .await;

    // The record was merged in place, offer metadata intact.
    let doc = store.get(&call_doc(&code)).await.unwrap().unwrap();
    assert_eq!(doc.fields["type"], "answer");
    assert_eq!(doc.fields["caller"], "u-alice");
    assert_eq!(doc.fields["callerName"], "alice");
    assert_eq!(doc.fields["callee"], "u-bob");
    assert_eq!(doc.fields["callType"], "video");

    // Explicit teardown deletes the record; repeating it is a no-op.
    session_a.calls().hang_up().await;
    assert!(store.get(&call_doc(&code)).await.unwrap().is_none());
    assert_eq!(session_a.calls().phase().await, CallPhase::Idle);
    session_a.calls().hang_up().await;

    session_b.calls().hang_up().await;
}

// Scenario D: media denial aborts the attempt before any signaling
// write; the flow returns to Idle.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn denied_media_writes_no_signaling_record() {
    let store = Arc::new(MemoryStore::new());
    let alice = Client::with_backends(
        ServiceConfig::default(),
        store.clone(),
        Arc::new(NullMediaDevices::denying()),
    );
    alice.restore_session(identity("u-alice", "alice@example.com"));
    let session = alice.create_room("standup", "").await.unwrap();
    let code = session.code().to_string();
    let mut events = probe(&alice);

    let err = session.calls().start_call(CallMedium::Audio).await.unwrap_err();
    assert!(matches!(err, CallError::Media(MediaError::PermissionDenied)));

    assert!(store.get(&call_doc(&code)).await.unwrap().is_none());
    assert_eq!(session.calls().phase().await, CallPhase::Idle);

    // The failure surfaced to the user and the flow settled on Idle.
    expect_event(&mut events, "surfaced media error", |e| {
        matches!(e, ClientEvent::ErrorSurfaced { .. })
    })
    .await;
    expect_event(&mut events, "return to idle", |e| {
        matches!(e, ClientEvent::CallPhaseChanged(CallPhase::Idle))
    })
    .await;
}

// The call slot is claimed conditionally: a second caller is told the
// room is busy and the first offer is untouched.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_caller_gets_room_busy_without_clobbering() {
    let store = Arc::new(MemoryStore::new());
    let alice = client_on(store.clone());
    alice.restore_session(identity("u-alice", "alice@example.com"));
    let session = alice.create_room("standup", "").await.unwrap();
    let code = session.code().to_string();

    // Another participant's offer already holds the slot.
    store
        .create(
            &call_doc(&code),
            serde_json::json!({
                "type": "offer",
                "callType": "audio",
                "caller": "u-carol",
                "callerName": "carol",
                "sdp": "v=0 theirs",
                "offerType": "offer",
            }),
        )
        .await
        .unwrap();

    let err = session.calls().start_call(CallMedium::Audio).await.unwrap_err();
    assert!(matches!(err, CallError::RoomBusy));

    let doc = store.get(&call_doc(&code)).await.unwrap().unwrap();
    assert_eq!(doc.fields["caller"], "u-carol");
    assert_eq!(doc.fields["sdp"], "v=0 theirs");
    assert_eq!(session.calls().phase().await, CallPhase::Idle);
}

// Starting a call while one is active is rejected instead of leaking
// the first attempt's capture.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_call_start_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let alice = client_on(store.clone());
    alice.restore_session(identity("u-alice", "alice@example.com"));
    let session = alice.create_room("standup", "").await.unwrap();

    session.calls().start_call(CallMedium::Audio).await.unwrap();
    let err = session.calls().start_call(CallMedium::Audio).await.unwrap_err();
    assert!(matches!(err, CallError::CallAlreadyActive));

    session.calls().hang_up().await;
}

// Declining leaves the offer unanswered: no rejection signal, record
// untouched, and accept afterwards reports nothing pending.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn decline_leaves_offer_unanswered() {
    let store = Arc::new(MemoryStore::new());
    let alice = client_on(store.clone());
    let bob = client_on(store.clone());

    alice.restore_session(identity("u-alice", "alice@example.com"));
    bob.restore_session(identity("u-bob", "bob@example.com"));

    let session_a = alice.create_room("standup", "").await.unwrap();
    let code = session_a.code().to_string();
    let session_b = bob.join_room(&code, "").await.unwrap();
    let mut bob_events = probe(&bob);

    session_a.calls().start_call(CallMedium::Audio).await.unwrap();
    expect_event(&mut bob_events, "incoming call", |e| {
        matches!(e, ClientEvent::IncomingCall { .. })
    })
    .await;

    session_b.calls().decline_incoming();
    assert!(!session_b.calls().has_pending_offer());
    assert!(matches!(
        session_b.calls().accept_incoming().await,
        Err(CallError::NoPendingOffer)
    ));

    // The offer is still sitting in the store, unanswered.
    let doc = store.get(&call_doc(&code)).await.unwrap().unwrap();
    assert_eq!(doc.fields["type"], "offer");

    session_a.calls().hang_up().await;
}
