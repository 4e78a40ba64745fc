use std::sync::Arc;

use crate::auth::Identity;
use crate::call::{CallMedium, CallPhase};
use crate::chat::Message;
use crate::media::TrackKind;
use crate::screen::Screen;

/// Events emitted by the core to embedding UI shells.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    AuthStateChanged(Option<Identity>),
    ScreenChanged(Screen),
    RoomJoined { code: String, name: String },
    RoomLeft { code: String },
    MessageReceived(Message),
    CallPhaseChanged(CallPhase),
    IncomingCall {
        medium: CallMedium,
        caller_uid: String,
        caller_name: String,
    },
    /// Local capture is live; shells can render the self-view.
    LocalStreamStarted { medium: CallMedium },
    /// First media of this kind arrived from the remote peer.
    RemoteTrackStarted { kind: TrackKind },
    CallEnded,
    /// An external-service failure surfaced to the user (the alert
    /// analogue). Never retried.
    ErrorSurfaced { message: String },
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait ClientEventListener: Send + Sync {
    fn on_event(&self, event: ClientEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn ClientEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ClientEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn emit(&self, event: ClientEvent) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl ClientEventListener for CountingListener {
        fn on_event(&self, _event: ClientEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn emitter_dispatches_to_listener() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        emitter.add_listener(Arc::new(CountingListener { count: count.clone() }));

        emitter.emit(ClientEvent::CallEnded);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emitter_dispatches_to_multiple_listeners() {
        let emitter = EventEmitter::new();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        emitter.add_listener(Arc::new(CountingListener { count: count1.clone() }));
        emitter.add_listener(Arc::new(CountingListener { count: count2.clone() }));

        emitter.emit(ClientEvent::CallEnded);

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    struct EventCapture {
        events: Arc<std::sync::Mutex<Vec<ClientEvent>>>,
    }

    impl ClientEventListener for EventCapture {
        fn on_event(&self, event: ClientEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn emitter_delivers_correct_events() {
        let emitter = EventEmitter::new();
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        emitter.add_listener(Arc::new(EventCapture { events: events.clone() }));

        emitter.emit(ClientEvent::RoomLeft { code: "ABCDE".into() });

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 1);
        match &captured[0] {
            ClientEvent::RoomLeft { code } => assert_eq!(code, "ABCDE"),
            _ => panic!("expected RoomLeft"),
        }
    }
}
