use std::sync::Mutex;

use crate::auth::Identity;
use crate::events::{ClientEvent, EventEmitter};

/// The three mutually exclusive screens of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    RoomList,
    Chat,
}

/// Maps application state to exactly one visible screen.
///
/// Transitions are synchronous and unqueued — a transition request
/// always wins over whatever was showing. `ScreenChanged` is emitted
/// once per actual change, never for a transition to the current
/// screen.
pub struct ScreenController {
    current: Mutex<Screen>,
    emitter: EventEmitter,
}

impl ScreenController {
    pub(crate) fn new(emitter: EventEmitter) -> Self {
        Self {
            current: Mutex::new(Screen::Login),
            emitter,
        }
    }

    pub fn current(&self) -> Screen {
        *self.current.lock().unwrap()
    }

    /// Show `screen`, hiding whatever was visible.
    pub fn show(&self, screen: Screen) {
        let changed = {
            let mut current = self.current.lock().unwrap();
            let changed = *current != screen;
            *current = screen;
            changed
        };
        if changed {
            tracing::debug!("screen -> {screen:?}");
            self.emitter.emit(ClientEvent::ScreenChanged(screen));
        }
    }

    /// Identity transitions drive Login <-> RoomList. A fresh sign-in
    /// always lands on the room list, never directly on Chat.
    pub(crate) fn apply_auth_state(&self, identity: Option<&Identity>) {
        match identity {
            Some(_) => {
                if self.current() == Screen::Login {
                    self.show(Screen::RoomList);
                }
            }
            None => self.show(Screen::Login),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::events::ClientEventListener;

    struct ScreenLog {
        screens: Arc<Mutex<Vec<Screen>>>,
    }

    impl ClientEventListener for ScreenLog {
        fn on_event(&self, event: ClientEvent) {
            if let ClientEvent::ScreenChanged(screen) = event {
                self.screens.lock().unwrap().push(screen);
            }
        }
    }

    fn identity() -> Identity {
        Identity {
            uid: "u1".into(),
            email: "alice@example.com".into(),
            id_token: "tok".into(),
        }
    }

    fn controller_with_log() -> (ScreenController, Arc<Mutex<Vec<Screen>>>) {
        let emitter = EventEmitter::new();
        let screens = Arc::new(Mutex::new(Vec::new()));
        emitter.add_listener(Arc::new(ScreenLog { screens: screens.clone() }));
        (ScreenController::new(emitter), screens)
    }

    #[test]
    fn starts_on_login() {
        let (controller, _) = controller_with_log();
        assert_eq!(controller.current(), Screen::Login);
    }

    #[test]
    fn sign_in_lands_on_room_list_exactly_once() {
        let (controller, screens) = controller_with_log();

        controller.apply_auth_state(Some(&identity()));

        assert_eq!(controller.current(), Screen::RoomList);
        // Exactly one transition, and never through Chat.
        assert_eq!(*screens.lock().unwrap(), vec![Screen::RoomList]);
    }

    #[test]
    fn sign_out_returns_to_login_from_anywhere() {
        let (controller, _) = controller_with_log();
        controller.show(Screen::Chat);

        controller.apply_auth_state(None);

        assert_eq!(controller.current(), Screen::Login);
    }

    #[test]
    fn auth_refresh_while_in_chat_does_not_yank_the_screen() {
        let (controller, _) = controller_with_log();
        controller.apply_auth_state(Some(&identity()));
        controller.show(Screen::Chat);

        // A repeated signed-in notification must not navigate away.
        controller.apply_auth_state(Some(&identity()));

        assert_eq!(controller.current(), Screen::Chat);
    }

    #[test]
    fn showing_the_current_screen_emits_nothing() {
        let (controller, screens) = controller_with_log();
        controller.show(Screen::Login);
        assert!(screens.lock().unwrap().is_empty());
    }
}
