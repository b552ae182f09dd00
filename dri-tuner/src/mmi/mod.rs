//! CableCARD conditional-access menu.
//!
//! The dialogue state and the presentation call back sit behind one mutex
//! ([`SharedMenuSession`]); inbound APDU handling on the event thread and
//! user actions both lock it, so they never interleave. Call backs run after
//! the lock is released.

mod session;

pub use session::{MenuEvent, MenuSession, MenuState, MAX_MENU_CHOICES};

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use dri_protocol::CardStatus;

use crate::error::{Result, TunerError};
use crate::status::StatusTracker;

pub type SharedMenuSession = Arc<Mutex<MenuSession>>;

/// A decoded menu or list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Menu {
    pub title: String,
    pub subtitle: String,
    pub footer: String,
    pub choices: Vec<String>,
}

/// Presentation layer that renders the menu and collects user input.
///
/// Called without the session mutex held, so implementations may answer
/// through [`CaMenuActions`] from inside these methods.
pub trait MenuCallBack: Send + Sync {
    fn on_menu_shown(&self, title: &str, subtitle: &str, footer: &str, choice_count: usize);

    fn on_choice_added(&self, index: usize, text: &str);

    fn on_input_requested(&self, password_mode: bool, expected_length: u8, prompt: &str);

    fn on_closed(&self, delay_seconds: u8);
}

/// Apply an inbound APDU to a shared session, then notify the call back
/// once the lock is released.
pub fn dispatch_apdu(session: &SharedMenuSession, raw: &[u8]) -> Result<MenuEvent> {
    let (event, call_back) = {
        let mut guard = session.lock();
        let event = guard.apply_apdu(raw)?;
        (event, guard.call_back())
    };
    match &call_back {
        Some(cb) => event.notify(cb.as_ref()),
        None => debug!("MMI event without a call back: {:?}", event),
    }
    Ok(event)
}

/// User-initiated CA menu actions.
pub trait CaMenuActions: Send + Sync {
    fn set_menu_call_back(&self, call_back: Option<Arc<dyn MenuCallBack>>);

    fn enter_menu(&self) -> Result<()>;

    fn close_menu(&self) -> Result<()>;

    fn select_menu_entry(&self, choice: u8) -> Result<()>;

    fn answer_enquiry(&self, cancel: bool, answer: &str) -> Result<()>;
}

/// [`CaMenuActions`] for one tuner.
#[derive(Clone)]
pub struct CaMenuHandle {
    session: SharedMenuSession,
    status: Arc<StatusTracker>,
}

impl CaMenuHandle {
    pub fn new(session: SharedMenuSession, status: Arc<StatusTracker>) -> Self {
        Self { session, status }
    }
}

impl CaMenuActions for CaMenuHandle {
    fn set_menu_call_back(&self, call_back: Option<Arc<dyn MenuCallBack>>) {
        self.session.lock().set_call_back(call_back);
    }

    fn enter_menu(&self) -> Result<()> {
        let card = self.status.card_status();
        if card == CardStatus::Removed {
            warn!("Cannot enter CA menu, CableCARD status is {}", card);
            return Err(TunerError::CardUnavailable(card));
        }
        self.session.lock().enter_menu()
    }

    fn close_menu(&self) -> Result<()> {
        self.session.lock().close()
    }

    fn select_menu_entry(&self, choice: u8) -> Result<()> {
        self.session.lock().select_entry(choice)
    }

    fn answer_enquiry(&self, cancel: bool, answer: &str) -> Result<()> {
        self.session.lock().answer_enquiry(cancel, answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StateValue;
    use crate::status::VAR_CARD_STATUS;
    use crate::testing::{FakeDevice, RecordingCallBack, UiCall};

    fn handle() -> (CaMenuHandle, Arc<FakeDevice>) {
        let session = Arc::new(Mutex::new(MenuSession::new("t")));
        let device = Arc::new(FakeDevice::default());
        session.lock().attach(device.clone());
        let status = Arc::new(StatusTracker::new("t"));
        (CaMenuHandle::new(session, status), device)
    }

    #[test]
    fn test_enter_menu_requires_card() {
        let (handle, device) = handle();
        handle.set_menu_call_back(Some(Arc::new(RecordingCallBack::default())));
        handle
            .status
            .apply(VAR_CARD_STATUS, &StateValue::Text("Removed".into()));

        assert_eq!(
            handle.enter_menu(),
            Err(TunerError::CardUnavailable(CardStatus::Removed))
        );
        assert!(device.mmi_sent().is_empty());

        handle
            .status
            .apply(VAR_CARD_STATUS, &StateValue::Text("Inserted".into()));
        handle.enter_menu().unwrap();
        assert_eq!(device.mmi_sent().len(), 1);
    }

    #[test]
    fn test_actions_without_call_back() {
        let (handle, device) = handle();
        assert_eq!(handle.close_menu(), Err(TunerError::NoMenuCallBack));
        assert_eq!(handle.select_menu_entry(1), Err(TunerError::NoMenuCallBack));

        handle.set_menu_call_back(Some(Arc::new(RecordingCallBack::default())));
        handle.select_menu_entry(1).unwrap();
        handle.set_menu_call_back(None);
        assert_eq!(
            handle.answer_enquiry(false, "1"),
            Err(TunerError::NoMenuCallBack)
        );
        assert_eq!(device.mmi_sent().len(), 1);
    }

    /// Answers every menu by picking the first entry.
    struct SelectOnShow {
        handle: Mutex<Option<CaMenuHandle>>,
        inner: RecordingCallBack,
    }

    impl MenuCallBack for SelectOnShow {
        fn on_menu_shown(&self, title: &str, subtitle: &str, footer: &str, choice_count: usize) {
            self.inner.on_menu_shown(title, subtitle, footer, choice_count);
            if let Some(handle) = self.handle.lock().as_ref() {
                handle.select_menu_entry(1).unwrap();
            }
        }

        fn on_choice_added(&self, index: usize, text: &str) {
            self.inner.on_choice_added(index, text);
        }

        fn on_input_requested(&self, password_mode: bool, expected_length: u8, prompt: &str) {
            self.inner.on_input_requested(password_mode, expected_length, prompt);
        }

        fn on_closed(&self, delay_seconds: u8) {
            self.inner.on_closed(delay_seconds);
        }
    }

    fn menu_apdu(fields: &[&str]) -> Vec<u8> {
        let mut payload = vec![(fields.len() - 3) as u8];
        for f in fields {
            payload.extend_from_slice(&[0x9F, 0x88, 0x03, f.len() as u8]);
            payload.extend_from_slice(f.as_bytes());
        }
        let mut apdu = vec![0x9F, 0x88, 0x09, payload.len() as u8];
        apdu.extend(payload);
        apdu
    }

    #[test]
    fn test_call_back_may_answer_from_inside_notification() {
        let (handle, device) = handle();
        let cb = Arc::new(SelectOnShow {
            handle: Mutex::new(Some(handle.clone())),
            inner: RecordingCallBack::default(),
        });
        handle.set_menu_call_back(Some(cb.clone()));

        let event = dispatch_apdu(&handle.session, &menu_apdu(&["Main", "", "", "Setup"])).unwrap();
        assert!(matches!(event, MenuEvent::MenuShown(_)));
        assert_eq!(device.mmi_sent(), vec![vec![0x9F, 0x88, 0x0B, 0x01, 0x01]]);
        assert_eq!(
            cb.inner.calls(),
            vec![
                UiCall::MenuShown("Main".into(), "".into(), "".into(), 1),
                UiCall::ChoiceAdded(0, "Setup".into()),
            ]
        );
        // Break the handle -> call back -> handle cycle.
        cb.handle.lock().take();
    }
}
