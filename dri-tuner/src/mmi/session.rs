//! CA menu dialogue state machine.

use std::sync::Arc;

use log::{debug, info, trace, warn};

use dri_protocol::apdu::{
    self, decode_text, decode_text_field, encode_answer, encode_close, encode_enter_menu,
    encode_select, find_tag_lead, Apdu, MmiTag, ResponseType,
};
use dri_protocol::ProtocolError;

use crate::device::DeviceControl;
use crate::error::{Result, TunerError};
use crate::mmi::{Menu, MenuCallBack};

/// Menus never carry more choices than this.
pub const MAX_MENU_CHOICES: usize = 20;

/// Header bytes before the prompt text of an enquiry, counted from the
/// start of the payload.
const ENQUIRY_TEXT_OFFSET: usize = 4;

/// Bytes trimmed from the declared enquiry length when sizing the prompt.
const ENQUIRY_LENGTH_TRIM: usize = 2;

/// Where the dialogue stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Idle,
    MenuDisplayed,
    EnquiryPending,
}

/// What an inbound APDU did to the dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEvent {
    Closed {
        delay_seconds: u8,
    },
    InputRequested {
        password_mode: bool,
        expected_length: u8,
        prompt: String,
    },
    MenuShown(Menu),
    Ignored(u32),
}

impl MenuEvent {
    /// Replay this event to a presentation call back.
    pub fn notify(&self, call_back: &dyn MenuCallBack) {
        match self {
            MenuEvent::Closed { delay_seconds } => call_back.on_closed(*delay_seconds),
            MenuEvent::InputRequested {
                password_mode,
                expected_length,
                prompt,
            } => call_back.on_input_requested(*password_mode, *expected_length, prompt),
            MenuEvent::MenuShown(menu) => {
                call_back.on_menu_shown(
                    &menu.title,
                    &menu.subtitle,
                    &menu.footer,
                    menu.choices.len(),
                );
                for (index, choice) in menu.choices.iter().enumerate() {
                    call_back.on_choice_added(index, choice);
                }
            }
            MenuEvent::Ignored(_) => {}
        }
    }
}

/// One CA menu dialogue between the CableCARD and the presentation layer.
///
/// Not synchronised itself; the owner keeps it behind the one mutex that
/// both the event thread and user actions go through.
pub struct MenuSession {
    tuner_id: String,
    state: MenuState,
    call_back: Option<Arc<dyn MenuCallBack>>,
    device: Option<Arc<dyn DeviceControl>>,
    menu: Option<Menu>,
}

impl MenuSession {
    pub fn new(tuner_id: impl Into<String>) -> Self {
        Self {
            tuner_id: tuner_id.into(),
            state: MenuState::Idle,
            call_back: None,
            device: None,
            menu: None,
        }
    }

    pub fn state(&self) -> MenuState {
        self.state
    }

    /// The menu on screen, if any.
    pub fn menu(&self) -> Option<&Menu> {
        self.menu.as_ref()
    }

    pub fn set_call_back(&mut self, call_back: Option<Arc<dyn MenuCallBack>>) {
        self.call_back = call_back;
    }

    pub fn has_call_back(&self) -> bool {
        self.call_back.is_some()
    }

    /// Associate the device that outbound APDUs are sent to.
    pub fn attach(&mut self, device: Arc<dyn DeviceControl>) {
        self.device = Some(device);
    }

    /// Forget the device and any open dialogue.
    pub fn detach(&mut self) {
        self.device = None;
        self.reset();
    }

    fn reset(&mut self) {
        self.state = MenuState::Idle;
        self.menu = None;
    }

    /// The registered presentation call back.
    pub fn call_back(&self) -> Option<Arc<dyn MenuCallBack>> {
        self.call_back.clone()
    }

    /// Decode an APDU received from the CableCARD and notify the call back.
    ///
    /// A decode failure leaves the dialogue as it was.
    pub fn handle_apdu(&mut self, raw: &[u8]) -> Result<MenuEvent> {
        let event = self.apply_apdu(raw)?;
        match &self.call_back {
            Some(cb) => event.notify(cb.as_ref()),
            None => debug!("[Tuner {}] MMI event without a call back", self.tuner_id),
        }
        Ok(event)
    }

    /// Decode an APDU and update the dialogue without notifying anyone.
    pub fn apply_apdu(&mut self, raw: &[u8]) -> Result<MenuEvent> {
        for line in apdu::hex_dump(raw) {
            trace!("[Tuner {}] MMI {}", self.tuner_id, line);
        }

        let apdu = Apdu::parse(raw)?;
        debug!(
            "[Tuner {}] MMI tag 0x{:06X}, length {}, header {}",
            self.tuner_id, apdu.tag, apdu.length, apdu.header_len
        );

        let event = match apdu.mmi_tag() {
            Some(MmiTag::CloseMmi) => self.handle_close(&apdu)?,
            Some(MmiTag::Enquiry) => self.handle_enquiry(&apdu)?,
            Some(tag) if tag.is_menu() => self.handle_menu(&apdu)?,
            _ => {
                debug!(
                    "[Tuner {}] Ignoring MMI object with tag 0x{:06X}",
                    self.tuner_id, apdu.tag
                );
                MenuEvent::Ignored(apdu.tag)
            }
        };
        Ok(event)
    }

    fn handle_close(&mut self, apdu: &Apdu<'_>) -> Result<MenuEvent> {
        let command = apdu.payload_byte(0)?;
        let delay_seconds = if command != 0 {
            apdu.payload_byte(1)?
        } else {
            0
        };

        self.reset();
        debug!("[Tuner {}] Close menu, delay = {}", self.tuner_id, delay_seconds);
        Ok(MenuEvent::Closed { delay_seconds })
    }

    fn handle_enquiry(&mut self, apdu: &Apdu<'_>) -> Result<MenuEvent> {
        let password_mode = apdu.payload_byte(0)? & 0x01 != 0;
        let expected_length = apdu.payload_byte(1)?;

        // The prompt length trims the header size and two more bytes from
        // the declared length. Devices in the field rely on these offsets.
        let text_length = apdu
            .length
            .checked_sub(apdu.header_len + ENQUIRY_LENGTH_TRIM)
            .ok_or_else(|| ProtocolError::InvalidLength {
                offset: apdu::TAG_SIZE,
                reason: format!("enquiry length {} too short for a prompt", apdu.length),
            })?;
        let prompt = decode_text(
            apdu.bytes(),
            apdu.header_len + ENQUIRY_TEXT_OFFSET,
            text_length,
        )?;

        self.state = MenuState::EnquiryPending;
        debug!(
            "[Tuner {}] Request input: password = {}, length = {}, text = {}",
            self.tuner_id, password_mode, expected_length, prompt
        );
        Ok(MenuEvent::InputRequested {
            password_mode,
            expected_length,
            prompt,
        })
    }

    fn handle_menu(&mut self, apdu: &Apdu<'_>) -> Result<MenuEvent> {
        let raw = apdu.bytes();

        // The menu body starts at the next tag lead byte after the first
        // byte of the object, wherever that lands.
        let mut offset = find_tag_lead(raw, 1)?;
        debug!(
            "[Tuner {}] Menu body starts at offset {}",
            self.tuner_id, offset
        );

        let mut header = Vec::with_capacity(3);
        for _ in 0..3 {
            let (text, advance) = decode_text_field(raw, offset)?;
            header.push(text);
            offset += advance;
        }

        let mut choices = Vec::new();
        while choices.len() < MAX_MENU_CHOICES && offset < apdu.end() {
            let (text, advance) = decode_text_field(raw, offset)?;
            choices.push(text);
            offset += advance;
        }

        let mut header = header.into_iter();
        let menu = Menu {
            title: header.next().unwrap_or_default(),
            subtitle: header.next().unwrap_or_default(),
            footer: header.next().unwrap_or_default(),
            choices,
        };

        self.state = MenuState::MenuDisplayed;
        info!(
            "[Tuner {}] Menu {:?} with {} choices",
            self.tuner_id,
            menu.title,
            menu.choices.len()
        );
        for (index, choice) in menu.choices.iter().enumerate() {
            debug!("[Tuner {}]   {} : {}", self.tuner_id, index, choice);
        }
        self.menu = Some(menu.clone());
        Ok(MenuEvent::MenuShown(menu))
    }

    fn outbound_device(&self) -> Result<&Arc<dyn DeviceControl>> {
        if self.call_back.is_none() {
            warn!("[Tuner {}] CA menu action without a call back", self.tuner_id);
            return Err(TunerError::NoMenuCallBack);
        }
        self.device.as_ref().ok_or_else(|| {
            warn!("[Tuner {}] CA menu action while not loaded", self.tuner_id);
            TunerError::NotLoaded
        })
    }

    fn send(&self, apdu: &[u8]) -> Result<()> {
        let device = self.outbound_device()?;
        device.send_mmi(apdu).map_err(|e| {
            warn!("[Tuner {}] Failed to send MMI object: {}", self.tuner_id, e);
            TunerError::from(e)
        })
    }

    /// Ask the CableCARD to open its menu.
    pub fn enter_menu(&mut self) -> Result<()> {
        let device = self.outbound_device()?;
        match device.card_info() {
            Ok(info) => {
                debug!("[Tuner {}] CableCARD status        = {}", self.tuner_id, info.status);
                debug!("[Tuner {}]           manufacturer  = {}", self.tuner_id, info.manufacturer);
                debug!("[Tuner {}]           version       = {}", self.tuner_id, info.version);
                debug!("[Tuner {}]           time zone     = {}", self.tuner_id, info.time_zone);
                debug!("[Tuner {}]           DST           = {}", self.tuner_id, info.daylight_saving);
                debug!("[Tuner {}]           EA loc. code  = {}", self.tuner_id, info.ea_location_code);
                debug!("[Tuner {}]           rating region = {}", self.tuner_id, info.rating_region);
            }
            Err(e) => {
                warn!("[Tuner {}] Failed to read CableCARD status: {}", self.tuner_id, e);
                return Err(e.into());
            }
        }
        self.send(&encode_enter_menu())
    }

    /// Close the dialogue immediately.
    pub fn close(&mut self) -> Result<()> {
        debug!("[Tuner {}] Close menu", self.tuner_id);
        self.send(&encode_close())?;
        self.reset();
        Ok(())
    }

    /// Send the user's menu selection (0 means back).
    pub fn select_entry(&mut self, choice: u8) -> Result<()> {
        debug!("[Tuner {}] Select menu entry {}", self.tuner_id, choice);
        self.send(&encode_select(choice))
    }

    /// Send the user's answer to the pending enquiry.
    pub fn answer_enquiry(&mut self, cancel: bool, answer: &str) -> Result<()> {
        debug!(
            "[Tuner {}] Answer enquiry, cancel = {}, length = {}",
            self.tuner_id,
            cancel,
            answer.chars().count()
        );
        let apdu = encode_answer(ResponseType::from_cancel(cancel), answer)?;
        self.send(&apdu)
    }
}
