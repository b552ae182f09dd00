//! Collaborator interfaces at the edge of the core.
//!
//! Discovery, the control-channel transport and the stream demultiplexer
//! live outside this crate. They are reached through the traits here so a
//! UPnP stack, a test double, or anything else can stand behind them.

use std::net::IpAddr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use dri_protocol::{
    CaptureMode, CardStatus, TransportAction, TransportState, TransportStatus, TunerModulation,
    TunerState,
};

use crate::error::{DeviceError, Result};
use crate::streaming::StreamLocator;

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

static CETON_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+\(([^\s]+)\)\s+Tuner\s+(\d+)").expect("static regex")
});
static GENERIC_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+([^\s]+)-(\d)$").expect("static regex"));

/// What discovery tells us about a tuner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub friendly_name: String,
    pub uuid: String,
    /// Local interface address the device was discovered on.
    pub local_address: IpAddr,
    /// Host part of the device's description location.
    pub server_host: String,
}

impl DeviceDescriptor {
    pub fn is_ceton(&self) -> bool {
        self.friendly_name.contains("Ceton")
    }

    /// Product and tuner instance ids encoded in the friendly name.
    ///
    /// Ceton: `Ceton InfiniTV PCIe (00-80-75-05) Tuner 1 (00-00-22-00-00-80-75-05)`.
    /// Others: `HDHomeRun Prime Tuner 1316890F-1`.
    pub fn instance_ids(&self) -> Option<(String, String)> {
        let re = if self.is_ceton() {
            &*CETON_NAME
        } else {
            &*GENERIC_NAME
        };
        let caps = re.captures(&self.friendly_name)?;
        Some((caps[1].to_string(), caps[2].to_string()))
    }
}

/// Identifiers returned when the device prepares an output connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionIds {
    pub connection_id: i32,
    pub av_transport_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportInfo {
    pub state: TransportState,
    pub status: TransportStatus,
}

/// Result of a frequency tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunerParameters {
    pub frequency_khz: u32,
    pub modulation: TunerModulation,
    pub locked: bool,
}

/// A signal reading from the primary tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunerReading {
    pub present: bool,
    pub frequency_khz: u32,
    pub modulation: TunerModulation,
    pub locked: bool,
    /// Raw level, roughly -25..25 dBmV.
    pub level: i32,
    pub snr: u32,
}

/// Status of the out-of-band forward data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdcStatus {
    pub bitrate_kbps: u32,
    pub locked: bool,
    pub frequency_khz: u32,
    pub spectrum_inversion: bool,
    pub pids: Vec<u16>,
}

/// CableCARD identity and location details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    pub status: CardStatus,
    pub manufacturer: String,
    pub version: String,
    pub daylight_saving: bool,
    pub ea_location_code: u32,
    pub rating_region: u8,
    pub time_zone: i32,
}

/// Value carried by an evented state variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateValue {
    Bool(bool),
    Text(String),
    Unsigned(u64),
    Binary(Vec<u8>),
    Null,
}

impl StateValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            StateValue::Unsigned(n) => Some(*n != 0),
            StateValue::Text(s) => match s.trim() {
                "1" | "true" | "True" | "TRUE" => Some(true),
                "0" | "false" | "False" | "FALSE" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            StateValue::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateValue::Bool(b) => write!(f, "{}", b),
            StateValue::Text(s) => f.write_str(s),
            StateValue::Unsigned(n) => write!(f, "{}", n),
            StateValue::Binary(b) => write!(f, "[{} bytes]", b.len()),
            StateValue::Null => f.write_str("[null]"),
        }
    }
}

/// Receiver of pushed device events. Called on the event-delivery thread.
pub trait StateVariableListener: Send + Sync {
    fn on_state_variable_changed(&self, service: &str, name: &str, value: &StateValue);

    fn on_event_subscription_failed(&self, service: &str, code: u32, description: &str);
}

/// Request/response calls on a connected device.
pub trait DeviceControl: Send + Sync {
    fn subscribe(&self, listener: Arc<dyn StateVariableListener>) -> DeviceResult<()>;

    fn prepare_for_connection(&self) -> DeviceResult<ConnectionIds>;

    fn connection_complete(&self, connection_id: i32) -> DeviceResult<()>;

    fn current_transport_actions(
        &self,
        av_transport_id: u32,
    ) -> DeviceResult<Vec<TransportAction>>;

    /// URI of the media the transport currently serves; the RTSP server URI.
    fn current_uri(&self, av_transport_id: u32) -> DeviceResult<String>;

    fn transport_info(&self, av_transport_id: u32) -> DeviceResult<TransportInfo>;

    fn stop(&self, av_transport_id: u32) -> DeviceResult<()>;

    fn pause(&self, av_transport_id: u32) -> DeviceResult<()>;

    fn play(&self, av_transport_id: u32, speed: &str) -> DeviceResult<()>;

    /// CableCARD tune by virtual channel number or source id (zero when unused).
    /// Returns the lock indicator.
    fn set_channel(
        &self,
        channel_number: u32,
        source_id: u32,
        mode: CaptureMode,
    ) -> DeviceResult<bool>;

    fn set_tuner_parameters(
        &self,
        frequency_khz: u32,
        modulations: &[TunerModulation],
    ) -> DeviceResult<TunerParameters>;

    fn tuner_parameters(&self) -> DeviceResult<TunerReading>;

    fn fdc_status(&self) -> DeviceResult<FdcStatus>;

    fn diag_parameter(&self, name: &str) -> DeviceResult<String>;

    fn card_info(&self) -> DeviceResult<CardInfo>;

    /// Deliver an MMI APDU to the CableCARD.
    fn send_mmi(&self, apdu: &[u8]) -> DeviceResult<()>;

    fn disconnect(&self);
}

/// Opens control connections to discovered devices.
pub trait DeviceConnector: Send + Sync {
    fn connect(
        &self,
        descriptor: &DeviceDescriptor,
        keep_alive: bool,
    ) -> DeviceResult<Arc<dyn DeviceControl>>;
}

/// The internal tuner that receives and demultiplexes the RTP stream.
pub trait StreamTuner: Send {
    fn load(&mut self) -> Result<()>;

    fn unload(&mut self);

    fn set_state(&mut self, state: TunerState) -> Result<()>;

    /// Bind to the delivery locator produced by a streaming session.
    fn tune(&mut self, locator: &StreamLocator) -> Result<()>;
}
