//! In-memory stand-ins for the device, RTSP server and stream tuner.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use dri_protocol::{
    CaptureMode, CardStatus, RtspRequest, RtspResponse, TransportAction, TransportState,
    TransportStatus, TunerModulation, TunerState,
};

use crate::device::{
    CardInfo, ConnectionIds, DeviceConnector, DeviceControl, DeviceDescriptor, DeviceResult,
    FdcStatus, StateValue, StateVariableListener, StreamTuner, TransportInfo, TunerParameters,
    TunerReading,
};
use crate::error::{DeviceError, Result, TunerError};
use crate::mmi::MenuCallBack;
use crate::streaming::{PortInventory, RtspConnector, RtspExchange, StreamLocator};

pub const SERVICE: &str = "urn:opencable-com:serviceId:urn:schemas-opencable-com:service:Tuner";

struct DeviceState {
    calls: Vec<String>,
    mmi_sent: Vec<Vec<u8>>,
    listener: Option<Arc<dyn StateVariableListener>>,
    transport_state: TransportState,
    failures: HashMap<String, DeviceError>,
    fdc_locked: bool,
    reading: TunerReading,
    diag: HashMap<String, String>,
}

/// Scripted device. Every call is logged by name.
pub struct FakeDevice {
    state: Mutex<DeviceState>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self {
            state: Mutex::new(DeviceState {
                calls: Vec::new(),
                mmi_sent: Vec::new(),
                listener: None,
                transport_state: TransportState::Stopped,
                failures: HashMap::new(),
                fdc_locked: true,
                reading: TunerReading {
                    present: true,
                    frequency_khz: 603_000,
                    modulation: TunerModulation::Qam256,
                    locked: true,
                    level: 0,
                    snr: 0,
                },
                diag: HashMap::new(),
            }),
        }
    }
}

impl FakeDevice {
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn mmi_sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().mmi_sent.clone()
    }

    pub fn has_listener(&self) -> bool {
        self.state.lock().listener.is_some()
    }

    /// Make every later call of `method` fail with `err`.
    pub fn fail_on(&self, method: &str, err: DeviceError) {
        self.state.lock().failures.insert(method.to_string(), err);
    }

    pub fn set_transport_state(&self, state: TransportState) {
        self.state.lock().transport_state = state;
    }

    pub fn set_fdc_locked(&self, locked: bool) {
        self.state.lock().fdc_locked = locked;
    }

    pub fn set_reading(&self, level: i32, snr: u32) {
        let mut state = self.state.lock();
        state.reading.level = level;
        state.reading.snr = snr;
    }

    pub fn set_diag(&self, name: &str, value: &str) {
        self.state
            .lock()
            .diag
            .insert(name.to_string(), value.to_string());
    }

    /// Deliver an evented variable to the subscribed listener.
    pub fn emit(&self, name: &str, value: StateValue) {
        let listener = self.state.lock().listener.clone();
        if let Some(listener) = listener {
            listener.on_state_variable_changed(SERVICE, name, &value);
        }
    }

    fn record(&self, call: String, method: &str) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.failures.get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl DeviceControl for FakeDevice {
    fn subscribe(&self, listener: Arc<dyn StateVariableListener>) -> DeviceResult<()> {
        self.record("subscribe".into(), "subscribe")?;
        self.state.lock().listener = Some(listener);
        Ok(())
    }

    fn prepare_for_connection(&self) -> DeviceResult<ConnectionIds> {
        self.record("prepare_for_connection".into(), "prepare_for_connection")?;
        Ok(ConnectionIds {
            connection_id: 1,
            av_transport_id: 1,
        })
    }

    fn connection_complete(&self, _connection_id: i32) -> DeviceResult<()> {
        self.record("connection_complete".into(), "connection_complete")
    }

    fn current_transport_actions(&self, _av: u32) -> DeviceResult<Vec<TransportAction>> {
        self.record("current_transport_actions".into(), "current_transport_actions")?;
        Ok(vec![
            TransportAction::Play,
            TransportAction::Stop,
            TransportAction::Pause,
        ])
    }

    fn current_uri(&self, _av: u32) -> DeviceResult<String> {
        self.record("current_uri".into(), "current_uri")?;
        Ok("rtsp://192.168.1.20:554/cablecard".to_string())
    }

    fn transport_info(&self, _av: u32) -> DeviceResult<TransportInfo> {
        self.record("transport_info".into(), "transport_info")?;
        Ok(TransportInfo {
            state: self.state.lock().transport_state,
            status: TransportStatus::Ok,
        })
    }

    fn stop(&self, _av: u32) -> DeviceResult<()> {
        self.record("stop".into(), "stop")?;
        self.state.lock().transport_state = TransportState::Stopped;
        Ok(())
    }

    fn pause(&self, _av: u32) -> DeviceResult<()> {
        self.record("pause".into(), "pause")?;
        self.state.lock().transport_state = TransportState::Paused;
        Ok(())
    }

    fn play(&self, _av: u32, _speed: &str) -> DeviceResult<()> {
        self.record("play".into(), "play")?;
        self.state.lock().transport_state = TransportState::Playing;
        Ok(())
    }

    fn set_channel(&self, channel: u32, source_id: u32, _mode: CaptureMode) -> DeviceResult<bool> {
        self.record(format!("set_channel {} {}", channel, source_id), "set_channel")?;
        Ok(true)
    }

    fn set_tuner_parameters(
        &self,
        frequency_khz: u32,
        modulations: &[TunerModulation],
    ) -> DeviceResult<TunerParameters> {
        self.record(
            format!("set_tuner_parameters {} {:?}", frequency_khz, modulations),
            "set_tuner_parameters",
        )?;
        Ok(TunerParameters {
            frequency_khz,
            modulation: modulations.first().copied().unwrap_or(TunerModulation::All),
            locked: true,
        })
    }

    fn tuner_parameters(&self) -> DeviceResult<TunerReading> {
        self.record("tuner_parameters".into(), "tuner_parameters")?;
        Ok(self.state.lock().reading)
    }

    fn fdc_status(&self) -> DeviceResult<FdcStatus> {
        self.record("fdc_status".into(), "fdc_status")?;
        Ok(FdcStatus {
            bitrate_kbps: 2048,
            locked: self.state.lock().fdc_locked,
            frequency_khz: 75_250,
            spectrum_inversion: false,
            pids: vec![0x1FFC],
        })
    }

    fn diag_parameter(&self, name: &str) -> DeviceResult<String> {
        self.record(format!("diag_parameter {}", name), "diag_parameter")?;
        Ok(self.state.lock().diag.get(name).cloned().unwrap_or_default())
    }

    fn card_info(&self) -> DeviceResult<CardInfo> {
        self.record("card_info".into(), "card_info")?;
        Ok(CardInfo {
            status: CardStatus::Inserted,
            manufacturer: "Cisco".to_string(),
            version: "1.0".to_string(),
            daylight_saving: false,
            ea_location_code: 0,
            rating_region: 1,
            time_zone: -8,
        })
    }

    fn send_mmi(&self, apdu: &[u8]) -> DeviceResult<()> {
        self.record("send_mmi".into(), "send_mmi")?;
        self.state.lock().mmi_sent.push(apdu.to_vec());
        Ok(())
    }

    fn disconnect(&self) {
        self.state.lock().calls.push("disconnect".into());
    }
}

/// Hands out one shared [`FakeDevice`].
pub struct FakeConnector {
    device: Arc<FakeDevice>,
    keep_alive: Mutex<Option<bool>>,
}

impl FakeConnector {
    pub fn new(device: Arc<FakeDevice>) -> Self {
        Self {
            device,
            keep_alive: Mutex::new(None),
        }
    }

    /// Keep-alive flag of the last connect.
    pub fn keep_alive(&self) -> Option<bool> {
        *self.keep_alive.lock()
    }
}

impl DeviceConnector for FakeConnector {
    fn connect(
        &self,
        _descriptor: &DeviceDescriptor,
        keep_alive: bool,
    ) -> DeviceResult<Arc<dyn DeviceControl>> {
        *self.keep_alive.lock() = Some(keep_alive);
        Ok(self.device.clone())
    }
}

#[derive(Default)]
struct StreamTunerState {
    loaded: bool,
    tuned: Vec<StreamLocator>,
    states: Vec<TunerState>,
    fail_load: bool,
    fail_set_state: bool,
}

/// Stream tuner that records what it was asked to do. Clones share state.
#[derive(Clone, Default)]
pub struct FakeStreamTuner {
    inner: Arc<Mutex<StreamTunerState>>,
}

impl FakeStreamTuner {
    pub fn tuned(&self) -> Vec<StreamLocator> {
        self.inner.lock().tuned.clone()
    }

    pub fn states(&self) -> Vec<TunerState> {
        self.inner.lock().states.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.lock().loaded
    }

    pub fn fail_load(&self, fail: bool) {
        self.inner.lock().fail_load = fail;
    }

    pub fn fail_set_state(&self, fail: bool) {
        self.inner.lock().fail_set_state = fail;
    }
}

impl StreamTuner for FakeStreamTuner {
    fn load(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_load {
            return Err(TunerError::StreamTuner("load failed".into()));
        }
        inner.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.inner.lock().loaded = false;
    }

    fn set_state(&mut self, state: TunerState) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_set_state {
            return Err(TunerError::StreamTuner(format!("cannot enter {}", state)));
        }
        inner.states.push(state);
        Ok(())
    }

    fn tune(&mut self, locator: &StreamLocator) -> Result<()> {
        self.inner.lock().tuned.push(locator.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RtspState {
    queue: VecDeque<RtspResponse>,
    sent: Vec<RtspRequest>,
    connects: usize,
    fail_connect: bool,
}

/// RTSP server answering from a queue. Clones share state.
#[derive(Clone, Default)]
pub struct FakeRtsp {
    inner: Arc<Mutex<RtspState>>,
}

impl FakeRtsp {
    pub fn response(status: u16, headers: Vec<(String, String)>) -> RtspResponse {
        RtspResponse {
            status,
            reason: if status == 200 { "OK" } else { "Error" }.to_string(),
            headers,
            body: Bytes::new(),
        }
    }

    pub fn queue(&self, response: RtspResponse) {
        self.inner.lock().queue.push_back(response);
    }

    pub fn sent(&self) -> Vec<RtspRequest> {
        self.inner.lock().sent.clone()
    }

    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }

    pub fn fail_connect(&self) {
        self.inner.lock().fail_connect = true;
    }
}

impl RtspExchange for FakeRtsp {
    fn send(&mut self, request: RtspRequest) -> Result<RtspResponse> {
        let mut inner = self.inner.lock();
        inner.sent.push(request);
        inner
            .queue
            .pop_front()
            .ok_or_else(|| TunerError::Internal("no scripted RTSP response".into()))
    }
}

impl RtspConnector for FakeRtsp {
    fn connect(&self, _server_uri: &str) -> Result<Box<dyn RtspExchange>> {
        let mut inner = self.inner.lock();
        if inner.fail_connect {
            return Err(TunerError::Internal("connection refused".into()));
        }
        inner.connects += 1;
        Ok(Box::new(self.clone()))
    }
}

/// Fixed set of bound local ports.
pub struct FixedPorts(pub Vec<u16>);

impl PortInventory for FixedPorts {
    fn bound_ports(&self) -> Result<HashSet<u16>> {
        Ok(self.0.iter().copied().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCall {
    MenuShown(String, String, String, usize),
    ChoiceAdded(usize, String),
    InputRequested(bool, u8, String),
    Closed(u8),
}

/// Menu call back that records every notification.
#[derive(Default)]
pub struct RecordingCallBack {
    calls: Mutex<Vec<UiCall>>,
}

impl RecordingCallBack {
    pub fn calls(&self) -> Vec<UiCall> {
        self.calls.lock().clone()
    }
}

impl MenuCallBack for RecordingCallBack {
    fn on_menu_shown(&self, title: &str, subtitle: &str, footer: &str, choice_count: usize) {
        self.calls.lock().push(UiCall::MenuShown(
            title.into(),
            subtitle.into(),
            footer.into(),
            choice_count,
        ));
    }

    fn on_choice_added(&self, index: usize, text: &str) {
        self.calls.lock().push(UiCall::ChoiceAdded(index, text.into()));
    }

    fn on_input_requested(&self, password_mode: bool, expected_length: u8, prompt: &str) {
        self.calls
            .lock()
            .push(UiCall::InputRequested(password_mode, expected_length, prompt.into()));
    }

    fn on_closed(&self, delay_seconds: u8) {
        self.calls.lock().push(UiCall::Closed(delay_seconds));
    }
}
