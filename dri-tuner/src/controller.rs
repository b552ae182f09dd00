//! Tuner session control for DRI CableCARD tuners.
//!
//! [`DriTuner`] owns the device connection, drives the AV transport and
//! the RTSP session as the requested [`TunerState`] changes, and tunes
//! channels through the CableCARD or by frequency. Device events are fed
//! to the [`StatusTracker`] and the CA [`MenuSession`].

use std::sync::Arc;

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use dri_protocol::{
    CaptureMode, CardStatus, TransportAction, TransportState, TransportStatus, TunerState,
};

use crate::channel::{Channel, TuningMethod, TuningRequest};
use crate::config::DriConfig;
use crate::device::{
    ConnectionIds, DeviceConnector, DeviceControl, DeviceDescriptor, StateValue,
    StateVariableListener, StreamTuner,
};
use crate::error::{Result, TunerError};
use crate::mmi::{dispatch_apdu, CaMenuActions, CaMenuHandle, MenuSession, SharedMenuSession};
use crate::status::{StatusTracker, VAR_LOCK, VAR_MMI_MESSAGE, VAR_PCR_LOCK};
use crate::streaming::{PortInventory, RtspConnector, StreamingSession};

/// Ceton diagnostic parameter carrying the out-of-band signal level.
pub const DIAG_OOB_SIGNAL_LEVEL: &str = "OobSignalLevel";
/// Ceton diagnostic parameter carrying the out-of-band SNR.
pub const DIAG_OOB_SNR: &str = "OobSnr";

static SIGNAL_FIGURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(\.\d+)?)[^\d]").expect("static regex"));

/// Leading decimal number of a diagnostic reading such as `"0.8 dBmV"`.
fn parse_signal_figure(value: &str) -> Option<f64> {
    SIGNAL_FIGURE
        .captures(value)
        .and_then(|caps| caps[1].parse().ok())
}

/// What a tuner implementation can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunerCapabilities {
    pub can_pause: bool,
    /// One program per tuner for DRI devices.
    pub supports_sub_channels: bool,
    pub has_ca_menu: bool,
}

/// Operations every tuner family offers.
pub trait Tuner: Send {
    fn tune(&mut self, channel: &Channel) -> Result<()>;

    fn set_state(&mut self, state: TunerState) -> Result<()>;

    /// Refresh signal figures. Errors are logged, never returned.
    fn perform_signal_status_update(&mut self, only_lock: bool);

    fn capabilities(&self) -> TunerCapabilities;

    /// CA menu actions, for tuners with a CableCARD or CAM.
    fn ca_menu(&self) -> Option<Arc<dyn CaMenuActions>> {
        None
    }
}

/// Receives device events on the event-delivery thread.
struct EventSink {
    tuner_id: String,
    status: Arc<StatusTracker>,
    menu: SharedMenuSession,
}

impl StateVariableListener for EventSink {
    fn on_state_variable_changed(&self, service: &str, name: &str, value: &StateValue) {
        match name {
            VAR_MMI_MESSAGE => match value.as_binary() {
                Some(apdu) => {
                    if let Err(e) = dispatch_apdu(&self.menu, apdu) {
                        warn!("[Tuner {}] Failed to handle MMI message: {}", self.tuner_id, e);
                    }
                }
                None => warn!(
                    "[Tuner {}] MMI message is not binary: {}",
                    self.tuner_id, value
                ),
            },
            VAR_PCR_LOCK | VAR_LOCK => {
                if value.as_bool() == Some(false) && !self.status.is_scanning() {
                    info!("[Tuner {}] {} update, not locked", self.tuner_id, name);
                }
                self.status.apply(name, value);
            }
            _ => {
                if !self.status.apply(name, value) {
                    debug!(
                        "[Tuner {}] State variable {} for service {} is {}",
                        self.tuner_id,
                        name,
                        unqualified_service(service),
                        value
                    );
                }
            }
        }
    }

    fn on_event_subscription_failed(&self, service: &str, code: u32, description: &str) {
        error!(
            "[Tuner {}] Failed to subscribe to state variable events for service {}, code = {}, description = {}",
            self.tuner_id,
            unqualified_service(service),
            code,
            description
        );
    }
}

/// `urn:schemas-opencable-com:serviceId:urn:...:CAS` -> `CAS`.
fn unqualified_service(service: &str) -> &str {
    service.rsplit(':').next().unwrap_or(service)
}

/// Resources held while loaded.
struct LoadedDevice {
    device: Arc<dyn DeviceControl>,
    ids: ConnectionIds,
    server_uri: String,
    streaming: StreamingSession,
}

/// A DRI CableCARD tuner.
pub struct DriTuner {
    tuner_id: String,
    descriptor: DeviceDescriptor,
    config: DriConfig,
    connector: Arc<dyn DeviceConnector>,
    rtsp: Arc<dyn RtspConnector>,
    ports: Arc<dyn PortInventory>,
    stream_tuner: Box<dyn StreamTuner>,
    status: Arc<StatusTracker>,
    menu: SharedMenuSession,
    loaded: Option<LoadedDevice>,
    state: TunerState,
    transport_state: TransportState,
    got_control: bool,
    can_pause: bool,
    current_channel: Option<Channel>,
    current_frequency: Option<u32>,
}

impl DriTuner {
    pub fn new(
        descriptor: DeviceDescriptor,
        config: DriConfig,
        connector: Arc<dyn DeviceConnector>,
        rtsp: Arc<dyn RtspConnector>,
        ports: Arc<dyn PortInventory>,
        stream_tuner: Box<dyn StreamTuner>,
    ) -> Self {
        let tuner_id = match descriptor.instance_ids() {
            Some((product, tuner)) => format!("{}/{}", product, tuner),
            None => descriptor.friendly_name.clone(),
        };
        Self {
            status: Arc::new(StatusTracker::new(tuner_id.clone())),
            menu: Arc::new(Mutex::new(MenuSession::new(tuner_id.clone()))),
            tuner_id,
            descriptor,
            config,
            connector,
            rtsp,
            ports,
            stream_tuner,
            loaded: None,
            state: TunerState::Stopped,
            transport_state: TransportState::Stopped,
            got_control: false,
            can_pause: false,
            current_channel: None,
            current_frequency: None,
        }
    }

    pub fn tuner_id(&self) -> &str {
        &self.tuner_id
    }

    pub fn state(&self) -> TunerState {
        self.state
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport_state
    }

    /// Whether this client currently owns the device transport.
    pub fn has_control(&self) -> bool {
        self.got_control
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn status(&self) -> &Arc<StatusTracker> {
        &self.status
    }

    pub fn current_channel(&self) -> Option<&Channel> {
        self.current_channel.as_ref()
    }

    /// Frequency reported by the first signal reading after a tune.
    pub fn current_frequency(&self) -> Option<u32> {
        self.current_frequency
    }

    pub fn streaming_session_id(&self) -> Option<&str> {
        self.loaded.as_ref().and_then(|l| l.streaming.session_id())
    }

    /// Mark an out-of-band channel scan as running or finished.
    pub fn set_scanning(&self, scanning: bool) {
        self.status.set_scanning(scanning);
    }

    fn is_scanning_out_of_band(&self) -> bool {
        self.status.is_scanning()
            && matches!(
                self.current_channel.as_ref().and_then(Channel::as_atsc),
                Some(ch) if ch.is_scan_placeholder()
            )
    }

    /// Connect to the device and acquire everything the tuner needs.
    ///
    /// On failure whatever was acquired is released again and the tuner
    /// stays unloaded.
    pub fn load(&mut self) -> Result<()> {
        if self.loaded.is_some() {
            debug!("[Tuner {}] Already loaded", self.tuner_id);
            return Ok(());
        }
        debug!("[Tuner {}] Perform loading", self.tuner_id);

        let keep_alive = self.config.device.keep_alive && !self.descriptor.is_ceton();
        info!(
            "[Tuner {}] Connect to device {}, keep-alive = {}",
            self.tuner_id, self.descriptor.friendly_name, keep_alive
        );
        let device = self.connector.connect(&self.descriptor, keep_alive)?;

        let sink = Arc::new(EventSink {
            tuner_id: self.tuner_id.clone(),
            status: Arc::clone(&self.status),
            menu: Arc::clone(&self.menu),
        });
        let ids = match device
            .subscribe(sink)
            .and_then(|_| device.prepare_for_connection())
        {
            Ok(ids) => ids,
            Err(e) => {
                error!("[Tuner {}] Failed to set up device services: {}", self.tuner_id, e);
                device.disconnect();
                return Err(e.into());
            }
        };
        debug!(
            "[Tuner {}] PrepareForConnection, connection ID = {}, AV transport ID = {}",
            self.tuner_id, ids.connection_id, ids.av_transport_id
        );

        let server_uri = match self
            .read_device_info(device.as_ref(), ids)
            .and_then(|uri| self.stream_tuner.load().map(|_| uri))
        {
            Ok(uri) => uri,
            Err(e) => {
                error!("[Tuner {}] Failed to load: {}", self.tuner_id, e);
                self.release(device.as_ref(), ids);
                return Err(e);
            }
        };

        self.menu.lock().attach(Arc::clone(&device));
        let streaming = StreamingSession::new(
            self.tuner_id.clone(),
            self.descriptor.server_host.clone(),
            self.descriptor.local_address,
            self.config.streaming.clone(),
            Arc::clone(&self.rtsp),
            Arc::clone(&self.ports),
        );
        self.loaded = Some(LoadedDevice {
            device,
            ids,
            server_uri,
            streaming,
        });
        info!("[Tuner {}] Loaded", self.tuner_id);
        Ok(())
    }

    /// Read pause support and the RTSP server URI.
    fn read_device_info(&mut self, device: &dyn DeviceControl, ids: ConnectionIds) -> Result<String> {
        let actions = device.current_transport_actions(ids.av_transport_id)?;
        debug!(
            "[Tuner {}] Supported AV transport actions = {:?}",
            self.tuner_id, actions
        );
        self.can_pause = actions.contains(&TransportAction::Pause);

        let uri = device.current_uri(ids.av_transport_id)?;
        debug!("[Tuner {}] Current URI = {}", self.tuner_id, uri);
        Ok(uri)
    }

    fn release(&self, device: &dyn DeviceControl, ids: ConnectionIds) {
        // Fails when the device is unreachable; nothing more to do then.
        if let Err(e) = device.connection_complete(ids.connection_id) {
            warn!(
                "[Tuner {}] Failed to complete connection manager connection: {}",
                self.tuner_id, e
            );
        }
        device.disconnect();
    }

    /// Release the device. Never fails.
    pub fn unload(&mut self) {
        let Some(mut loaded) = self.loaded.take() else {
            return;
        };
        debug!("[Tuner {}] Perform unloading", self.tuner_id);

        if let Err(e) = loaded.streaming.stop() {
            warn!("[Tuner {}] Failed to stop streaming: {}", self.tuner_id, e);
        }
        self.menu.lock().detach();
        self.release(loaded.device.as_ref(), loaded.ids);
        self.stream_tuner.unload();

        self.state = TunerState::Stopped;
        self.transport_state = TransportState::Stopped;
        self.got_control = false;
        info!("[Tuner {}] Unloaded", self.tuner_id);
    }

    /// Move the device transport, the RTSP session and the stream tuner to
    /// `target`.
    ///
    /// If any step fails the transport and session are returned to the
    /// state they were in before the call, then the error is returned.
    pub fn set_state(&mut self, target: TunerState) -> Result<()> {
        debug!(
            "[Tuner {}] Set tuner state, current state = {}, requested state = {}",
            self.tuner_id, self.state, target
        );
        if target == self.state {
            debug!("[Tuner {}] Tuner already in required state", self.tuner_id);
            return Ok(());
        }
        // Out-of-band scans read the forward data channel; nothing streams.
        if self.is_scanning_out_of_band() {
            debug!(
                "[Tuner {}] Scanning out-of-band, state change skipped",
                self.tuner_id
            );
            return Ok(());
        }

        let previous = self.state;
        let held_control = self.got_control;
        let result = if held_control {
            self.drive_transport(target)
        } else {
            Ok(())
        }
        .and_then(|_| self.stream_tuner.set_state(target));

        if let Err(e) = result {
            debug!(
                "[Tuner {}] Failed to set state {}, reverting to {}: {}",
                self.tuner_id, target, previous, e
            );
            if held_control {
                if let Err(revert) = self.drive_transport(previous) {
                    warn!(
                        "[Tuner {}] Failed to revert to {}: {}",
                        self.tuner_id, previous, revert
                    );
                }
            }
            if self.transport_state == TransportState::Stopped {
                self.got_control = false;
            }
            return Err(e);
        }

        if self.transport_state == TransportState::Stopped {
            self.got_control = false;
        }
        self.state = target;
        Ok(())
    }

    /// Issue the transport command for `target` and start or stop the RTSP
    /// session to match. A failed stop or teardown is only logged.
    fn drive_transport(&mut self, target: TunerState) -> Result<()> {
        let Some(loaded) = self.loaded.as_mut() else {
            return Ok(());
        };
        let av = loaded.ids.av_transport_id;

        match target {
            TunerState::Stopped | TunerState::Paused => {
                if target == TunerState::Stopped {
                    loaded.device.stop(av)?;
                } else {
                    loaded.device.pause(av)?;
                }
                self.transport_state = target.transport_state();
                if let Err(e) = loaded.streaming.stop() {
                    warn!("[Tuner {}] Failed to stop streaming: {}", self.tuner_id, e);
                }
            }
            TunerState::Started => {
                loaded.device.play(av, &self.config.device.play_speed)?;
                self.transport_state = TransportState::Playing;
                loaded
                    .streaming
                    .start(&loaded.server_uri, self.stream_tuner.as_mut())?;
            }
        }
        Ok(())
    }

    /// Stop the tuner. The tuned channel is remembered; the device rejects
    /// a tune to the channel it is already on.
    pub fn stop(&mut self) -> Result<()> {
        self.set_state(TunerState::Stopped)
    }

    /// Tune `channel`.
    ///
    /// Encrypted channels and out-of-band scans need an inserted CableCARD.
    /// A scan only checks that the out-of-band tuner is locked.
    pub fn perform_tuning(&mut self, channel: &Channel) -> Result<()> {
        debug!("[Tuner {}] Perform tuning, {}", self.tuner_id, channel.describe());
        let atsc = channel
            .as_atsc()
            .ok_or_else(|| TunerError::IncompatibleChannel(channel.describe()))?;
        let device = match &self.loaded {
            Some(loaded) => Arc::clone(&loaded.device),
            None => return Err(TunerError::NotLoaded),
        };

        let scanning = self.status.is_scanning();
        if !atsc.free_to_air || (scanning && atsc.is_scan_placeholder()) {
            let card = self.status.card_status();
            if card != CardStatus::Inserted {
                return Err(TunerError::CardUnavailable(card));
            }

            if scanning {
                debug!("[Tuner {}] Check out-of-band tuner lock", self.tuner_id);
                let fdc = device.fdc_status()?;
                self.status.record_lock(fdc.locked);
                if !fdc.locked {
                    return Err(TunerError::NoSignal(
                        "out-of-band tuner not locked".to_string(),
                    ));
                }
                debug!("[Tuner {}]   frequency = {} kHz", self.tuner_id, fdc.frequency_khz);
                debug!("[Tuner {}]   bitrate   = {} kbps", self.tuner_id, fdc.bitrate_kbps);
                debug!("[Tuner {}]   PIDs      = {:?}", self.tuner_id, fdc.pids);
                self.current_channel = Some(channel.clone());
                return Ok(());
            }
        }

        let request = TuningRequest::for_channel(atsc)?;
        if self.is_tuner_in_use(device.as_ref())? {
            return Err(TunerError::TunerInUse);
        }
        self.got_control = true;
        self.current_frequency = None;
        self.status.clear_signal();

        let outcome = match &request.method {
            TuningMethod::ByChannelNumber(number) => {
                debug!("[Tuner {}] Tuning by channel number {}", self.tuner_id, number);
                device.set_channel(*number, 0, CaptureMode::Live)
            }
            TuningMethod::BySourceId(source_id) => {
                debug!("[Tuner {}] Tuning by source ID {}", self.tuner_id, source_id);
                device.set_channel(0, *source_id, CaptureMode::Live)
            }
            TuningMethod::ByFrequency {
                frequency_khz,
                modulations,
            } => {
                debug!(
                    "[Tuner {}] Tuning by frequency {} kHz, {:?}",
                    self.tuner_id, frequency_khz, modulations
                );
                device
                    .set_tuner_parameters(*frequency_khz, modulations)
                    .map(|p| p.locked)
            }
        };

        match outcome {
            Ok(locked) => {
                self.status.record_lock(locked);
                self.current_channel = Some(channel.clone());
                Ok(())
            }
            Err(e) => {
                if e.is_tuner_in_use() {
                    info!(
                        "[Tuner {}] Some other application or device is currently using the tuner",
                        self.tuner_id
                    );
                    self.got_control = false;
                }
                Err(e.into())
            }
        }
    }

    /// Whether another client is streaming from the device.
    fn is_tuner_in_use(&mut self, device: &dyn DeviceControl) -> Result<bool> {
        if self.got_control {
            return Ok(false);
        }
        let av = self
            .loaded
            .as_ref()
            .map(|l| l.ids.av_transport_id)
            .ok_or(TunerError::NotLoaded)?;
        let info = device.transport_info(av)?;
        if info.status != TransportStatus::Ok {
            warn!(
                "[Tuner {}] Unexpected transport status {}",
                self.tuner_id, info.status
            );
        }
        self.transport_state = info.state;
        Ok(info.state != TransportState::Stopped)
    }

    /// Poll signal figures into the status tracker.
    ///
    /// Lock is evented, so `only_lock` requests need no work.
    pub fn perform_signal_status_update(&mut self, only_lock: bool) {
        if only_lock {
            return;
        }
        let device = match &self.loaded {
            Some(loaded) => Arc::clone(&loaded.device),
            None => return,
        };
        if let Err(e) = self.refresh_signal(device.as_ref()) {
            error!("[Tuner {}] Failed to update signal status: {}", self.tuner_id, e);
        }
    }

    fn refresh_signal(&mut self, device: &dyn DeviceControl) -> Result<()> {
        if self.is_scanning_out_of_band() {
            let fdc = device.fdc_status()?;
            let mut level = 0;
            let mut quality = 0;

            if self.descriptor.is_ceton() {
                // Example: "0.8 dBmV". Assumed range -25..25.
                let value = device.diag_parameter(DIAG_OOB_SIGNAL_LEVEL)?;
                match parse_signal_figure(&value) {
                    Some(dbmv) => level = (dbmv * 2.0) as i32 + 50,
                    None => warn!(
                        "[Tuner {}] Failed to interpret out-of-band signal level {}",
                        self.tuner_id, value
                    ),
                }
                // Example: "31.9 dB".
                let value = device.diag_parameter(DIAG_OOB_SNR)?;
                match parse_signal_figure(&value) {
                    Some(db) => quality = db as i32,
                    None => warn!(
                        "[Tuner {}] Failed to interpret out-of-band signal-to-noise ratio {}",
                        self.tuner_id, value
                    ),
                }
            }
            self.status.record_signal(fdc.locked, fdc.locked, level, quality);
            return Ok(());
        }

        let reading = device.tuner_parameters()?;
        self.status.record_signal(
            reading.locked,
            reading.present,
            reading.level * 2 + 50,
            reading.snr as i32,
        );
        if self.current_frequency.is_none() {
            debug!(
                "[Tuner {}] Current tuning details, frequency = {} kHz, modulation = {}",
                self.tuner_id, reading.frequency_khz, reading.modulation
            );
            self.current_frequency = Some(reading.frequency_khz);
        }
        Ok(())
    }
}

impl Tuner for DriTuner {
    fn tune(&mut self, channel: &Channel) -> Result<()> {
        self.perform_tuning(channel)
    }

    fn set_state(&mut self, state: TunerState) -> Result<()> {
        DriTuner::set_state(self, state)
    }

    fn perform_signal_status_update(&mut self, only_lock: bool) {
        DriTuner::perform_signal_status_update(self, only_lock)
    }

    fn capabilities(&self) -> TunerCapabilities {
        TunerCapabilities {
            can_pause: self.can_pause,
            supports_sub_channels: false,
            has_ca_menu: true,
        }
    }

    fn ca_menu(&self) -> Option<Arc<dyn CaMenuActions>> {
        Some(Arc::new(CaMenuHandle::new(
            Arc::clone(&self.menu),
            Arc::clone(&self.status),
        )))
    }
}

impl Drop for DriTuner {
    fn drop(&mut self) {
        self.unload();
    }
}
