//! dri-tuner: control core for DRI (Digital Receiver Interface) CableCARD
//! tuners.
//!
//! A [`DriTuner`] connects to a network tuner through a [`DeviceConnector`],
//! tunes channels through the CableCARD or by frequency, and sets up RTP
//! delivery of the tuned program over RTSP. Evented device state feeds a
//! [`StatusTracker`], and the CableCARD's conditional-access menu is exposed
//! through [`CaMenuActions`].
//!
//! Device discovery, the control-channel transport and the demultiplexer
//! that consumes the RTP stream live outside this crate; they are reached
//! through the traits in [`device`].

pub mod channel;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod logging;
pub mod mmi;
pub mod status;
pub mod streaming;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{AtscChannel, Channel, TuningMethod, TuningRequest};
pub use config::{DeviceConfig, DriConfig, LoggingConfig, StreamingConfig};
pub use controller::{DriTuner, Tuner, TunerCapabilities};
pub use device::{
    DeviceConnector, DeviceControl, DeviceDescriptor, StateValue, StateVariableListener,
    StreamTuner,
};
pub use error::{DeviceError, ErrorKind, Result, TunerError};
pub use mmi::{dispatch_apdu, CaMenuActions, CaMenuHandle, Menu, MenuCallBack, MenuEvent, MenuSession};
pub use status::{StatusSnapshot, StatusTracker};
pub use streaming::{
    ProcNetInventory, RtspConnector, StreamLocator, StreamingSession, TcpRtspConnector,
};
