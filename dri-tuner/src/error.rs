//! Error types for tuner control.

use thiserror::Error;

use dri_protocol::{CardStatus, ProtocolError};

/// Description the device attaches to a remote error when another client
/// owns the tuner.
pub const TUNER_IN_USE_DESCRIPTION: &str = "Tuner In Use";

/// Failures reported by a device collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device answered the call with an error.
    #[error("Remote error {code}: {description}")]
    Remote { code: u32, description: String },

    /// The call never produced an answer.
    #[error("Device transport failed: {0}")]
    Transport(String),
}

impl DeviceError {
    pub fn is_tuner_in_use(&self) -> bool {
        matches!(self, DeviceError::Remote { description, .. } if description == TUNER_IN_USE_DESCRIPTION)
    }
}

/// Broad classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Truncated or invalid wire data. Fatal to the decode, not the session.
    ProtocolFormat,
    /// Card, signal or channel preconditions not met. No side effects.
    Precondition,
    /// A control exchange answered with a non-success code.
    RemoteRejected,
    /// Another client owns the tuner.
    ResourceConflict,
    /// Unexpected collaborator failure.
    Internal,
}

/// Errors raised by the tuner core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("CableCARD not available, current status is {0}")]
    CardUnavailable(CardStatus),

    #[error("No signal: {0}")]
    NoSignal(String),

    #[error("Received request to tune incompatible channel: {0}")]
    IncompatibleChannel(String),

    #[error("Insufficient tuning information: {0}")]
    InsufficientTuningInfo(&'static str),

    #[error("Tuner appears to be in use")]
    TunerInUse,

    #[error("RTSP SETUP rejected: {status} {reason}")]
    SetupRejected { status: u16, reason: String },

    #[error("RTSP SETUP response has no session header")]
    MissingSessionId,

    #[error("RTSP SETUP response has no RTP transport details")]
    MissingTransportInfo,

    #[error("RTSP PLAY rejected: {status} {reason}")]
    PlayRejected { status: u16, reason: String },

    #[error("RTSP TEARDOWN rejected: {status} {reason}")]
    TeardownRejected { status: u16, reason: String },

    #[error("No free local port pair between {floor} and {ceiling}")]
    NoFreePortPair { floor: u16, ceiling: u16 },

    #[error("Device error: {0}")]
    Device(DeviceError),

    #[error("Stream tuner failed: {0}")]
    StreamTuner(String),

    #[error("Tuner is not loaded")]
    NotLoaded,

    #[error("No CA menu call back registered")]
    NoMenuCallBack,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DeviceError> for TunerError {
    fn from(err: DeviceError) -> Self {
        if err.is_tuner_in_use() {
            TunerError::TunerInUse
        } else {
            TunerError::Device(err)
        }
    }
}

impl TunerError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TunerError::Protocol(_) => ErrorKind::ProtocolFormat,
            TunerError::CardUnavailable(_)
            | TunerError::NoSignal(_)
            | TunerError::IncompatibleChannel(_)
            | TunerError::InsufficientTuningInfo(_)
            | TunerError::NotLoaded
            | TunerError::NoMenuCallBack => ErrorKind::Precondition,
            TunerError::SetupRejected { .. }
            | TunerError::MissingSessionId
            | TunerError::MissingTransportInfo
            | TunerError::PlayRejected { .. }
            | TunerError::TeardownRejected { .. }
            | TunerError::Device(DeviceError::Remote { .. }) => ErrorKind::RemoteRejected,
            TunerError::TunerInUse => ErrorKind::ResourceConflict,
            TunerError::NoFreePortPair { .. }
            | TunerError::Device(DeviceError::Transport(_))
            | TunerError::StreamTuner(_)
            | TunerError::Config(_)
            | TunerError::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, TunerError>;
