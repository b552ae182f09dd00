//! State and parameter enumerations shared with the device.
//!
//! Values evented or returned by the device arrive as strings; each type
//! parses from and displays as the device's spelling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

macro_rules! device_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// The device's spelling of this value.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $( t if t.eq_ignore_ascii_case($text) => Ok($name::$variant), )+
                    other => Err(ProtocolError::UnknownValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

device_enum! {
    /// Requested, externally visible tuner state.
    TunerState, "tuner state" {
        Stopped => "Stopped",
        Paused => "Paused",
        Started => "Started",
    }
}

device_enum! {
    /// Streaming state reported by the device's AV transport.
    ///
    /// May lag the requested [`TunerState`] while a transition is in flight.
    TransportState, "transport state" {
        Stopped => "STOPPED",
        Paused => "PAUSED_PLAYBACK",
        Playing => "PLAYING",
        Transitioning => "TRANSITIONING",
        NoMediaPresent => "NO_MEDIA_PRESENT",
    }
}

device_enum! {
    /// Health of the AV transport.
    TransportStatus, "transport status" {
        Ok => "OK",
        ErrorOccurred => "ERROR_OCCURRED",
    }
}

device_enum! {
    /// Actions the AV transport currently accepts.
    TransportAction, "transport action" {
        Play => "Play",
        Stop => "Stop",
        Pause => "Pause",
        Seek => "Seek",
        Next => "Next",
        Previous => "Previous",
        Record => "Record",
    }
}

device_enum! {
    /// Presence of the CableCARD security module.
    CardStatus, "card status" {
        Removed => "Removed",
        Inserted => "Inserted",
        Error => "Error",
        Unknown => "Unknown",
    }
}

device_enum! {
    /// Whether the card can descramble the current program.
    DescramblingStatus, "descrambling status" {
        Unknown => "Unknown",
        Possible => "Possible",
        PurchaseDialog => "Purchase Dialog",
        TechnicalDialog => "Technical Dialog",
        NotPossible => "Not Possible",
    }
}

device_enum! {
    /// Host/card DRM pairing state.
    PairingStatus, "pairing status" {
        Red => "Red",
        Yellow => "Yellow",
        Green => "Green",
    }
}

device_enum! {
    /// Modulation codes accepted by the device tuner service.
    TunerModulation, "tuner modulation" {
        Qam64 => "QAM64",
        Qam256 => "QAM256",
        Vsb8 => "8VSB",
        /// Let the tuner pick any modulation it supports.
        All => "ALL",
    }
}

device_enum! {
    /// Capture mode for CableCARD channel selection.
    CaptureMode, "capture mode" {
        Live => "Live",
        Recording => "Recording",
    }
}

/// Modulation recorded against a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModulationType {
    NotSet,
    Qam16,
    Qam64,
    Qam256,
    Vsb8,
    Vsb16,
    Qpsk,
}

impl ModulationType {
    /// Device modulation code for this channel modulation, if the device has one.
    pub fn tuner_modulation(self) -> Option<TunerModulation> {
        match self {
            ModulationType::Qam64 => Some(TunerModulation::Qam64),
            ModulationType::Qam256 => Some(TunerModulation::Qam256),
            ModulationType::Vsb8 => Some(TunerModulation::Vsb8),
            _ => None,
        }
    }
}

impl TunerState {
    /// Transport state the device is driven to for this requested state.
    pub fn transport_state(self) -> TransportState {
        match self {
            TunerState::Stopped => TransportState::Stopped,
            TunerState::Paused => TransportState::Paused,
            TunerState::Started => TransportState::Playing,
        }
    }
}
