//! Channels and tuning requests.

use log::warn;

use dri_protocol::{ModulationType, TunerModulation};

use crate::error::{Result, TunerError};

/// An ATSC or North American cable channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtscChannel {
    pub name: String,
    /// Virtual (major) channel number; 0 when unknown.
    pub major_channel: u32,
    pub minor_channel: u32,
    /// Program source id; 0 when unknown.
    pub source_id: u32,
    /// Carrier frequency in kHz; 0 when unknown.
    pub frequency_khz: u32,
    pub modulation: ModulationType,
    /// Physical channel; 0 is the out-of-band scanning placeholder.
    pub physical_channel: u32,
    pub free_to_air: bool,
}

impl AtscChannel {
    /// The placeholder tuned while scanning through the out-of-band tuner.
    pub fn scan_placeholder() -> Self {
        Self {
            name: "Out-of-band scan".to_string(),
            major_channel: 0,
            minor_channel: 0,
            source_id: 0,
            frequency_khz: 0,
            modulation: ModulationType::NotSet,
            physical_channel: 0,
            free_to_air: false,
        }
    }

    pub fn is_scan_placeholder(&self) -> bool {
        self.physical_channel == 0
    }
}

/// Any channel a caller may ask a tuner to tune.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Atsc(AtscChannel),
    DvbC { name: String, frequency_khz: u32 },
    DvbT { name: String, frequency_khz: u32 },
    /// A network stream, e.g. `rtp://...`.
    Stream { url: String },
}

impl Channel {
    pub fn as_atsc(&self) -> Option<&AtscChannel> {
        match self {
            Channel::Atsc(ch) => Some(ch),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Channel::Atsc(ch) => format!("ATSC {}", ch.name),
            Channel::DvbC { name, .. } => format!("DVB-C {}", name),
            Channel::DvbT { name, .. } => format!("DVB-T {}", name),
            Channel::Stream { url } => format!("stream {}", url),
        }
    }
}

/// How the device is asked to tune.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TuningMethod {
    ByChannelNumber(u32),
    BySourceId(u32),
    ByFrequency {
        frequency_khz: u32,
        modulations: Vec<TunerModulation>,
    },
}

/// A validated request ready to submit to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningRequest {
    pub method: TuningMethod,
    /// Whether the request goes through the CableCARD.
    pub requires_card: bool,
}

impl TuningRequest {
    /// Pick the tuning method for a channel.
    ///
    /// Encrypted channels tune by channel number, else by source id. Clear
    /// channels tune by frequency; a modulation the device has no code for
    /// lets the tuner accept any modulation it supports.
    pub fn for_channel(channel: &AtscChannel) -> Result<Self> {
        if !channel.free_to_air {
            let method = if channel.major_channel > 0 {
                TuningMethod::ByChannelNumber(channel.major_channel)
            } else if channel.source_id > 0 {
                TuningMethod::BySourceId(channel.source_id)
            } else {
                return Err(TunerError::InsufficientTuningInfo(
                    "encrypted channel needs a channel number or source id",
                ));
            };
            return Ok(Self {
                method,
                requires_card: true,
            });
        }

        if channel.frequency_khz == 0 {
            return Err(TunerError::InsufficientTuningInfo(
                "clear channel needs a frequency",
            ));
        }
        let modulation = match channel.modulation.tuner_modulation() {
            Some(m) => m,
            None => {
                warn!(
                    "Unsupported modulation {:?}, allowing tuner to use any supported modulation",
                    channel.modulation
                );
                TunerModulation::All
            }
        };
        Ok(Self {
            method: TuningMethod::ByFrequency {
                frequency_khz: channel.frequency_khz,
                modulations: vec![modulation],
            },
            requires_card: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> AtscChannel {
        AtscChannel {
            name: "KQED".to_string(),
            major_channel: 0,
            minor_channel: 0,
            source_id: 0,
            frequency_khz: 0,
            modulation: ModulationType::Qam256,
            physical_channel: 38,
            free_to_air: false,
        }
    }

    #[test]
    fn test_encrypted_prefers_channel_number() {
        let mut ch = channel();
        ch.major_channel = 702;
        ch.source_id = 1234;
        let request = TuningRequest::for_channel(&ch).unwrap();
        assert_eq!(request.method, TuningMethod::ByChannelNumber(702));
        assert!(request.requires_card);
    }

    #[test]
    fn test_encrypted_falls_back_to_source_id() {
        let mut ch = channel();
        ch.source_id = 1234;
        let request = TuningRequest::for_channel(&ch).unwrap();
        assert_eq!(request.method, TuningMethod::BySourceId(1234));
    }

    #[test]
    fn test_encrypted_without_ids() {
        let result = TuningRequest::for_channel(&channel());
        assert!(matches!(result, Err(TunerError::InsufficientTuningInfo(_))));
    }

    #[test]
    fn test_clear_by_frequency() {
        let mut ch = channel();
        ch.free_to_air = true;
        ch.frequency_khz = 603_000;
        let request = TuningRequest::for_channel(&ch).unwrap();
        assert_eq!(
            request.method,
            TuningMethod::ByFrequency {
                frequency_khz: 603_000,
                modulations: vec![TunerModulation::Qam256]
            }
        );
        assert!(!request.requires_card);
    }

    #[test]
    fn test_unsupported_modulation_accepts_any() {
        let mut ch = channel();
        ch.free_to_air = true;
        ch.frequency_khz = 57_000;
        ch.modulation = ModulationType::Qpsk;
        let request = TuningRequest::for_channel(&ch).unwrap();
        assert_eq!(
            request.method,
            TuningMethod::ByFrequency {
                frequency_khz: 57_000,
                modulations: vec![TunerModulation::All]
            }
        );
    }

    #[test]
    fn test_clear_without_frequency() {
        let mut ch = channel();
        ch.free_to_air = true;
        assert!(matches!(
            TuningRequest::for_channel(&ch),
            Err(TunerError::InsufficientTuningInfo(_))
        ));
    }
}
