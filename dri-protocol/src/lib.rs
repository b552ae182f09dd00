//! Wire formats for DRI (Digital Receiver Interface) CableCARD tuners.
//!
//! Two formats are covered:
//!
//! - **MMI APDUs** ([`apdu`]): the tagged, length-prefixed binary objects
//!   that drive the CableCARD's on-screen conditional-access menu.
//! - **RTSP** ([`rtsp`]): the text request/response exchange that sets up
//!   and tears down RTP delivery of the tuned program.
//!
//! # APDU Format
//!
//! ```text
//! +---------+----------------+------------------+
//! |   Tag   |     Length     |     Payload      |
//! | u24 BE  | 1 or 1+N bytes |  Length bytes    |
//! +---------+----------------+------------------+
//! ```
//!
//! # Example
//!
//! ```rust
//! use dri_protocol::{decode_length, encode_answer, Apdu, MmiTag, ResponseType};
//!
//! let answer = encode_answer(ResponseType::Answer, "1234").unwrap();
//! let apdu = Apdu::parse(&answer).unwrap();
//! assert_eq!(apdu.mmi_tag(), Some(MmiTag::Answer));
//! assert_eq!(apdu.length, 5);
//!
//! assert_eq!(decode_length(&[0x82, 0x01, 0x2C], 0).unwrap(), (300, 3));
//! ```

pub mod apdu;
pub mod error;
pub mod rtsp;
pub mod types;

pub use apdu::{
    decode_length, decode_tag, decode_text, decode_text_field, encode_answer, encode_close,
    encode_enter_menu, encode_select, Apdu, MmiTag, ResponseType, TAG_LEAD_BYTE,
};
pub use error::ProtocolError;
pub use rtsp::{
    decode_response, encode_request, parse_transport_header, RtspMethod, RtspRequest,
    RtspResponse, TransportSpec, STATUS_OK,
};
pub use types::{
    CaptureMode, CardStatus, DescramblingStatus, ModulationType, PairingStatus, TransportAction,
    TransportState, TransportStatus, TunerModulation, TunerState,
};
