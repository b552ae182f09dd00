//! MMI application protocol data units.
//!
//! Every APDU exchanged with the CableCARD menu application has the shape:
//!
//! ```text
//! +---------+----------------+------------------+
//! |   Tag   |     Length     |     Payload      |
//! | u24 BE  | 1 or 1+N bytes |  Length bytes    |
//! +---------+----------------+------------------+
//! ```
//!
//! A length whose first byte has the high bit clear is that byte. Otherwise
//! the low seven bits give the number `N` of big-endian magnitude bytes that
//! follow. Text is one byte per character with no multi-byte decoding.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of an encoded tag.
pub const TAG_SIZE: usize = 3;

/// First byte shared by every MMI object tag.
pub const TAG_LEAD_BYTE: u8 = 0x9F;

/// Largest length representable in the single-byte form.
pub const MAX_SHORT_LENGTH: usize = 0x7F;

/// Tag values of the objects exchanged with the CA module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MmiTag {
    ProfileEnquiry = 0x9F8010,
    Profile = 0x9F8011,
    ProfileChange = 0x9F8012,

    ApplicationInfoEnquiry = 0x9F8020,
    ApplicationInfo = 0x9F8021,
    EnterMenu = 0x9F8022,

    CaInfoEnquiry = 0x9F8030,
    CaInfo = 0x9F8031,
    CaPmt = 0x9F8032,
    CaPmtResponse = 0x9F8033,

    Tune = 0x9F8400,
    Replace = 0x9F8401,
    ClearReplace = 0x9F8402,
    AskRelease = 0x9F8403,

    DateTimeEnquiry = 0x9F8440,
    DateTime = 0x9F8441,

    CloseMmi = 0x9F8800,
    DisplayControl = 0x9F8801,
    DisplayReply = 0x9F8802,
    TextLast = 0x9F8803,
    TextMore = 0x9F8804,
    KeypadControl = 0x9F8805,
    KeyPress = 0x9F8806,
    Enquiry = 0x9F8807,
    Answer = 0x9F8808,
    MenuLast = 0x9F8809,
    MenuMore = 0x9F880A,
    MenuAnswer = 0x9F880B,
    ListLast = 0x9F880C,
    ListMore = 0x9F880D,
    SubtitleSegmentLast = 0x9F880E,
    SubtitleSegmentMore = 0x9F880F,
    DisplayMessage = 0x9F8810,
    SceneEndMark = 0x9F8811,
    SceneDone = 0x9F8812,
    SceneControl = 0x9F8813,
    SubtitleDownloadLast = 0x9F8814,
    SubtitleDownloadMore = 0x9F8815,
    FlushDownload = 0x9F8816,
    DownloadReply = 0x9F8817,

    CommsCommand = 0x9F8C00,
    ConnectionDescriptor = 0x9F8C01,
    CommsReply = 0x9F8C02,
    CommsSendLast = 0x9F8C03,
    CommsSendMore = 0x9F8C04,
    CommsReceiveLast = 0x9F8C05,
    CommsReceiveMore = 0x9F8C06,
}

impl TryFrom<u32> for MmiTag {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use MmiTag::*;
        const ALL: &[MmiTag] = &[
            ProfileEnquiry, Profile, ProfileChange, ApplicationInfoEnquiry, ApplicationInfo,
            EnterMenu, CaInfoEnquiry, CaInfo, CaPmt, CaPmtResponse, Tune, Replace, ClearReplace,
            AskRelease, DateTimeEnquiry, DateTime, CloseMmi, DisplayControl, DisplayReply,
            TextLast, TextMore, KeypadControl, KeyPress, Enquiry, Answer, MenuLast, MenuMore,
            MenuAnswer, ListLast, ListMore, SubtitleSegmentLast, SubtitleSegmentMore,
            DisplayMessage, SceneEndMark, SceneDone, SceneControl, SubtitleDownloadLast,
            SubtitleDownloadMore, FlushDownload, DownloadReply, CommsCommand,
            ConnectionDescriptor, CommsReply, CommsSendLast, CommsSendMore, CommsReceiveLast,
            CommsReceiveMore,
        ];
        ALL.iter()
            .copied()
            .find(|tag| *tag as u32 == value)
            .ok_or(value)
    }
}

impl From<MmiTag> for u32 {
    fn from(tag: MmiTag) -> Self {
        tag as u32
    }
}

impl MmiTag {
    /// True for the four objects that carry a menu or list.
    pub fn is_menu(self) -> bool {
        matches!(
            self,
            MmiTag::MenuLast | MmiTag::MenuMore | MmiTag::ListLast | MmiTag::ListMore
        )
    }

    /// True for the objects that carry a single text field.
    pub fn is_text(self) -> bool {
        matches!(self, MmiTag::TextLast | MmiTag::TextMore)
    }
}

/// Enquiry answer response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseType {
    Cancel = 0,
    Answer = 1,
}

impl ResponseType {
    pub fn from_cancel(cancel: bool) -> Self {
        if cancel {
            ResponseType::Cancel
        } else {
            ResponseType::Answer
        }
    }
}

impl TryFrom<u8> for ResponseType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResponseType::Cancel),
            1 => Ok(ResponseType::Answer),
            other => Err(other),
        }
    }
}

/// Read a 24-bit big-endian tag at `offset`.
pub fn decode_tag(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    let bytes = buf
        .get(offset..offset + TAG_SIZE)
        .ok_or_else(|| ProtocolError::truncated(offset, TAG_SIZE, buf.len()))?;
    Ok((bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32)
}

/// Read a length field at `offset`.
///
/// Returns the decoded length and the number of bytes the field occupied.
pub fn decode_length(buf: &[u8], offset: usize) -> Result<(usize, usize), ProtocolError> {
    let first = *buf
        .get(offset)
        .ok_or_else(|| ProtocolError::truncated(offset, 1, buf.len()))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }

    let count = (first & 0x7F) as usize;
    if count > std::mem::size_of::<usize>() {
        return Err(ProtocolError::InvalidLength {
            offset,
            reason: format!("{} magnitude bytes do not fit a length", count),
        });
    }
    let magnitude = buf
        .get(offset + 1..offset + 1 + count)
        .ok_or_else(|| ProtocolError::InvalidLength {
            offset,
            reason: format!(
                "{} magnitude bytes overrun buffer of {} bytes",
                count,
                buf.len()
            ),
        })?;
    let value = magnitude
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((value, 1 + count))
}

/// Map `length` bytes at `offset` directly to characters.
pub fn decode_text(buf: &[u8], offset: usize, length: usize) -> Result<String, ProtocolError> {
    let bytes = offset
        .checked_add(length)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| ProtocolError::truncated(offset, length, buf.len()))?;
    Ok(bytes.iter().map(|b| *b as char).collect())
}

/// Read a `[tag:3][length:1][bytes]` text object at `offset`.
///
/// Returns the text and the number of bytes to advance. An empty field
/// still advances past its four header bytes.
pub fn decode_text_field(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    let tag = decode_tag(buf, offset)?;
    match MmiTag::try_from(tag) {
        Ok(t) if t.is_text() => {}
        _ => return Err(ProtocolError::UnexpectedTag { tag, offset }),
    }

    let length_offset = offset + TAG_SIZE;
    let length = *buf
        .get(length_offset)
        .ok_or_else(|| ProtocolError::truncated(length_offset, 1, buf.len()))?
        as usize;
    // Text objects inside a menu only ever use the short length form.
    if length > MAX_SHORT_LENGTH {
        return Err(ProtocolError::InvalidLength {
            offset: length_offset,
            reason: format!("text length byte 0x{:02X} is not a short length", length),
        });
    }

    let text = if length > 0 {
        decode_text(buf, offset + 4, length)?
    } else {
        String::new()
    };
    Ok((text, length + 4))
}

/// Position of the next tag lead byte at or after `from`.
pub fn find_tag_lead(buf: &[u8], from: usize) -> Result<usize, ProtocolError> {
    buf.get(from..)
        .and_then(|rest| rest.iter().position(|b| *b == TAG_LEAD_BYTE))
        .map(|pos| from + pos)
        .ok_or(ProtocolError::MissingObjectTag(from))
}

/// Append a length field in the shortest form.
pub fn encode_length(buf: &mut BytesMut, length: usize) {
    if length <= MAX_SHORT_LENGTH {
        buf.put_u8(length as u8);
        return;
    }
    let magnitude = length.to_be_bytes();
    let skip = magnitude.iter().take_while(|b| **b == 0).count();
    let significant = &magnitude[skip..];
    buf.put_u8(0x80 | significant.len() as u8);
    buf.put_slice(significant);
}

fn put_tag(buf: &mut BytesMut, tag: MmiTag) {
    let value = tag as u32;
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

/// CloseMmi APDU with `close_mmi_cmd_id` = immediate.
pub fn encode_close() -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    put_tag(&mut buf, MmiTag::CloseMmi);
    buf.put_u8(0x01);
    buf.put_u8(0x00);
    buf.freeze()
}

/// MenuAnswer APDU carrying the selected choice (0 means back).
pub fn encode_select(choice: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    put_tag(&mut buf, MmiTag::MenuAnswer);
    buf.put_u8(0x01);
    buf.put_u8(choice);
    buf.freeze()
}

/// Answer APDU for an enquiry.
///
/// Every character of `answer` must fit in a single byte.
pub fn encode_answer(response: ResponseType, answer: &str) -> Result<Bytes, ProtocolError> {
    let mut text = Vec::with_capacity(answer.len());
    for c in answer.chars() {
        let code = c as u32;
        if code > 0xFF {
            return Err(ProtocolError::UnencodableText(c));
        }
        text.push(code as u8);
    }

    let length = text.len() + 1;
    let mut buf = BytesMut::with_capacity(TAG_SIZE + 9 + length);
    put_tag(&mut buf, MmiTag::Answer);
    encode_length(&mut buf, length);
    buf.put_u8(response as u8);
    buf.put_slice(&text);
    Ok(buf.freeze())
}

/// Enter-menu request for the CA application (empty payload).
pub fn encode_enter_menu() -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    put_tag(&mut buf, MmiTag::EnterMenu);
    buf.put_u8(0x00);
    buf.freeze()
}

/// A parsed view over a received APDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Apdu<'a> {
    /// Raw 24-bit tag.
    pub tag: u32,
    /// Declared payload length.
    pub length: usize,
    /// Tag plus length field size.
    pub header_len: usize,
    raw: &'a [u8],
}

impl<'a> Apdu<'a> {
    /// Parse the tag and length of `raw`, checking the payload is present.
    pub fn parse(raw: &'a [u8]) -> Result<Self, ProtocolError> {
        let tag = decode_tag(raw, 0)?;
        let (length, length_bytes) = decode_length(raw, TAG_SIZE)?;
        let header_len = TAG_SIZE + length_bytes;
        if header_len.checked_add(length).map_or(true, |end| end > raw.len()) {
            return Err(ProtocolError::truncated(header_len, length, raw.len()));
        }
        Ok(Self {
            tag,
            length,
            header_len,
            raw,
        })
    }

    /// The tag, if it is one we know.
    pub fn mmi_tag(&self) -> Option<MmiTag> {
        MmiTag::try_from(self.tag).ok()
    }

    /// The declared payload.
    pub fn payload(&self) -> &'a [u8] {
        &self.raw[self.header_len..self.end()]
    }

    /// Offset one past the declared payload.
    pub fn end(&self) -> usize {
        self.header_len + self.length
    }

    /// The whole buffer the APDU was parsed from.
    pub fn bytes(&self) -> &'a [u8] {
        self.raw
    }

    /// Payload byte `index`, failing instead of reading past the end.
    pub fn payload_byte(&self, index: usize) -> Result<u8, ProtocolError> {
        self.payload()
            .get(index)
            .copied()
            .ok_or_else(|| ProtocolError::truncated(self.header_len + index, 1, self.end()))
    }
}

/// Format a buffer as offset/hex/ASCII rows of sixteen bytes.
pub fn hex_dump(data: &[u8]) -> Vec<String> {
    data.chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let hex: String = chunk.iter().map(|b| format!("{:02X} ", b)).collect();
            let text: String = chunk
                .iter()
                .map(|b| if (32..=126).contains(b) { *b as char } else { '_' })
                .collect();
            format!("{:04X}|{:<48}|{}", row * 16, hex, text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_length(n: usize) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_length(&mut buf, n);
        buf.to_vec()
    }

    #[test]
    fn test_short_lengths_consume_one_byte() {
        for n in 0..=127u8 {
            assert_eq!(decode_length(&[n], 0).unwrap(), (n as usize, 1));
        }
    }

    #[test]
    fn test_long_lengths_round_trip() {
        for n in [200usize, 65535, 16_777_215] {
            let field = encoded_length(n);
            let (value, consumed) = decode_length(&field, 0).unwrap();
            assert_eq!(value, n);
            assert_eq!(consumed, field.len());
        }
        assert_eq!(encoded_length(200), vec![0x81, 0xC8]);
        assert_eq!(encoded_length(65535), vec![0x82, 0xFF, 0xFF]);
        assert_eq!(encoded_length(16_777_215), vec![0x83, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_length_overrun_is_invalid() {
        let result = decode_length(&[0x82, 0x01], 0);
        assert!(matches!(result, Err(ProtocolError::InvalidLength { offset: 0, .. })));
    }

    #[test]
    fn test_length_past_end_is_truncated() {
        let result = decode_length(&[0x9F, 0x88, 0x00], 3);
        assert!(matches!(result, Err(ProtocolError::TruncatedInput { .. })));
    }

    #[test]
    fn test_decode_tag() {
        assert_eq!(decode_tag(&[0x00, 0x9F, 0x88, 0x09], 1).unwrap(), 0x9F8809);
        assert_eq!(
            MmiTag::try_from(0x9F8809),
            Ok(MmiTag::MenuLast)
        );
        assert_eq!(MmiTag::try_from(0x123456), Err(0x123456));
    }

    #[test]
    fn test_decode_tag_truncated() {
        let result = decode_tag(&[0x9F, 0x88], 0);
        assert_eq!(
            result,
            Err(ProtocolError::TruncatedInput {
                offset: 0,
                needed: 3,
                available: 2
            })
        );
    }

    #[test]
    fn test_decode_text_is_byte_per_char() {
        let text = decode_text(b"x\xE9t\xE9", 1, 3).unwrap();
        assert_eq!(text, "\u{e9}t\u{e9}");
        assert_eq!(text.chars().count(), 3);
        assert!(decode_text(b"abc", 1, 3).is_err());
    }

    #[test]
    fn test_fixed_outbound_apdus() {
        assert_eq!(&encode_close()[..], &[0x9F, 0x88, 0x00, 0x01, 0x00]);
        assert_eq!(&encode_select(3)[..], &[0x9F, 0x88, 0x0B, 0x01, 0x03]);
        assert_eq!(&encode_enter_menu()[..], &[0x9F, 0x80, 0x22, 0x00]);
    }

    #[test]
    fn test_encode_answer_short() {
        let apdu = encode_answer(ResponseType::Answer, "1234").unwrap();
        assert_eq!(&apdu[..], &[0x9F, 0x88, 0x08, 0x05, 0x01, b'1', b'2', b'3', b'4']);

        let cancel = encode_answer(ResponseType::Cancel, "").unwrap();
        assert_eq!(&cancel[..], &[0x9F, 0x88, 0x08, 0x01, 0x00]);
    }

    #[test]
    fn test_encode_answer_long_uses_multi_byte_length() {
        let answer = "a".repeat(300);
        let apdu = encode_answer(ResponseType::Answer, &answer).unwrap();
        assert_eq!(&apdu[3..6], &[0x82, 0x01, 0x2D]);

        let parsed = Apdu::parse(&apdu).unwrap();
        assert_eq!(parsed.mmi_tag(), Some(MmiTag::Answer));
        assert_eq!(parsed.length, 301);
        assert_eq!(parsed.payload_byte(0).unwrap(), ResponseType::Answer as u8);
        assert_eq!(decode_text(parsed.payload(), 1, 300).unwrap(), answer);
    }

    #[test]
    fn test_encode_answer_rejects_wide_chars() {
        let result = encode_answer(ResponseType::Answer, "\u{3042}");
        assert_eq!(result, Err(ProtocolError::UnencodableText('\u{3042}')));
    }

    #[test]
    fn test_text_field_empty_advances_header() {
        let buf = [0x9F, 0x88, 0x03, 0x00, 0x9F, 0x88, 0x03, 0x02, b'h', b'i'];
        assert_eq!(decode_text_field(&buf, 0).unwrap(), (String::new(), 4));
        assert_eq!(decode_text_field(&buf, 4).unwrap(), ("hi".to_string(), 6));
    }

    #[test]
    fn test_text_field_wrong_tag() {
        let buf = [0x9F, 0x88, 0x09, 0x00];
        assert_eq!(
            decode_text_field(&buf, 0),
            Err(ProtocolError::UnexpectedTag {
                tag: 0x9F8809,
                offset: 0
            })
        );
    }

    #[test]
    fn test_apdu_parse_requires_payload() {
        let result = Apdu::parse(&[0x9F, 0x88, 0x00, 0x02, 0x01]);
        assert!(matches!(result, Err(ProtocolError::TruncatedInput { .. })));
    }

    #[test]
    fn test_find_tag_lead() {
        assert_eq!(find_tag_lead(&[0x9F, 0x88, 0x09, 0x05, 0x02, 0x9F], 1), Ok(5));
        assert_eq!(
            find_tag_lead(&[0x9F, 0x00], 1),
            Err(ProtocolError::MissingObjectTag(1))
        );
    }

    #[test]
    fn test_hex_dump() {
        let rows = hex_dump(&[0x9F, b'A']);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].starts_with("0000|9F 41 "));
        assert!(rows[0].ends_with("|_A"));
    }
}
