//! Text codec for the RTSP session-control exchange.
//!
//! Requests are encoded whole; responses are decoded incrementally so a
//! stream transport can feed partial reads until a full message is present.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Protocol version token used on every request line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// Default RTSP server port.
pub const DEFAULT_PORT: u16 = 554;

/// The one status code that counts as success.
pub const STATUS_OK: u16 = 200;

/// Upper bound on a response header block.
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Largest response body accepted.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// Profile prefix identifying an RTP transport entry.
pub const RTP_PROFILE: &str = "RTP/AVP";

/// RTSP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtspMethod {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    GetParameter,
}

impl RtspMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RtspMethod::Options => "OPTIONS",
            RtspMethod::Describe => "DESCRIBE",
            RtspMethod::Setup => "SETUP",
            RtspMethod::Play => "PLAY",
            RtspMethod::Pause => "PAUSE",
            RtspMethod::Teardown => "TEARDOWN",
            RtspMethod::GetParameter => "GET_PARAMETER",
        }
    }
}

impl fmt::Display for RtspMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound request. `CSeq` is assigned when the request is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: RtspMethod,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: RtspMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header, builder style.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RtspResponse {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    /// Session identifier with any `;timeout=` style parameters removed.
    pub fn session_id(&self) -> Option<&str> {
        self.header("Session")
            .map(|v| v.split(';').next().unwrap_or("").trim())
            .filter(|id| !id.is_empty())
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Encode a request with the given sequence number.
pub fn encode_request(request: &RtspRequest, cseq: u32, buf: &mut BytesMut) {
    buf.put_slice(
        format!("{} {} {}\r\n", request.method, request.uri, RTSP_VERSION).as_bytes(),
    );
    buf.put_slice(format!("CSeq: {}\r\n", cseq).as_bytes());
    for (name, value) in &request.headers {
        buf.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    buf.put_slice(b"\r\n");
}

/// Try to decode one response from the front of `buf`.
///
/// Returns `Ok(None)` when more data is needed, otherwise the response and
/// the number of bytes it occupied.
pub fn decode_response(buf: &[u8]) -> Result<Option<(RtspResponse, usize)>, ProtocolError> {
    let header_end = match buf.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) => pos,
        None if buf.len() > MAX_HEADER_SIZE => {
            return Err(ProtocolError::MalformedRtsp(format!(
                "header block exceeds {} bytes",
                MAX_HEADER_SIZE
            )))
        }
        None => return Ok(None),
    };

    let head = std::str::from_utf8(&buf[..header_end])
        .map_err(|e| ProtocolError::MalformedRtsp(e.to_string()))?;
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let (status, reason) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedRtsp(format!("bad header line {:?}", line)))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let body_len = match find_header(&headers, "Content-Length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| ProtocolError::MalformedRtsp(format!("bad Content-Length {:?}", v)))?,
        None => 0,
    };
    if body_len > MAX_BODY_SIZE {
        return Err(ProtocolError::MalformedRtsp(format!(
            "Content-Length {} exceeds {} bytes",
            body_len, MAX_BODY_SIZE
        )));
    }
    let body_start = header_end + 4;
    let end = body_start
        .checked_add(body_len)
        .ok_or_else(|| ProtocolError::MalformedRtsp(format!("bad Content-Length {}", body_len)))?;
    if buf.len() < end {
        return Ok(None);
    }
    let body = Bytes::copy_from_slice(&buf[body_start..end]);

    Ok(Some((
        RtspResponse {
            status,
            reason,
            headers,
            body,
        },
        end,
    )))
}

fn parse_status_line(line: &str) -> Result<(u16, String), ProtocolError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("RTSP/") {
        return Err(ProtocolError::MalformedRtsp(format!(
            "bad status line {:?}",
            line
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| ProtocolError::MalformedRtsp(format!("bad status code in {:?}", line)))?;
    let reason = parts.next().unwrap_or("").to_string();
    Ok((status, reason))
}

/// One entry of a `Transport` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSpec {
    pub profile: String,
    pub unicast: bool,
    pub client_port: Option<(u16, u16)>,
    pub server_port: Option<(u16, u16)>,
}

impl TransportSpec {
    /// RTP unicast delivery to an even/odd client port pair.
    pub fn rtp_unicast(client_port: u16) -> Self {
        Self {
            profile: RTP_PROFILE.to_string(),
            unicast: true,
            client_port: Some((client_port, client_port.saturating_add(1))),
            server_port: None,
        }
    }

    pub fn is_rtp(&self) -> bool {
        self.profile.starts_with(RTP_PROFILE)
    }

    /// Parse a single transport entry such as
    /// `RTP/AVP;unicast;client_port=40000-40001;server_port=6970-6971`.
    pub fn parse(entry: &str) -> Result<Self, ProtocolError> {
        let mut sections = entry.trim().split(';');
        let profile = sections.next().unwrap_or("").trim();
        if profile.is_empty() {
            return Err(ProtocolError::MalformedTransport(entry.to_string()));
        }

        let mut spec = Self {
            profile: profile.to_string(),
            unicast: false,
            client_port: None,
            server_port: None,
        };
        for section in sections {
            let (key, value) = match section.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (section.trim(), None),
            };
            match (key, value) {
                ("unicast", _) => spec.unicast = true,
                ("client_port", Some(v)) => spec.client_port = Some(parse_port_range(v)?),
                ("server_port", Some(v)) => spec.server_port = Some(parse_port_range(v)?),
                _ => {}
            }
        }
        Ok(spec)
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.profile)?;
        if self.unicast {
            f.write_str(";unicast")?;
        }
        if let Some((lo, hi)) = self.client_port {
            write!(f, ";client_port={}-{}", lo, hi)?;
        }
        if let Some((lo, hi)) = self.server_port {
            write!(f, ";server_port={}-{}", lo, hi)?;
        }
        Ok(())
    }
}

/// Parse every comma-separated entry of a `Transport` header value.
pub fn parse_transport_header(value: &str) -> Result<Vec<TransportSpec>, ProtocolError> {
    value
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(TransportSpec::parse)
        .collect()
}

fn parse_port_range(value: &str) -> Result<(u16, u16), ProtocolError> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u16>()
            .map_err(|_| ProtocolError::MalformedTransport(format!("bad port {:?}", value)))
    };
    match value.split_once('-') {
        Some((lo, hi)) => Ok((parse(lo)?, parse(hi)?)),
        None => {
            let lo = parse(value)?;
            Ok((lo, lo.saturating_add(1)))
        }
    }
}
