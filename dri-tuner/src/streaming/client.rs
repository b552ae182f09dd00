//! Blocking RTSP client over a private tokio runtime.

use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::codec::{Decoder, Encoder, Framed};
use url::Url;

use dri_protocol::rtsp::DEFAULT_PORT;
use dri_protocol::{decode_response, encode_request, ProtocolError, RtspRequest, RtspResponse};

use crate::config::StreamingConfig;
use crate::error::{Result, TunerError};
use crate::streaming::{RtspConnector, RtspExchange};

#[derive(Error, Debug)]
pub enum RtspCodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Frames RTSP requests out and responses in, numbering requests as it goes.
#[derive(Debug, Default)]
pub struct RtspCodec {
    cseq: u32,
}

impl RtspCodec {
    /// Sequence number of the most recently encoded request.
    pub fn last_cseq(&self) -> u32 {
        self.cseq
    }
}

impl Decoder for RtspCodec {
    type Item = RtspResponse;
    type Error = RtspCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        match decode_response(&src[..])? {
            Some((response, used)) => {
                src.advance(used);
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<RtspRequest> for RtspCodec {
    type Error = RtspCodecError;

    fn encode(&mut self, item: RtspRequest, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        self.cseq = self.cseq.wrapping_add(1).max(1);
        encode_request(&item, self.cseq, dst);
        Ok(())
    }
}

/// One control connection to an RTSP server.
pub struct RtspClient {
    runtime: Runtime,
    framed: Framed<TcpStream, RtspCodec>,
    peer: String,
    user_agent: String,
    request_timeout: Duration,
}

impl RtspClient {
    /// Connect to the host and port named by an `rtsp://` URI.
    pub fn connect(server_uri: &str, config: &StreamingConfig) -> Result<Self> {
        let url = Url::parse(server_uri)
            .map_err(|e| TunerError::Internal(format!("invalid RTSP URI {}: {}", server_uri, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| TunerError::Internal(format!("RTSP URI {} has no host", server_uri)))?;
        let peer = format!("{}:{}", host, url.port().unwrap_or(DEFAULT_PORT));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TunerError::Internal(format!("failed to create runtime: {}", e)))?;

        debug!("Connecting to RTSP server {}", peer);
        let stream = runtime.block_on(async {
            tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&peer)).await
        });
        let stream = match stream {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(TunerError::Internal(format!(
                    "RTSP connect to {} failed: {}",
                    peer, e
                )))
            }
            Err(_) => {
                return Err(TunerError::Internal(format!(
                    "RTSP connect to {} timed out",
                    peer
                )))
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", peer, e);
        }
        info!("Connected to RTSP server {}", peer);

        Ok(Self {
            runtime,
            framed: Framed::new(stream, RtspCodec::default()),
            peer,
            user_agent: config.user_agent.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl RtspExchange for RtspClient {
    fn send(&mut self, request: RtspRequest) -> Result<RtspResponse> {
        let method = request.method;
        let request = request.with_header("User-Agent", self.user_agent.as_str());
        let timeout = self.request_timeout;
        let framed = &mut self.framed;

        let outcome = self.runtime.block_on(async {
            tokio::time::timeout(timeout, async {
                framed.send(request).await?;
                match framed.next().await {
                    Some(response) => response,
                    None => Err(RtspCodecError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed before response",
                    ))),
                }
            })
            .await
        });

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(TunerError::Internal(format!(
                    "RTSP {} to {} failed: {}",
                    method, self.peer, e
                )))
            }
            Err(_) => {
                return Err(TunerError::Internal(format!(
                    "RTSP {} to {} timed out after {:?}",
                    method, self.peer, timeout
                )))
            }
        };

        let sent = self.framed.codec().last_cseq();
        if response.cseq() != Some(sent) {
            warn!(
                "RTSP {} response CSeq {:?} does not match request {}",
                method,
                response.cseq(),
                sent
            );
        }
        trace!("RTSP {} -> {} {}", method, response.status, response.reason);
        Ok(response)
    }
}

/// Opens [`RtspClient`] connections over TCP.
pub struct TcpRtspConnector {
    config: StreamingConfig,
}

impl TcpRtspConnector {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }
}

impl RtspConnector for TcpRtspConnector {
    fn connect(&self, server_uri: &str) -> Result<Box<dyn RtspExchange>> {
        Ok(Box::new(RtspClient::connect(server_uri, &self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dri_protocol::{RtspMethod, TransportSpec};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_codec_numbers_requests() {
        let mut codec = RtspCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(RtspRequest::new(RtspMethod::Options, "*"), &mut buf)
            .unwrap();
        codec
            .encode(RtspRequest::new(RtspMethod::Options, "*"), &mut buf)
            .unwrap();
        let text = String::from_utf8(buf.to_vec()).unwrap();
        assert!(text.contains("CSeq: 1\r\n"));
        assert!(text.contains("CSeq: 2\r\n"));
        assert_eq!(codec.last_cseq(), 2);
    }

    #[test]
    fn test_codec_decodes_split_response() {
        let mut codec = RtspCodec::default();
        let mut buf = BytesMut::from(&b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"Session: 12345678\r\n\r\nRTSP/1.0");
        let response = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(response.session_id(), Some("12345678"));
        assert_eq!(&buf[..], b"RTSP/1.0");
    }

    #[test]
    fn test_setup_round_trip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut lines = Vec::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" {
                    break;
                }
                lines.push(line.trim_end().to_string());
            }
            let mut stream = stream;
            stream
                .write_all(
                    b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: ABCD;timeout=60\r\n\
                      Transport: RTP/AVP;unicast;client_port=40000-40001;server_port=6970-6971\r\n\r\n",
                )
                .unwrap();
            lines
        });

        let uri = format!("rtsp://127.0.0.1:{}/cablecard", port);
        let mut client = RtspClient::connect(&uri, &StreamingConfig::default()).unwrap();
        let response = client
            .send(
                RtspRequest::new(RtspMethod::Setup, uri.as_str())
                    .with_header("Transport", TransportSpec::rtp_unicast(40000).to_string()),
            )
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.session_id(), Some("ABCD"));

        let lines = server.join().unwrap();
        assert_eq!(lines[0], format!("SETUP {} RTSP/1.0", uri));
        assert!(lines.contains(&"CSeq: 1".to_string()));
        assert!(lines.contains(&"Transport: RTP/AVP;unicast;client_port=40000-40001".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("User-Agent: dri-tuner/")));
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let result = RtspClient::connect(
            &format!("rtsp://127.0.0.1:{}/", port),
            &StreamingConfig::default(),
        );
        assert!(matches!(result, Err(TunerError::Internal(_))));
    }
}
