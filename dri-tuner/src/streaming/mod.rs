//! RTP delivery set up and torn down over RTSP.

mod client;
mod ports;

pub use client::{RtspClient, RtspCodec, RtspCodecError, TcpRtspConnector};
pub use ports::{select_port_pair, PortInventory, ProcNetInventory};

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, info, warn};

use dri_protocol::{parse_transport_header, RtspMethod, RtspRequest, RtspResponse, TransportSpec};

use crate::config::StreamingConfig;
use crate::device::StreamTuner;
use crate::error::{Result, TunerError};

/// A blocking request/response exchange with one RTSP server.
pub trait RtspExchange: Send {
    fn send(&mut self, request: RtspRequest) -> Result<RtspResponse>;
}

/// Opens exchanges to RTSP servers.
pub trait RtspConnector: Send + Sync {
    fn connect(&self, server_uri: &str) -> Result<Box<dyn RtspExchange>>;
}

/// Where the stream tuner picks up the RTP delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLocator {
    pub server_host: String,
    /// RTP port on the server, when it named one other than 0.
    pub server_port: Option<u16>,
    pub local_address: IpAddr,
    pub local_port: u16,
}

impl fmt::Display for StreamLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.server_port {
            Some(port) => write!(
                f,
                "rtp://{}:{}@{}:{}",
                self.server_host, port, self.local_address, self.local_port
            ),
            None => write!(
                f,
                "rtp://{}@{}:{}",
                self.server_host, self.local_address, self.local_port
            ),
        }
    }
}

struct ActiveSession {
    server_uri: String,
    session_id: String,
    exchange: Box<dyn RtspExchange>,
}

/// At most one live RTSP session for a tuner.
pub struct StreamingSession {
    tuner_id: String,
    server_host: String,
    local_address: IpAddr,
    config: StreamingConfig,
    connector: Arc<dyn RtspConnector>,
    ports: Arc<dyn PortInventory>,
    active: Option<ActiveSession>,
}

impl StreamingSession {
    pub fn new(
        tuner_id: impl Into<String>,
        server_host: impl Into<String>,
        local_address: IpAddr,
        config: StreamingConfig,
        connector: Arc<dyn RtspConnector>,
        ports: Arc<dyn PortInventory>,
    ) -> Self {
        Self {
            tuner_id: tuner_id.into(),
            server_host: server_host.into(),
            local_address,
            config,
            connector,
            ports,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.session_id.as_str())
    }

    /// Set up and play an RTP delivery from `server_uri`, then point the
    /// stream tuner at it. Does nothing while a session is live.
    ///
    /// The session is kept as soon as SETUP names it, so a later failure can
    /// still be torn down with [`stop`](Self::stop).
    pub fn start(&mut self, server_uri: &str, tuner: &mut dyn StreamTuner) -> Result<()> {
        if let Some(active) = &self.active {
            debug!(
                "[Tuner {}] Streaming already active, session {}",
                self.tuner_id, active.session_id
            );
            return Ok(());
        }
        debug!("[Tuner {}] Start streaming from {}", self.tuner_id, server_uri);

        let bound = self.ports.bound_ports()?;
        let mut local_port =
            select_port_pair(&bound, self.config.port_floor, self.config.port_ceiling)?;

        let mut exchange = self
            .connector
            .connect(server_uri)
            .map_err(|e| rejected_setup(0, e.to_string()))?;

        debug!(
            "[Tuner {}] Send RTSP SETUP, RTP client port = {}",
            self.tuner_id, local_port
        );
        let request = RtspRequest::new(RtspMethod::Setup, server_uri)
            .with_header("Transport", TransportSpec::rtp_unicast(local_port).to_string());
        let response = exchange
            .send(request)
            .map_err(|e| rejected_setup(0, e.to_string()))?;
        if !response.is_success() {
            return Err(rejected_setup(response.status, response.reason));
        }

        let session_id = response
            .session_id()
            .ok_or(TunerError::MissingSessionId)?
            .to_string();
        let transport = response.header("Transport").map(str::to_string);
        let active = self.active.insert(ActiveSession {
            server_uri: server_uri.to_string(),
            session_id,
            exchange,
        });

        let rtp = transport
            .as_deref()
            .and_then(|value| match parse_transport_header(value) {
                Ok(specs) => specs.into_iter().find(TransportSpec::is_rtp),
                Err(e) => {
                    warn!("[Tuner {}] {}", self.tuner_id, e);
                    None
                }
            })
            .ok_or(TunerError::MissingTransportInfo)?;

        if let Some((client_port, _)) = rtp.client_port {
            if client_port != local_port {
                warn!(
                    "[Tuner {}] Server specified RTP client port {} instead of {}",
                    self.tuner_id, client_port, local_port
                );
                local_port = client_port;
            }
        }
        let locator = StreamLocator {
            server_host: self.server_host.clone(),
            server_port: rtp.server_port.map(|(port, _)| port).filter(|p| *p != 0),
            local_address: self.local_address,
            local_port,
        };
        debug!(
            "[Tuner {}] RTSP SETUP okay, session ID = {}, RTP URL = {}",
            self.tuner_id, active.session_id, locator
        );

        debug!("[Tuner {}] Send RTSP PLAY", self.tuner_id);
        let request = RtspRequest::new(RtspMethod::Play, active.server_uri.as_str())
            .with_header("Session", active.session_id.as_str());
        let response = active
            .exchange
            .send(request)
            .map_err(|e| TunerError::PlayRejected {
                status: 0,
                reason: e.to_string(),
            })?;
        if !response.is_success() {
            return Err(TunerError::PlayRejected {
                status: response.status,
                reason: response.reason,
            });
        }
        info!(
            "[Tuner {}] Streaming session {} started, {}",
            self.tuner_id, active.session_id, locator
        );

        tuner.tune(&locator)
    }

    /// Tear down the live session, if any.
    ///
    /// The session is forgotten even when TEARDOWN fails.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        debug!(
            "[Tuner {}] Stop streaming, session {}",
            self.tuner_id, active.session_id
        );

        let request = RtspRequest::new(RtspMethod::Teardown, active.server_uri.as_str())
            .with_header("Session", active.session_id.as_str());
        let response = active
            .exchange
            .send(request)
            .map_err(|e| TunerError::TeardownRejected {
                status: 0,
                reason: e.to_string(),
            })?;
        if !response.is_success() {
            return Err(TunerError::TeardownRejected {
                status: response.status,
                reason: response.reason,
            });
        }
        info!(
            "[Tuner {}] Streaming session {} torn down",
            self.tuner_id, active.session_id
        );
        Ok(())
    }
}

fn rejected_setup(status: u16, reason: String) -> TunerError {
    TunerError::SetupRejected { status, reason }
}
