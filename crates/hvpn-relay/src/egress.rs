//! Where a session's second leg comes from.
//!
//! Each relay has one fixed egress. `echo` returns the client's bytes to it
//! through an in-process pipe, `ws://`/`wss://` dials the next tunnel hop,
//! and `tcp://host:port` dials a raw socket.

use crate::duplex::{BoxDuplex, StreamDuplex, WsDuplex};
use crate::error::{EgressError, TransportError};
use crate::tunnel::CHUNK_SIZE;
use hvpn_common::endpoint::validate_relay_url;
use hvpn_common::types::TUNNEL_SUBPROTOCOL;
use std::fmt;
use std::str::FromStr;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::debug;
use url::Url;

/// Egress destination for every session on this relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Egress {
    /// Bytes come straight back to the client.
    Echo,
    /// Next tunnel hop.
    WebSocket(Url),
    /// Raw TCP destination as `host:port`.
    Tcp(String),
}

impl FromStr for Egress {
    type Err = EgressError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("echo") {
            return Ok(Self::Echo);
        }
        let invalid = |reason: String| EgressError::Invalid(raw.to_string(), reason);
        if let Some(target) = raw.strip_prefix("tcp://") {
            let target = target.trim_end_matches('/');
            let (host, port) = target
                .rsplit_once(':')
                .ok_or_else(|| invalid("expected tcp://host:port".to_string()))?;
            if host.is_empty() {
                return Err(invalid("missing host".to_string()));
            }
            port.parse::<u16>()
                .map_err(|_| invalid(format!("bad port {port:?}")))?;
            return Ok(Self::Tcp(target.to_string()));
        }
        let url = validate_relay_url(raw).map_err(|e| invalid(e.to_string()))?;
        Ok(Self::WebSocket(url))
    }
}

impl fmt::Display for Egress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Echo => f.write_str("echo"),
            Self::WebSocket(url) => write!(f, "{url}"),
            Self::Tcp(target) => write!(f, "tcp://{target}"),
        }
    }
}

impl Egress {
    /// Opens the egress leg for one session.
    ///
    /// # Errors
    ///
    /// [`EgressError::Dial`] if the destination cannot be reached.
    pub async fn dial(&self) -> Result<BoxDuplex, EgressError> {
        match self {
            Self::Echo => Ok(echo_leg()),
            Self::Tcp(target) => {
                let stream = TcpStream::connect(target.as_str())
                    .await
                    .map_err(TransportError::from)?;
                stream.set_nodelay(true).map_err(TransportError::from)?;
                debug!(%target, "egress tcp connected");
                Ok(Box::new(StreamDuplex::new(stream, "tcp")))
            }
            Self::WebSocket(url) => {
                let mut request = url
                    .as_str()
                    .into_client_request()
                    .map_err(|e| TransportError::WebSocket(Box::new(e)))?;
                request.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    HeaderValue::from_static(TUNNEL_SUBPROTOCOL),
                );
                let (ws, _) = tokio_tungstenite::connect_async(request)
                    .await
                    .map_err(|e| TransportError::WebSocket(Box::new(e)))?;
                debug!(%url, "egress hop connected");
                Ok(Box::new(WsDuplex::new(ws, "ws-hop")))
            }
        }
    }
}

/// A pipe whose far end writes back everything it reads.
fn echo_leg() -> BoxDuplex {
    let (near, far) = tokio::io::duplex(CHUNK_SIZE * 4);
    tokio::spawn(async move {
        let (mut reader, mut writer) = tokio::io::split(far);
        if let Err(e) = tokio::io::copy(&mut reader, &mut writer).await {
            debug!("echo egress stopped: {}", e);
        }
    });
    Box::new(StreamDuplex::new(near, "echo"))
}
