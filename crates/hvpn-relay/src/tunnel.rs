//! Tunnel sessions: two duplex handles and the two loops that pump bytes
//! between them.

use crate::duplex::{BoxDuplex, DuplexRead, DuplexWrite};
use crate::error::TransportError;
use crate::metrics::counters;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bytes moved per read.
pub const CHUNK_SIZE: usize = 4096;

/// How long a loop waits for its destination to close before dropping it.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of one inbound tunnel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade request received, not yet checked.
    AwaitingUpgrade,
    /// Origin and subprotocol accepted; both handles are being acquired.
    HandshakeValidated,
    /// Bytes are flowing.
    Tunneling,
    /// Both handles released.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingUpgrade => "awaiting_upgrade",
            Self::HandshakeValidated => "handshake_validated",
            Self::Tunneling => "tunneling",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Why a forwarding loop stopped.
#[derive(Debug)]
pub enum PumpEnd {
    /// The source reached end of stream.
    Eof,
    /// The other loop ended first.
    Cancelled,
    /// Reading from the source failed.
    ReadFailed(TransportError),
    /// Writing to the destination failed.
    WriteFailed(TransportError),
}

impl PumpEnd {
    fn label(&self) -> &'static str {
        match self {
            Self::Eof => "eof",
            Self::Cancelled => "cancelled",
            Self::ReadFailed(_) => "read_error",
            Self::WriteFailed(_) => "write_error",
        }
    }
}

/// Outcome of one forwarding loop.
#[derive(Debug)]
pub struct PumpReport {
    /// Bytes written to the destination.
    pub bytes: u64,
    /// Why the loop stopped.
    pub end: PumpEnd,
}

/// Outcome of a whole session.
#[derive(Debug)]
pub struct SessionReport {
    /// Client to egress.
    pub upstream: PumpReport,
    /// Egress to client.
    pub downstream: PumpReport,
}

impl SessionReport {
    /// `true` if neither loop hit a transport error.
    #[must_use]
    pub fn clean(&self) -> bool {
        !matches!(
            self.upstream.end,
            PumpEnd::ReadFailed(_) | PumpEnd::WriteFailed(_)
        ) && !matches!(
            self.downstream.end,
            PumpEnd::ReadFailed(_) | PumpEnd::WriteFailed(_)
        )
    }
}

/// A validated session holding both of its duplex handles.
pub struct TunnelSession {
    client: BoxDuplex,
    egress: BoxDuplex,
    close_timeout: Duration,
}

impl TunnelSession {
    /// Pairs a client leg with an egress leg.
    #[must_use]
    pub fn new(client: BoxDuplex, egress: BoxDuplex) -> Self {
        Self {
            client,
            egress,
            close_timeout: CLOSE_TIMEOUT,
        }
    }

    /// Overrides how long each side may take to close.
    #[must_use]
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Relays bytes both ways until either side closes or fails, then
    /// closes both sides. Both loops have stopped when this returns.
    pub async fn run(self) -> SessionReport {
        let client_kind = self.client.kind();
        let egress_kind = self.egress.kind();
        debug!(client = client_kind, egress = egress_kind, state = %SessionState::Tunneling, "session started");

        let (client_rx, client_tx) = self.client.split();
        let (egress_rx, egress_tx) = self.egress.split();
        let cancel = CancellationToken::new();

        let close_timeout = self.close_timeout;
        let upstream = tokio::spawn(pump(
            client_rx,
            egress_tx,
            cancel.clone(),
            close_timeout,
            "upstream",
        ));
        let downstream = tokio::spawn(pump(
            egress_rx,
            client_tx,
            cancel.clone(),
            close_timeout,
            "downstream",
        ));

        let (upstream, downstream) = tokio::join!(upstream, downstream);
        let report = SessionReport {
            upstream: joined(upstream),
            downstream: joined(downstream),
        };
        debug!(
            up_bytes = report.upstream.bytes,
            down_bytes = report.downstream.bytes,
            up_end = report.upstream.end.label(),
            down_end = report.downstream.end.label(),
            state = %SessionState::Closed,
            "session ended"
        );
        report
    }
}

fn joined(result: Result<PumpReport, tokio::task::JoinError>) -> PumpReport {
    result.unwrap_or_else(|e| PumpReport {
        bytes: 0,
        end: PumpEnd::ReadFailed(TransportError::Io(std::io::Error::other(e.to_string()))),
    })
}

/// Copies `src` to `dst` one chunk at a time until EOF, an error, or
/// cancellation. On exit it cancels the peer loop and closes `dst`, giving
/// up after `close_timeout` if the peer no longer reads.
async fn pump(
    mut src: Box<dyn DuplexRead>,
    mut dst: Box<dyn DuplexWrite>,
    cancel: CancellationToken,
    close_timeout: Duration,
    direction: &'static str,
) -> PumpReport {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;

    let end = loop {
        let n = tokio::select! {
            () = cancel.cancelled() => break PumpEnd::Cancelled,
            read = src.read_chunk(&mut buf) => match read {
                Ok(0) => break PumpEnd::Eof,
                Ok(n) => n,
                Err(e) => break PumpEnd::ReadFailed(e),
            },
        };
        tokio::select! {
            () = cancel.cancelled() => break PumpEnd::Cancelled,
            written = dst.write_chunk(&buf[..n]) => {
                if let Err(e) = written {
                    break PumpEnd::WriteFailed(e);
                }
            }
        }
        bytes += n as u64;
        counters::bytes_relayed_total(direction, n as u64);
    };

    if let PumpEnd::ReadFailed(ref e) | PumpEnd::WriteFailed(ref e) = end {
        debug!(direction, "tunnel leg failed: {}", e);
    }
    cancel.cancel();
    match tokio::time::timeout(close_timeout, dst.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(direction, "close after {} failed: {}", end.label(), e),
        Err(_) => debug!(direction, "close after {} timed out", end.label()),
    }
    PumpReport { bytes, end }
}
