//! One read/write/close abstraction over every transport a tunnel leg can
//! use: WebSocket (server or client side), TCP, or an in-process pipe.

use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Receiving half of a duplex stream.
#[async_trait]
pub trait DuplexRead: Send {
    /// Reads up to `buf.len()` bytes. `Ok(0)` means the peer closed.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Sending half of a duplex stream.
#[async_trait]
pub trait DuplexWrite: Send {
    /// Writes all of `data`.
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Signals end of stream to the peer.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A bidirectional byte stream that can be split into independently owned
/// halves.
pub trait Duplex: Send {
    /// Short transport label for logs.
    fn kind(&self) -> &'static str;

    /// Splits into read and write halves.
    fn split(self: Box<Self>) -> (Box<dyn DuplexRead>, Box<dyn DuplexWrite>);
}

/// Boxed duplex handle.
pub type BoxDuplex = Box<dyn Duplex>;

// ---------------------------------------------------------------------------
// Byte streams (TCP, pipes)
// ---------------------------------------------------------------------------

/// Any tokio byte stream.
pub struct StreamDuplex<S> {
    inner: S,
    kind: &'static str,
}

impl<S> StreamDuplex<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps `inner`, labelled `kind` in logs.
    pub fn new(inner: S, kind: &'static str) -> Self {
        Self { inner, kind }
    }
}

struct StreamReader<S>(tokio::io::ReadHalf<S>);
struct StreamWriter<S>(tokio::io::WriteHalf<S>);

#[async_trait]
impl<S> DuplexRead for StreamReader<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.0.read(buf).await?)
    }
}

#[async_trait]
impl<S> DuplexWrite for StreamWriter<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.0.write_all(data).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0.shutdown().await?;
        Ok(())
    }
}

impl<S> Duplex for StreamDuplex<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn split(self: Box<Self>) -> (Box<dyn DuplexRead>, Box<dyn DuplexWrite>) {
        let (r, w) = tokio::io::split(self.inner);
        (Box::new(StreamReader(r)), Box::new(StreamWriter(w)))
    }
}

// ---------------------------------------------------------------------------
// WebSockets
// ---------------------------------------------------------------------------

/// What an inbound WebSocket message means for the byte stream.
pub enum Inbound {
    /// Payload bytes.
    Data(Vec<u8>),
    /// Control frame with no payload for the tunnel.
    Control,
    /// Peer closed the connection.
    Close,
}

/// Message types the WebSocket duplex can carry.
pub trait WsMessage: Send + 'static {
    /// Classifies an inbound message.
    fn inbound(self) -> Inbound;
    /// Builds an outbound binary message.
    fn binary(data: Vec<u8>) -> Self;
    /// Builds an outbound close message.
    fn close() -> Self;
}

impl WsMessage for axum::extract::ws::Message {
    fn inbound(self) -> Inbound {
        use axum::extract::ws::Message;
        match self {
            Message::Binary(data) => Inbound::Data(data),
            Message::Text(text) => Inbound::Data(text.into_bytes()),
            Message::Ping(_) | Message::Pong(_) => Inbound::Control,
            Message::Close(_) => Inbound::Close,
        }
    }

    fn binary(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }

    fn close() -> Self {
        Self::Close(None)
    }
}

impl WsMessage for tokio_tungstenite::tungstenite::Message {
    fn inbound(self) -> Inbound {
        use tokio_tungstenite::tungstenite::Message;
        match self {
            Message::Binary(data) => Inbound::Data(data),
            Message::Text(text) => Inbound::Data(text.into_bytes()),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Control,
            Message::Close(_) => Inbound::Close,
        }
    }

    fn binary(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }

    fn close() -> Self {
        Self::Close(None)
    }
}

/// A WebSocket connection viewed as a byte stream. Every binary or text
/// message contributes its payload; message boundaries are not preserved.
pub struct WsDuplex<S> {
    inner: S,
    kind: &'static str,
}

impl<S> WsDuplex<S> {
    /// Wraps a WebSocket, labelled `kind` in logs.
    pub fn new(inner: S, kind: &'static str) -> Self {
        Self { inner, kind }
    }
}

struct WsReader<S> {
    stream: SplitStream<S>,
    pending: Vec<u8>,
    offset: usize,
}

struct WsWriter<S, M> {
    sink: SplitSink<S, M>,
}

fn ws_error<E>(e: E) -> TransportError
where
    E: std::error::Error + Send + Sync + 'static,
{
    TransportError::WebSocket(Box::new(e))
}

#[async_trait]
impl<S, M, E> DuplexRead for WsReader<S>
where
    S: Stream<Item = Result<M, E>> + Sink<M, Error = E> + Send + Unpin + 'static,
    M: WsMessage,
    E: std::error::Error + Send + Sync + 'static,
{
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.pending.len() {
            match self.stream.next().await {
                None => return Ok(0),
                Some(Err(e)) => return Err(ws_error(e)),
                Some(Ok(message)) => match message.inbound() {
                    Inbound::Data(data) => {
                        self.pending = data;
                        self.offset = 0;
                    }
                    Inbound::Control => {}
                    Inbound::Close => return Ok(0),
                },
            }
        }
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

#[async_trait]
impl<S, M, E> DuplexWrite for WsWriter<S, M>
where
    S: Stream<Item = Result<M, E>> + Sink<M, Error = E> + Send + Unpin + 'static,
    M: WsMessage,
    E: std::error::Error + Send + Sync + 'static,
{
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.sink.send(M::binary(data.to_vec())).await.map_err(ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // The peer may already be gone.
        let _ = self.sink.send(M::close()).await;
        self.sink.close().await.map_err(ws_error)
    }
}

impl<S, M, E> Duplex for WsDuplex<S>
where
    S: Stream<Item = Result<M, E>> + Sink<M, Error = E> + Send + Unpin + 'static,
    M: WsMessage,
    E: std::error::Error + Send + Sync + 'static,
{
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn split(self: Box<Self>) -> (Box<dyn DuplexRead>, Box<dyn DuplexWrite>) {
        let (sink, stream) = self.inner.split();
        (
            Box::new(WsReader {
                stream,
                pending: Vec::new(),
                offset: 0,
            }),
            Box::new(WsWriter { sink }),
        )
    }
}
