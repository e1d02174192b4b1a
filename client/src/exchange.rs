//! A single send and receive over an established connection, followed by
//! teardown.

use {
    crate::error::{HalfCloseError, ReceiveError, SendError},
    std::net::SocketAddr,
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    tracing::log,
};

/// Lifecycle of a connection attempt. The establishment loop walks each
/// candidate through `Unconnected` and `Connecting`; a [`Connection`] is only
/// handed out once `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
    HalfClosed,
    Closed,
}

impl ConnectionState {
    /// `Closed` is reachable from every other state. No state is re-entered.
    pub fn can_advance_to(self, next: Self) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Unconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, HalfClosed)
                | (Unconnected | Connecting | Connected | HalfClosed, Closed)
        )
    }

    pub(crate) fn advance(self, next: Self, peer: SocketAddr) -> Self {
        debug_assert!(self.can_advance_to(next), "{peer}: {self:?} -> {next:?}");
        log::trace!("{peer}: {self:?} -> {next:?}");
        next
    }
}

/// An established stream to exactly one peer.
///
/// The stream is released when the connection is closed or dropped,
/// whichever happens first, and never more than once.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    state: ConnectionState,
}

/// Result of a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sent {
    pub bytes_sent: usize,
    pub requested: usize,
}

impl Sent {
    pub fn is_short(&self) -> bool {
        self.bytes_sent < self.requested
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Data(Vec<u8>),
    /// The peer ended its side of the stream.
    PeerClosed,
}

impl<S> Connection<S> {
    pub(crate) fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            state: ConnectionState::Connected,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Releases the underlying stream.
    pub fn close(mut self) {
        self.state = self.state.advance(ConnectionState::Closed, self.peer);
        log::debug!("closed connection to {}", self.peer);
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Issues one write of `payload`. A short write is returned as is; it is
    /// not retried.
    pub async fn send(&mut self, payload: &[u8]) -> Result<Sent, SendError> {
        let bytes_sent = self.stream.write(payload).await.map_err(SendError)?;
        self.stream.flush().await.map_err(SendError)?;

        let sent = Sent {
            bytes_sent,
            requested: payload.len(),
        };

        if sent.is_short() {
            log::warn!(
                "short write to {}: {} of {} bytes",
                self.peer,
                sent.bytes_sent,
                sent.requested
            );
        }

        Ok(sent)
    }

    /// Performs one read of at most `max_bytes`.
    pub async fn receive(&mut self, max_bytes: usize) -> Result<ReceiveOutcome, ReceiveError> {
        if max_bytes == 0 {
            return Err(ReceiveError::ZeroCapacity);
        }

        let mut buffer = vec![0; max_bytes];
        let count = self
            .stream
            .read(&mut buffer)
            .await
            .map_err(ReceiveError::Io)?;

        if count == 0 {
            log::debug!("{} closed the connection", self.peer);
            return Ok(ReceiveOutcome::PeerClosed);
        }

        buffer.truncate(count);
        Ok(ReceiveOutcome::Data(buffer))
    }

    /// Shuts down the sending direction; reads remain possible.
    pub async fn half_close(&mut self) -> Result<(), HalfCloseError> {
        self.stream.shutdown().await.map_err(HalfCloseError)?;
        if self.state == ConnectionState::Connected {
            self.state = self.state.advance(ConnectionState::HalfClosed, self.peer);
        }
        Ok(())
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        if self.state != ConnectionState::Closed {
            log::debug!("releasing connection to {} on drop", self.peer);
        }
    }
}

/// Everything the caller learns from one exchange.
#[derive(Debug)]
pub struct ExchangeReport {
    pub peer: SocketAddr,
    pub sent: Sent,
    pub received: Result<ReceiveOutcome, ReceiveError>,
    pub half_close: Result<(), HalfCloseError>,
}

/// Sends `payload`, reads at most `max_bytes` once, half-closes, and closes.
///
/// A failed send closes the connection immediately and is returned as the
/// error. Receive and half-close failures are recorded in the report and do
/// not stop teardown.
pub async fn exchange<S: AsyncRead + AsyncWrite + Unpin>(
    mut connection: Connection<S>,
    payload: &[u8],
    max_bytes: usize,
) -> Result<ExchangeReport, SendError> {
    let peer = connection.peer();

    let sent = match connection.send(payload).await {
        Ok(sent) => sent,
        Err(e) => {
            connection.close();
            return Err(e);
        }
    };

    log::info!("sent {} bytes to {peer}", sent.bytes_sent);

    let received = connection.receive(max_bytes).await;

    let half_close = connection.half_close().await;
    if let Err(e) = &half_close {
        log::warn!("{e}");
    }

    connection.close();

    Ok(ExchangeReport {
        peer,
        sent,
        received,
        half_close,
    })
}
