//! The ordered fallback loop over resolved candidates.

use {
    crate::{
        error::ConnectError,
        exchange::{Connection, ConnectionState},
        resolve::{AddressFamily, CandidateList, EndpointCandidate},
    },
    async_trait::async_trait,
    std::{io, time::Duration},
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::{TcpSocket, TcpStream},
        time,
    },
    tracing::log,
};

/// Allocates and connects transport endpoints for a candidate.
///
/// `connect` takes ownership of the allocated endpoint, so a failed attempt
/// releases it before the caller moves on.
#[async_trait]
pub trait Transport: Send + Sync {
    type Endpoint: Send;
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn allocate(&self, candidate: &EndpointCandidate) -> io::Result<Self::Endpoint>;

    async fn connect(
        &self,
        endpoint: Self::Endpoint,
        candidate: &EndpointCandidate,
    ) -> io::Result<Self::Stream>;
}

/// Plain TCP through tokio sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    type Endpoint = TcpSocket;
    type Stream = TcpStream;

    fn allocate(&self, candidate: &EndpointCandidate) -> io::Result<TcpSocket> {
        match candidate.family() {
            AddressFamily::Ipv4 => TcpSocket::new_v4(),
            AddressFamily::Ipv6 => TcpSocket::new_v6(),
        }
    }

    async fn connect(
        &self,
        endpoint: TcpSocket,
        candidate: &EndpointCandidate,
    ) -> io::Result<TcpStream> {
        endpoint.connect(candidate.address()).await
    }
}

pub struct ConnectionEstablisher<T = TcpTransport> {
    transport: T,
    connect_timeout: Option<Duration>,
}

impl<T: Transport> ConnectionEstablisher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connect_timeout: None,
        }
    }

    /// Bounds each individual connect attempt. An attempt that runs out of
    /// time counts as failed and the next candidate is tried.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Tries each candidate in order and returns the first connection that
    /// succeeds. Individual failures are logged and skipped; only
    /// exhaustion of the list is reported.
    pub async fn establish(
        &self,
        candidates: CandidateList,
    ) -> Result<Connection<T::Stream>, ConnectError> {
        let mut attempted = 0;
        let mut last = None;

        for candidate in candidates {
            attempted += 1;
            let address = candidate.address();

            let endpoint = match self.transport.allocate(&candidate) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    log::debug!("unable to allocate socket for {address}: {e}");
                    last = Some(e);
                    continue;
                }
            };

            log::debug!("attempting to connect to {address}");
            let state =
                ConnectionState::Unconnected.advance(ConnectionState::Connecting, address);

            match self.attempt(endpoint, &candidate).await {
                Ok(stream) => {
                    state.advance(ConnectionState::Connected, address);
                    log::info!("connected to {address}");
                    return Ok(Connection::new(stream, address));
                }
                Err(e) => {
                    state.advance(ConnectionState::Closed, address);
                    log::debug!("unable to connect to {address}: {e}");
                    last = Some(e);
                }
            }
        }

        Err(ConnectError { attempted, last })
    }

    async fn attempt(
        &self,
        endpoint: T::Endpoint,
        candidate: &EndpointCandidate,
    ) -> io::Result<T::Stream> {
        let connect = self.transport.connect(endpoint, candidate);

        match self.connect_timeout {
            Some(timeout) => time::timeout(timeout, connect).await.map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {timeout:?}"),
                )
            })?,
            None => connect.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        anyhow::Result,
        std::{
            collections::HashMap,
            net::{Ipv4Addr, Ipv6Addr, SocketAddr},
            pin::Pin,
            sync::{Arc, Mutex},
            task::{Context, Poll},
        },
        tokio::io::{duplex, DuplexStream, ReadBuf},
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Behavior {
        Connect,
        Refuse,
        NoSocket,
        Hang,
    }

    #[derive(Debug, Default)]
    struct Ledger {
        opened: HashMap<SocketAddr, usize>,
        closed: HashMap<SocketAddr, usize>,
        allocations: usize,
        /// Highest number of endpoints alive at the same time.
        peak_live: usize,
        live: usize,
    }

    impl Ledger {
        fn live(&self) -> usize {
            self.live
        }

        fn open(&mut self, address: SocketAddr) {
            self.allocations += 1;
            *self.opened.entry(address).or_default() += 1;
            self.live += 1;
            self.peak_live = self.peak_live.max(self.live);
        }

        fn close(&mut self, address: SocketAddr) {
            let closed = self.closed.entry(address).or_default();
            *closed += 1;
            assert!(
                *closed <= self.opened.get(&address).copied().unwrap_or(0),
                "{address} released more often than it was opened"
            );
            self.live -= 1;
        }
    }

    /// Releases its ledger entry exactly once, when dropped.
    struct Handle {
        address: SocketAddr,
        ledger: Arc<Mutex<Ledger>>,
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            self.ledger.lock().unwrap().close(self.address);
        }
    }

    /// An in-memory stream that carries the handle of the endpoint it was
    /// connected from, so dropping the stream releases the endpoint.
    struct TrackedStream {
        inner: DuplexStream,
        _handle: Handle,
    }

    impl AsyncRead for TrackedStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for TrackedStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    /// A transport whose per-address behavior is scripted and whose
    /// endpoints are counted on open and release.
    #[derive(Default)]
    struct ScriptedTransport {
        behaviors: HashMap<SocketAddr, Behavior>,
        ledger: Arc<Mutex<Ledger>>,
        /// Far ends of connected streams, kept so the streams stay open.
        peers: Mutex<Vec<DuplexStream>>,
    }

    impl ScriptedTransport {
        fn new(behaviors: impl IntoIterator<Item = (SocketAddr, Behavior)>) -> Self {
            Self {
                behaviors: behaviors.into_iter().collect(),
                ..Self::default()
            }
        }

        fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
            self.ledger.lock().unwrap()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        type Endpoint = Handle;
        type Stream = TrackedStream;

        fn allocate(&self, candidate: &EndpointCandidate) -> io::Result<Handle> {
            let address = candidate.address();
            if self.behaviors.get(&address) == Some(&Behavior::NoSocket) {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "address family not supported",
                ));
            }

            {
                let mut ledger = self.ledger.lock().unwrap();
                assert_eq!(0, ledger.live(), "previous endpoint still alive");
                ledger.open(address);
            }

            Ok(Handle {
                address,
                ledger: self.ledger.clone(),
            })
        }

        async fn connect(
            &self,
            endpoint: Handle,
            candidate: &EndpointCandidate,
        ) -> io::Result<TrackedStream> {
            match self.behaviors.get(&candidate.address()) {
                Some(Behavior::Connect) => {
                    let (near, far) = duplex(1024);
                    self.peers.lock().unwrap().push(far);
                    Ok(TrackedStream {
                        inner: near,
                        _handle: endpoint,
                    })
                }
                Some(Behavior::Hang) => {
                    let _endpoint = endpoint;
                    std::future::pending().await
                }
                _ => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            }
        }
    }

    fn v4(port: u16) -> SocketAddr {
        (Ipv4Addr::LOCALHOST, port).into()
    }

    fn v6(port: u16) -> SocketAddr {
        (Ipv6Addr::LOCALHOST, port).into()
    }

    #[tokio::test]
    async fn unreachable_then_reachable() -> Result<()> {
        let (a, b) = (v4(1), v4(2));
        let establisher = ConnectionEstablisher::new(ScriptedTransport::new([
            (a, Behavior::Refuse),
            (b, Behavior::Connect),
        ]));

        let connection = establisher.establish([a, b].into_iter().collect()).await?;
        assert_eq!(b, connection.peer());
        assert_eq!(ConnectionState::Connected, connection.state());

        {
            let ledger = establisher.transport().ledger();
            assert_eq!(Some(&1), ledger.opened.get(&a));
            assert_eq!(Some(&1), ledger.closed.get(&a));
            assert_eq!(Some(&1), ledger.opened.get(&b));
            assert_eq!(None, ledger.closed.get(&b));
            assert_eq!(1, ledger.peak_live);
        }

        connection.close();

        let ledger = establisher.transport().ledger();
        assert_eq!(Some(&1), ledger.closed.get(&b));
        assert_eq!(0, ledger.live());

        Ok(())
    }

    #[tokio::test]
    async fn first_connectable_wins() -> Result<()> {
        let addresses = [v6(1), v4(2), v4(3), v6(4)];
        let establisher = ConnectionEstablisher::new(ScriptedTransport::new([
            (addresses[0], Behavior::Refuse),
            (addresses[1], Behavior::Refuse),
            (addresses[2], Behavior::Connect),
            (addresses[3], Behavior::Connect),
        ]));

        let connection = establisher
            .establish(addresses.iter().copied().collect())
            .await?;
        assert_eq!(addresses[2], connection.peer());

        let ledger = establisher.transport().ledger();
        assert_eq!(None, ledger.opened.get(&addresses[3]));
        assert_eq!(3, ledger.allocations);
        assert_eq!(1, ledger.live());

        Ok(())
    }

    #[tokio::test]
    async fn exhaustion_counts_every_candidate() {
        let addresses = [v4(1), v6(2), v4(3)];
        let establisher = ConnectionEstablisher::new(ScriptedTransport::new([
            (addresses[0], Behavior::Refuse),
            (addresses[1], Behavior::NoSocket),
            (addresses[2], Behavior::Refuse),
        ]));

        let error = establisher
            .establish(addresses.iter().copied().collect())
            .await
            .err()
            .unwrap();

        assert_eq!(addresses.len(), error.attempted);
        assert_eq!(
            Some(io::ErrorKind::ConnectionRefused),
            error.last.as_ref().map(io::Error::kind)
        );

        let ledger = establisher.transport().ledger();
        assert_eq!(2, ledger.allocations);
        assert_eq!(0, ledger.live());
    }

    #[tokio::test]
    async fn allocation_failure_is_not_fatal() -> Result<()> {
        let (a, b) = (v6(1), v4(2));
        let establisher = ConnectionEstablisher::new(ScriptedTransport::new([
            (a, Behavior::NoSocket),
            (b, Behavior::Connect),
        ]));

        let connection = establisher.establish([a, b].into_iter().collect()).await?;
        assert_eq!(b, connection.peer());
        assert_eq!(None, establisher.transport().ledger().opened.get(&a));

        Ok(())
    }

    #[tokio::test]
    async fn empty_list_allocates_nothing() {
        let establisher = ConnectionEstablisher::new(ScriptedTransport::default());

        let error = establisher
            .establish(CandidateList::default())
            .await
            .err()
            .unwrap();

        assert_eq!(0, error.attempted);
        assert!(error.last.is_none());
        assert_eq!(0, establisher.transport().ledger().allocations);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_advances_to_next_candidate() -> Result<()> {
        let (a, b) = (v4(1), v4(2));
        let establisher = ConnectionEstablisher::new(ScriptedTransport::new([
            (a, Behavior::Hang),
            (b, Behavior::Connect),
        ]))
        .with_connect_timeout(Some(Duration::from_secs(5)));

        let connection = establisher.establish([a, b].into_iter().collect()).await?;
        assert_eq!(b, connection.peer());

        let ledger = establisher.transport().ledger();
        assert_eq!(Some(&1), ledger.closed.get(&a));
        assert_eq!(1, ledger.live());

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reported_as_last_error() {
        let a = v4(1);
        let establisher = ConnectionEstablisher::new(ScriptedTransport::new([(a, Behavior::Hang)]))
            .with_connect_timeout(Some(Duration::from_millis(250)));

        let error = establisher
            .establish([a].into_iter().collect())
            .await
            .err()
            .unwrap();

        assert_eq!(1, error.attempted);
        assert_eq!(
            Some(io::ErrorKind::TimedOut),
            error.last.as_ref().map(io::Error::kind)
        );
    }

    #[tokio::test]
    async fn refused_loopback_port() -> Result<()> {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let closed = listener.local_addr()?;
        drop(listener);

        let error = ConnectionEstablisher::new(TcpTransport)
            .establish([closed].into_iter().collect())
            .await
            .err()
            .unwrap();

        assert_eq!(1, error.attempted);
        assert!(error.last.is_some());

        Ok(())
    }
}
