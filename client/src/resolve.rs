//! Host and port resolution into ordered connection candidates.

use {
    crate::error::ResolutionError,
    dns_lookup::{AddrInfoHints, Protocol as IpProtocol, SockType},
    std::{
        io,
        net::{IpAddr, SocketAddr},
        slice, vec,
    },
    tokio::task,
    tracing::log,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
}

/// One resolved address that a connection may be attempted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointCandidate {
    family: AddressFamily,
    socket_type: SocketType,
    protocol: Protocol,
    address: SocketAddr,
}

impl EndpointCandidate {
    pub fn tcp(address: SocketAddr) -> Self {
        Self {
            family: match address {
                SocketAddr::V4(_) => AddressFamily::Ipv4,
                SocketAddr::V6(_) => AddressFamily::Ipv6,
            },
            socket_type: SocketType::Stream,
            protocol: Protocol::Tcp,
            address,
        }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

/// Candidates in the order they should be attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateList(Vec<EndpointCandidate>);

impl CandidateList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, EndpointCandidate> {
        self.0.iter()
    }
}

impl FromIterator<SocketAddr> for CandidateList {
    fn from_iter<I: IntoIterator<Item = SocketAddr>>(iter: I) -> Self {
        Self(iter.into_iter().map(EndpointCandidate::tcp).collect())
    }
}

impl IntoIterator for CandidateList {
    type Item = EndpointCandidate;
    type IntoIter = vec::IntoIter<EndpointCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Resolves `(host, port)` through the system resolver, keeping stream
/// results in the order the resolver returned them.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressResolver;

impl AddressResolver {
    pub async fn resolve(&self, host: &str, port: &str) -> Result<CandidateList, ResolutionError> {
        let port = parse_port(port)?;

        let candidates = if let Some(ip) = parse_literal(host) {
            CandidateList::from_iter([SocketAddr::new(ip, port)])
        } else {
            let name = host.to_owned();
            task::spawn_blocking(move || lookup(&name, port))
                .await
                .map_err(|e| ResolutionError::Lookup {
                    host: host.to_owned(),
                    code: None,
                    source: io::Error::new(io::ErrorKind::Other, e),
                })??
        };

        if candidates.is_empty() {
            return Err(ResolutionError::NoCandidates {
                host: host.to_owned(),
            });
        }

        log::debug!(
            "resolved {host:?} to {:?}",
            candidates.iter().map(EndpointCandidate::address).collect::<Vec<_>>()
        );

        Ok(candidates)
    }
}

/// Blocking `getaddrinfo` restricted to stream sockets over TCP.
fn lookup(host: &str, port: u16) -> Result<CandidateList, ResolutionError> {
    let hints = AddrInfoHints {
        socktype: SockType::Stream.into(),
        protocol: IpProtocol::TCP.into(),
        ..AddrInfoHints::default()
    };

    let infos = dns_lookup::getaddrinfo(Some(host), None, Some(hints)).map_err(|e| {
        ResolutionError::Lookup {
            host: host.to_owned(),
            code: Some(e.error_num()),
            source: io::Error::from(e),
        }
    })?;

    let stream = i32::from(SockType::Stream);

    Ok(infos
        .filter_map(|info| match info {
            Ok(info) if info.socktype == stream => {
                let mut address = info.sockaddr;
                address.set_port(port);
                Some(address)
            }
            Ok(_) => None,
            Err(e) => {
                log::debug!("skipping unusable address for {host:?}: {e}");
                None
            }
        })
        .collect())
}

/// Decimal digits only, in `1..=65535`.
fn parse_port(port: &str) -> Result<u16, ResolutionError> {
    let invalid = || ResolutionError::InvalidPort(port.to_owned());

    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid()),
        Ok(port) => Ok(port),
    }
}

fn parse_literal(host: &str) -> Option<IpAddr> {
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.parse().ok()
}
