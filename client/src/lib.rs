#![deny(warnings)]

//! A TCP client that resolves a host, connects to the first reachable
//! address, exchanges one message and tears the connection down.

pub mod config;
pub mod error;
pub mod establish;
pub mod exchange;
pub mod resolve;

pub use {
    config::ClientConfig,
    error::{
        ClientError, ConfigError, ConnectError, HalfCloseError, ReceiveError, ResolutionError,
        SendError,
    },
    establish::{ConnectionEstablisher, TcpTransport, Transport},
    exchange::{exchange, Connection, ConnectionState, ExchangeReport, ReceiveOutcome, Sent},
    resolve::{AddressResolver, CandidateList, EndpointCandidate},
};

/// Resolves, connects and runs one exchange as described by `config`.
pub async fn run(config: &ClientConfig) -> Result<ExchangeReport, ClientError> {
    config.validate()?;

    let candidates = AddressResolver
        .resolve(&config.host, &config.port)
        .await?;

    let connection = ConnectionEstablisher::new(TcpTransport)
        .with_connect_timeout(config.connect_timeout())
        .establish(candidates)
        .await?;

    Ok(exchange(connection, config.message.as_bytes(), config.recv_buffer).await?)
}
