use {std::io, thiserror::Error};

/// The host and port could not be turned into any usable candidate.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("unable to resolve {host:?}: {source}")]
    Lookup {
        host: String,
        /// Diagnostic code reported by the system resolver, if any.
        code: Option<i32>,
        #[source]
        source: io::Error,
    },

    #[error("{host:?} resolved to no stream candidates")]
    NoCandidates { host: String },
}

impl ResolutionError {
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Lookup { code, .. } => *code,
            _ => None,
        }
    }
}

/// Every candidate was tried and none produced a connection.
#[derive(Debug, Error)]
#[error("unable to connect after {attempted} attempt(s){}", describe_last(.last))]
pub struct ConnectError {
    pub attempted: usize,
    /// The most recent low-level failure; `None` when nothing was attempted.
    #[source]
    pub last: Option<io::Error>,
}

fn describe_last(last: &Option<io::Error>) -> String {
    match last {
        Some(e) => format!(": {e}"),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
#[error("send failed: {0}")]
pub struct SendError(#[source] pub io::Error);

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("receive failed: {0}")]
    Io(#[source] io::Error),

    #[error("receive buffer capacity must be at least one byte")]
    ZeroCapacity,
}

#[derive(Debug, Error)]
#[error("half-close failed: {0}")]
pub struct HalfCloseError(#[source] pub io::Error);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("payload must not be empty")]
    EmptyPayload,

    #[error("receive buffer capacity must be at least one byte")]
    ZeroReceiveBuffer,
}

/// The fatal outcomes of a client run.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Send(#[from] SendError),
}

impl ClientError {
    /// The underlying OS or resolver diagnostic code, when one is known.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Config(_) => None,
            Self::Resolution(e) => e.code(),
            Self::Connect(e) => e.last.as_ref().and_then(io::Error::raw_os_error),
            Self::Send(e) => e.0.raw_os_error(),
        }
    }
}
