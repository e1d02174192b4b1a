use {
    crate::error::ConfigError,
    clap::Parser,
    std::time::Duration,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: &str = "8080";
pub const DEFAULT_MESSAGE: &str = "Hello from Celestei CONNECT Client!";
pub const DEFAULT_RECEIVE_BUFFER: usize = 512;

/// Connect to a TCP server, send one message and wait for one reply.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "sockets-client", version)]
pub struct ClientConfig {
    /// Host name or IP address of the server
    #[arg(env = "SOCKETS_CLIENT_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port the server listens on
    #[arg(env = "SOCKETS_CLIENT_PORT", default_value = DEFAULT_PORT)]
    pub port: String,

    /// Message sent once the connection is established
    #[arg(long, env = "SOCKETS_CLIENT_MESSAGE", default_value = DEFAULT_MESSAGE)]
    pub message: String,

    /// Maximum number of bytes read from the reply
    #[arg(long, env = "SOCKETS_CLIENT_RECV_BUFFER", default_value_t = DEFAULT_RECEIVE_BUFFER)]
    pub recv_buffer: usize,

    /// Give up on an address after this many milliseconds and try the next one
    #[arg(long, env = "SOCKETS_CLIENT_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT.to_owned(),
            message: DEFAULT_MESSAGE.to_owned(),
            recv_buffer: DEFAULT_RECEIVE_BUFFER,
            connect_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.message.is_empty() {
            return Err(ConfigError::EmptyPayload);
        }
        if self.recv_buffer == 0 {
            return Err(ConfigError::ZeroReceiveBuffer);
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}
