use std::fmt;

use thiserror::Error;
use tokio::time::error::Elapsed;

/// Why the server refused to authenticate us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Neither a success nor a failure response arrived in time.
    NoResponse,
    /// The server answered with the `-1` packet id.
    IncorrectPassword,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::NoResponse => f.write_str("no authentication response"),
            AuthFailure::IncorrectPassword => f.write_str("incorrect password"),
        }
    }
}

/// Possible errors for the package.
#[derive(Error, Debug)]
pub enum RconError {
    /// Returned if the host is down, behind a firewall, or has banned us.
    #[error(
        "could not connect to {host}:{port}; the host/port may be incorrect, \
         or you may be banned/blacklisted"
    )]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    /// Returned if you can't remember the password, or the server never
    /// answered the login.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(AuthFailure),
    /// Returned if a received frame violates the size bounds or is not
    /// valid ascii.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// Returned if an outgoing body can't be put on the wire.
    #[error("cannot encode frame: {0}")]
    EncodingError(String),
    /// Returned if the server did not respond in time.
    #[error("timed out waiting for a response")]
    ResponseTimeout(#[from] Elapsed),
    /// Returned if a command is issued on a client without a session.
    #[error("connection is closed")]
    NotConnected,
    /// Returned if `connect` is called on a client that already has a session.
    #[error("client is already connected")]
    AlreadyConnected,
    /// Internal error used if the stream was successfully established, but
    /// there was a problem writing to the socket.
    #[error("cannot send message to host")]
    SendError(#[source] std::io::Error),
    /// Returned if the server hung up while we were waiting for a response.
    #[error("connection closed by host")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, RconError>;
