use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::{
    config::Config,
    demux::Demultiplexer,
    error::{AuthFailure, RconError, Result},
    packet::{Packet, PacketType, AUTH_FAILED_ID, AUTH_PACKET_ID},
    transport::Transport,
};

/// Simple asynchronous rcon client. Call `connect()` to establish a
/// connection and authenticate, then `send()` commands. The client should be
/// `mut` as its session keeps a counter used for [Packet] IDs.
///
/// ## Example
/// ```no_run
/// use asyncrcon::{client::Client, config::Config};
/// use std::error::Error;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let mut client = Client::new(Config::new("127.0.0.1", 27015, "<put rcon password here>"));
///     client.connect().await?;
///
///     let response = client.send("echo hi").await?;
///     assert_eq!(response, "hi\n");
///
///     client.close().await?;
///     Ok(())
/// }
/// ```
pub struct Client {
    config: Config,
    session: Option<Session>,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Client {
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Open a TCP connection to the configured host and authenticate.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(RconError::AlreadyConnected);
        }

        let host = self.config.host.as_str();
        let port = self.config.port;
        let stream = match timeout(self.config.timeout, TcpStream::connect((host, port))).await {
            Ok(stream) => stream,
            Err(_) => Err(std::io::ErrorKind::TimedOut.into()),
        }
        .map_err(|source| RconError::ConnectionFailed {
            host: host.to_string(),
            port,
            source,
        })?;

        trace!("opened tcp stream to {}, attempting auth", self.config.address());

        self.connect_with(stream).await
    }

    /// Authenticate over an already established stream.
    pub async fn connect_with<S>(&mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.is_connected() {
            return Err(RconError::AlreadyConnected);
        }

        self.session = Some(Session::handshake(stream, &self.config).await?);
        Ok(())
    }

    /// Run a rcon command. In case of a response being split between
    /// multiple packets, they will be joined together.
    pub async fn send(&mut self, command: &str) -> Result<String> {
        self.session
            .as_mut()
            .ok_or(RconError::NotConnected)?
            .send(command)
            .await
    }

    /// Close the connection. Closing a client that is not connected fails
    /// with [`RconError::NotConnected`].
    pub async fn close(&mut self) -> Result<()> {
        let session = self.session.take().ok_or(RconError::NotConnected)?;
        session.close().await;
        Ok(())
    }
}

/// An authenticated connection. Only exists after a successful handshake.
pub struct Session {
    transport: Transport,
    demux: Arc<Demultiplexer>,
    next_packet_id: i32,
    timeout: Duration,
}

impl Session {
    pub async fn handshake<S>(stream: S, config: &Config) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let demux = Arc::new(Demultiplexer::new());
        let mut transport = Transport::spawn(stream, demux.clone());

        authenticate(&mut transport, &demux, &config.password, config.timeout).await?;

        trace!("auth complete");

        Ok(Session {
            transport,
            demux,
            next_packet_id: AUTH_PACKET_ID + 1,
            timeout: config.timeout,
        })
    }

    pub async fn send(&mut self, command: &str) -> Result<String> {
        // wraps after i32::MAX commands; ids are not checked for reuse
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1);

        let command_packet = Packet::new(id, PacketType::Exec, command).pack()?;
        // srcds can split up the response but won't tell us how many packets
        // to expect, so we follow up with a blank packet. Responses arrive in
        // order, so its empty echo marks the end of the real response.
        let tracking_packet = Packet::new(id, PacketType::Response, "").pack()?;

        trace!("sending main and tracking (blank) packets {} to server", id);
        self.transport
            .send(&[&command_packet[..], &tracking_packet[..]], self.timeout)
            .await?;

        let mut body = String::new();
        loop {
            let response = self.demux.wait_for(id, self.timeout).await?;
            if response.body().is_empty() {
                trace!("that was the tracking packet, completing response");
                break;
            }
            trace!("received fragment of {} bytes for packet id {}", response.body().len(), id);
            body.push_str(response.body());
        }

        Ok(body)
    }

    pub async fn close(self) {
        debug!("closing rcon session");
        self.transport.close(self.timeout).await;
    }
}

enum Verdict {
    Accepted(Packet),
    Rejected,
}

/// Listen for both the success id and the failure sentinel; whichever
/// arrives first wins and the other wait is dropped.
async fn verdict(demux: &Demultiplexer) -> Result<Verdict> {
    tokio::select! {
        biased;
        rejected = demux.wait(AUTH_FAILED_ID) => rejected.map(|_| Verdict::Rejected),
        accepted = demux.wait(AUTH_PACKET_ID) => accepted.map(Verdict::Accepted),
    }
}

async fn authenticate(
    transport: &mut Transport,
    demux: &Demultiplexer,
    password: &str,
    limit: Duration,
) -> Result<()> {
    let auth_packet = Packet::new(AUTH_PACKET_ID, PacketType::Auth, password).pack()?;

    trace!("sending auth packet to server");
    transport.send(&[&auth_packet[..]], limit).await?;

    // srcds echoes an empty response value before the real verdict
    match timeout(limit, verdict(demux)).await?? {
        Verdict::Rejected => {
            return Err(RconError::AuthenticationFailed(
                AuthFailure::IncorrectPassword,
            ));
        }
        Verdict::Accepted(echo) => trace!("discarding auth echo of type {}", echo.kind()),
    }

    match timeout(limit, verdict(demux)).await {
        Err(_) => Err(RconError::AuthenticationFailed(AuthFailure::NoResponse)),
        Ok(verdict) => match verdict? {
            Verdict::Rejected => Err(RconError::AuthenticationFailed(
                AuthFailure::IncorrectPassword,
            )),
            Verdict::Accepted(_) => Ok(()),
        },
    }
}
