//! A scripted in-process RCON server that answers the way srcds does.

use std::net::SocketAddr;

use asyncrcon::packet::{Packet, PacketType, AUTH_FAILED_ID};
use log::{error, info};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// Largest body srcds puts in a single response packet.
const MAX_BODY: usize = 4096 - 10;

#[derive(Clone, Copy)]
pub enum Mode {
    /// Answer commands with the handler's output, then echo the tracking packet.
    Respond,
    /// Accept logins but never answer a command.
    Silent,
}

pub struct Server {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Server {
    pub async fn start(password: &'static str, mode: Mode, handler: fn(&str) -> String) -> Server {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle: JoinHandle<()> = tokio::spawn(async move {
            info!("server running on {}", addr);
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tokio::spawn(Server::process(stream, peer, password, mode, handler));
                    }
                    Err(e) => error!("{:?}", e),
                }
            }
        });

        Server { addr, handle }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    async fn process(
        mut stream: TcpStream,
        addr: SocketAddr,
        password: &'static str,
        mode: Mode,
        handler: fn(&str) -> String,
    ) {
        info!("accept from {:?}", addr);

        while let Some(packet) = read_packet(&mut stream).await {
            let id = packet.id();
            let mut replies = Vec::new();

            if packet.is(PacketType::Auth) {
                let verdict = if packet.body() == password { id } else { AUTH_FAILED_ID };
                replies.push(Packet::new(id, PacketType::Response, ""));
                replies.push(Packet::new(verdict, PacketType::AuthResponse, ""));
            } else if let Mode::Silent = mode {
                continue;
            } else if packet.is(PacketType::Exec) {
                let output = handler(packet.body());
                for chunk in output.as_bytes().chunks(MAX_BODY) {
                    let chunk = String::from_utf8_lossy(chunk);
                    replies.push(Packet::new(id, PacketType::Response, chunk));
                }
            } else if packet.is(PacketType::Response) {
                replies.push(Packet::new(id, PacketType::Response, ""));
            }

            for reply in replies {
                if stream.write_all(&reply.pack().unwrap()).await.is_err() {
                    return;
                }
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_packet(stream: &mut TcpStream) -> Option<Packet> {
    let size = stream.read_i32_le().await.ok()?;
    let mut frame = size.to_le_bytes().to_vec();
    frame.resize(usize::try_from(size).ok()? + 4, 0);
    stream.read_exact(&mut frame[4..]).await.ok()?;

    Packet::unpack(&frame).ok()
}

/// A port nobody is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
