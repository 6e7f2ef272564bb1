//! Pure Rust async client for the [Source RCON protocol](https://developer.valvesoftware.com/wiki/Source_RCON_Protocol).
pub mod client;
pub mod config;
pub mod demux;
pub mod error;
pub mod packet;
mod transport;

use std::time::Duration;

pub use client::{Client, Session};
pub use config::Config;
pub use error::{AuthFailure, RconError, Result};

/// Connect to `host:port`, authenticate with `password` and return a ready
/// client. Every wait for the server is bounded by `timeout`.
pub async fn connect(
    host: &str,
    port: u16,
    password: &str,
    timeout: Duration,
) -> Result<Client> {
    let mut client = Client::new(Config::new(host, port, password).with_timeout(timeout));
    client.connect().await?;
    Ok(client)
}
