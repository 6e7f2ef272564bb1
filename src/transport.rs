//! Byte-stream plumbing underneath a session.
//!
//! TCP does not preserve frame boundaries, so the reader task reassembles
//! frames from the size prefix before handing each one to the
//! [`Demultiplexer`].

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::demux::Demultiplexer;
use crate::error::{RconError, Result};
use crate::packet::{MAX_PACKET_SIZE, MIN_PACKET_SIZE};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub(crate) struct Transport {
    writer: BoxedWriter,
    reader: JoinHandle<()>,
}

impl Transport {
    /// Split `stream` and start feeding its inbound frames into `demux`.
    pub fn spawn<S>(stream: S, demux: Arc<Demultiplexer>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = tokio::spawn(read_frames(read_half, demux));

        Transport {
            writer: Box::new(write_half),
            reader,
        }
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(RconError::SendError)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await.map_err(RconError::SendError)
    }

    /// Write `frames` back to back and flush. A peer that stops reading
    /// fails this with [`RconError::ResponseTimeout`] once `limit` passes.
    pub async fn send(&mut self, frames: &[&[u8]], limit: Duration) -> Result<()> {
        timeout(limit, async {
            for frame in frames {
                self.write(frame).await?;
            }
            self.flush().await
        })
        .await?
    }

    pub async fn close(mut self, limit: Duration) {
        match timeout(limit, self.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("error shutting down stream: {}", e),
            Err(_) => debug!("gave up shutting down stream after {:?}", limit),
        }
        self.reader.abort();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames<R>(mut stream: ReadHalf<R>, demux: Arc<Demultiplexer>)
where
    R: AsyncRead,
{
    loop {
        match read_frame(&mut stream).await {
            Ok(Some(frame)) => {
                if demux.on_bytes_received(&frame).is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("stream closed by host");
                break;
            }
            Err(e) => {
                warn!("giving up on stream: {}", e);
                if let RconError::MalformedFrame(reason) = e {
                    demux.reject(reason);
                }
                break;
            }
        }
    }
    demux.close();
}

/// Read one complete frame, size field included. `None` means a clean EOF
/// at a frame boundary.
async fn read_frame<R>(stream: &mut ReadHalf<R>) -> Result<Option<BytesMut>>
where
    R: AsyncRead,
{
    let size = match stream.read_i32_le().await {
        Ok(size) => size,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                debug!("cannot receive response from host: {}", e);
            }
            return Ok(None);
        }
    };

    let remaining = usize::try_from(size).unwrap_or(0);
    if !(MIN_PACKET_SIZE - 4..=MAX_PACKET_SIZE - 4).contains(&remaining) {
        return Err(RconError::MalformedFrame(format!(
            "size field of {size} is out of bounds"
        )));
    }

    let mut frame = BytesMut::with_capacity(remaining + 4);
    frame.put_i32_le(size);
    frame.resize(remaining + 4, 0);
    if let Err(e) = stream.read_exact(&mut frame[4..]).await {
        debug!("stream ended mid-frame: {}", e);
        return Ok(None);
    }
    trace!("read frame of {} bytes", frame.len());

    Ok(Some(frame))
}
