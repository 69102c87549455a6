//! Reader and writer facades over the event channel.
//!
//! The controller pushes newline-terminated documents but the socket hands
//! them over in arbitrary pieces. [`FrameReader`] keeps any unterminated tail
//! between reads so only complete frames are ever returned.

use std::io;

use bytes::BytesMut;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of a single socket read
pub const READ_BUFFER_SIZE: usize = 4096;

/// A chunk shorter than this means the peer has nothing more queued right now
pub const DRAIN_THRESHOLD: usize = READ_BUFFER_SIZE / 8;

/// Upper bound on buffered bytes without a newline before they are discarded
const MAX_PENDING_BYTES: usize = 1 << 20;

/// Reassembles newline-delimited frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    buf: Box<[u8; READ_BUFFER_SIZE]>,
    pending: BytesMut,
    closed: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Box::new([0; READ_BUFFER_SIZE]),
            pending: BytesMut::with_capacity(READ_BUFFER_SIZE),
            closed: false,
        }
    }

    /// Whether the peer closed the stream or the socket failed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of buffered bytes belonging to an incomplete frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Wait for data, drain whatever else is immediately available, and
    /// return the complete frames in arrival order.
    ///
    /// Cancel safe: bytes are buffered before this returns, so dropping the
    /// future while it waits loses nothing.
    pub async fn read(&mut self) -> Vec<String> {
        if self.closed {
            return Vec::new();
        }

        let result = self.inner.read(&mut self.buf[..]).await;
        if let Some(n) = self.absorb(result) {
            if n >= DRAIN_THRESHOLD {
                self.drain_available();
            }
        }

        self.take_frames()
    }

    /// Keep reading while full-ish chunks arrive and data is ready now.
    fn drain_available(&mut self) {
        loop {
            let Some(result) = self.inner.read(&mut self.buf[..]).now_or_never() else {
                break;
            };
            match self.absorb(result) {
                Some(n) if n >= DRAIN_THRESHOLD => continue,
                _ => break,
            }
        }
    }

    /// Buffer the bytes of one read. Returns the chunk size, or `None` when
    /// nothing was read.
    fn absorb(&mut self, result: io::Result<usize>) -> Option<usize> {
        match result {
            Ok(0) => {
                tracing::debug!("Event stream closed by peer");
                self.closed = true;
                None
            }
            Ok(n) => {
                self.pending.extend_from_slice(&self.buf[..n]);
                Some(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                None
            }
            Err(e) => {
                tracing::warn!("Event stream read failed: {}", e);
                self.closed = true;
                None
            }
        }
    }

    fn take_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line = self.pending.split_to(pos + 1);
            let text = String::from_utf8_lossy(&line[..pos]);
            frames.push(text.trim_end_matches('\r').to_string());
        }

        if self.pending.len() > MAX_PENDING_BYTES {
            tracing::warn!(
                "Discarding {} buffered bytes without a frame boundary",
                self.pending.len()
            );
            self.pending.clear();
        }

        frames
    }
}

/// Writes request frames to the channel.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write(&mut self, frame: &str) -> io::Result<()> {
        self.inner.write_all(frame.as_bytes()).await?;
        self.inner.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}
