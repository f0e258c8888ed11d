//! Length-prefixed framing over any async byte stream
//!
//! Each frame is a 4-byte little-endian length followed by the JSON body.
//! Every I/O failure collapses into `ConnectionLost`.

use crate::protocol::{MAX_FRAME_LEN, deserialize, serialize};
use codex_core::{CodexError, Frame, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Read half of a framed stream
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read one complete frame
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let mut len_bytes = [0u8; 4];
        self.inner.read_exact(&mut len_bytes).await.map_err(|e| {
            debug!("Stream read length failed: {}", e);
            CodexError::ConnectionLost
        })?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_LEN {
            debug!("Frame too large: {} bytes", len);
            return Err(CodexError::ConnectionLost);
        }

        let mut data = vec![0u8; len];
        self.inner.read_exact(&mut data).await.map_err(|e| {
            debug!("Stream read data failed: {}", e);
            CodexError::ConnectionLost
        })?;

        // A frame that does not parse leaves the stream position unknown
        deserialize(&data).map_err(|e| {
            debug!("Undecodable frame: {}", e);
            CodexError::ConnectionLost
        })
    }
}

/// Write half of a framed stream
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one complete frame and flush it
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let data = serialize(frame)?;
        let len = (data.len() as u32).to_le_bytes();

        let mut buf = Vec::with_capacity(4 + data.len());
        buf.extend_from_slice(&len);
        buf.extend_from_slice(&data);

        self.inner.write_all(&buf).await.map_err(|e| {
            debug!("Stream write failed: {}", e);
            CodexError::ConnectionLost
        })?;
        self.inner.flush().await.map_err(|e| {
            debug!("Stream flush failed: {}", e);
            CodexError::ConnectionLost
        })
    }

    /// Shut down the write direction, ignoring errors
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            debug!("Stream shutdown failed: {}", e);
        }
    }
}
