//! # Wire Framing
//!
//! Every message is `[u32 big-endian length][payload]`. The payload is an
//! encoded [`Envelope`](crate::message::Envelope).
//!
//! Frames longer than the configured limit are read off the socket and
//! dropped, so one oversize request does not desynchronize the stream.

use std::io::{self, ErrorKind, Read, Write};

use tracing::warn;

use crate::error::TransportError;

/// Default largest accepted payload: 16 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// One frame as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound
{
    /// A complete payload.
    Frame(Vec<u8>),
    /// A payload longer than the limit; its bytes were discarded.
    Oversize(usize),
}

/// Reads length-prefixed frames.
#[derive(Debug)]
pub struct FrameReader<R>
{
    inner: R,
    max_len: usize,
}

impl<R: Read> FrameReader<R>
{
    /// Wrap `inner`, accepting payloads of at most `max_len` bytes.
    pub const fn new(inner: R, max_len: usize) -> Self
    {
        Self { inner, max_len }
    }

    /// Read the next frame.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] on end of stream (including inside a
    /// frame), [`TransportError::Io`] on any other read failure.
    pub fn read_frame(&mut self) -> Result<Inbound, TransportError>
    {
        let mut header = [0_u8; HEADER_LEN];
        read_exact(&mut self.inner, &mut header)?;
        let len = u32::from_be_bytes(header) as usize;

        if len > self.max_len {
            warn!(len, max = self.max_len, "skipping oversize frame");
            let skipped = io::copy(&mut (&mut self.inner).take(len as u64), &mut io::sink())?;
            if skipped < len as u64 {
                return Err(TransportError::Closed);
            }
            return Ok(Inbound::Oversize(len));
        }

        let mut payload = vec![0_u8; len];
        read_exact(&mut self.inner, &mut payload)?;
        Ok(Inbound::Frame(payload))
    }

    /// The wrapped reader.
    pub fn get_ref(&self) -> &R
    {
        &self.inner
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError>
{
    reader.read_exact(buf).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => TransportError::Closed,
        _ => TransportError::Io(err),
    })
}

/// Writes length-prefixed frames.
#[derive(Debug)]
pub struct FrameWriter<W>
{
    inner: W,
}

impl<W: Write> FrameWriter<W>
{
    /// Wrap `inner`.
    pub const fn new(inner: W) -> Self
    {
        Self { inner }
    }

    /// Write one frame and flush it.
    ///
    /// # Errors
    ///
    /// [`TransportError::Oversize`] when `payload` does not fit the length
    /// prefix, [`TransportError::Io`] when the write fails.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError>
    {
        let len = u32::try_from(payload.len()).map_err(|_| TransportError::Oversize(payload.len()))?;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.flush()?;
        Ok(())
    }

    /// The wrapped writer.
    pub fn get_ref(&self) -> &W
    {
        &self.inner
    }
}
