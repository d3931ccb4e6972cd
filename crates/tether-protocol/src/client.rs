//! # Remote Client
//!
//! Blocking client for the debugger protocol, used by the integration tests
//! and by tools that script a session.
//!
//! Requests are numbered with odd sequence ids. Notifications that arrive
//! while waiting for a response are kept and handed out by
//! [`RemoteClient::wait_for`].

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tracing::trace;

use crate::command::{kinds, Command, Response};
use crate::error::TransportError;
use crate::message::Envelope;
use crate::wire::{FrameReader, FrameWriter, Inbound, DEFAULT_MAX_FRAME_LEN};

/// Client end of a debugger session.
#[derive(Debug)]
pub struct RemoteClient
{
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
    next_seq: u64,
    backlog: VecDeque<Envelope>,
}

impl RemoteClient
{
    /// Connect to a session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] when the connection fails.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError>
    {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let write_half = stream.try_clone()?;
        Ok(Self {
            reader: FrameReader::new(stream, DEFAULT_MAX_FRAME_LEN),
            writer: FrameWriter::new(write_half),
            next_seq: 1,
            backlog: VecDeque::new(),
        })
    }

    /// Send a command without waiting; returns its sequence id.
    ///
    /// # Errors
    ///
    /// Fails when the frame cannot be written.
    pub fn send(&mut self, command: &Command) -> Result<u64, TransportError>
    {
        let seq = self.next_seq;
        self.next_seq += 2;
        let payload = command.to_envelope(seq).encode()?;
        trace!(seq, kind = command.kind(), "sending command");
        self.writer.write_frame(&payload)?;
        Ok(seq)
    }

    /// Send an arbitrary payload as one frame.
    ///
    /// # Errors
    ///
    /// Fails when the frame cannot be written.
    pub fn send_raw(&mut self, payload: &[u8]) -> Result<(), TransportError>
    {
        self.writer.write_frame(payload)
    }

    /// Send a command and wait for its response.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or when no response arrives in `timeout`.
    pub fn request(&mut self, command: &Command, timeout: Duration) -> Result<Envelope, TransportError>
    {
        let seq = self.send(command)?;
        self.response_to(seq, timeout)
    }

    /// Send a command and return its `RETURN` payload.
    ///
    /// # Errors
    ///
    /// As [`request`](Self::request); an `ERROR` or `PROTOCOL_ERROR` answer is
    /// returned as `Ok(Err(message))`.
    pub fn call(&mut self, command: &Command, timeout: Duration) -> Result<Result<JsonValue, String>, TransportError>
    {
        let mut response = self.request(command, timeout)?;
        if response.kind == kinds::RETURN {
            Ok(Ok(response.args.remove("payload").unwrap_or(JsonValue::Null)))
        } else {
            let message = response.args.get("message").and_then(JsonValue::as_str).unwrap_or_default();
            Ok(Err(format!("{}: {message}", response.kind)))
        }
    }

    /// Wait for the response to request `seq`, keeping notifications.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or when no response arrives in `timeout`.
    pub fn response_to(&mut self, seq: u64, timeout: Duration) -> Result<Envelope, TransportError>
    {
        let deadline = Instant::now() + timeout;
        loop {
            let envelope = self.read(deadline)?;
            if Response::is_response_kind(&envelope.kind) && envelope.seq == seq {
                return Ok(envelope);
            }
            self.backlog.push_back(envelope);
        }
    }

    /// Wait for the next notification or response of `kind`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or when nothing matching arrives in `timeout`.
    pub fn wait_for(&mut self, kind: &str, timeout: Duration) -> Result<Envelope, TransportError>
    {
        if let Some(index) = self.backlog.iter().position(|envelope| envelope.kind == kind) {
            if let Some(envelope) = self.backlog.remove(index) {
                return Ok(envelope);
            }
        }
        let deadline = Instant::now() + timeout;
        loop {
            let envelope = self.read(deadline)?;
            if envelope.kind == kind {
                return Ok(envelope);
            }
            self.backlog.push_back(envelope);
        }
    }

    /// Messages received but not yet handed out.
    pub fn backlog(&self) -> impl Iterator<Item = &Envelope>
    {
        self.backlog.iter()
    }

    fn read(&mut self, deadline: Instant) -> Result<Envelope, TransportError>
    {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::Io(ErrorKind::TimedOut.into()));
        }
        // The deadline only bounds the wait for a frame to start; a frame
        // already on the wire is read to the end so the stream stays aligned.
        let stream = self.reader.get_ref();
        stream.set_read_timeout(Some(remaining))?;
        stream.peek(&mut [0_u8; 1])?;
        stream.set_read_timeout(None)?;
        match self.reader.read_frame()? {
            Inbound::Frame(payload) => Envelope::decode(&payload)
                .map_err(|err| TransportError::Io(std::io::Error::new(ErrorKind::InvalidData, err.to_string()))),
            Inbound::Oversize(len) => Err(TransportError::Oversize(len)),
        }
    }
}

#[cfg(test)]
mod tests
{
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn frame(envelope: &Envelope) -> Vec<u8>
    {
        let payload = envelope.encode().unwrap();
        let mut bytes = u32::try_from(payload.len()).unwrap().to_be_bytes().to_vec();
        bytes.extend_from_slice(&payload);
        bytes
    }

    #[test]
    fn test_slow_frame_outlives_deadline()
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let first = frame(&Envelope::new(2, "THREAD_CREATE").with_arg("id", 1));
            let (head, tail) = first.split_at(3);
            stream.write_all(head).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(300));
            stream.write_all(tail).unwrap();
            stream.write_all(&frame(&Envelope::new(4, "THREAD_KILL").with_arg("id", 1))).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(200));
        });

        let mut client = RemoteClient::connect(addr).unwrap();
        let created = client.wait_for("THREAD_CREATE", Duration::from_millis(50)).unwrap();
        assert_eq!(created.seq, 2);
        let killed = client.wait_for("THREAD_KILL", Duration::from_secs(5)).unwrap();
        assert_eq!(killed.seq, 4);
        server.join().unwrap();
    }

    #[test]
    fn test_idle_stream_times_out()
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(200));
            stream.write_all(&frame(&Envelope::new(2, "THREAD_CREATE"))).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(200));
        });

        let mut client = RemoteClient::connect(addr).unwrap();
        let err = client.wait_for("THREAD_CREATE", Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
        let created = client.wait_for("THREAD_CREATE", Duration::from_secs(5)).unwrap();
        assert_eq!(created.seq, 2);
        server.join().unwrap();
    }
}
