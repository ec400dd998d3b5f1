//! The packet socket: framed byte transport underneath everything else.
//!
//! Owns a byte-stream transport, segments outgoing logical payloads into
//! physical MySQL packets (3-byte little-endian length + 1-byte sequence
//! id + payload), and reassembles incoming multi-packet payloads that
//! exceed [`MAX_PACKET_SIZE`](crate::protocol::MAX_PACKET_SIZE). The
//! teacher inlines this as private methods on the sync and async
//! connection types; this module extracts it once so both flavors share
//! an identical chunking/reassembly algorithm instead of maintaining two
//! copies.

use std::io::{Read, Write};

use crate::error::{ConnectionError, ConnectionErrorKind, Error};
use crate::protocol::{MAX_PACKET_SIZE, PacketHeader, PacketWriter};

/// Whether a physical frame of this length is followed by a
/// continuation frame for the same logical payload.
///
/// A frame is a continuation boundary exactly when it is filled to
/// [`MAX_PACKET_SIZE`] — that's the wire's only signal that more bytes
/// belong to the same payload.
pub const fn is_continuation(frame_len: usize) -> bool {
    frame_len == MAX_PACKET_SIZE
}

/// Split a payload length into the physical frame lengths it will be
/// chunked into, including the trailing empty frame required when the
/// payload is an exact multiple of [`MAX_PACKET_SIZE`].
pub fn chunk_lengths(payload_len: usize) -> Vec<usize> {
    if payload_len <= MAX_PACKET_SIZE {
        return vec![payload_len];
    }
    let mut lens = Vec::new();
    let mut remaining = payload_len;
    while remaining > 0 {
        let chunk = remaining.min(MAX_PACKET_SIZE);
        lens.push(chunk);
        remaining -= chunk;
        if chunk == MAX_PACKET_SIZE && remaining == 0 {
            lens.push(0);
        }
    }
    lens
}

fn disconnected(context: &str, e: std::io::Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: format!("{context}: {e}"),
        source: Some(Box::new(e)),
    })
}

/// A packet socket over a synchronous `Read + Write` transport.
pub struct PacketSocket<S> {
    transport: S,
    sequence_id: u8,
}

impl<S: Read + Write> PacketSocket<S> {
    pub fn new(transport: S) -> Self {
        Self {
            transport,
            sequence_id: 0,
        }
    }

    /// Zero the sequence counter. Callers MUST invoke this at the start
    /// of every new command.
    pub fn reset_sequence_id(&mut self) {
        self.sequence_id = 0;
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Force the sequence counter to a specific value. Used when a TLS
    /// upgrade swaps the underlying transport mid-handshake: the
    /// `SSLRequest` packet already consumed a sequence number on the
    /// plaintext socket, and the real handshake response that follows
    /// over the encrypted channel must continue from there rather than
    /// restart at 0.
    pub fn set_sequence_id(&mut self, sequence_id: u8) {
        self.sequence_id = sequence_id;
    }

    /// Access the underlying transport (for the TLS upgrade, which swaps
    /// the raw `TcpStream` for a `rustls::StreamOwned` mid-connection).
    pub fn transport_mut(&mut self) -> &mut S {
        &mut self.transport
    }

    pub fn into_transport(self) -> S {
        self.transport
    }

    /// Write a single logical payload, chunking into `MAX_PACKET_SIZE`
    /// frames and incrementing the sequence id per physical frame.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        let writer = PacketWriter::new();
        let packet = writer.build_packet_from_payload(payload, self.sequence_id);
        let frame_count = chunk_lengths(payload.len()).len() as u8;
        self.sequence_id = self.sequence_id.wrapping_add(frame_count);

        self.transport
            .write_all(&packet)
            .map_err(|e| disconnected("failed to write packet", e))?;
        self.transport
            .flush()
            .map_err(|e| disconnected("failed to flush stream", e))
    }

    /// Read one logical payload, possibly spanning multiple physical
    /// frames, returning the payload and the first frame's sequence id.
    pub fn receive(&mut self) -> Result<(Vec<u8>, u8), Error> {
        let mut header_buf = [0u8; PacketHeader::SIZE];
        self.transport
            .read_exact(&mut header_buf)
            .map_err(|e| disconnected("failed to read packet header", e))?;

        let header = PacketHeader::from_bytes(&header_buf);
        let first_sequence_id = header.sequence_id;
        let mut payload_len = header.payload_length as usize;
        self.sequence_id = header.sequence_id.wrapping_add(1);

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            self.transport
                .read_exact(&mut payload)
                .map_err(|e| disconnected("failed to read packet payload", e))?;
        }

        while is_continuation(payload_len) {
            let mut header_buf = [0u8; PacketHeader::SIZE];
            self.transport
                .read_exact(&mut header_buf)
                .map_err(|e| disconnected("failed to read continuation header", e))?;
            let cont_header = PacketHeader::from_bytes(&header_buf);
            payload_len = cont_header.payload_length as usize;
            self.sequence_id = cont_header.sequence_id.wrapping_add(1);

            if payload_len > 0 {
                let mut cont_payload = vec![0u8; payload_len];
                self.transport
                    .read_exact(&mut cont_payload)
                    .map_err(|e| disconnected("failed to read continuation payload", e))?;
                payload.extend_from_slice(&cont_payload);
            }
        }

        Ok((payload, first_sequence_id))
    }

    /// Drop the transport, ending the duplex connection.
    pub fn duplex_close(self) -> S {
        self.transport
    }
}

/// A packet socket over an `asupersync` async transport. Shares the
/// chunking/reassembly algorithm with [`PacketSocket`] but drives reads
/// and writes through `poll_read`/`poll_write` loops, since a single
/// poll can return fewer bytes than requested.
pub struct AsyncPacketSocket<S> {
    transport: S,
    sequence_id: u8,
}

impl<S: asupersync::io::AsyncRead + asupersync::io::AsyncWrite + Unpin> AsyncPacketSocket<S> {
    pub fn new(transport: S) -> Self {
        Self {
            transport,
            sequence_id: 0,
        }
    }

    pub fn reset_sequence_id(&mut self) {
        self.sequence_id = 0;
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    pub fn set_sequence_id(&mut self, sequence_id: u8) {
        self.sequence_id = sequence_id;
    }

    pub fn transport_mut(&mut self) -> &mut S {
        &mut self.transport
    }

    pub fn into_transport(self) -> S {
        self.transport
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let mut filled = 0;
        while filled < buf.len() {
            let mut read_buf = asupersync::io::ReadBuf::new(&mut buf[filled..]);
            std::future::poll_fn(|cx| {
                std::pin::Pin::new(&mut self.transport).poll_read(cx, &mut read_buf)
            })
            .await
            .map_err(|e| disconnected("failed to read from stream", e))?;
            let n = read_buf.filled().len();
            if n == 0 {
                return Err(disconnected(
                    "connection closed",
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"),
                ));
            }
            filled += n;
        }
        Ok(())
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut written = 0;
        while written < buf.len() {
            let n = std::future::poll_fn(|cx| {
                std::pin::Pin::new(&mut self.transport).poll_write(cx, &buf[written..])
            })
            .await
            .map_err(|e| disconnected("failed to write to stream", e))?;
            if n == 0 {
                return Err(disconnected(
                    "connection closed while writing",
                    std::io::Error::new(std::io::ErrorKind::WriteZero, "write returned 0"),
                ));
            }
            written += n;
        }
        std::future::poll_fn(|cx| std::pin::Pin::new(&mut self.transport).poll_flush(cx))
            .await
            .map_err(|e| disconnected("failed to flush stream", e))
    }

    /// Write a single logical payload, chunking into `MAX_PACKET_SIZE`
    /// frames and incrementing the sequence id per physical frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        let writer = PacketWriter::new();
        let packet = writer.build_packet_from_payload(payload, self.sequence_id);
        let frame_count = chunk_lengths(payload.len()).len() as u8;
        self.sequence_id = self.sequence_id.wrapping_add(frame_count);
        self.write_all(&packet).await
    }

    /// Read one logical payload, possibly spanning multiple physical
    /// frames, returning the payload and the first frame's sequence id.
    pub async fn receive(&mut self) -> Result<(Vec<u8>, u8), Error> {
        let mut header_buf = [0u8; PacketHeader::SIZE];
        self.read_exact(&mut header_buf).await?;

        let header = PacketHeader::from_bytes(&header_buf);
        let first_sequence_id = header.sequence_id;
        let mut payload_len = header.payload_length as usize;
        self.sequence_id = header.sequence_id.wrapping_add(1);

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            self.read_exact(&mut payload).await?;
        }

        while is_continuation(payload_len) {
            let mut header_buf = [0u8; PacketHeader::SIZE];
            self.read_exact(&mut header_buf).await?;
            let cont_header = PacketHeader::from_bytes(&header_buf);
            payload_len = cont_header.payload_length as usize;
            self.sequence_id = cont_header.sequence_id.wrapping_add(1);

            if payload_len > 0 {
                let mut cont_payload = vec![0u8; payload_len];
                self.read_exact(&mut cont_payload).await?;
                payload.extend_from_slice(&cont_payload);
            }
        }

        Ok((payload, first_sequence_id))
    }
}

/// An in-memory async duplex stream, the async counterpart to
/// `Cursor<Vec<u8>>` in the sync tests: reads drain a fixed input
/// buffer, writes accumulate into an output buffer, and every poll
/// resolves immediately since there's no real I/O to wait on. Shared
/// by this module's and `async_connection`'s test suites.
#[cfg(test)]
pub(crate) mod test_support {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};

    pub struct MockAsyncStream {
        input: Vec<u8>,
        read_pos: usize,
        pub output: Vec<u8>,
    }

    impl MockAsyncStream {
        pub fn new(input: Vec<u8>) -> Self {
            Self {
                input,
                read_pos: 0,
                output: Vec::new(),
            }
        }
    }

    impl AsyncRead for MockAsyncStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let remaining = self.input.len() - self.read_pos;
            let n = remaining.min(buf.remaining());
            let start = self.read_pos;
            buf.put_slice(&self.input[start..start + n]);
            self.read_pos += n;
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockAsyncStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.output.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn chunk_lengths_small_payload() {
        assert_eq!(chunk_lengths(5), vec![5]);
        assert_eq!(chunk_lengths(0), vec![0]);
    }

    #[test]
    fn chunk_lengths_exact_multiple_gets_trailing_empty_frame() {
        let lens = chunk_lengths(MAX_PACKET_SIZE);
        assert_eq!(lens, vec![MAX_PACKET_SIZE, 0]);
    }

    #[test]
    fn chunk_lengths_over_one_frame() {
        let lens = chunk_lengths(MAX_PACKET_SIZE + 10);
        assert_eq!(lens, vec![MAX_PACKET_SIZE, 10]);
    }

    #[test]
    fn is_continuation_boundary() {
        assert!(is_continuation(MAX_PACKET_SIZE));
        assert!(!is_continuation(MAX_PACKET_SIZE - 1));
        assert!(!is_continuation(0));
    }

    #[test]
    fn send_then_receive_round_trips_small_payload() {
        let buf: Vec<u8> = Vec::new();
        let mut sock = PacketSocket::new(Cursor::new(buf));
        sock.send(b"hello").unwrap();
        sock.transport_mut().set_position(0);
        let (payload, seq) = sock.receive().unwrap();
        assert_eq!(payload, b"hello");
        assert_eq!(seq, 0);
    }

    #[test]
    fn sequence_id_increments_across_commands() {
        let buf: Vec<u8> = Vec::new();
        let mut sock = PacketSocket::new(Cursor::new(buf));
        sock.send(b"one").unwrap();
        sock.send(b"two").unwrap();
        assert_eq!(sock.sequence_id(), 2);
        sock.reset_sequence_id();
        assert_eq!(sock.sequence_id(), 0);
    }

    #[test]
    fn async_send_writes_a_framed_packet() {
        use super::test_support::MockAsyncStream;
        use asupersync::runtime::RuntimeBuilder;

        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let mut sock = AsyncPacketSocket::new(MockAsyncStream::new(Vec::new()));
            sock.send(b"hello").await.unwrap();
            assert_eq!(sock.transport_mut().output, packet_bytes(0, b"hello"));
            assert_eq!(sock.sequence_id(), 1);
        });
    }

    #[test]
    fn async_receive_reassembles_a_framed_packet() {
        use super::test_support::MockAsyncStream;
        use asupersync::runtime::RuntimeBuilder;

        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let bytes = packet_bytes(3, b"world");
            let mut sock = AsyncPacketSocket::new(MockAsyncStream::new(bytes));
            let (payload, seq) = sock.receive().await.unwrap();
            assert_eq!(payload, b"world");
            assert_eq!(seq, 3);
            assert_eq!(sock.sequence_id(), 4);
        });
    }

    fn packet_bytes(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![
            (payload.len() & 0xFF) as u8,
            ((payload.len() >> 8) & 0xFF) as u8,
            ((payload.len() >> 16) & 0xFF) as u8,
            seq,
        ];
        out.extend_from_slice(payload);
        out
    }
}
