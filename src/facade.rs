//! The protocol facade: the "read n column defs, then rows until
//! EOF/OK" choreography shared by text queries and server-side
//! prepared statements, so it's implemented once instead of once per
//! statement kind.
//!
//! Wraps a [`PacketSocket`] together with the negotiated capability
//! flags and server version string so callers don't have to thread
//! both through every call.

use std::io::{Read, Write};

use crate::error::{Error, ProtocolError, QueryError, QueryErrorKind};
use crate::protocol::{
    Command, EofPacket, OkPacket, PacketReader, PacketType, PacketWriter, capabilities,
};
use crate::socket::{AsyncPacketSocket, PacketSocket};

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
        source: None,
    })
}

fn query_error_from_payload(payload: &[u8]) -> Error {
    let mut reader = PacketReader::new(payload);
    match reader.parse_err_packet() {
        Some(err) => Error::Query(QueryError {
            kind: QueryErrorKind::Execution,
            message: err.error_message,
            sqlstate: Some(err.sql_state),
            vendor_code: Some(err.error_code),
            sql: None,
            params: None,
        }),
        None => protocol_error("malformed error packet"),
    }
}

/// Wraps a [`PacketSocket`] with the negotiated capability flags and
/// server version, and owns the "repeat n times" / "until EOF" reading
/// patterns that both the text and binary result-set readers need.
pub struct ProtocolFacade<S> {
    socket: PacketSocket<S>,
    capabilities: u32,
    server_version: String,
}

impl<S: Read + Write> ProtocolFacade<S> {
    pub fn new(socket: PacketSocket<S>, capabilities: u32, server_version: String) -> Self {
        Self {
            socket,
            capabilities,
            server_version,
        }
    }

    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn deprecates_eof(&self) -> bool {
        self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0
    }

    pub fn reset_sequence_id(&mut self) {
        self.socket.reset_sequence_id();
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.socket.send(payload)
    }

    pub fn receive(&mut self) -> Result<(Vec<u8>, u8), Error> {
        self.socket.receive()
    }

    pub fn socket_mut(&mut self) -> &mut PacketSocket<S> {
        &mut self.socket
    }

    pub fn into_socket(self) -> PacketSocket<S> {
        self.socket
    }

    /// Read exactly `n` packets, decoding each with `decoder` — the
    /// shape of a parameter-definition or column-definition list.
    pub fn repeat_process<T>(
        &mut self,
        n: usize,
        mut decoder: impl FnMut(&[u8]) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let (payload, _) = self.receive()?;
            out.push(decoder(&payload)?);
        }
        Ok(out)
    }

    /// Read packets via `decoder` until the terminator packet for this
    /// capability set: a legacy EOF packet, or (when
    /// `CLIENT_DEPRECATE_EOF` was negotiated) an OK packet sent with the
    /// EOF header byte `0xFE` instead of `0x00` so short-packet framing
    /// stays unambiguous. Either way the terminator is header `0xFE`;
    /// header `0x00` during this phase is always a binary-protocol row
    /// (`{0x00, null_bitmap, values…}`), never a terminator — checking
    /// `deprecates_eof()` on a `0x00` header misreads the first binary
    /// row of every prepared-statement `SELECT` as "no rows". Returns
    /// the decoded items plus the terminator's status flags/warnings as
    /// an [`OkPacket`] (synthesized from the EOF fields).
    pub fn read_until_eof<T>(
        &mut self,
        mut decoder: impl FnMut(&[u8]) -> Result<T, Error>,
    ) -> Result<(Vec<T>, OkPacket), Error> {
        let mut out = Vec::new();
        loop {
            let (payload, _) = self.receive()?;
            if payload.is_empty() {
                return Err(protocol_error("empty packet while reading result stream"));
            }
            match PacketType::from_first_byte(payload[0], payload.len() as u32) {
                PacketType::Eof => {
                    let mut reader = PacketReader::new(&payload);
                    let eof: EofPacket = reader
                        .parse_eof_packet()
                        .ok_or_else(|| protocol_error("malformed EOF packet"))?;
                    return Ok((
                        out,
                        OkPacket {
                            affected_rows: 0,
                            last_insert_id: 0,
                            status_flags: eof.status_flags,
                            warnings: eof.warnings,
                            info: String::new(),
                        },
                    ));
                }
                PacketType::Error => return Err(query_error_from_payload(&payload)),
                _ => out.push(decoder(&payload)?),
            }
        }
    }

    /// `COM_SET_OPTION` — toggles `CLIENT_MULTI_STATEMENTS` for the
    /// remainder of the session. Used by `client_prepared`'s
    /// multi-statement batching strategy.
    pub fn com_set_option(&mut self, enable_multi_statements: bool) -> Result<(), Error> {
        self.reset_sequence_id();
        let mut writer = PacketWriter::new();
        writer.write_u8(Command::SetOption as u8);
        writer.write_u16_le(u16::from(!enable_multi_statements));
        self.send(writer.as_bytes())?;

        let (payload, _) = self.receive()?;
        let first = payload.first().copied().unwrap_or(0xFF);
        match PacketType::from_first_byte(first, payload.len() as u32) {
            PacketType::Ok => Ok(()),
            PacketType::Error => Err(query_error_from_payload(&payload)),
            _ => Err(protocol_error("unexpected response to COM_SET_OPTION")),
        }
    }
}

/// The async twin of [`ProtocolFacade`], over an [`AsyncPacketSocket`]
/// instead of a blocking [`PacketSocket`]. Decoders passed to
/// `repeat_process`/`read_until_eof` stay synchronous closures — only
/// the packet reads themselves are async.
pub struct AsyncProtocolFacade<S> {
    socket: AsyncPacketSocket<S>,
    capabilities: u32,
    server_version: String,
}

impl<S: asupersync::io::AsyncRead + asupersync::io::AsyncWrite + Unpin> AsyncProtocolFacade<S> {
    pub fn new(socket: AsyncPacketSocket<S>, capabilities: u32, server_version: String) -> Self {
        Self {
            socket,
            capabilities,
            server_version,
        }
    }

    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn deprecates_eof(&self) -> bool {
        self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0
    }

    pub fn reset_sequence_id(&mut self) {
        self.socket.reset_sequence_id();
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.socket.send(payload).await
    }

    pub async fn receive(&mut self) -> Result<(Vec<u8>, u8), Error> {
        self.socket.receive().await
    }

    pub fn socket_mut(&mut self) -> &mut AsyncPacketSocket<S> {
        &mut self.socket
    }

    pub fn into_socket(self) -> AsyncPacketSocket<S> {
        self.socket
    }

    /// Read exactly `n` packets, decoding each with `decoder` — the
    /// shape of a parameter-definition or column-definition list.
    pub async fn repeat_process<T>(
        &mut self,
        n: usize,
        mut decoder: impl FnMut(&[u8]) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let (payload, _) = self.receive().await?;
            out.push(decoder(&payload)?);
        }
        Ok(out)
    }

    /// Read packets via `decoder` until the terminator packet for this
    /// capability set, exactly as [`ProtocolFacade::read_until_eof`].
    pub async fn read_until_eof<T>(
        &mut self,
        mut decoder: impl FnMut(&[u8]) -> Result<T, Error>,
    ) -> Result<(Vec<T>, OkPacket), Error> {
        let mut out = Vec::new();
        loop {
            let (payload, _) = self.receive().await?;
            if payload.is_empty() {
                return Err(protocol_error("empty packet while reading result stream"));
            }
            match PacketType::from_first_byte(payload[0], payload.len() as u32) {
                PacketType::Eof => {
                    let mut reader = PacketReader::new(&payload);
                    let eof: EofPacket = reader
                        .parse_eof_packet()
                        .ok_or_else(|| protocol_error("malformed EOF packet"))?;
                    return Ok((
                        out,
                        OkPacket {
                            affected_rows: 0,
                            last_insert_id: 0,
                            status_flags: eof.status_flags,
                            warnings: eof.warnings,
                            info: String::new(),
                        },
                    ));
                }
                PacketType::Error => return Err(query_error_from_payload(&payload)),
                _ => out.push(decoder(&payload)?),
            }
        }
    }

    /// `COM_SET_OPTION` — toggles `CLIENT_MULTI_STATEMENTS` for the
    /// remainder of the session.
    pub async fn com_set_option(&mut self, enable_multi_statements: bool) -> Result<(), Error> {
        self.reset_sequence_id();
        let mut writer = PacketWriter::new();
        writer.write_u8(Command::SetOption as u8);
        writer.write_u16_le(u16::from(!enable_multi_statements));
        self.send(writer.as_bytes()).await?;

        let (payload, _) = self.receive().await?;
        let first = payload.first().copied().unwrap_or(0xFF);
        match PacketType::from_first_byte(first, payload.len() as u32) {
            PacketType::Ok => Ok(()),
            PacketType::Error => Err(query_error_from_payload(&payload)),
            _ => Err(protocol_error("unexpected response to COM_SET_OPTION")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn facade_over(bytes: Vec<u8>) -> ProtocolFacade<Cursor<Vec<u8>>> {
        let socket = PacketSocket::new(Cursor::new(bytes));
        ProtocolFacade::new(socket, capabilities::DEFAULT_CLIENT_FLAGS, "8.0.0".into())
    }

    fn packet(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![
            (payload.len() & 0xFF) as u8,
            ((payload.len() >> 8) & 0xFF) as u8,
            ((payload.len() >> 16) & 0xFF) as u8,
            seq,
        ];
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn repeat_process_reads_n_packets() {
        let mut bytes = Vec::new();
        bytes.extend(packet(0, b"one"));
        bytes.extend(packet(1, b"two"));
        let mut facade = facade_over(bytes);
        let items = facade
            .repeat_process(2, |p| Ok(String::from_utf8_lossy(p).into_owned()))
            .unwrap();
        assert_eq!(items, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn read_until_eof_stops_at_eof_packet() {
        let mut bytes = Vec::new();
        bytes.extend(packet(0, b"row1"));
        bytes.extend(packet(1, &[0xFE, 0x00, 0x00, 0x02, 0x00]));
        let mut facade = facade_over(bytes);
        let (rows, terminator) = facade
            .read_until_eof(|p| Ok(String::from_utf8_lossy(p).into_owned()))
            .unwrap();
        assert_eq!(rows, vec!["row1".to_string()]);
        assert_eq!(terminator.status_flags, 0x0002);
    }

    #[test]
    fn read_until_eof_uses_ok_terminator_when_deprecated() {
        // Under CLIENT_DEPRECATE_EOF the terminator is an OK packet
        // sent with the EOF header byte 0xFE (not 0x00) so it stays
        // distinguishable from a result row — a header of 0x00 during
        // the row phase is always a row (in particular, always a
        // binary-protocol row marker), never this terminator.
        let mut bytes = Vec::new();
        bytes.extend(packet(0, b"row1"));
        // 0xFE, affected_rows=0 (lenenc), last_insert_id=0 (lenenc),
        // status_flags=0x0002 (LE), warnings=0 (LE).
        let ok_as_eof_payload = vec![0xFE, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
        bytes.extend(packet(1, &ok_as_eof_payload));
        let socket = PacketSocket::new(Cursor::new(bytes));
        let mut facade = ProtocolFacade::new(
            socket,
            capabilities::DEFAULT_CLIENT_FLAGS | capabilities::CLIENT_DEPRECATE_EOF,
            "8.0.0".into(),
        );
        let (rows, terminator) = facade
            .read_until_eof(|p| Ok(String::from_utf8_lossy(p).into_owned()))
            .unwrap();
        assert_eq!(rows, vec!["row1".to_string()]);
        assert_eq!(terminator.status_flags, 0x0002);
    }

    #[test]
    fn read_until_eof_treats_zero_header_as_a_row_even_when_deprecated() {
        // This is the regression the terminator logic must not repeat:
        // a binary-protocol row always starts with 0x00, and that must
        // never be read as the deprecate-EOF terminator.
        let mut bytes = Vec::new();
        bytes.extend(packet(0, &[0x00, 0x00, 0x2A, 0x00, 0x00, 0x00]));
        bytes.extend(packet(1, &[0xFE, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]));
        let socket = PacketSocket::new(Cursor::new(bytes));
        let mut facade = ProtocolFacade::new(
            socket,
            capabilities::DEFAULT_CLIENT_FLAGS | capabilities::CLIENT_DEPRECATE_EOF,
            "8.0.0".into(),
        );
        let (rows, _terminator) = facade
            .read_until_eof(|p| Ok(p.to_vec()))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], vec![0x00, 0x00, 0x2A, 0x00, 0x00, 0x00]);
    }
}
