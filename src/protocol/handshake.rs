//! The initial handshake packet, the handshake response the client
//! sends back, and the mid-handshake auth-switch/SSL-request frames.
//!
//! Everything here is pure encode/decode: no socket I/O, no retry
//! logic. `auth_phase` drives the exchange; this module only knows how
//! to turn bytes into typed packets and back.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::reader::PacketReader;
use crate::protocol::writer::PacketWriter;
use crate::protocol::{capabilities, charset};

/// The server's initial packet (protocol version 10), sent once per
/// connection before the client has spoken.
#[derive(Debug, Clone)]
pub struct InitialHandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// The full scramble (nonce), part 1 + part 2 concatenated.
    pub auth_plugin_data: Vec<u8>,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

/// Parse the server's initial handshake packet. Only protocol version
/// 10 is supported — anything else is almost certainly a misconfigured
/// non-MySQL listener.
pub fn parse_initial_handshake(data: &[u8]) -> Option<InitialHandshakePacket> {
    let mut reader = PacketReader::new(data);

    let protocol_version = reader.read_u8()?;
    if protocol_version != 10 {
        return None;
    }
    let server_version = reader.read_null_string()?;
    let connection_id = reader.read_u32_le()?;
    let auth_data_1 = reader.read_bytes(8)?.to_vec();
    reader.skip(1); // filler

    let caps_lower = reader.read_u16_le()?;
    let charset = reader.read_u8().unwrap_or(charset::UTF8MB4_0900_AI_CI);
    let status_flags = reader.read_u16_le().unwrap_or(0);
    let caps_upper = reader.read_u16_le().unwrap_or(0);
    let caps = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

    let auth_data_len = if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        reader.read_u8().unwrap_or(0) as usize
    } else {
        0
    };
    reader.skip(10); // reserved

    let mut auth_plugin_data = auth_data_1;
    if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        let len2 = if auth_data_len > 8 {
            auth_data_len - 8
        } else {
            13
        };
        if let Some(part2) = reader.read_bytes(len2) {
            let trimmed = if part2.last() == Some(&0) {
                &part2[..part2.len() - 1]
            } else {
                part2
            };
            auth_plugin_data.extend_from_slice(trimmed);
        }
    }

    let auth_plugin_name = if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        reader.read_null_string().unwrap_or_default()
    } else {
        crate::auth::plugins::MYSQL_NATIVE_PASSWORD.to_string()
    };

    Some(InitialHandshakePacket {
        protocol_version,
        server_version,
        connection_id,
        auth_plugin_data,
        capabilities: caps,
        charset,
        status_flags,
        auth_plugin_name,
    })
}

/// The fields a handshake response needs, independent of which plugin
/// computed `auth_response`.
pub struct HandshakeResponseFields<'a> {
    pub client_capabilities: u32,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: &'a str,
    pub attributes: &'a std::collections::HashMap<String, String>,
}

/// Build the `HandshakeResponse41` payload (protocol-41 shape — the
/// only variant this crate speaks; `CLIENT_PROTOCOL_41` is always in
/// `DEFAULT_CLIENT_FLAGS`).
pub fn build_handshake_response(fields: &HandshakeResponseFields<'_>) -> Vec<u8> {
    let caps = fields.client_capabilities;
    let mut writer = PacketWriter::with_capacity(64 + fields.username.len());

    writer.write_u32_le(caps);
    writer.write_u32_le(fields.max_packet_size);
    writer.write_u8(fields.charset);
    writer.write_zeros(23);
    writer.write_null_string(fields.username);

    if caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        writer.write_lenenc_bytes(fields.auth_response);
    } else if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        writer.write_u8(fields.auth_response.len() as u8);
        writer.write_bytes(fields.auth_response);
    } else {
        writer.write_bytes(fields.auth_response);
        writer.write_u8(0);
    }

    if caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
        writer.write_null_string(fields.database.unwrap_or(""));
    }

    if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        writer.write_null_string(fields.auth_plugin_name);
    }

    if caps & capabilities::CLIENT_CONNECT_ATTRS != 0 && !fields.attributes.is_empty() {
        let mut attrs = PacketWriter::new();
        for (key, value) in fields.attributes {
            attrs.write_lenenc_string(key);
            attrs.write_lenenc_string(value);
        }
        writer.write_lenenc_bytes(attrs.as_bytes());
    }

    writer.into_bytes()
}

/// Build the short `SSLRequest` packet: the first 32 bytes a
/// handshake response would carry, sent alone so the server knows to
/// wait for a TLS ClientHello before the real response.
pub fn build_ssl_request(client_capabilities: u32, max_packet_size: u32, charset: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    writer.write_u32_le(client_capabilities | capabilities::CLIENT_SSL);
    writer.write_u32_le(max_packet_size);
    writer.write_u8(charset);
    writer.write_zeros(23);
    writer.into_bytes()
}

/// A server-initiated plugin switch mid-authentication.
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub auth_data: Vec<u8>,
}

/// Parse an `AuthSwitchRequest` packet (payload after the leading
/// `0xFE` marker byte has already been stripped by the caller).
pub fn parse_auth_switch_request(data: &[u8]) -> Option<AuthSwitchRequest> {
    let mut reader = PacketReader::new(data);
    let plugin_name = reader.read_null_string()?;
    let auth_data = reader.read_rest().to_vec();
    Some(AuthSwitchRequest {
        plugin_name,
        auth_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_handshake() -> Vec<u8> {
        let mut w = PacketWriter::new();
        w.write_u8(10);
        w.write_null_string("8.0.33");
        w.write_u32_le(42);
        w.write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]);
        w.write_u8(0);
        w.write_u16_le((capabilities::DEFAULT_CLIENT_FLAGS & 0xFFFF) as u16);
        w.write_u8(charset::UTF8MB4_0900_AI_CI);
        w.write_u16_le(2);
        w.write_u16_le(((capabilities::DEFAULT_CLIENT_FLAGS >> 16) & 0xFFFF) as u16);
        w.write_u8(21);
        w.write_zeros(10);
        w.write_bytes(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20]);
        w.write_u8(0);
        w.write_null_string("mysql_native_password");
        w.into_bytes()
    }

    #[test]
    fn parses_initial_handshake() {
        let packet = parse_initial_handshake(&sample_handshake()).unwrap();
        assert_eq!(packet.protocol_version, 10);
        assert_eq!(packet.server_version, "8.0.33");
        assert_eq!(packet.connection_id, 42);
        assert_eq!(packet.auth_plugin_data.len(), 20);
        assert_eq!(packet.auth_plugin_name, "mysql_native_password");
        assert_eq!(
            packet.capabilities & capabilities::CLIENT_PROTOCOL_41,
            capabilities::CLIENT_PROTOCOL_41
        );
    }

    #[test]
    fn rejects_unknown_protocol_version() {
        let mut w = PacketWriter::new();
        w.write_u8(9);
        assert!(parse_initial_handshake(&w.into_bytes()).is_none());
    }

    #[test]
    fn builds_handshake_response_with_lenenc_auth() {
        let attrs = std::collections::HashMap::new();
        let fields = HandshakeResponseFields {
            client_capabilities: capabilities::DEFAULT_CLIENT_FLAGS
                | capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA,
            max_packet_size: 0x0100_0000,
            charset: charset::UTF8MB4_0900_AI_CI,
            username: "root",
            auth_response: &[1, 2, 3, 4],
            database: Some("test"),
            auth_plugin_name: "mysql_native_password",
            attributes: &attrs,
        };
        let payload = build_handshake_response(&fields);
        assert!(payload.windows(4).any(|w| w == b"root"));
        assert!(payload.windows(4).any(|w| w == b"test"));
    }

    #[test]
    fn parses_auth_switch_request() {
        let mut w = PacketWriter::new();
        w.write_null_string("caching_sha2_password");
        w.write_bytes(&[1u8; 20]);
        let req = parse_auth_switch_request(&w.into_bytes()).unwrap();
        assert_eq!(req.plugin_name, "caching_sha2_password");
        assert_eq!(req.auth_data, vec![1u8; 20]);
    }

    #[test]
    fn ssl_request_sets_client_ssl_bit() {
        let payload = build_ssl_request(capabilities::DEFAULT_CLIENT_FLAGS, 0x0100_0000, 45);
        assert_eq!(payload.len(), 32);
        let caps = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert!(caps & capabilities::CLIENT_SSL != 0);
    }
}
