//! Minimal MQTT 3.1.1 packet codec.
//!
//! Only the packets a command publisher needs are modelled: connection
//! handshake, QoS 0 publish (QoS 1 inbound is acknowledged), a single
//! subscription, keepalive pings and a clean disconnect.
//!
//! [`Packet::decode`] works on a growing receive buffer: it returns
//! `Ok(None)` until a complete packet is available, so the caller can keep
//! appending bytes from the socket or from WebSocket frames.

use rcctl_types::RcError;

/// Largest packet the client is willing to buffer.
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const SUBSCRIBE: u8 = 0x82;
const SUBACK: u8 = 0x90;
const PINGREQ: u8 = 0xC0;
const PINGRESP: u8 = 0xD0;
const DISCONNECT: u8 = 0xE0;

const FLAG_USERNAME: u8 = 0x80;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_CLEAN_SESSION: u8 = 0x02;

/// One MQTT control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_id: String,
        keepalive_secs: u16,
        clean_session: bool,
        username: Option<String>,
        password: Option<Vec<u8>>,
    },
    ConnAck {
        session_present: bool,
        return_code: u8,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
        /// Present only for QoS > 0.
        packet_id: Option<u16>,
    },
    PubAck {
        packet_id: u16,
    },
    Subscribe {
        packet_id: u16,
        filters: Vec<(String, u8)>,
    },
    SubAck {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    PingReq,
    PingResp,
    Disconnect,
}

/// Human-readable meaning of a CONNACK return code.
pub fn connack_reason(code: u8) -> &'static str {
    match code {
        0 => "accepted",
        1 => "unacceptable protocol version",
        2 => "client identifier rejected",
        3 => "server unavailable",
        4 => "bad username or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

impl Packet {
    /// Serialise into a complete packet (fixed header included).
    pub fn encode(&self) -> Vec<u8> {
        let (header, body) = match self {
            Packet::Connect {
                client_id,
                keepalive_secs,
                clean_session,
                username,
                password,
            } => {
                let mut flags = 0u8;
                if *clean_session {
                    flags |= FLAG_CLEAN_SESSION;
                }
                if username.is_some() {
                    flags |= FLAG_USERNAME;
                }
                if password.is_some() {
                    flags |= FLAG_PASSWORD;
                }
                let mut body = Vec::with_capacity(16 + client_id.len());
                put_str(&mut body, PROTOCOL_NAME);
                body.push(PROTOCOL_LEVEL);
                body.push(flags);
                body.extend_from_slice(&keepalive_secs.to_be_bytes());
                put_str(&mut body, client_id);
                if let Some(user) = username {
                    put_str(&mut body, user);
                }
                if let Some(pass) = password {
                    put_bytes(&mut body, pass);
                }
                (CONNECT, body)
            }
            Packet::ConnAck {
                session_present,
                return_code,
            } => (CONNACK, vec![u8::from(*session_present), *return_code]),
            Packet::Publish {
                topic,
                payload,
                qos,
                retain,
                packet_id,
            } => {
                let header = PUBLISH | ((qos & 0x03) << 1) | u8::from(*retain);
                let mut body = Vec::with_capacity(4 + topic.len() + payload.len());
                put_str(&mut body, topic);
                if *qos > 0 {
                    body.extend_from_slice(&packet_id.unwrap_or(0).to_be_bytes());
                }
                body.extend_from_slice(payload);
                (header, body)
            }
            Packet::PubAck { packet_id } => (PUBACK, packet_id.to_be_bytes().to_vec()),
            Packet::Subscribe { packet_id, filters } => {
                let mut body = packet_id.to_be_bytes().to_vec();
                for (filter, qos) in filters {
                    put_str(&mut body, filter);
                    body.push(*qos);
                }
                (SUBSCRIBE, body)
            }
            Packet::SubAck {
                packet_id,
                return_codes,
            } => {
                let mut body = packet_id.to_be_bytes().to_vec();
                body.extend_from_slice(return_codes);
                (SUBACK, body)
            }
            Packet::PingReq => (PINGREQ, Vec::new()),
            Packet::PingResp => (PINGRESP, Vec::new()),
            Packet::Disconnect => (DISCONNECT, Vec::new()),
        };

        let mut out = Vec::with_capacity(body.len() + 5);
        out.push(header);
        encode_remaining_length(body.len(), &mut out);
        out.extend_from_slice(&body);
        out
    }

    /// Try to decode one packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes it occupied, or `None` if
    /// `buf` does not yet hold a complete packet.
    pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, RcError> {
        let Some(&header) = buf.first() else {
            return Ok(None);
        };
        let Some((remaining, len_bytes)) = decode_remaining_length(&buf[1..])? else {
            return Ok(None);
        };
        if remaining > MAX_PACKET_SIZE {
            return Err(RcError::Protocol(format!(
                "packet of {remaining} bytes exceeds limit of {MAX_PACKET_SIZE}"
            )));
        }
        let start = 1 + len_bytes;
        let end = start + remaining;
        if buf.len() < end {
            return Ok(None);
        }
        let body = &buf[start..end];
        let packet = parse_body(header, body)?;
        Ok(Some((packet, end)))
    }
}

fn parse_body(header: u8, body: &[u8]) -> Result<Packet, RcError> {
    let mut r = Reader::new(body);
    let packet = match header & 0xF0 {
        0x10 => {
            let name = r.string()?;
            let level = r.u8()?;
            if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
                return Err(RcError::Protocol(format!(
                    "unsupported protocol {name} level {level}"
                )));
            }
            let flags = r.u8()?;
            let keepalive_secs = r.u16()?;
            let client_id = r.string()?;
            let username = if flags & FLAG_USERNAME != 0 {
                Some(r.string()?)
            } else {
                None
            };
            let password = if flags & FLAG_PASSWORD != 0 {
                Some(r.bytes()?.to_vec())
            } else {
                None
            };
            Packet::Connect {
                client_id,
                keepalive_secs,
                clean_session: flags & FLAG_CLEAN_SESSION != 0,
                username,
                password,
            }
        }
        0x20 => Packet::ConnAck {
            session_present: r.u8()? & 0x01 != 0,
            return_code: r.u8()?,
        },
        0x30 => {
            let qos = (header >> 1) & 0x03;
            if qos == 3 {
                return Err(RcError::Protocol("publish with QoS 3".into()));
            }
            let topic = r.string()?;
            let packet_id = if qos > 0 { Some(r.u16()?) } else { None };
            Packet::Publish {
                topic,
                payload: r.rest().to_vec(),
                qos,
                retain: header & 0x01 != 0,
                packet_id,
            }
        }
        0x40 => Packet::PubAck {
            packet_id: r.u16()?,
        },
        0x80 => {
            let packet_id = r.u16()?;
            let mut filters = Vec::new();
            while !r.is_empty() {
                let filter = r.string()?;
                filters.push((filter, r.u8()?));
            }
            Packet::Subscribe { packet_id, filters }
        }
        0x90 => Packet::SubAck {
            packet_id: r.u16()?,
            return_codes: r.rest().to_vec(),
        },
        0xC0 => Packet::PingReq,
        0xD0 => Packet::PingResp,
        0xE0 => Packet::Disconnect,
        other => {
            return Err(RcError::Protocol(format!(
                "unsupported packet type 0x{other:02X}"
            )));
        }
    };
    Ok(packet)
}

// ────────────────────────────────────────────────────────────────────────────
// Remaining-length varint
// ────────────────────────────────────────────────────────────────────────────

/// Append the MQTT variable-length encoding of `len` (1–4 bytes).
pub fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Decode a remaining-length prefix.  Returns the value and the number of
/// bytes consumed, or `None` if more bytes are needed.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, RcError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(RcError::Protocol("malformed remaining length".into()));
        }
        value += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(RcError::Protocol("malformed remaining length".into()));
    }
    Ok(None)
}

// ────────────────────────────────────────────────────────────────────────────
// Field helpers
// ────────────────────────────────────────────────────────────────────────────

fn put_str(out: &mut Vec<u8>, s: &str) {
    put_bytes(out, s.as_bytes());
}

fn put_bytes(out: &mut Vec<u8>, b: &[u8]) {
    let len = b.len().min(u16::MAX as usize);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&b[..len]);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RcError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(RcError::Protocol("truncated packet".into()));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, RcError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, RcError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn bytes(&mut self) -> Result<&'a [u8], RcError> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, RcError> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| RcError::Protocol("string field is not UTF-8".into()))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        rest
    }
}
