//! MQTT 3.1.1 control packet framing.
//!
//! Bit-exact encoding of the packet subset the gateway speaks: CONNECT,
//! CONNACK, PUBLISH (QoS 0 and 1), PUBACK, PINGREQ, PINGRESP, DISCONNECT.
//! Remaining length uses the standard 7-bit continuation scheme, at most four
//! bytes.

use std::fmt;

pub const CONNECT: u8 = 0x10;
pub const CONNACK: u8 = 0x20;
pub const PUBLISH: u8 = 0x30;
pub const PUBACK: u8 = 0x40;
pub const PINGREQ: u8 = 0xC0;
pub const PINGRESP: u8 = 0xD0;
pub const DISCONNECT: u8 = 0xE0;

const PROTOCOL_NAME: &[u8] = b"MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;
/// Remaining length is capped by the 4-byte continuation encoding.
const MAX_REMAINING_LENGTH: usize = 268_435_455;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Frame would exceed the remaining-length ceiling or a field limit.
    Oversize,
    /// Bytes do not form a valid packet.
    Malformed,
    /// Packet type the gateway does not encode.
    Unencodable,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Oversize => write!(f, "frame exceeds length limits"),
            CodecError::Malformed => write!(f, "malformed packet"),
            CodecError::Unencodable => write!(f, "packet type cannot be encoded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_id: String,
        keep_alive: u16,
        clean_session: bool,
    },
    ConnAck {
        session_present: bool,
        return_code: u8,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: u8,
        packet_id: Option<u16>,
    },
    PubAck {
        packet_id: u16,
    },
    PingReq,
    PingResp,
    Disconnect,
    /// Incoming frame of a type the gateway does not handle. Decode-only.
    Unknown {
        packet_type: u8,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Packet::Connect {
                client_id,
                keep_alive,
                clean_session,
            } => {
                let id = client_id.as_bytes();
                if id.len() > u16::MAX as usize {
                    return Err(CodecError::Oversize);
                }
                let remaining = 10 + 2 + id.len();
                let mut frame = Vec::with_capacity(remaining + 5);
                frame.push(CONNECT);
                encode_remaining_length(&mut frame, remaining)?;
                frame.extend_from_slice(&(PROTOCOL_NAME.len() as u16).to_be_bytes());
                frame.extend_from_slice(PROTOCOL_NAME);
                frame.push(PROTOCOL_LEVEL);
                frame.push(if *clean_session {
                    CONNECT_FLAG_CLEAN_SESSION
                } else {
                    0
                });
                frame.extend_from_slice(&keep_alive.to_be_bytes());
                frame.extend_from_slice(&(id.len() as u16).to_be_bytes());
                frame.extend_from_slice(id);
                Ok(frame)
            }
            Packet::ConnAck {
                session_present,
                return_code,
            } => Ok(vec![CONNACK, 2, u8::from(*session_present), *return_code]),
            Packet::Publish {
                topic,
                payload,
                qos,
                packet_id,
            } => {
                if *qos > 1 {
                    return Err(CodecError::Unencodable);
                }
                let topic = topic.as_bytes();
                if topic.len() > u16::MAX as usize {
                    return Err(CodecError::Oversize);
                }
                // QoS 1 requires a packet id, QoS 0 forbids it.
                let id = match (qos, packet_id) {
                    (0, None) => None,
                    (1, Some(id)) => Some(*id),
                    _ => return Err(CodecError::Malformed),
                };
                let remaining = 2 + topic.len() + if id.is_some() { 2 } else { 0 } + payload.len();
                let mut frame = Vec::with_capacity(remaining + 5);
                frame.push(PUBLISH | (qos << 1));
                encode_remaining_length(&mut frame, remaining)?;
                frame.extend_from_slice(&(topic.len() as u16).to_be_bytes());
                frame.extend_from_slice(topic);
                if let Some(id) = id {
                    frame.extend_from_slice(&id.to_be_bytes());
                }
                frame.extend_from_slice(payload);
                Ok(frame)
            }
            Packet::PubAck { packet_id } => {
                let mut frame = vec![PUBACK, 2];
                frame.extend_from_slice(&packet_id.to_be_bytes());
                Ok(frame)
            }
            Packet::PingReq => Ok(vec![PINGREQ, 0]),
            Packet::PingResp => Ok(vec![PINGRESP, 0]),
            Packet::Disconnect => Ok(vec![DISCONNECT, 0]),
            Packet::Unknown { .. } => Err(CodecError::Unencodable),
        }
    }

    /// Decode one packet from the front of `buf`. `Ok(None)` means more bytes
    /// are needed; on success the consumed byte count is returned alongside
    /// the packet.
    pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, CodecError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let first = buf[0];
        let Some((remaining, header_len)) = decode_remaining_length(&buf[1..])? else {
            return Ok(None);
        };
        let total = 1 + header_len + remaining;
        if buf.len() < total {
            return Ok(None);
        }
        let body = &buf[1 + header_len..total];

        let packet = match first & 0xF0 {
            CONNECT => decode_connect(body)?,
            CONNACK => {
                if body.len() != 2 {
                    return Err(CodecError::Malformed);
                }
                Packet::ConnAck {
                    session_present: body[0] & 0x01 != 0,
                    return_code: body[1],
                }
            }
            PUBLISH => decode_publish(first, body)?,
            PUBACK => {
                if body.len() != 2 {
                    return Err(CodecError::Malformed);
                }
                Packet::PubAck {
                    packet_id: u16::from_be_bytes([body[0], body[1]]),
                }
            }
            PINGREQ => Packet::PingReq,
            PINGRESP => Packet::PingResp,
            DISCONNECT => Packet::Disconnect,
            other => Packet::Unknown { packet_type: other },
        };
        Ok(Some((packet, total)))
    }
}

fn decode_connect(body: &[u8]) -> Result<Packet, CodecError> {
    if body.len() < 12 || body[0] != 0x00 || body[1] != 0x04 || &body[2..6] != PROTOCOL_NAME {
        return Err(CodecError::Malformed);
    }
    if body[6] != PROTOCOL_LEVEL {
        return Err(CodecError::Malformed);
    }
    let clean_session = body[7] & CONNECT_FLAG_CLEAN_SESSION != 0;
    let keep_alive = u16::from_be_bytes([body[8], body[9]]);
    let id_len = u16::from_be_bytes([body[10], body[11]]) as usize;
    if body.len() != 12 + id_len {
        return Err(CodecError::Malformed);
    }
    let client_id =
        String::from_utf8(body[12..].to_vec()).map_err(|_| CodecError::Malformed)?;
    Ok(Packet::Connect {
        client_id,
        keep_alive,
        clean_session,
    })
}

fn decode_publish(first: u8, body: &[u8]) -> Result<Packet, CodecError> {
    let qos = (first >> 1) & 0x03;
    if qos > 1 {
        return Err(CodecError::Malformed);
    }
    if body.len() < 2 {
        return Err(CodecError::Malformed);
    }
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let mut at = 2 + topic_len;
    if body.len() < at {
        return Err(CodecError::Malformed);
    }
    let topic =
        String::from_utf8(body[2..at].to_vec()).map_err(|_| CodecError::Malformed)?;
    let packet_id = if qos >= 1 {
        if body.len() < at + 2 {
            return Err(CodecError::Malformed);
        }
        let id = u16::from_be_bytes([body[at], body[at + 1]]);
        at += 2;
        Some(id)
    } else {
        None
    };
    Ok(Packet::Publish {
        topic,
        payload: body[at..].to_vec(),
        qos,
        packet_id,
    })
}

/// Append the 7-bit continuation encoding of `len`.
pub fn encode_remaining_length(buf: &mut Vec<u8>, mut len: usize) -> Result<(), CodecError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(CodecError::Oversize);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

/// Decode a remaining-length field. `Ok(None)` when the continuation is not
/// yet complete; otherwise the value and the number of bytes it occupied.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(CodecError::Malformed);
        }
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(CodecError::Malformed);
    }
    Ok(None)
}

/// Monotone packet id allocator for QoS >= 1 publishes. Wraps at `u16::MAX`
/// and skips zero, which the protocol reserves. Outstanding PUBACKs are not
/// tracked; unacknowledged publishes are not retransmitted.
#[derive(Debug)]
pub struct PacketIds {
    next: u16,
}

impl PacketIds {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next(&mut self) -> u16 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        if self.next == 0 {
            self.next = 1;
        }
        id
    }
}

impl Default for PacketIds {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_frame_is_bit_exact() {
        let frame = Packet::Connect {
            client_id: "stick_gateway".into(),
            keep_alive: 60,
            clean_session: true,
        }
        .encode()
        .unwrap();

        let mut expected = vec![
            0x10, 0x19, // fixed header, remaining length 25
            0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
            0x04, // protocol level
            0x02, // clean session
            0x00, 0x3C, // keepalive 60
            0x00, 0x0D, // client id length 13
        ];
        expected.extend_from_slice(b"stick_gateway");
        assert_eq!(frame, expected);
    }

    #[test]
    fn publish_qos0_layout() {
        let frame = Packet::Publish {
            topic: "iot/gateway/temperature/sensor_0".into(),
            payload: b"{}".to_vec(),
            qos: 0,
            packet_id: None,
        }
        .encode()
        .unwrap();

        assert_eq!(frame[0], 0x30);
        assert_eq!(frame[1] as usize, 2 + 32 + 2);
        assert_eq!(&frame[2..4], &[0x00, 32]);
        assert_eq!(&frame[4..36], b"iot/gateway/temperature/sensor_0");
        assert_eq!(&frame[36..], b"{}");
    }

    #[test]
    fn publish_qos1_carries_the_packet_id() {
        let frame = Packet::Publish {
            topic: "t".into(),
            payload: b"x".to_vec(),
            qos: 1,
            packet_id: Some(0x0203),
        }
        .encode()
        .unwrap();

        assert_eq!(frame[0], 0x32);
        assert_eq!(&frame[5..7], &[0x02, 0x03]);
    }

    #[test]
    fn publish_qos_and_id_must_agree() {
        let missing_id = Packet::Publish {
            topic: "t".into(),
            payload: vec![],
            qos: 1,
            packet_id: None,
        };
        assert_eq!(missing_id.encode(), Err(CodecError::Malformed));

        let stray_id = Packet::Publish {
            topic: "t".into(),
            payload: vec![],
            qos: 0,
            packet_id: Some(7),
        };
        assert_eq!(stray_id.encode(), Err(CodecError::Malformed));
    }

    #[test]
    fn two_byte_control_frames() {
        assert_eq!(Packet::PingReq.encode().unwrap(), vec![0xC0, 0x00]);
        assert_eq!(Packet::Disconnect.encode().unwrap(), vec![0xE0, 0x00]);
    }

    #[test]
    fn remaining_length_boundaries() {
        for (len, bytes) in [
            (0usize, vec![0x00]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (16_383, vec![0xFF, 0x7F]),
            (16_384, vec![0x80, 0x80, 0x01]),
            (2_097_151, vec![0xFF, 0xFF, 0x7F]),
            (268_435_455, vec![0xFF, 0xFF, 0xFF, 0x7F]),
        ] {
            let mut buf = Vec::new();
            encode_remaining_length(&mut buf, len).unwrap();
            assert_eq!(buf, bytes, "encoding {len}");
            assert_eq!(decode_remaining_length(&buf).unwrap(), Some((len, bytes.len())));
        }

        let mut buf = Vec::new();
        assert_eq!(
            encode_remaining_length(&mut buf, 268_435_456),
            Err(CodecError::Oversize)
        );
    }

    #[test]
    fn remaining_length_incomplete_and_overlong() {
        assert_eq!(decode_remaining_length(&[0x80]).unwrap(), None);
        assert_eq!(decode_remaining_length(&[0xFF, 0xFF]).unwrap(), None);
        assert!(decode_remaining_length(&[0x80, 0x80, 0x80, 0x80, 0x01]).is_err());
    }

    #[test]
    fn round_trips_for_the_supported_set() {
        let packets = [
            Packet::Connect {
                client_id: "stick_gateway".into(),
                keep_alive: 60,
                clean_session: true,
            },
            Packet::ConnAck {
                session_present: false,
                return_code: 0,
            },
            Packet::Publish {
                topic: "iot/gateway/motion/sensor_0".into(),
                payload: b"{\"v\":1}".to_vec(),
                qos: 0,
                packet_id: None,
            },
            Packet::Publish {
                topic: "iot/gateway/humidity/sensor_1".into(),
                payload: b"{\"v\":55.2}".to_vec(),
                qos: 1,
                packet_id: Some(41),
            },
            Packet::PubAck { packet_id: 41 },
            Packet::PingReq,
            Packet::PingResp,
            Packet::Disconnect,
        ];

        for packet in packets {
            let frame = packet.encode().unwrap();
            let (decoded, used) = Packet::decode(&frame).unwrap().unwrap();
            assert_eq!(used, frame.len());
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn decode_waits_for_a_complete_frame() {
        let frame = Packet::Publish {
            topic: "abc".into(),
            payload: b"payload".to_vec(),
            qos: 0,
            packet_id: None,
        }
        .encode()
        .unwrap();

        for cut in 0..frame.len() {
            assert_eq!(Packet::decode(&frame[..cut]).unwrap(), None, "cut {cut}");
        }
        assert!(Packet::decode(&frame).unwrap().is_some());
    }

    #[test]
    fn decode_surfaces_unknown_packet_types() {
        // SUBSCRIBE is outside the supported set.
        let (packet, used) = Packet::decode(&[0x82, 0x00]).unwrap().unwrap();
        assert_eq!(packet, Packet::Unknown { packet_type: 0x80 });
        assert_eq!(used, 2);
    }

    #[test]
    fn packet_ids_are_monotone_and_skip_zero() {
        let mut ids = PacketIds::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);

        ids.next = u16::MAX;
        assert_eq!(ids.next(), u16::MAX);
        assert_eq!(ids.next(), 1);
    }
}
