//! # MQTT Packet Construction and Decoding
//!
//! Outbound packets are assembled with [`Packet`], a two-pass builder: fields
//! are accumulated first so the remaining length is known, then the whole
//! packet is serialized into a [`ByteSink`] in one go. Inbound deliveries are
//! classified by [`decode`], which only understands the handful of packet
//! types this client reacts to.

use core::ffi::CStr;

use heapless::Vec;

use crate::error::{ErrorPlaceHolder, MqttError, ProtocolError};
use crate::transport::{ByteSink, WriteFlags};
use crate::util::{self, MAX_REMAINING_LENGTH};

/// Default number of fields a single packet may hold.
pub const DEFAULT_MAX_FIELDS: usize = 32;

/// Protocol name sent in CONNECT (MQTT v3.1).
pub const PROTOCOL_NAME: &str = "MQIsdp";

/// Protocol level sent in CONNECT (MQTT v3.1).
pub const PROTOCOL_LEVEL: u8 = 3;

/// Packet identifier used for every SUBSCRIBE. Acknowledgements are not
/// tracked, so a constant is enough.
pub const SUBSCRIBE_PACKET_ID: u16 = 10;

// Fixed header flags.
pub const FLAG_DUP: u8 = 1 << 3;
pub const FLAG_RETAIN: u8 = 1 << 0;
/// Reserved flag bits MQTT requires on SUBSCRIBE.
pub const FLAG_SUBSCRIBE: u8 = 0x02;

// CONNECT flags.
pub const CONNECT_USERNAME: u8 = 1 << 7;
pub const CONNECT_PASSWORD: u8 = 1 << 6;
pub const CONNECT_WILL_RETAIN: u8 = 1 << 5;
pub const CONNECT_WILL: u8 = 1 << 2;
pub const CONNECT_CLEAN_SESSION: u8 = 1 << 1;

/// MQTT control packet types, as carried in the high nibble of the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Classifies a fixed header byte. Only the high nibble is looked at.
    pub const fn from_fixed_header(byte: u8) -> Option<Self> {
        Some(match byte >> 4 {
            1 => Self::Connect,
            2 => Self::ConnAck,
            3 => Self::Publish,
            4 => Self::PubAck,
            5 => Self::PubRec,
            6 => Self::PubRel,
            7 => Self::PubComp,
            8 => Self::Subscribe,
            9 => Self::SubAck,
            10 => Self::Unsubscribe,
            11 => Self::UnsubAck,
            12 => Self::PingReq,
            13 => Self::PingResp,
            14 => Self::Disconnect,
            _ => return None,
        })
    }

    /// Builds a fixed header byte from this type and the low-nibble `flags`.
    pub const fn fixed_header(self, flags: u8) -> u8 {
        ((self as u8) << 4) | (flags & 0x0F)
    }
}

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    /// Extracts the QoS bits from a fixed header byte.
    pub const fn from_fixed_header(byte: u8) -> Option<Self> {
        match (byte >> 1) & 0x03 {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    /// The QoS bits positioned for a fixed header.
    pub const fn header_bits(self) -> u8 {
        (self as u8) << 1
    }
}

/// One typed element of a packet's variable header or payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<'a> {
    /// One byte.
    Byte(u8),
    /// Two bytes, big-endian.
    Short(u16),
    /// Two-byte big-endian length prefix followed by the bytes.
    String(&'a [u8]),
    /// Raw bytes, no prefix.
    Data(&'a [u8]),
}

impl Field<'_> {
    /// Number of bytes this field occupies on the wire.
    pub const fn wire_len(&self) -> usize {
        match self {
            Field::Byte(_) => 1,
            Field::Short(_) => 2,
            Field::String(bytes) => 2 + bytes.len(),
            Field::Data(bytes) => bytes.len(),
        }
    }
}

/// A single-use MQTT packet builder.
///
/// Fields borrow their contents, so a packet lives no longer than the
/// operation that builds and sends it.
///
/// ```
/// use evmqtt::packet::{Packet, PacketType};
///
/// let mut packet = Packet::new();
/// packet.set_header(PacketType::PingReq.fixed_header(0));
///
/// let mut wire = heapless::Vec::<u8, 8>::new();
/// assert_eq!(packet.serialize(&mut wire), Ok(2));
/// assert_eq!(&wire[..], &[0xC0, 0x00]);
/// ```
#[derive(Debug, Clone)]
pub struct Packet<'a, const MAX_FIELDS: usize = DEFAULT_MAX_FIELDS> {
    header: u8,
    fields: Vec<Field<'a>, MAX_FIELDS>,
    remaining_len: u32,
}

impl<'a> Packet<'a> {
    /// Creates an empty packet with the default field capacity.
    pub const fn new() -> Self {
        Self::empty()
    }
}

impl<'a> Default for Packet<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const MAX_FIELDS: usize> Packet<'a, MAX_FIELDS> {
    /// Creates an empty packet holding at most `MAX_FIELDS` fields.
    pub const fn empty() -> Self {
        Self {
            header: 0,
            fields: Vec::new(),
            remaining_len: 0,
        }
    }

    /// Stores the fixed header byte (type in the high nibble, flags in the low).
    pub fn set_header(&mut self, type_and_flags: u8) {
        self.header = type_and_flags;
    }

    /// The fixed header byte.
    pub fn header(&self) -> u8 {
        self.header
    }

    /// Sum of the wire lengths of all fields.
    pub fn remaining_length(&self) -> u32 {
        self.remaining_len
    }

    /// Number of fields added so far.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no field has been added.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The fields in insertion order.
    pub fn fields(&self) -> &[Field<'a>] {
        &self.fields
    }

    /// Total number of bytes `serialize` will produce.
    pub fn encoded_len(&self) -> usize {
        1 + util::remaining_length_len(self.remaining_len) + self.remaining_len as usize
    }

    /// Adds a single byte.
    pub fn add_byte(&mut self, value: u8) -> Result<(), MqttError<ErrorPlaceHolder>> {
        self.push(Field::Byte(value))
    }

    /// Adds a 16-bit integer, sent big-endian.
    pub fn add_short(&mut self, value: u16) -> Result<(), MqttError<ErrorPlaceHolder>> {
        self.push(Field::Short(value))
    }

    /// Adds a length-prefixed string whose length is the slice length.
    pub fn add_fixed_length_string(
        &mut self,
        bytes: &'a [u8],
    ) -> Result<(), MqttError<ErrorPlaceHolder>> {
        if bytes.len() > u16::MAX as usize {
            return Err(MqttError::EncodingOverflow);
        }
        self.push(Field::String(bytes))
    }

    /// Adds a length-prefixed string measured up to its NUL terminator.
    /// The terminator itself is not sent.
    pub fn add_measured_string(&mut self, s: &'a CStr) -> Result<(), MqttError<ErrorPlaceHolder>> {
        self.add_fixed_length_string(s.to_bytes())
    }

    /// Adds a UTF-8 string with a length prefix.
    pub fn add_str(&mut self, s: &'a str) -> Result<(), MqttError<ErrorPlaceHolder>> {
        self.add_fixed_length_string(s.as_bytes())
    }

    /// Adds raw bytes without a length prefix.
    pub fn add_data(&mut self, bytes: &'a [u8]) -> Result<(), MqttError<ErrorPlaceHolder>> {
        self.push(Field::Data(bytes))
    }

    // A failed push leaves the packet untouched.
    fn push(&mut self, field: Field<'a>) -> Result<(), MqttError<ErrorPlaceHolder>> {
        if self.fields.is_full() {
            return Err(MqttError::CapacityExceeded);
        }
        let remaining_len = u32::try_from(field.wire_len())
            .ok()
            .and_then(|len| self.remaining_len.checked_add(len))
            .filter(|len| *len <= MAX_REMAINING_LENGTH)
            .ok_or(MqttError::EncodingOverflow)?;
        self.fields
            .push(field)
            .map_err(|_| MqttError::CapacityExceeded)?;
        self.remaining_len = remaining_len;
        Ok(())
    }

    /// Writes the packet into `sink` and returns the number of bytes written.
    ///
    /// The first refused write aborts serialization. Bytes already accepted by
    /// the sink stay there; the caller is expected to drop the connection.
    pub fn serialize<S: ByteSink>(&self, sink: &mut S) -> Result<usize, MqttError<S::Error>> {
        let (len_buf, len_bytes) = util::encode_remaining_length(self.remaining_len)
            .map_err(MqttError::cast_transport_error)?;

        let has_fields = !self.fields.is_empty();
        sink.write(&[self.header], WriteFlags::COPY.union(WriteFlags::MORE))?;
        sink.write(&len_buf[..len_bytes], Self::flags(WriteFlags::COPY, has_fields))?;

        let last = self.fields.len();
        for (i, field) in self.fields.iter().enumerate() {
            let more = i + 1 < last;
            match field {
                Field::Byte(value) => {
                    sink.write(&[*value], Self::flags(WriteFlags::COPY, more))?;
                }
                Field::Short(value) => {
                    sink.write(&value.to_be_bytes(), Self::flags(WriteFlags::COPY, more))?;
                }
                Field::String(bytes) => {
                    // Length checked when the field was added.
                    let prefix = (bytes.len() as u16).to_be_bytes();
                    sink.write(&prefix, WriteFlags::COPY.union(WriteFlags::MORE))?;
                    sink.write(bytes, Self::flags(WriteFlags::NONE, more))?;
                }
                Field::Data(bytes) => {
                    sink.write(bytes, Self::flags(WriteFlags::NONE, more))?;
                }
            }
        }

        Ok(self.encoded_len())
    }

    fn flags(base: WriteFlags, more: bool) -> WriteFlags {
        if more {
            base.union(WriteFlags::MORE)
        } else {
            base
        }
    }
}

// --- Outbound packets ---

/// CONNECT: protocol name, level, clean-session flag, keep-alive, client id.
pub fn connect<'a>(
    client_id: &'a str,
    keep_alive_secs: u16,
) -> Result<Packet<'a>, MqttError<ErrorPlaceHolder>> {
    let mut packet = Packet::new();
    packet.set_header(PacketType::Connect.fixed_header(0));
    // variable header
    packet.add_str(PROTOCOL_NAME)?;
    packet.add_byte(PROTOCOL_LEVEL)?;
    packet.add_byte(CONNECT_CLEAN_SESSION)?;
    packet.add_short(keep_alive_secs)?;
    // payload
    packet.add_str(client_id)?;
    Ok(packet)
}

/// PUBLISH at QoS 0: topic name followed by the raw payload.
pub fn publish<'a>(
    topic: &'a str,
    payload: &'a [u8],
) -> Result<Packet<'a>, MqttError<ErrorPlaceHolder>> {
    let mut packet = Packet::new();
    packet.set_header(PacketType::Publish.fixed_header(QoS::AtMostOnce.header_bits()));
    packet.add_str(topic)?;
    packet.add_data(payload)?;
    Ok(packet)
}

/// SUBSCRIBE to a single topic filter at QoS 0.
pub fn subscribe(topic: &str) -> Result<Packet<'_>, MqttError<ErrorPlaceHolder>> {
    let mut packet = Packet::new();
    packet.set_header(PacketType::Subscribe.fixed_header(FLAG_SUBSCRIBE));
    packet.add_short(SUBSCRIBE_PACKET_ID)?;
    packet.add_str(topic)?;
    packet.add_byte(QoS::AtMostOnce as u8)?;
    Ok(packet)
}

/// PINGREQ: fixed header only.
pub fn ping_request() -> Packet<'static> {
    let mut packet = Packet::new();
    packet.set_header(PacketType::PingReq.fixed_header(0));
    packet
}

/// DISCONNECT: fixed header only.
pub fn disconnect() -> Packet<'static> {
    let mut packet = Packet::new();
    packet.set_header(PacketType::Disconnect.fixed_header(0));
    packet
}

// --- Inbound packets ---

/// A received PUBLISH, borrowing from the delivery it was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
}

/// A received CONNACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnAck {
    /// `None` when the delivery was too short to carry one.
    pub return_code: Option<crate::error::ConnectReasonCode>,
}

/// The inbound packets the client distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PingResp,
    SubAck,
    /// Any other valid packet type; the client ignores these.
    Other(PacketType),
}

/// Classifies one delivery by its fixed header and decodes what the client
/// needs from it.
///
/// The delivery is assumed to hold exactly one complete packet whose
/// remaining length fits in a single byte: PUBLISH topics are read from a
/// length prefix at offset 2 and the payload runs to the end of the delivery.
pub fn decode(buf: &[u8]) -> Result<Inbound<'_>, MqttError<ErrorPlaceHolder>> {
    let header = *buf
        .first()
        .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
    let packet_type = PacketType::from_fixed_header(header)
        .ok_or(MqttError::Protocol(ProtocolError::InvalidPacketType(header >> 4)))?;

    Ok(match packet_type {
        PacketType::ConnAck => Inbound::ConnAck(ConnAck {
            return_code: buf.get(3).map(|code| (*code).into()),
        }),
        PacketType::Publish => Inbound::Publish(decode_publish(header, buf)?),
        PacketType::PingResp => Inbound::PingResp,
        PacketType::SubAck => Inbound::SubAck,
        other => Inbound::Other(other),
    })
}

fn decode_publish(header: u8, buf: &[u8]) -> Result<Publish<'_>, MqttError<ErrorPlaceHolder>> {
    let qos = QoS::from_fixed_header(header)
        .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
    let mut cursor = 2;
    let topic = util::read_utf8_string(&mut cursor, buf)?;
    Ok(Publish {
        topic,
        payload: &buf[cursor..],
        qos,
        dup: header & FLAG_DUP != 0,
        retain: header & FLAG_RETAIN != 0,
    })
}
