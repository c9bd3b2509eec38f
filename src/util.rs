//! # MQTT Serialization Utilities
//!
//! Helpers for the MQTT "remaining length" variable-byte integer and for
//! reading length-prefixed strings out of an inbound delivery.

use crate::error::{ErrorPlaceHolder, MqttError, ProtocolError};

/// Largest value representable by the 4-byte remaining-length encoding.
pub const MAX_REMAINING_LENGTH: u32 = 268_435_455;

/// Maximum number of bytes used by an encoded remaining length.
pub const MAX_REMAINING_LENGTH_BYTES: usize = 4;

/// Returns how many bytes `value` occupies once encoded.
pub const fn remaining_length_len(value: u32) -> usize {
    if value < 128 {
        1
    } else if value < 16_384 {
        2
    } else if value < 2_097_152 {
        3
    } else {
        4
    }
}

/// Encodes `value` as a remaining-length varint.
///
/// Seven value bits per byte, least significant group first, with the high
/// bit set on every byte but the last. Returns the scratch buffer and the
/// number of bytes used.
pub fn encode_remaining_length(
    value: u32,
) -> Result<([u8; MAX_REMAINING_LENGTH_BYTES], usize), MqttError<ErrorPlaceHolder>> {
    if value > MAX_REMAINING_LENGTH {
        return Err(MqttError::EncodingOverflow);
    }

    let mut out = [0u8; MAX_REMAINING_LENGTH_BYTES];
    let mut val = value;
    let mut i = 0;
    loop {
        let mut encoded_byte = (val & 0x7F) as u8;
        val >>= 7;
        if val > 0 {
            encoded_byte |= 0x80;
        }
        out[i] = encoded_byte;
        i += 1;
        if val == 0 {
            break;
        }
    }
    Ok((out, i))
}

/// Decodes a remaining-length varint from the start of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_remaining_length(buf: &[u8]) -> Result<(u32, usize), MqttError<ErrorPlaceHolder>> {
    let mut value: u32 = 0;
    for (i, encoded_byte) in buf.iter().take(MAX_REMAINING_LENGTH_BYTES).enumerate() {
        value |= u32::from(encoded_byte & 0x7F) << (7 * i);
        if encoded_byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(MqttError::Protocol(ProtocolError::MalformedPacket))
}

/// Reads a big-endian `u16` at `*cursor`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, MqttError<ErrorPlaceHolder>> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads a UTF-8 string prefixed with a 2-byte length, advancing the cursor.
pub fn read_utf8_string<'a>(
    cursor: &mut usize,
    buf: &'a [u8],
) -> Result<&'a str, MqttError<ErrorPlaceHolder>> {
    let len = read_u16(cursor, buf)? as usize;
    let raw = buf
        .get(*cursor..*cursor + len)
        .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
    let s = core::str::from_utf8(raw)
        .map_err(|_| MqttError::Protocol(ProtocolError::InvalidUtf8String))?;
    *cursor += len;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(n: u32) {
        let (buf, len) = encode_remaining_length(n).unwrap();
        assert_eq!(len, remaining_length_len(n), "minimal width for {n}");
        let (decoded, used) = decode_remaining_length(&buf[..len]).unwrap();
        assert_eq!(decoded, n);
        assert_eq!(used, len);
    }

    #[test]
    fn remaining_length_boundaries() {
        for n in [
            0,
            1,
            127,
            128,
            16_383,
            16_384,
            2_097_151,
            2_097_152,
            MAX_REMAINING_LENGTH,
        ] {
            round_trip(n);
        }
    }

    #[test]
    fn remaining_length_sweep() {
        // Stride through the whole 28-bit range, hitting odd values too.
        let mut n = 0u32;
        while n <= MAX_REMAINING_LENGTH {
            round_trip(n);
            n += 4_093;
        }
    }

    #[test]
    fn remaining_length_known_encodings() {
        let (buf, len) = encode_remaining_length(321).unwrap();
        assert_eq!(&buf[..len], &[0xC1, 0x02]);

        let (buf, len) = encode_remaining_length(MAX_REMAINING_LENGTH).unwrap();
        assert_eq!(&buf[..len], &[0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn remaining_length_rejects_values_above_28_bits() {
        assert_eq!(
            encode_remaining_length(MAX_REMAINING_LENGTH + 1),
            Err(MqttError::EncodingOverflow)
        );
    }

    #[test]
    fn decode_rejects_unterminated_varint() {
        assert_eq!(
            decode_remaining_length(&[0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(MqttError::Protocol(ProtocolError::MalformedPacket))
        );
        assert_eq!(
            decode_remaining_length(&[0x80]),
            Err(MqttError::Protocol(ProtocolError::MalformedPacket))
        );
    }

    #[test]
    fn reads_prefixed_strings() {
        let buf = [0x00, 0x03, b'a', b'/', b'b', 0xFF];
        let mut cursor = 0;
        assert_eq!(read_utf8_string(&mut cursor, &buf).unwrap(), "a/b");
        assert_eq!(cursor, 5);

        let mut cursor = 0;
        assert_eq!(
            read_utf8_string(&mut cursor, &[0x00, 0x09, b'a']),
            Err(MqttError::Protocol(ProtocolError::MalformedPacket))
        );
        let mut cursor = 0;
        assert_eq!(
            read_utf8_string(&mut cursor, &[0x00, 0x01, 0xFF]),
            Err(MqttError::Protocol(ProtocolError::InvalidUtf8String))
        );
    }
}
