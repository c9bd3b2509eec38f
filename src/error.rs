//! # Error Types
//!
//! This module defines the error types used throughout the client, from packet
//! construction limits to transport failures and protocol violations.

use crate::transport;

/// Stand-in transport error for code paths that never touch a transport,
/// such as building a packet or decoding an inbound delivery.
///
/// It has no values, so an `MqttError<ErrorPlaceHolder>` can always be
/// converted into an `MqttError<T>` for any concrete transport error `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPlaceHolder {}

impl transport::TransportError for ErrorPlaceHolder {}

#[cfg(feature = "defmt")]
impl defmt::Format for ErrorPlaceHolder {
    fn format(&self, _f: defmt::Formatter) {
        match *self {}
    }
}

/// The primary error enum for the MQTT client.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying network transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer while opening the
    /// connection or writing to it.
    Transport(T),
    /// A protocol-level error occurred while decoding an inbound delivery.
    Protocol(ProtocolError),
    /// A packet already holds its maximum number of fields.
    CapacityExceeded,
    /// The packet's remaining length (or a string's length prefix) does not
    /// fit its wire representation.
    EncodingOverflow,
    /// The operation requires an established MQTT session.
    NotConnected,
    /// The broker did not acknowledge a CONNECT within the allowed number of
    /// poll ticks.
    ProtocolTimeout,
}

/// Allows the `?` operator to lift raw transport errors into `MqttError`.
impl<T: transport::TransportError> From<T> for MqttError<T> {
    fn from(err: T) -> Self {
        MqttError::Transport(err)
    }
}

impl<T: transport::TransportError> MqttError<T> {
    /// Converts an error produced by transport-free code (packet building,
    /// decoding) into an error for the transport `T`.
    pub fn cast_transport_error(other: MqttError<ErrorPlaceHolder>) -> MqttError<T> {
        match other {
            MqttError::Transport(never) => match never {},
            MqttError::Protocol(p) => MqttError::Protocol(p),
            MqttError::CapacityExceeded => MqttError::CapacityExceeded,
            MqttError::EncodingOverflow => MqttError::EncodingOverflow,
            MqttError::NotConnected => MqttError::NotConnected,
            MqttError::ProtocolTimeout => MqttError::ProtocolTimeout,
        }
    }

    /// Returns `true` for errors that tear the connection down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MqttError::Transport(_) | MqttError::ProtocolTimeout)
    }
}

/// Represents the return codes carried by a `CONNACK`.
///
/// The client only logs the code; every `CONNACK` completes the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// A code outside the range defined by MQTT v3.1.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Enumerates specific MQTT protocol errors found on the receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An empty delivery or a reserved packet type nibble.
    InvalidPacketType(u8),
    /// A delivery too short for the fields its header announces.
    MalformedPacket,
    /// A topic name that is not valid UTF-8.
    InvalidUtf8String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Refused;

    impl transport::TransportError for Refused {}

    #[test]
    fn placeholder_errors_cast_to_any_transport() {
        let err: MqttError<Refused> =
            MqttError::cast_transport_error(MqttError::Protocol(ProtocolError::MalformedPacket));
        assert_eq!(err, MqttError::Protocol(ProtocolError::MalformedPacket));

        let err: MqttError<Refused> = MqttError::cast_transport_error(MqttError::CapacityExceeded);
        assert_eq!(err, MqttError::CapacityExceeded);
    }

    #[test]
    fn transport_errors_lift_with_from() {
        let err: MqttError<Refused> = Refused.into();
        assert_eq!(err, MqttError::Transport(Refused));
        assert!(err.is_fatal());
        assert!(!MqttError::<Refused>::NotConnected.is_fatal());
    }

    #[test]
    fn reason_codes_map_from_wire_values() {
        assert_eq!(ConnectReasonCode::from(0), ConnectReasonCode::Success);
        assert_eq!(ConnectReasonCode::from(5), ConnectReasonCode::NotAuthorized);
        assert_eq!(ConnectReasonCode::from(0x80), ConnectReasonCode::Other(0x80));
    }
}
