//! # MQTT Transport Abstraction
//!
//! This module defines the `Transport` trait, the client's view of an
//! event-driven, non-blocking TCP stack. Every call submits work and returns
//! immediately; outcomes come back later through the client's callback entry
//! points (`on_receive`, `on_poll`, `on_error`, `on_closed`).
//!
//! The transport owns its sockets. The client only keeps a `Copy` handle and
//! hands it back on every call, so a handle that was aborted or closed can be
//! recognized when a late callback still carries it.

use core::net::Ipv4Addr;

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {}

/// Hints attached to a buffered write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteFlags(u8);

impl WriteFlags {
    /// No hints.
    pub const NONE: Self = Self(0);
    /// The bytes live in a temporary and must be copied before `write` returns.
    pub const COPY: Self = Self(0x01);
    /// More writes for the same packet follow, so the transport may delay
    /// segmenting until `output` is called.
    pub const MORE: Self = Self(0x02);

    /// Returns `true` if every hint in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Combines two sets of hints.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// A non-blocking, callback-driven connection provider.
pub trait Transport {
    /// Identifies one connection. Compared against the client's current
    /// handle to detect stale callbacks.
    type Handle: Copy + PartialEq + core::fmt::Debug;

    /// The error type returned by the transport.
    type Error: TransportError;

    /// Starts opening a connection. Success only means the attempt was
    /// accepted; the handshake completes asynchronously.
    fn open(&mut self, addr: Ipv4Addr, port: u16) -> Result<Self::Handle, Self::Error>;

    /// Starts delivering receive, poll and error events for `handle`.
    ///
    /// `poll_interval` is measured in the transport's coarse ticks.
    fn arm(&mut self, handle: Self::Handle, poll_interval: u8);

    /// Queues `bytes` for transmission.
    fn write(
        &mut self,
        handle: Self::Handle,
        bytes: &[u8],
        flags: WriteFlags,
    ) -> Result<(), Self::Error>;

    /// Pushes everything queued so far onto the wire.
    fn output(&mut self, handle: Self::Handle) -> Result<(), Self::Error>;

    /// Closes the connection gracefully. On success the handle is invalid
    /// afterwards; on error it stays valid and should be aborted.
    fn close(&mut self, handle: Self::Handle) -> Result<(), Self::Error>;

    /// Resets the connection immediately. The handle is invalid afterwards.
    fn abort(&mut self, handle: Self::Handle);
}

/// Destination for serialized packet bytes.
pub trait ByteSink {
    /// The error type returned when a write is refused.
    type Error: TransportError;

    /// Writes one chunk of a packet.
    fn write(&mut self, bytes: &[u8], flags: WriteFlags) -> Result<(), Self::Error>;
}

/// Binds a transport to one of its handles so packets can be serialized
/// straight into its write buffer.
pub struct HandleSink<'t, T: Transport> {
    transport: &'t mut T,
    handle: T::Handle,
}

impl<'t, T: Transport> HandleSink<'t, T> {
    /// Creates a sink writing to `handle` on `transport`.
    pub fn new(transport: &'t mut T, handle: T::Handle) -> Self {
        Self { transport, handle }
    }
}

impl<T: Transport> ByteSink for HandleSink<'_, T> {
    type Error = T::Error;

    fn write(&mut self, bytes: &[u8], flags: WriteFlags) -> Result<(), Self::Error> {
        self.transport.write(self.handle, bytes, flags)
    }
}

/// Collects serialized bytes into a fixed-capacity buffer.
impl<const N: usize> ByteSink for heapless::Vec<u8, N> {
    type Error = BufferFull;

    fn write(&mut self, bytes: &[u8], _flags: WriteFlags) -> Result<(), Self::Error> {
        self.extend_from_slice(bytes).map_err(|_| BufferFull)
    }
}

/// A fixed-capacity buffer ran out of room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferFull;

impl TransportError for BufferFull {}
