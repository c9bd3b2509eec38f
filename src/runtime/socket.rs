//! A [`Transport`] that stages socket work for an async owner.
//!
//! The client calls into the transport synchronously, but an `embassy-net`
//! `TcpSocket` can only be driven from async code. `StagedTransport` bridges
//! the two: every call is recorded as a [`Command`] (plus buffered bytes in
//! the outbox), and the event loop drains and performs the commands on the
//! real socket between client calls.

use core::net::Ipv4Addr;

use heapless::Vec;

use crate::fmt::Dbg;
use crate::transport::{Transport, TransportError, WriteFlags};

/// Maximum number of socket commands staged between two drains.
pub const MAX_STAGED_COMMANDS: usize = 8;

/// Coarse ticks used for `poll_interval` until `arm` is called.
pub const DEFAULT_POLL_INTERVAL: u8 = 4;

/// Errors reported by the staged socket transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    /// The handle does not belong to the open connection.
    StaleHandle,
    /// The outbox or command queue has no room left.
    BufferFull,
    /// Reading from or writing to the socket failed.
    Tcp(embassy_net::tcp::Error),
    /// The TCP handshake failed.
    Connect(embassy_net::tcp::ConnectError),
    /// The handshake or a flush did not finish within the attempt window.
    Timeout,
}

impl TransportError for SocketError {}

/// Work for the socket owner, in the order it was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Connect the socket to the broker.
    Open {
        handle: u32,
        addr: Ipv4Addr,
        port: u16,
    },
    /// Write the outbox and flush it.
    Flush(u32),
    /// Close gracefully.
    Close(u32),
    /// Reset the connection.
    Abort(u32),
}

impl Command {
    pub fn handle(&self) -> u32 {
        match *self {
            Command::Open { handle, .. }
            | Command::Flush(handle)
            | Command::Close(handle)
            | Command::Abort(handle) => handle,
        }
    }
}

/// Socket transport whose handles are connection generations.
///
/// `TX` bounds how many bytes may be written between two flushes.
#[derive(Debug)]
pub struct StagedTransport<const TX: usize> {
    generation: u32,
    current: Option<u32>,
    poll_interval: u8,
    commands: Vec<Command, MAX_STAGED_COMMANDS>,
    outbox: Vec<u8, TX>,
}

impl<const TX: usize> Default for StagedTransport<TX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const TX: usize> StagedTransport<TX> {
    pub const fn new() -> Self {
        Self {
            generation: 0,
            current: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            commands: Vec::new(),
            outbox: Vec::new(),
        }
    }

    /// The handle of the connection the socket currently belongs to.
    pub fn current(&self) -> Option<u32> {
        self.current
    }

    /// Poll interval requested by the last `arm`.
    pub fn poll_interval(&self) -> u8 {
        self.poll_interval
    }

    /// Bytes written since the last flush.
    pub fn outbox(&self) -> &[u8] {
        &self.outbox
    }

    pub fn clear_outbox(&mut self) {
        self.outbox.clear();
    }

    /// Takes the oldest staged command.
    pub fn next_command(&mut self) -> Option<Command> {
        if self.commands.is_empty() {
            None
        } else {
            Some(self.commands.remove(0))
        }
    }

    pub fn has_commands(&self) -> bool {
        !self.commands.is_empty()
    }

    /// Forgets `handle` after the socket failed underneath it. Its staged
    /// work is dropped and no command is issued.
    pub fn reset(&mut self, handle: u32) {
        if self.current == Some(handle) {
            self.current = None;
            self.outbox.clear();
        }
        self.commands.retain(|cmd| cmd.handle() != handle);
    }

    fn check(&self, handle: u32) -> Result<(), SocketError> {
        if self.current == Some(handle) {
            Ok(())
        } else {
            Err(SocketError::StaleHandle)
        }
    }

    fn stage(&mut self, cmd: Command) -> Result<(), SocketError> {
        self.commands.push(cmd).map_err(|_| SocketError::BufferFull)
    }
}

impl<const TX: usize> Transport for StagedTransport<TX> {
    type Handle = u32;
    type Error = SocketError;

    fn open(&mut self, addr: Ipv4Addr, port: u16) -> Result<u32, SocketError> {
        if let Some(previous) = self.current {
            // One socket, one connection.
            self.abort(previous);
        }
        let handle = self.generation.wrapping_add(1);
        self.stage(Command::Open { handle, addr, port })?;
        self.generation = handle;
        self.current = Some(handle);
        self.outbox.clear();
        Ok(handle)
    }

    fn arm(&mut self, handle: u32, poll_interval: u8) {
        if self.current == Some(handle) {
            self.poll_interval = poll_interval.max(1);
        }
    }

    fn write(&mut self, handle: u32, bytes: &[u8], _flags: WriteFlags) -> Result<(), SocketError> {
        self.check(handle)?;
        self.outbox
            .extend_from_slice(bytes)
            .map_err(|_| SocketError::BufferFull)
    }

    fn output(&mut self, handle: u32) -> Result<(), SocketError> {
        self.check(handle)?;
        if self.commands.last() == Some(&Command::Flush(handle)) {
            return Ok(());
        }
        self.stage(Command::Flush(handle))
    }

    fn close(&mut self, handle: u32) -> Result<(), SocketError> {
        self.check(handle)?;
        self.stage(Command::Close(handle))?;
        self.current = None;
        Ok(())
    }

    fn abort(&mut self, handle: u32) {
        let never_opened = self
            .commands
            .iter()
            .any(|cmd| matches!(cmd, Command::Open { handle: h, .. } if *h == handle));
        self.reset(handle);
        if never_opened {
            return;
        }
        if self.current.is_some_and(|h| h > handle)
            || self.commands.iter().any(|cmd| cmd.handle() > handle)
        {
            // A newer connection owns the socket; its open resets it anyway.
            debug!("abort of superseded handle {} dropped", handle);
            return;
        }
        // Commands are drained in order, so anything still queued belongs to
        // older generations and is superseded by the reset.
        self.commands.clear();
        if let Err(cmd) = self.commands.push(Command::Abort(handle)) {
            warn!("no room to stage {:?}", Dbg(&cmd));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROKER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn drain<const TX: usize>(t: &mut StagedTransport<TX>) -> std::vec::Vec<Command> {
        core::iter::from_fn(|| t.next_command()).collect()
    }

    #[test]
    fn handles_are_generations() {
        let mut t = StagedTransport::<64>::new();
        let first = t.open(BROKER, 1883).unwrap();
        let second = t.open(BROKER, 1883).unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(t.current(), Some(2));

        // The first attempt never reached the socket, so it just vanishes.
        assert_eq!(
            drain(&mut t),
            [Command::Open {
                handle: 2,
                addr: BROKER,
                port: 1883
            }]
        );
    }

    #[test]
    fn writes_are_staged_until_output() {
        let mut t = StagedTransport::<64>::new();
        let h = t.open(BROKER, 1883).unwrap();
        t.arm(h, 2);
        t.write(h, &[0xC0], WriteFlags::MORE).unwrap();
        t.write(h, &[0x00], WriteFlags::NONE).unwrap();
        t.output(h).unwrap();
        t.output(h).unwrap();

        assert_eq!(t.poll_interval(), 2);
        assert_eq!(t.outbox(), [0xC0, 0x00]);
        assert_eq!(drain(&mut t)[1..], [Command::Flush(h)]);
    }

    #[test]
    fn stale_handles_are_refused() {
        let mut t = StagedTransport::<64>::new();
        let h = t.open(BROKER, 1883).unwrap();
        drain(&mut t);
        t.close(h).unwrap();

        assert_eq!(t.write(h, b"x", WriteFlags::NONE), Err(SocketError::StaleHandle));
        assert_eq!(t.output(h), Err(SocketError::StaleHandle));
        assert_eq!(t.close(h), Err(SocketError::StaleHandle));
        assert_eq!(drain(&mut t), [Command::Close(h)]);
    }

    #[test]
    fn full_outbox_is_reported() {
        let mut t = StagedTransport::<4>::new();
        let h = t.open(BROKER, 1883).unwrap();
        t.write(h, &[1, 2, 3], WriteFlags::NONE).unwrap();
        assert_eq!(
            t.write(h, &[4, 5], WriteFlags::NONE),
            Err(SocketError::BufferFull)
        );
    }

    #[test]
    fn abort_after_open_drops_staged_work() {
        let mut t = StagedTransport::<64>::new();
        let h = t.open(BROKER, 1883).unwrap();
        drain(&mut t);

        t.write(h, b"pending", WriteFlags::NONE).unwrap();
        t.output(h).unwrap();
        t.abort(h);

        assert_eq!(t.current(), None);
        assert!(t.outbox().is_empty());
        assert_eq!(drain(&mut t), [Command::Abort(h)]);
    }

    #[test]
    fn abort_of_a_superseded_handle_spares_the_new_connection() {
        let mut t = StagedTransport::<64>::new();
        let old = t.open(BROKER, 1883).unwrap();
        drain(&mut t);
        t.close(old).unwrap();
        let new = t.open(BROKER, 1883).unwrap();

        t.abort(old);
        assert_eq!(t.current(), Some(new));
        assert_eq!(
            drain(&mut t),
            [Command::Open {
                handle: new,
                addr: BROKER,
                port: 1883
            }]
        );
    }

    #[test]
    fn abort_supersedes_queued_work() {
        let mut t = StagedTransport::<64>::new();
        let h = t.open(BROKER, 1883).unwrap();
        drain(&mut t);
        t.write(h, b"x", WriteFlags::NONE).unwrap();
        t.output(h).unwrap();
        t.close(h).unwrap();

        t.abort(h);
        assert_eq!(drain(&mut t), [Command::Abort(h)]);
    }

    #[test]
    fn reset_issues_nothing() {
        let mut t = StagedTransport::<64>::new();
        let h = t.open(BROKER, 1883).unwrap();
        t.reset(h);
        assert_eq!(t.current(), None);
        assert!(!t.has_commands());
    }
}
