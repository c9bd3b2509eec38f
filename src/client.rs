//! # MQTT Connection Manager
//!
//! [`MqttClient`] owns the state of one MQTT session on top of a callback
//! driven [`Transport`]. Application code calls the operations
//! (`connect`, `publish`, `subscribe`, `ping`, `disconnect`,
//! `keepalive_tick`); the transport glue calls the event entry points
//! (`on_receive`, `on_poll`, `on_error`, `on_closed`) with the handle the
//! event belongs to.
//!
//! Nothing here blocks. Transport failures never propagate as retries: they
//! tear the connection down, and recovery is left to `keepalive_tick` with
//! auto-reconnect enabled, or to the application.

use core::net::Ipv4Addr;

use embassy_time::Duration;

use crate::clock::Clock;
use crate::error::{ConnectReasonCode, MqttError};
use crate::fmt::Dbg;
use crate::packet::{self, ConnAck, Inbound, Packet, Publish};
use crate::transport::{HandleSink, Transport};

/// Default MQTT broker port.
pub const DEFAULT_PORT: u16 = 1883;

/// Connection settings for an [`MqttClient`].
#[derive(Debug, Clone, Copy)]
pub struct MqttOptions<'a> {
    /// Broker address.
    pub broker: Ipv4Addr,
    /// Broker port.
    pub port: u16,
    /// Client identifier sent in CONNECT.
    pub client_id: &'a str,
    /// Keep-alive interval announced to the broker, rounded down to seconds
    /// on the wire.
    pub keep_alive: Duration,
    /// How long before the keep-alive deadline a PINGREQ is sent.
    pub keep_alive_guard: Duration,
    /// Interval between transport poll ticks, in the transport's coarse ticks.
    pub poll_interval: u8,
    /// Poll ticks without a CONNACK before the attempt is aborted.
    pub poll_abort_threshold: u8,
    /// Reconnect from `keepalive_tick` when the connection is down.
    pub auto_reconnect: bool,
}

impl<'a> MqttOptions<'a> {
    /// Options for `client_id` connecting to `broker` on the default port.
    pub const fn new(broker: Ipv4Addr, client_id: &'a str) -> Self {
        Self {
            broker,
            port: DEFAULT_PORT,
            client_id,
            keep_alive: Duration::from_secs(5),
            keep_alive_guard: Duration::from_millis(2000),
            poll_interval: 4,
            poll_abort_threshold: 4,
            auto_reconnect: false,
        }
    }

    /// Sets the broker port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the keep-alive interval. Sub-second parts are dropped on the wire.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the poll interval, in coarse transport ticks.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: u8) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets how many poll ticks a connection attempt may wait for CONNACK.
    #[must_use]
    pub const fn with_poll_abort_threshold(mut self, ticks: u8) -> Self {
        self.poll_abort_threshold = ticks;
        self
    }

    /// Enables reconnecting from `keepalive_tick` while disconnected.
    #[must_use]
    pub const fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// The keep-alive interval as sent in CONNECT.
    pub fn keep_alive_secs(&self) -> u16 {
        u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX)
    }

    /// Idle time after which `keepalive_tick` acts.
    pub fn keep_alive_threshold_ms(&self) -> u64 {
        self.keep_alive
            .as_millis()
            .saturating_sub(self.keep_alive_guard.as_millis())
    }
}

/// Lifecycle of an MQTT session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// No transport connection is held.
    Disconnected,
    /// CONNECT was sent, CONNACK not yet received.
    Connecting,
    /// CONNACK received.
    Connected,
}

/// Receives every PUBLISH delivered by the broker.
///
/// The message borrows from the transport's receive buffer and is only valid
/// for the duration of the call.
pub trait MessageHandler {
    fn on_message(&mut self, msg: &Publish<'_>);
}

impl<F: FnMut(&Publish<'_>)> MessageHandler for F {
    fn on_message(&mut self, msg: &Publish<'_>) {
        self(msg)
    }
}

/// A handler that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl MessageHandler for NoopHandler {
    fn on_message(&mut self, _msg: &Publish<'_>) {}
}

/// An MQTT v3.1 client driven by transport callbacks.
pub struct MqttClient<'a, T, C, H>
where
    T: Transport,
    C: Clock,
    H: MessageHandler,
{
    transport: T,
    clock: C,
    handler: H,
    options: MqttOptions<'a>,
    state: ConnectionState,
    handle: Option<T::Handle>,
    last_activity: u64,
    liveness: u8,
}

impl<'a, T, C, H> MqttClient<'a, T, C, H>
where
    T: Transport,
    C: Clock,
    H: MessageHandler,
{
    /// Creates a disconnected client.
    pub fn new(transport: T, clock: C, handler: H, options: MqttOptions<'a>) -> Self {
        let last_activity = clock.now_ms();
        Self {
            transport,
            clock,
            handler,
            options,
            state: ConnectionState::Disconnected,
            handle: None,
            last_activity,
            liveness: 0,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns `true` once CONNACK has been received on the current
    /// connection.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Timestamp of the last successful send, or of the last keep-alive
    /// action.
    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    /// Poll ticks seen since the current connection attempt started.
    pub fn liveness(&self) -> u8 {
        self.liveness
    }

    /// The transport handle of the current connection, if any.
    pub fn handle(&self) -> Option<T::Handle> {
        self.handle
    }

    /// The options the client was created with.
    pub fn options(&self) -> &MqttOptions<'a> {
        &self.options
    }

    /// Enables or disables reconnecting from `keepalive_tick`.
    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.options.auto_reconnect = enabled;
    }

    /// Shared access to the transport, e.g. for glue code inspecting staged
    /// work.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Mutable access to the message handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Opens a transport connection and sends CONNECT.
    ///
    /// A no-op while a connection is established or being established.
    pub fn connect(&mut self) -> Result<(), MqttError<T::Error>> {
        match self.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Connecting => {
                debug!("connect ignored, attempt already in flight");
                return Ok(());
            }
            ConnectionState::Disconnected => {}
        }

        let connect = packet::connect(self.options.client_id, self.options.keep_alive_secs())
            .map_err(MqttError::cast_transport_error)?;

        self.liveness = 0;
        let handle = match self.transport.open(self.options.broker, self.options.port) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("opening broker connection failed: {:?}", Dbg(&e));
                self.state = ConnectionState::Disconnected;
                return Err(MqttError::Transport(e));
            }
        };
        self.handle = Some(handle);
        self.transport.arm(handle, self.options.poll_interval);

        self.transmit(&connect)?;
        self.state = ConnectionState::Connecting;
        info!("CONNECT sent as {:?}", self.options.client_id);
        Ok(())
    }

    /// Publishes `payload` on `topic` at QoS 0.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError<T::Error>> {
        self.ensure_connected()?;
        let publish =
            packet::publish(topic, payload).map_err(MqttError::cast_transport_error)?;
        self.transmit(&publish)?;
        trace!("published {} bytes to {:?}", payload.len(), topic);
        Ok(())
    }

    /// Subscribes to one topic filter at QoS 0.
    pub fn subscribe(&mut self, topic: &str) -> Result<(), MqttError<T::Error>> {
        self.ensure_connected()?;
        let subscribe = packet::subscribe(topic).map_err(MqttError::cast_transport_error)?;
        self.transmit(&subscribe)?;
        debug!("subscribed to {:?}", topic);
        Ok(())
    }

    /// Sends PINGREQ.
    pub fn ping(&mut self) -> Result<(), MqttError<T::Error>> {
        self.ensure_connected()?;
        self.transmit(&packet::ping_request())?;
        trace!("PINGREQ sent");
        Ok(())
    }

    /// Sends DISCONNECT and closes the connection gracefully.
    pub fn disconnect(&mut self) -> Result<(), MqttError<T::Error>> {
        self.ensure_connected()?;
        self.transmit(&packet::disconnect())?;
        if let Some(handle) = self.handle.take() {
            self.release(handle);
        }
        self.state = ConnectionState::Disconnected;
        info!("disconnected");
        Ok(())
    }

    /// Resets the connection without a closing handshake. Does nothing when
    /// no connection is held.
    pub fn force_disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.transport.abort(handle);
            info!("connection aborted");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Sends PINGREQ or reconnects once the connection has been idle for the
    /// keep-alive interval minus the guard band.
    ///
    /// The idle timer restarts whichever branch was taken, including when the
    /// action itself failed; that failure is returned afterwards.
    pub fn keepalive_tick(&mut self) -> Result<(), MqttError<T::Error>> {
        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_activity) <= self.options.keep_alive_threshold_ms() {
            return Ok(());
        }

        let result = match self.state {
            ConnectionState::Connected => self.ping(),
            ConnectionState::Disconnected if self.options.auto_reconnect => {
                debug!("keep-alive reconnecting");
                self.connect()
            }
            _ => Ok(()),
        };
        self.last_activity = now;
        result
    }

    /// Handles one delivery from the transport.
    pub fn on_receive(&mut self, handle: T::Handle, data: &[u8]) {
        if !self.is_current(handle) {
            debug!("dropping delivery for stale handle {:?}", Dbg(&handle));
            return;
        }

        match packet::decode(data) {
            Ok(Inbound::ConnAck(ack)) => self.on_connack(ack),
            Ok(Inbound::Publish(msg)) => {
                trace!("PUBLISH on {:?}, {} bytes", msg.topic, msg.payload.len());
                self.handler.on_message(&msg);
            }
            Ok(Inbound::PingResp) => trace!("PINGRESP"),
            Ok(Inbound::SubAck) => debug!("SUBACK"),
            Ok(Inbound::Other(packet_type)) => debug!("ignoring {:?}", packet_type),
            Err(e) => warn!("dropping malformed delivery: {:?}", Dbg(&e)),
        }
    }

    /// Handles a periodic poll tick for `handle`.
    ///
    /// A connection attempt still waiting for its CONNACK when the liveness
    /// counter reaches the abort threshold is logged as `ProtocolTimeout` and
    /// aborted. Nothing is returned: the caller of `connect()` has long since
    /// returned, and recovery belongs to `keepalive_tick`.
    pub fn on_poll(&mut self, handle: T::Handle) {
        if !self.is_current(handle) {
            return;
        }

        self.liveness = self.liveness.saturating_add(1);
        if self.state != ConnectionState::Connected
            && self.liveness >= self.options.poll_abort_threshold
        {
            let timeout = MqttError::<T::Error>::ProtocolTimeout;
            warn!("{:?} after {} poll ticks without CONNACK", Dbg(&timeout), self.liveness);
            self.force_disconnect();
        }
    }

    /// Handles a fatal transport error. The transport has already released
    /// the connection, so it is not aborted again.
    pub fn on_error(&mut self, handle: T::Handle, reason: T::Error) {
        if !self.is_current(handle) {
            return;
        }
        warn!("connection lost: {:?}", Dbg(&reason));
        self.handle = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Handles the peer closing the connection.
    pub fn on_closed(&mut self, handle: T::Handle) {
        if !self.is_current(handle) {
            return;
        }
        info!("connection closed by broker");
        self.handle = None;
        self.release(handle);
        self.state = ConnectionState::Disconnected;
    }

    fn on_connack(&mut self, ack: ConnAck) {
        if let Some(code) = ack.return_code
            && code != ConnectReasonCode::Success
        {
            // Return codes are not acted upon.
            warn!("CONNACK carries {:?}, continuing", code);
        }

        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Connected;
                self.liveness = 0;
                info!("connected");
            }
            _ => debug!("unexpected CONNACK in {:?}", self.state),
        }
    }

    fn ensure_connected(&self) -> Result<(), MqttError<T::Error>> {
        if self.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }

    fn is_current(&self, handle: T::Handle) -> bool {
        self.handle == Some(handle)
    }

    // Graceful close, falling back to an abort when the close is refused.
    fn release(&mut self, handle: T::Handle) {
        if let Err(e) = self.transport.close(handle) {
            warn!("close refused ({:?}), aborting", Dbg(&e));
            self.transport.abort(handle);
        }
    }

    // Serializes and flushes one packet. Any failure tears the connection down.
    fn transmit(&mut self, packet: &Packet<'_>) -> Result<usize, MqttError<T::Error>> {
        let Some(handle) = self.handle else {
            return Err(MqttError::NotConnected);
        };

        let written = {
            let mut sink = HandleSink::new(&mut self.transport, handle);
            packet.serialize(&mut sink)
        };
        let result = match written {
            Ok(n) => self
                .transport
                .output(handle)
                .map(|()| n)
                .map_err(MqttError::Transport),
            Err(e) => Err(e),
        };

        match result {
            Ok(n) => {
                self.last_activity = self.clock.now_ms();
                Ok(n)
            }
            Err(e) => {
                warn!("send failed: {:?}", Dbg(&e));
                self.force_disconnect();
                Err(e)
            }
        }
    }
}
