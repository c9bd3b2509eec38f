//! The async task that owns the socket and drives the client.

use embassy_futures::select::{Either, Either3, select, select3};
use embassy_net::tcp::{self, State, TcpSocket};
use embassy_net::{IpAddress, IpEndpoint};
use embassy_time::{Duration, Ticker, Timer};
use embedded_io_async::Write;

use super::publisher::{PublishRequest, PublishRequestReceiver};
use super::registry::TopicRegistry;
use super::session::{self, PollSchedule};
use super::socket::{Command, SocketError, StagedTransport};
use crate::client::{MessageHandler, MqttClient, MqttOptions};
use crate::clock::EmbassyClock;
use crate::error::MqttError;
use crate::fmt::Dbg;

/// Length of one coarse transport tick. Poll intervals are multiples of it,
/// and the keep-alive check runs once per tick.
pub const COARSE_TICK: Duration = Duration::from_millis(500);

/// The client type driven by [`MqttRuntime`].
pub type RuntimeClient<'a, H, const TX: usize> =
    MqttClient<'a, StagedTransport<TX>, EmbassyClock, H>;

/// Runs one MQTT session over an `embassy-net` TCP socket.
///
/// The runtime multiplexes three event sources in a single task: socket
/// reads, the coarse tick and publish requests from other tasks. After each
/// event it performs whatever socket work the client staged.
///
/// ```ignore
/// static REQUESTS: PublishRequestChannel<'static, 4> = Channel::new();
///
/// let options = MqttOptions::new(Ipv4Addr::new(192, 168, 1, 10), "dev1")
///     .with_auto_reconnect(true);
/// let mut runtime = MqttRuntime::<_, 512, 4, 4>::new(
///     socket,
///     options,
///     |msg: &Publish<'_>| info!("{}", msg.topic),
///     REQUESTS.receiver(),
/// );
/// runtime.topics_mut().add_topic("home/light/set");
/// runtime.run(&mut rx_buf).await
/// ```
pub struct MqttRuntime<'a, H, const TX: usize, const MAX_TOPICS: usize, const DEPTH: usize>
where
    H: MessageHandler,
{
    client: RuntimeClient<'a, H, TX>,
    socket: TcpSocket<'a>,
    topics: TopicRegistry<MAX_TOPICS>,
    requests: PublishRequestReceiver<'a, DEPTH>,
}

impl<'a, H, const TX: usize, const MAX_TOPICS: usize, const DEPTH: usize>
    MqttRuntime<'a, H, TX, MAX_TOPICS, DEPTH>
where
    H: MessageHandler,
{
    pub fn new(
        socket: TcpSocket<'a>,
        options: MqttOptions<'a>,
        handler: H,
        requests: PublishRequestReceiver<'a, DEPTH>,
    ) -> Self {
        Self {
            client: MqttClient::new(StagedTransport::new(), EmbassyClock, handler, options),
            socket,
            topics: TopicRegistry::new(),
            requests,
        }
    }

    pub fn client(&self) -> &RuntimeClient<'a, H, TX> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut RuntimeClient<'a, H, TX> {
        &mut self.client
    }

    /// Topics subscribed after every CONNACK.
    pub fn topics_mut(&mut self) -> &mut TopicRegistry<MAX_TOPICS> {
        &mut self.topics
    }

    /// Connects and serves the session forever.
    ///
    /// Reconnection after a lost connection only happens when the options
    /// enable auto-reconnect.
    pub async fn run(&mut self, rx_buf: &mut [u8]) -> ! {
        if let Err(e) = self.client.connect() {
            warn!("initial connect failed: {:?}", Dbg(&e));
        }

        let mut ticker = Ticker::every(COARSE_TICK);
        let mut schedule = PollSchedule::new();

        loop {
            self.perform_staged().await;

            let handle = self.client.handle();
            let event = {
                let socket = &mut self.socket;
                let rx = &mut *rx_buf;
                let read = async move {
                    match handle {
                        Some(_) => socket.read(rx).await,
                        None => core::future::pending::<Result<usize, tcp::Error>>().await,
                    }
                };
                select3(read, ticker.next(), self.requests.receive()).await
            };

            match (event, handle) {
                (Either3::First(Ok(0)), Some(handle)) => self.client.on_closed(handle),
                (Either3::First(Ok(n)), Some(handle)) => {
                    session::deliver(&mut self.client, &self.topics, handle, &rx_buf[..n])
                }
                (Either3::First(Err(e)), Some(handle)) => self.fail(handle, SocketError::Tcp(e)),
                (Either3::First(_), None) => {}
                (Either3::Second(()), _) => schedule.tick(&mut self.client),
                (Either3::Third(request), _) => self.publish(request),
            }
        }
    }

    fn publish(&mut self, request: PublishRequest<'_>) {
        match self.client.publish(request.topic, request.payload) {
            Ok(()) => {}
            Err(MqttError::NotConnected) => {
                debug!("dropping publish to {:?}, not connected", request.topic)
            }
            Err(e) => warn!("publish to {:?} failed: {:?}", request.topic, Dbg(&e)),
        }
    }

    // The socket failed underneath `handle`; nothing staged for it survives.
    fn fail(&mut self, handle: u32, reason: SocketError) {
        self.client.transport_mut().reset(handle);
        self.client.on_error(handle, reason);
        self.socket.abort();
    }

    // A connect or flush may take as long as the client waits for a CONNACK.
    fn attempt_window(&self) -> Duration {
        let polls = u32::from(self.client.options().poll_interval.max(1))
            * u32::from(self.client.options().poll_abort_threshold.max(1));
        COARSE_TICK * polls
    }

    async fn perform_staged(&mut self) {
        while let Some(cmd) = self.client.transport_mut().next_command() {
            match cmd {
                Command::Open { handle, addr, port } => {
                    if self.socket.state() != State::Closed {
                        self.socket.abort();
                    }
                    debug!("connecting to {:?} port {}", Dbg(&addr), port);
                    let endpoint = IpEndpoint::new(IpAddress::Ipv4(addr), port);
                    let deadline = Timer::after(self.attempt_window());
                    match select(self.socket.connect(endpoint), deadline).await {
                        Either::First(Ok(())) => {}
                        Either::First(Err(e)) => self.fail(handle, SocketError::Connect(e)),
                        Either::Second(()) => self.fail(handle, SocketError::Timeout),
                    }
                }
                Command::Flush(handle) => {
                    let deadline = Timer::after(self.attempt_window());
                    let socket = &mut self.socket;
                    let outbox = self.client.transport().outbox();
                    let send = async move {
                        socket.write_all(outbox).await?;
                        socket.flush().await
                    };
                    let sent = select(send, deadline).await;
                    self.client.transport_mut().clear_outbox();
                    match sent {
                        Either::First(Ok(())) => {}
                        Either::First(Err(e)) => self.fail(handle, SocketError::Tcp(e)),
                        Either::Second(()) => self.fail(handle, SocketError::Timeout),
                    }
                }
                Command::Close(_) => self.socket.close(),
                Command::Abort(_) => self.socket.abort(),
            }
        }
    }
}
