//! Per-session work the runtime does around the client: replaying
//! subscriptions after CONNACK and pacing keep-alive and poll ticks.

use super::registry::TopicRegistry;
use crate::client::{MessageHandler, MqttClient};
use crate::clock::Clock;
use crate::fmt::Dbg;
use crate::transport::Transport;

/// Feeds one delivery to the client and subscribes the registered topics
/// when it completed the handshake.
pub fn deliver<T, C, H, const MAX_TOPICS: usize>(
    client: &mut MqttClient<'_, T, C, H>,
    topics: &TopicRegistry<MAX_TOPICS>,
    handle: T::Handle,
    data: &[u8],
) where
    T: Transport,
    C: Clock,
    H: MessageHandler,
{
    let was_connected = client.is_connected();
    client.on_receive(handle, data);
    if !was_connected && client.is_connected() {
        resubscribe(client, topics);
    }
}

/// Subscribes every registered topic. Stops at the first error that tore the
/// connection down.
pub fn resubscribe<T, C, H, const MAX_TOPICS: usize>(
    client: &mut MqttClient<'_, T, C, H>,
    topics: &TopicRegistry<MAX_TOPICS>,
) where
    T: Transport,
    C: Clock,
    H: MessageHandler,
{
    for topic in topics.iter() {
        if let Err(e) = client.subscribe(topic) {
            warn!("subscribing to {:?} failed: {:?}", topic, Dbg(&e));
            if e.is_fatal() {
                return;
            }
        }
    }
}

/// Turns coarse ticks into keep-alive checks and poll callbacks.
///
/// The keep-alive check runs on every tick; `on_poll` runs once every
/// `poll_interval` ticks.
#[derive(Debug, Default)]
pub struct PollSchedule {
    elapsed: u8,
}

impl PollSchedule {
    pub const fn new() -> Self {
        Self { elapsed: 0 }
    }

    /// Handles one coarse tick.
    pub fn tick<T, C, H>(&mut self, client: &mut MqttClient<'_, T, C, H>)
    where
        T: Transport,
        C: Clock,
        H: MessageHandler,
    {
        if let Err(e) = client.keepalive_tick() {
            warn!("keep-alive action failed: {:?}", Dbg(&e));
        }

        self.elapsed = self.elapsed.saturating_add(1);
        if self.elapsed < client.options().poll_interval.max(1) {
            return;
        }
        self.elapsed = 0;
        if let Some(handle) = client.handle() {
            client.on_poll(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;
    use core::net::Ipv4Addr;

    use super::*;
    use crate::client::{ConnectionState, MqttOptions, NoopHandler};
    use crate::runtime::socket::StagedTransport;

    const BROKER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    #[derive(Default)]
    struct FakeClock(Cell<u64>);

    impl Clock for FakeClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    type Client<'a> = MqttClient<'a, StagedTransport<256>, &'a FakeClock, NoopHandler>;

    fn pending_attempt<'a>(clock: &'a FakeClock, options: MqttOptions<'a>) -> Client<'a> {
        let mut client = MqttClient::new(StagedTransport::new(), clock, NoopHandler, options);
        client.connect().unwrap();
        let transport = client.transport_mut();
        while transport.next_command().is_some() {}
        transport.clear_outbox();
        client
    }

    #[test]
    fn connack_replays_registered_topics() {
        let clock = FakeClock::default();
        let mut client = pending_attempt(&clock, MqttOptions::new(BROKER, "dev1"));
        let mut topics = TopicRegistry::<2>::new();
        topics.add_topic("a/b");

        deliver(&mut client, &topics, 1, &CONNACK);

        assert!(client.is_connected());
        assert_eq!(
            client.transport().outbox(),
            [0x82, 0x08, 0x00, 0x0A, 0x00, 0x03, b'a', b'/', b'b', 0x00]
        );
    }

    #[test]
    fn repeated_connack_does_not_subscribe_again() {
        let clock = FakeClock::default();
        let mut client = pending_attempt(&clock, MqttOptions::new(BROKER, "dev1"));
        let mut topics = TopicRegistry::<2>::new();
        topics.add_topic("a/b");

        deliver(&mut client, &topics, 1, &CONNACK);
        client.transport_mut().clear_outbox();
        deliver(&mut client, &topics, 1, &CONNACK);

        assert!(client.transport().outbox().is_empty());
    }

    #[test]
    fn stale_delivery_subscribes_nothing() {
        let clock = FakeClock::default();
        let mut client = pending_attempt(&clock, MqttOptions::new(BROKER, "dev1"));
        let mut topics = TopicRegistry::<2>::new();
        topics.add_topic("a/b");

        deliver(&mut client, &topics, 7, &CONNACK);

        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(client.transport().outbox().is_empty());
    }

    #[test]
    fn polls_run_every_poll_interval_ticks() {
        let clock = FakeClock::default();
        let options = MqttOptions::new(BROKER, "dev1").with_poll_interval(2);
        let mut client = pending_attempt(&clock, options);
        let mut schedule = PollSchedule::new();

        for _ in 0..7 {
            schedule.tick(&mut client);
        }
        assert_eq!(client.liveness(), 3);
        assert_eq!(client.state(), ConnectionState::Connecting);

        schedule.tick(&mut client);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.handle(), None);
    }

    #[test]
    fn established_session_survives_polls() {
        let clock = FakeClock::default();
        let mut client = pending_attempt(&clock, MqttOptions::new(BROKER, "dev1"));
        client.on_receive(1, &CONNACK);
        let mut schedule = PollSchedule::new();

        for _ in 0..32 {
            schedule.tick(&mut client);
        }
        assert!(client.is_connected());
    }
}
