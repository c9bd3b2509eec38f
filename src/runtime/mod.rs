//! Embassy runtime for the MQTT client.
//!
//! [`MqttRuntime`] owns an `embassy-net` `TcpSocket` and an [`MqttClient`]
//! wired to a [`StagedTransport`]. The client's synchronous calls are staged
//! as socket commands, which the runtime performs between events. Other
//! tasks publish through a [`PublisherHandle`], and the topics in the
//! [`TopicRegistry`] are subscribed again on every new session.
//!
//! [`MqttClient`]: crate::client::MqttClient

pub(crate) mod event_loop;
pub(crate) mod publisher;
pub(crate) mod registry;
pub(crate) mod session;
pub(crate) mod socket;

pub use event_loop::{COARSE_TICK, MqttRuntime, RuntimeClient};
pub use publisher::{
    PublishRequest, PublishRequestChannel, PublishRequestReceiver, PublishRequestSender,
    PublisherHandle,
};
pub use registry::{MAX_TOPIC_LEN, TopicRegistry};
pub use session::PollSchedule;
pub use socket::{Command, SocketError, StagedTransport};

// Re-export Publish for convenient use in message handlers
pub use crate::packet::Publish;
