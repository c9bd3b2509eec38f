//! # Event-Driven MQTT v3.1 Client for Embedded Systems
//!
//! `evmqtt` is a `no_std`, allocation-free MQTT v3.1 client for callback
//! driven TCP stacks. It never blocks: operations hand bytes to a
//! [`Transport`] and return, and the transport reports back through the
//! client's event entry points.
//!
//! ## Core Features
//!
//! - **Two-pass packet builder:** fields are collected first so the remaining
//!   length is known, then serialized in one go. See [`packet::Packet`].
//! - **Connection state machine:** connect, publish and subscribe at QoS 0,
//!   keep-alive pings, poll-based detection of a broker that never answers.
//! - **Transport agnostic:** anything that can open, write, flush, close and
//!   abort a connection behind a `Copy` handle can drive the client.
//! - **Embassy runtime:** an optional async event loop over an `embassy-net`
//!   `TcpSocket`, with a publish channel for other tasks.
//!
//! ## Direct Client Usage
//!
//! ```ignore
//! let options = MqttOptions::new(Ipv4Addr::new(192, 168, 1, 10), "dev1");
//! let mut client = MqttClient::new(transport, EmbassyClock, handler, options);
//! client.connect()?;
//!
//! // transport glue
//! client.on_receive(handle, delivery);
//! client.on_poll(handle);
//!
//! // once connected
//! client.subscribe("home/light/set")?;
//! client.publish("home/light/state", b"on")?;
//! ```
//!
//! ## Receive Path Limitation
//!
//! Inbound deliveries are expected to hold exactly one complete packet with a
//! one-byte remaining length. Larger PUBLISH packets, or packets split across
//! deliveries, are not reassembled.

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
pub(crate) mod fmt;

pub mod client;
pub mod clock;
pub mod error;
pub mod packet;
pub mod runtime;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use client::{ConnectionState, MessageHandler, MqttClient, MqttOptions, NoopHandler};
pub use clock::{Clock, EmbassyClock};
pub use error::MqttError;
pub use packet::{Publish, QoS};
pub use transport::{Transport, TransportError, WriteFlags};
