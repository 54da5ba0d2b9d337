//! Topic-based messaging between the bench services.
//!
//! Services exchange JSON payloads on named topics through a [`MessageBus`].
//! Each topic behaves like a queue: a message is delivered to exactly one
//! `try_receive` call, oldest first. [`ChannelBus`] is the in-process
//! implementation built on crossbeam channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of messages buffered per topic.
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Topic '{0}' is disconnected")]
    Disconnected(String),

    #[error("Bus state lock poisoned")]
    Poisoned,

    #[error("Failed to encode message for '{topic}': {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode message on '{topic}': {source}")]
    Decode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Publish/poll access to named topics.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), MessagingError>;

    /// Next pending message on `topic`, without blocking.
    fn try_receive(&self, topic: &str) -> Result<Option<String>, MessagingError>;
}

type Topic = (Sender<String>, Receiver<String>);

/// In-process bus with one bounded queue per topic.
///
/// Clones share the same topics. When a topic is full the oldest message is
/// dropped to make room, so a topic nobody reads never blocks a publisher.
#[derive(Clone)]
pub struct ChannelBus {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
    capacity: usize,
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn topic(&self, name: &str) -> Result<Topic, MessagingError> {
        let mut topics = self.topics.lock().map_err(|_| MessagingError::Poisoned)?;
        let (tx, rx) = topics
            .entry(name.to_string())
            .or_insert_with(|| bounded(self.capacity));
        Ok((tx.clone(), rx.clone()))
    }

    /// Number of messages waiting on `topic`.
    pub fn pending(&self, topic: &str) -> usize {
        self.topic(topic).map(|(_, rx)| rx.len()).unwrap_or(0)
    }
}

impl MessageBus for ChannelBus {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), MessagingError> {
        let (tx, rx) = self.topic(topic)?;
        let mut message = payload.to_string();
        loop {
            match tx.try_send(message) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) => {
                    if rx.try_recv().is_ok() {
                        warn!("topic '{}' full, dropped oldest message", topic);
                    }
                    message = returned;
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(MessagingError::Disconnected(topic.to_string()))
                }
            }
        }
    }

    fn try_receive(&self, topic: &str) -> Result<Option<String>, MessagingError> {
        let (_, rx) = self.topic(topic)?;
        match rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(MessagingError::Disconnected(topic.to_string()))
            }
        }
    }
}

/// Serialize `message` as JSON and publish it.
pub fn publish_json<B, T>(bus: &B, topic: &str, message: &T) -> Result<(), MessagingError>
where
    B: MessageBus + ?Sized,
    T: Serialize,
{
    let payload = serde_json::to_string(message).map_err(|source| MessagingError::Encode {
        topic: topic.to_string(),
        source,
    })?;
    bus.publish(topic, &payload)
}

/// Receive and decode the next message on `topic`.
pub fn receive_json<B, T>(bus: &B, topic: &str) -> Result<Option<T>, MessagingError>
where
    B: MessageBus + ?Sized,
    T: DeserializeOwned,
{
    match bus.try_receive(topic)? {
        Some(payload) => serde_json::from_str(&payload)
            .map(Some)
            .map_err(|source| MessagingError::Decode {
                topic: topic.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Receive every pending message on `topic` in arrival order.
///
/// Messages that fail to decode are logged and skipped.
pub fn drain_json<B, T>(bus: &B, topic: &str) -> Result<Vec<T>, MessagingError>
where
    B: MessageBus + ?Sized,
    T: DeserializeOwned,
{
    let mut messages = Vec::new();
    loop {
        match receive_json(bus, topic) {
            Ok(Some(message)) => messages.push(message),
            Ok(None) => return Ok(messages),
            Err(e @ MessagingError::Decode { .. }) => debug!("skipping message: {}", e),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto_control::{topics, BenchCommand, PhysicalObservation};
    use std::thread;

    #[test]
    fn test_topics_are_fifo_and_independent() {
        let bus = ChannelBus::new();
        bus.publish("a", "1").unwrap();
        bus.publish("a", "2").unwrap();
        bus.publish("b", "x").unwrap();

        assert_eq!(bus.pending("a"), 2);
        assert_eq!(bus.try_receive("a").unwrap().as_deref(), Some("1"));
        assert_eq!(bus.try_receive("a").unwrap().as_deref(), Some("2"));
        assert_eq!(bus.try_receive("a").unwrap(), None);
        assert_eq!(bus.try_receive("b").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_full_topic_drops_oldest() {
        let bus = ChannelBus::with_capacity(2);
        for payload in ["1", "2", "3"] {
            bus.publish("t", payload).unwrap();
        }
        assert_eq!(bus.pending("t"), 2);
        assert_eq!(bus.try_receive("t").unwrap().as_deref(), Some("2"));
        assert_eq!(bus.try_receive("t").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn test_clones_share_topics_across_threads() {
        let bus = ChannelBus::new();
        let producer = bus.clone();
        thread::spawn(move || {
            publish_json(&producer, topics::COMMANDS, &BenchCommand::excitation(true)).unwrap();
        })
        .join()
        .unwrap();

        let received: Option<BenchCommand> = receive_json(&bus, topics::COMMANDS).unwrap();
        assert_eq!(received, Some(BenchCommand::excitation(true)));
    }

    #[test]
    fn test_observation_round_trip_through_trait_object() {
        let bus: Box<dyn MessageBus> = Box::new(ChannelBus::new());
        let obs = PhysicalObservation {
            horizontal_displacement: 0.1,
            vertical_displacement: 12.5,
            horizontal_force: 80.0,
            vertical_force: -3.25,
            ..Default::default()
        };
        publish_json(bus.as_ref(), topics::OBSERVATIONS, &obs).unwrap();
        let received: Option<PhysicalObservation> =
            receive_json(bus.as_ref(), topics::OBSERVATIONS).unwrap();
        assert_eq!(received, Some(obs));
    }

    #[test]
    fn test_decode_error_reports_topic() {
        let bus = ChannelBus::new();
        bus.publish(topics::COMMANDS, "not json").unwrap();
        let result: Result<Option<BenchCommand>, _> = receive_json(&bus, topics::COMMANDS);
        match result {
            Err(MessagingError::Decode { topic, .. }) => assert_eq!(topic, topics::COMMANDS),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_drain_keeps_order_and_skips_garbage() {
        let bus = ChannelBus::new();
        publish_json(&bus, topics::COMMANDS, &BenchCommand::excitation(true)).unwrap();
        bus.publish(topics::COMMANDS, "{broken").unwrap();
        publish_json(&bus, topics::COMMANDS, &BenchCommand::excitation(false)).unwrap();

        let commands: Vec<BenchCommand> = drain_json(&bus, topics::COMMANDS).unwrap();
        assert_eq!(
            commands,
            vec![BenchCommand::excitation(true), BenchCommand::excitation(false)]
        );
        assert_eq!(bus.pending(topics::COMMANDS), 0);
    }
}
