//! In-process topic pub/sub.
//!
//! Every topic is a bounded broadcast channel. A subscriber that falls behind
//! loses the oldest events and observes a lag on its next receive; publishers
//! never wait.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const TOPIC_CAPACITY: usize = 1024;

pub const DEREGISTRATION_TOPIC: &str = "deregistration";

pub fn tx_finalized_topic(tx_hash: &str) -> String {
    format!("tx-finalized/{tx_hash}")
}

pub fn play_topic(track_id: &str) -> String {
    format!("play/{track_id}")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    TxFinalized {
        tx_hash: String,
        height: u64,
        index: u32,
        code: u32,
    },
    #[serde(rename_all = "camelCase")]
    Play {
        tx_hash: String,
        track_id: String,
        user_id: String,
        height: u64,
    },
    #[serde(rename_all = "camelCase")]
    Deregistration {
        consensus_address: String,
        height: u64,
    },
}

#[derive(Clone, Debug, Default)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listens on `topic` until the returned subscription is dropped.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let receiver = self
            .topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();
        Subscription {
            topic: topic.to_string(),
            topics: Arc::downgrade(&self.topics),
            receiver,
        }
    }

    /// Delivers `event` to the current subscribers of `topic`.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, topic: &str, event: Event) -> usize {
        let mut topics = self.topics.lock();
        let Some(sender) = topics.get(topic) else {
            return 0;
        };
        match sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                topics.remove(topic);
                0
            }
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().len()
    }
}

/// A receiver on one topic. The topic is removed from the bus when its last
/// subscription goes away.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    topics: Weak<Mutex<HashMap<String, broadcast::Sender<Event>>>>,
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        let mut topics = topics.lock();
        // Our own receiver is still alive here.
        if topics
            .get(&self.topic)
            .is_some_and(|sender| sender.receiver_count() <= 1)
        {
            topics.remove(&self.topic);
        }
    }
}
