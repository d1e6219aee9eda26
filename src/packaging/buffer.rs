//! Message buffer — per-channel queue of messages awaiting a trigger.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::transport::{ChannelId, ChannelKind, InboundMessage};

/// What to do with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    /// Not ours: bot author, non-text channel, or unmonitored channel.
    Ignore,
    /// Add to the channel's buffer.
    Append,
    /// Drain the buffer and package it.
    Trigger,
}

/// Which messages the relay looks at, and what triggers packaging.
#[derive(Debug, Clone)]
pub struct IntakeRules {
    monitored: Vec<String>,
    trigger: String,
}

impl IntakeRules {
    pub fn new<I, S>(monitored: I, trigger: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            monitored: monitored
                .into_iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .collect(),
            trigger: trigger.trim().to_lowercase(),
        }
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// Whether a channel name is on the allow-list (case-insensitive).
    pub fn is_monitored(&self, channel_name: &str) -> bool {
        let name = channel_name.to_lowercase();
        self.monitored.iter().any(|c| *c == name)
    }

    /// Whether text is the trigger token, ignoring case and surrounding whitespace.
    pub fn is_trigger(&self, content: &str) -> bool {
        content.trim().to_lowercase() == self.trigger
    }

    pub fn classify(&self, message: &InboundMessage) -> Intake {
        if message.channel_kind != ChannelKind::Text
            || message.author_is_bot
            || !self.is_monitored(&message.channel_name)
        {
            return Intake::Ignore;
        }
        if self.is_trigger(&message.content) {
            Intake::Trigger
        } else {
            Intake::Append
        }
    }
}

/// Un-packaged messages per channel, in arrival order.
pub struct MessageBuffer {
    channels: Mutex<HashMap<ChannelId, Vec<InboundMessage>>>,
}

impl MessageBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// Add a message to the end of its channel's sequence.
    pub async fn append(&self, channel_id: ChannelId, message: InboundMessage) {
        let mut channels = self.channels.lock().await;
        let queue = channels.entry(channel_id).or_default();
        queue.push(message);
        debug!(channel_id, buffered = queue.len(), "Message buffered");
    }

    /// Take the channel's sequence, leaving it empty.
    pub async fn drain(&self, channel_id: ChannelId) -> Vec<InboundMessage> {
        let mut channels = self.channels.lock().await;
        channels.remove(&channel_id).unwrap_or_default()
    }

    /// Put drained messages back in front of anything buffered since.
    pub async fn restore(&self, channel_id: ChannelId, mut messages: Vec<InboundMessage>) {
        if messages.is_empty() {
            return;
        }
        let mut channels = self.channels.lock().await;
        let queue = channels.entry(channel_id).or_default();
        messages.append(queue);
        *queue = messages;
    }

    pub async fn len(&self, channel_id: ChannelId) -> usize {
        self.channels
            .lock()
            .await
            .get(&channel_id)
            .map_or(0, Vec::len)
    }

    pub async fn is_empty(&self, channel_id: ChannelId) -> bool {
        self.len(channel_id).await == 0
    }

    /// Drop every buffered message.
    pub async fn clear(&self) {
        self.channels.lock().await.clear();
    }
}
