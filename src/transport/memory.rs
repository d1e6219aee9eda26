//! In-memory transport that records every call.
//!
//! Used by tests and local dry runs. Failures can be injected per
//! attachment url, per user and per deleted message, and user lookups
//! can be made to hang.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use super::{
    Attachment, ChannelId, Embed, GuildId, Interaction, MessageId, OutgoingFile, Transport,
    UserHandle, UserId,
};
use crate::error::TransportError;

/// First id handed out for messages created through this transport.
const FIRST_MESSAGE_ID: u64 = 9_000;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Announcement {
        channel_id: ChannelId,
        message_id: MessageId,
        embed: Embed,
    },
    Embed {
        channel_id: ChannelId,
        embed: Embed,
        files: Vec<String>,
    },
    FindChannel {
        name: String,
    },
    ResolveUser {
        user_id: UserId,
    },
    Direct {
        user_id: UserId,
        text: String,
    },
    Delete {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    Fetch {
        url: String,
    },
    Ack {
        interaction_id: String,
    },
}

/// Recording transport with injectable failures.
pub struct MemoryTransport {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
    channels: Mutex<HashMap<String, ChannelId>>,
    failing_urls: Mutex<HashSet<String>>,
    failing_users: Mutex<HashSet<UserId>>,
    hanging_users: Mutex<HashSet<UserId>>,
    failing_deletes: Mutex<HashSet<MessageId>>,
    fail_announcements: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(FIRST_MESSAGE_ID),
            channels: Mutex::new(HashMap::new()),
            failing_urls: Mutex::new(HashSet::new()),
            failing_users: Mutex::new(HashSet::new()),
            hanging_users: Mutex::new(HashSet::new()),
            failing_deletes: Mutex::new(HashSet::new()),
            fail_announcements: AtomicBool::new(false),
        }
    }

    /// Register a named text channel so `find_text_channel` can see it.
    pub fn with_channel(self, name: &str, channel_id: ChannelId) -> Self {
        lock(&self.channels).insert(name.to_string(), channel_id);
        self
    }

    /// Make downloads of this url fail.
    pub fn fail_download(&self, url: &str) {
        lock(&self.failing_urls).insert(url.to_string());
    }

    /// Make resolving this user fail.
    pub fn fail_user(&self, user_id: UserId) {
        lock(&self.failing_users).insert(user_id);
    }

    /// Stop failing to resolve this user.
    pub fn restore_user(&self, user_id: UserId) {
        lock(&self.failing_users).remove(&user_id);
    }

    /// Make resolving this user never complete.
    pub fn hang_user(&self, user_id: UserId) {
        lock(&self.hanging_users).insert(user_id);
    }

    /// Make deleting this message fail.
    pub fn fail_delete(&self, message_id: MessageId) {
        lock(&self.failing_deletes).insert(message_id);
    }

    /// Toggle failure of announcement sends.
    pub fn set_fail_announcements(&self, fail: bool) {
        self.fail_announcements.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every recorded call, in order.
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Text of every direct message sent so far.
    pub fn direct_messages(&self) -> Vec<(UserId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Direct { user_id, text } => Some((user_id, text)),
                _ => None,
            })
            .collect()
    }

    /// Ids of every message deleted successfully.
    pub fn deleted(&self) -> Vec<MessageId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    /// Every embed posted outside of announcements, with uploaded filenames.
    pub fn embeds(&self) -> Vec<(ChannelId, Embed, Vec<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Embed {
                    channel_id,
                    embed,
                    files,
                } => Some((channel_id, embed, files)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send_announcement(
        &self,
        channel_id: ChannelId,
        embed: &Embed,
    ) -> Result<MessageId, TransportError> {
        if self.fail_announcements.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed {
                name: "memory".into(),
                reason: "announcements disabled".into(),
            });
        }
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.record(Call::Announcement {
            channel_id,
            message_id,
            embed: embed.clone(),
        });
        Ok(message_id)
    }

    async fn send_embed(
        &self,
        channel_id: ChannelId,
        embed: &Embed,
        files: Vec<OutgoingFile>,
    ) -> Result<MessageId, TransportError> {
        self.record(Call::Embed {
            channel_id,
            embed: embed.clone(),
            files: files.into_iter().map(|f| f.filename).collect(),
        });
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn find_text_channel(
        &self,
        _guild_id: Option<GuildId>,
        name: &str,
    ) -> Result<Option<ChannelId>, TransportError> {
        self.record(Call::FindChannel {
            name: name.to_string(),
        });
        Ok(lock(&self.channels).get(name).copied())
    }

    async fn resolve_user(&self, user_id: UserId) -> Result<UserHandle, TransportError> {
        self.record(Call::ResolveUser { user_id });
        let hangs = lock(&self.hanging_users).contains(&user_id);
        if hangs {
            std::future::pending::<()>().await;
        }
        if lock(&self.failing_users).contains(&user_id) {
            return Err(TransportError::NotFound {
                entity: "user".into(),
                id: user_id.to_string(),
            });
        }
        Ok(UserHandle {
            id: user_id,
            display_name: format!("user-{user_id}"),
        })
    }

    async fn send_direct(&self, user: &UserHandle, text: &str) -> Result<(), TransportError> {
        self.record(Call::Direct {
            user_id: user.id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        if lock(&self.failing_deletes).contains(&message_id) {
            return Err(TransportError::DeleteFailed {
                name: "memory".into(),
                message_id,
                reason: "unknown message".into(),
            });
        }
        self.record(Call::Delete {
            channel_id,
            message_id,
        });
        Ok(())
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, TransportError> {
        self.record(Call::Fetch {
            url: attachment.url.clone(),
        });
        if lock(&self.failing_urls).contains(&attachment.url) {
            return Err(TransportError::Http(format!(
                "GET {} returned 404 Not Found",
                attachment.url
            )));
        }
        Ok(attachment.url.as_bytes().to_vec())
    }

    async fn acknowledge(&self, interaction: &Interaction) -> Result<(), TransportError> {
        self.record(Call::Ack {
            interaction_id: interaction.id.clone(),
        });
        Ok(())
    }
}
