//! Messaging transport abstraction.
//!
//! The relay never talks to a chat platform directly. Everything it needs
//! (announcements, archive uploads, direct reminders, deletions, attachment
//! downloads, interaction acknowledgment) goes through [`Transport`].

pub mod discord;
pub mod gateway;
pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use discord::DiscordRest;
pub use gateway::DiscordGateway;
pub use memory::MemoryTransport;

pub type ChannelId = u64;
pub type MessageId = u64;
pub type UserId = u64;
pub type GuildId = u64;

/// Custom id carried by the accept button of an announcement.
pub const ACCEPT_CUSTOM_ID: &str = "relay:accept";
/// Custom id carried by the cancel button of an announcement.
pub const CANCEL_CUSTOM_ID: &str = "relay:cancel";

/// Kind of channel a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Regular guild text channel.
    Text,
    /// Direct message with a user.
    Direct,
    /// Threads, voice text, forums and anything else.
    Other,
}

/// A file attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

impl Attachment {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
        }
    }
}

/// A message received from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Stable message id.
    pub id: MessageId,
    pub channel_id: ChannelId,
    /// Channel label as shown to users (e.g. "marcelo").
    pub channel_name: String,
    pub channel_kind: ChannelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,
    pub author_id: UserId,
    /// Author display name used in rendered transcripts.
    pub author_name: String,
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl InboundMessage {
    /// Create a text-channel message from a human author.
    pub fn new(
        id: MessageId,
        channel_id: ChannelId,
        channel_name: impl Into<String>,
        author_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            channel_id,
            channel_name: channel_name.into(),
            channel_kind: ChannelKind::Text,
            guild_id: None,
            author_id: 0,
            author_name: author_name.into(),
            author_is_bot: false,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_guild(mut self, guild_id: GuildId) -> Self {
        self.guild_id = Some(guild_id);
        self
    }

    pub fn with_kind(mut self, kind: ChannelKind) -> Self {
        self.channel_kind = kind;
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Mark the author as a bot or system account.
    pub fn from_bot(mut self) -> Self {
        self.author_is_bot = true;
        self
    }
}

/// The two terminal actions a reviewer can take on a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Accept,
    Cancel,
}

impl ResolutionAction {
    /// Button custom id for this action.
    pub fn custom_id(self) -> &'static str {
        match self {
            Self::Accept => ACCEPT_CUSTOM_ID,
            Self::Cancel => CANCEL_CUSTOM_ID,
        }
    }

    pub fn from_custom_id(custom_id: &str) -> Option<Self> {
        match custom_id {
            ACCEPT_CUSTOM_ID => Some(Self::Accept),
            CANCEL_CUSTOM_ID => Some(Self::Cancel),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// A button press on a package announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    /// Interaction id, needed for the acknowledgment callback.
    pub id: String,
    /// Short-lived interaction token.
    pub token: String,
    /// Id of the announcement the button belongs to (the package id).
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: Option<UserId>,
    pub action: ResolutionAction,
}

/// Events delivered by a transport's inbound stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(InboundMessage),
    Interaction(Interaction),
}

/// Stream of inbound transport events.
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Embed colours, matching the platform's stock blue and green.
pub const COLOR_BLUE: u32 = 0x3498db;
pub const COLOR_GREEN: u32 = 0x2ecc71;

/// A rich embed (title, body, colour).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
}

impl Embed {
    pub fn new(title: impl Into<String>, description: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            color,
        }
    }
}

/// File bytes to upload alongside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A user that direct messages can be sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserHandle {
    pub id: UserId,
    pub display_name: String,
}

/// Outbound capabilities the relay needs from a chat platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Post an announcement with accept/cancel buttons. Returns the new message id.
    async fn send_announcement(
        &self,
        channel_id: ChannelId,
        embed: &Embed,
    ) -> Result<MessageId, TransportError>;

    /// Post an embed with optional uploaded files.
    async fn send_embed(
        &self,
        channel_id: ChannelId,
        embed: &Embed,
        files: Vec<OutgoingFile>,
    ) -> Result<MessageId, TransportError>;

    /// Find a text channel by exact name, within a guild when one is known.
    async fn find_text_channel(
        &self,
        guild_id: Option<GuildId>,
        name: &str,
    ) -> Result<Option<ChannelId>, TransportError>;

    /// Resolve a user id to something direct messages can be sent to.
    async fn resolve_user(&self, user_id: UserId) -> Result<UserHandle, TransportError>;

    /// Send a direct message to a user.
    async fn send_direct(&self, user: &UserHandle, text: &str) -> Result<(), TransportError>;

    /// Delete a message. Deleting a message that is already gone is an error
    /// the caller is expected to log and move past.
    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), TransportError>;

    /// Download an attachment's bytes. Non-200 responses are failures.
    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, TransportError>;

    /// Acknowledge a button press without changing the message.
    async fn acknowledge(&self, interaction: &Interaction) -> Result<(), TransportError>;
}
