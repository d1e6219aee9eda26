//! Discord REST client — outbound half of the Discord transport.
//!
//! Native Rust implementation of the handful of Discord API v10 endpoints
//! the relay needs, adapted to the relay's `Transport` trait. Inbound
//! events come from the gateway (see `gateway.rs`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::RwLock;

use super::{
    Attachment, ChannelId, Embed, GuildId, Interaction, MessageId, OutgoingFile,
    ResolutionAction, Transport, UserHandle, UserId,
};
use crate::error::TransportError;

const API_BASE: &str = "https://discord.com/api/v10";

/// Upper bound on establishing a connection to the API.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of an embed description.
const EMBED_DESCRIPTION_LIMIT: usize = 4096;

/// Channel type code for guild text channels.
const GUILD_TEXT: u64 = 0;

/// Interaction callback type: acknowledge a component press, edit nothing.
const DEFERRED_UPDATE_MESSAGE: u64 = 6;

/// Discord REST client.
pub struct DiscordRest {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
    /// DM channel per user, opened lazily.
    dm_channels: RwLock<HashMap<UserId, ChannelId>>,
}

impl DiscordRest {
    /// Every request, including attachment downloads, is bounded by
    /// `request_timeout` so a stalled call surfaces as an error.
    pub fn new(bot_token: SecretString, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .build()?;
        Ok(Self {
            bot_token,
            api_base: API_BASE.to_string(),
            client,
            dm_channels: RwLock::new(HashMap::new()),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token.expose_secret())
    }

    /// POST a JSON message body to a channel and return the created message id.
    async fn post_message(&self, channel_id: ChannelId, body: &Value) -> Result<MessageId, TransportError> {
        let resp = self
            .client
            .post(self.api_url(&format!("/channels/{channel_id}/messages")))
            .header("Authorization", self.auth_header())
            .json(body)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        let data = expect_success(resp, "create message").await?;
        snowflake(&data, "id")
            .ok_or_else(|| TransportError::InvalidPayload("created message has no id".into()))
    }

    /// Open (or reuse) the DM channel with a user.
    async fn dm_channel(&self, user_id: UserId) -> Result<ChannelId, TransportError> {
        if let Some(id) = self.dm_channels.read().await.get(&user_id) {
            return Ok(*id);
        }

        let resp = self
            .client
            .post(self.api_url("/users/@me/channels"))
            .header("Authorization", self.auth_header())
            .json(&json!({ "recipient_id": user_id.to_string() }))
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        let data = expect_success(resp, "open DM channel").await?;
        let channel_id = snowflake(&data, "id")
            .ok_or_else(|| TransportError::InvalidPayload("DM channel has no id".into()))?;

        self.dm_channels.write().await.insert(user_id, channel_id);
        Ok(channel_id)
    }
}

#[async_trait]
impl Transport for DiscordRest {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send_announcement(
        &self,
        channel_id: ChannelId,
        embed: &Embed,
    ) -> Result<MessageId, TransportError> {
        let body = json!({
            "embeds": [embed_json(embed)],
            "components": [action_row()],
        });
        self.post_message(channel_id, &body).await
    }

    async fn send_embed(
        &self,
        channel_id: ChannelId,
        embed: &Embed,
        files: Vec<OutgoingFile>,
    ) -> Result<MessageId, TransportError> {
        if files.is_empty() {
            return self
                .post_message(channel_id, &json!({ "embeds": [embed_json(embed)] }))
                .await;
        }

        let attachments: Vec<Value> = files
            .iter()
            .enumerate()
            .map(|(i, f)| json!({ "id": i, "filename": f.filename }))
            .collect();
        let payload = json!({
            "embeds": [embed_json(embed)],
            "attachments": attachments,
        });

        let mut form = Form::new().text("payload_json", payload.to_string());
        for (i, file) in files.into_iter().enumerate() {
            let part = Part::bytes(file.bytes).file_name(file.filename);
            form = form.part(format!("files[{i}]"), part);
        }

        let resp = self
            .client
            .post(self.api_url(&format!("/channels/{channel_id}/messages")))
            .header("Authorization", self.auth_header())
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        let data = expect_success(resp, "upload message").await?;
        let id = snowflake(&data, "id")
            .ok_or_else(|| TransportError::InvalidPayload("created message has no id".into()))?;
        tracing::info!(channel_id, message_id = id, "Discord message with files sent");
        Ok(id)
    }

    async fn find_text_channel(
        &self,
        guild_id: Option<GuildId>,
        name: &str,
    ) -> Result<Option<ChannelId>, TransportError> {
        let Some(guild_id) = guild_id else {
            return Ok(None);
        };

        let resp = self
            .client
            .get(self.api_url(&format!("/guilds/{guild_id}/channels")))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let data = expect_success(resp, "list guild channels").await?;
        Ok(find_channel_in_listing(&data, name))
    }

    async fn resolve_user(&self, user_id: UserId) -> Result<UserHandle, TransportError> {
        let resp = self
            .client
            .get(self.api_url(&format!("/users/{user_id}")))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound {
                entity: "user".into(),
                id: user_id.to_string(),
            });
        }
        let data = expect_success(resp, "fetch user").await?;
        Ok(UserHandle {
            id: user_id,
            display_name: display_name(&data, None),
        })
    }

    async fn send_direct(&self, user: &UserHandle, text: &str) -> Result<(), TransportError> {
        let channel_id = self.dm_channel(user.id).await?;
        self.post_message(channel_id, &json!({ "content": text }))
            .await
            .map(|_| ())
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        let resp = self
            .client
            .delete(self.api_url(&format!(
                "/channels/{channel_id}/messages/{message_id}"
            )))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| TransportError::DeleteFailed {
                name: "discord".into(),
                message_id,
                reason: e.to_string(),
            })?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(TransportError::NotFound {
                entity: "message".into(),
                id: message_id.to_string(),
            }),
            s => Err(TransportError::DeleteFailed {
                name: "discord".into(),
                message_id,
                reason: format!("status {s}"),
            }),
        }
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, TransportError> {
        let resp = self.client.get(&attachment.url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(TransportError::Http(format!(
                "GET {} returned {}",
                attachment.url,
                resp.status()
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn acknowledge(&self, interaction: &Interaction) -> Result<(), TransportError> {
        let url = self.api_url(&format!(
            "/interactions/{}/{}/callback",
            interaction.id, interaction.token
        ));
        let resp = self
            .client
            .post(url)
            .json(&json!({ "type": DEFERRED_UPDATE_MESSAGE }))
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(send_failed(format!(
                "interaction callback returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn send_failed(reason: String) -> TransportError {
    TransportError::SendFailed {
        name: "discord".into(),
        reason,
    }
}

/// Turn a non-2xx response into an error, otherwise parse its JSON body.
async fn expect_success(resp: reqwest::Response, what: &str) -> Result<Value, TransportError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(send_failed(format!("{what} returned {status}: {body}")));
    }
    resp.json::<Value>()
        .await
        .map_err(|e| TransportError::InvalidPayload(format!("{what}: {e}")))
}

/// Read a snowflake id, which Discord serialises as a string.
pub(crate) fn snowflake(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Display name the way the Discord client shows it:
/// guild nickname, then global name, then username.
pub(crate) fn display_name(user: &Value, member: Option<&Value>) -> String {
    member
        .and_then(|m| m.get("nick"))
        .and_then(Value::as_str)
        .or_else(|| user.get("global_name").and_then(Value::as_str))
        .or_else(|| user.get("username").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string()
}

fn embed_json(embed: &Embed) -> Value {
    json!({
        "title": embed.title,
        "description": truncate(&embed.description, EMBED_DESCRIPTION_LIMIT),
        "color": embed.color,
    })
}

/// Accept / cancel buttons attached to every announcement.
fn action_row() -> Value {
    json!({
        "type": 1,
        "components": [
            {
                "type": 2,
                "style": 3,
                "label": "Done",
                "emoji": { "name": "✅" },
                "custom_id": ResolutionAction::Accept.custom_id(),
            },
            {
                "type": 2,
                "style": 4,
                "label": "Cancel",
                "emoji": { "name": "❌" },
                "custom_id": ResolutionAction::Cancel.custom_id(),
            }
        ]
    })
}

fn find_channel_in_listing(listing: &Value, name: &str) -> Option<ChannelId> {
    listing.as_array()?.iter().find_map(|c| {
        let is_text = c.get("type").and_then(Value::as_u64) == Some(GUILD_TEXT);
        let matches = c.get("name").and_then(Value::as_str) == Some(name);
        if is_text && matches { snowflake(c, "id") } else { None }
    })
}

/// Cut a string to at most `max` bytes on a char boundary, marking the cut.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max.saturating_sub(3);
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
