//! Discord gateway — inbound half of the Discord transport.
//!
//! Keeps a websocket session open, heartbeats, and turns `MESSAGE_CREATE`
//! and `INTERACTION_CREATE` dispatches into a [`TransportEvent`] stream.
//! Reconnects with a fresh session whenever the socket drops.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::discord::{display_name, snowflake};
use super::{
    Attachment, ChannelId, ChannelKind, EventStream, InboundMessage, Interaction,
    ResolutionAction, TransportEvent,
};
use crate::error::TransportError;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT.
const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

/// Delay before reconnecting after the session ends.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

// Gateway opcodes.
const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

/// Interaction type code for message component presses.
const MESSAGE_COMPONENT: u64 = 3;

/// Channel name and type, learned from guild dispatches.
#[derive(Debug, Clone, Default)]
pub struct ChannelDirectory {
    channels: HashMap<ChannelId, (String, u64)>,
}

impl ChannelDirectory {
    pub fn insert(&mut self, channel_id: ChannelId, name: impl Into<String>, kind: u64) {
        self.channels.insert(channel_id, (name.into(), kind));
    }

    pub fn remove(&mut self, channel_id: ChannelId) {
        self.channels.remove(&channel_id);
    }

    /// Record a channel object (`{id, name, type}`).
    fn learn(&mut self, channel: &Value) {
        if let (Some(id), Some(kind)) = (
            snowflake(channel, "id"),
            channel.get("type").and_then(Value::as_u64),
        ) {
            let name = channel.get("name").and_then(Value::as_str).unwrap_or_default();
            self.insert(id, name, kind);
        }
    }

    fn lookup(&self, channel_id: ChannelId) -> Option<&(String, u64)> {
        self.channels.get(&channel_id)
    }
}

/// Tracks whether the last scheduled heartbeat was acknowledged.
#[derive(Debug, Default)]
struct HeartbeatMonitor {
    awaiting_ack: bool,
}

impl HeartbeatMonitor {
    /// Called before each scheduled beat. A beat still unacknowledged when
    /// the next one is due means the connection has gone silent.
    fn beat(&mut self) -> Result<(), TransportError> {
        if self.awaiting_ack {
            return Err(TransportError::Gateway(
                "heartbeat not acknowledged; reconnecting".into(),
            ));
        }
        self.awaiting_ack = true;
        Ok(())
    }

    fn ack(&mut self) {
        self.awaiting_ack = false;
    }
}

/// Discord gateway client.
pub struct DiscordGateway {
    bot_token: SecretString,
}

impl DiscordGateway {
    pub fn new(bot_token: SecretString) -> Self {
        Self { bot_token }
    }

    /// Start the session loop and return the inbound event stream.
    /// The loop ends when `shutdown` fires or the stream is dropped.
    pub fn start(&self, shutdown: CancellationToken) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.bot_token.clone();

        tokio::spawn(async move {
            let mut directory = ChannelDirectory::default();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Discord gateway shutting down");
                        return;
                    }
                    result = run_session(&token, &tx, &mut directory) => {
                        match result {
                            Ok(()) => tracing::info!("Discord gateway session ended"),
                            Err(e) => tracing::warn!("Discord gateway error: {e}"),
                        }
                    }
                }
                if tx.is_closed() {
                    tracing::info!("Discord listener channel closed");
                    return;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Box::pin(stream)
    }
}

/// One gateway session: connect, identify, heartbeat, dispatch.
async fn run_session(
    token: &SecretString,
    tx: &mpsc::UnboundedSender<TransportEvent>,
    directory: &mut ChannelDirectory,
) -> Result<(), TransportError> {
    let (ws, _resp) = connect_async(GATEWAY_URL)
        .await
        .map_err(|e| TransportError::Gateway(e.to_string()))?;
    let (mut write, mut read) = ws.split();

    let hello = match read.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(text.as_str())
            .map_err(|e| TransportError::InvalidPayload(e.to_string()))?,
        Some(Ok(other)) => {
            return Err(TransportError::Gateway(format!("expected HELLO, got {other:?}")));
        }
        Some(Err(e)) => return Err(TransportError::Gateway(e.to_string())),
        None => return Err(TransportError::Gateway("closed before HELLO".into())),
    };
    if hello.get("op").and_then(Value::as_u64) != Some(OP_HELLO) {
        return Err(TransportError::Gateway("first frame was not HELLO".into()));
    }
    let heartbeat_ms = hello
        .pointer("/d/heartbeat_interval")
        .and_then(Value::as_u64)
        .ok_or_else(|| TransportError::InvalidPayload("HELLO without heartbeat_interval".into()))?;

    let identify = json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token.expose_secret(),
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "appointment-relay",
                "device": "appointment-relay",
            },
        }
    });
    send_json(&mut write, &identify).await?;
    tracing::info!("Discord gateway connected, listening for messages...");

    let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
    // The first tick completes immediately; the gateway expects the first beat later.
    heartbeat.tick().await;
    let mut sequence: Option<u64> = None;
    let mut monitor = HeartbeatMonitor::default();

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                monitor.beat()?;
                send_json(&mut write, &json!({ "op": OP_HEARTBEAT, "d": sequence })).await?;
            }
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(close))) => {
                        tracing::info!(?close, "Discord gateway closed the connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(TransportError::Gateway(e.to_string())),
                    None => return Ok(()),
                };
                let payload: Value = match serde_json::from_str(text.as_str()) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("Discord gateway parse error: {e}");
                        continue;
                    }
                };
                if let Some(s) = payload.get("s").and_then(Value::as_u64) {
                    sequence = Some(s);
                }

                match payload.get("op").and_then(Value::as_u64) {
                    Some(OP_DISPATCH) => {
                        let kind = payload.get("t").and_then(Value::as_str).unwrap_or_default();
                        let data = payload.get("d").unwrap_or(&Value::Null);
                        if let Some(event) = handle_dispatch(kind, data, directory) {
                            if tx.send(event).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(OP_HEARTBEAT) => {
                        send_json(&mut write, &json!({ "op": OP_HEARTBEAT, "d": sequence })).await?;
                    }
                    Some(OP_RECONNECT) => {
                        return Err(TransportError::Gateway("server requested reconnect".into()));
                    }
                    Some(OP_INVALID_SESSION) => {
                        return Err(TransportError::Gateway("invalid session".into()));
                    }
                    Some(OP_HEARTBEAT_ACK) => monitor.ack(),
                    other => tracing::debug!(op = ?other, "Ignoring gateway opcode"),
                }
            }
        }
    }
}

async fn send_json<S>(write: &mut S, payload: &Value) -> Result<(), TransportError>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    write
        .send(Message::Text(payload.to_string().into()))
        .await
        .map_err(|e| TransportError::Gateway(e.to_string()))
}

/// Update the channel directory and convert relay-relevant dispatches into events.
pub fn handle_dispatch(
    kind: &str,
    data: &Value,
    directory: &mut ChannelDirectory,
) -> Option<TransportEvent> {
    match kind {
        "GUILD_CREATE" => {
            if let Some(channels) = data.get("channels").and_then(Value::as_array) {
                for channel in channels {
                    directory.learn(channel);
                }
                tracing::debug!(count = channels.len(), "Learned guild channels");
            }
            None
        }
        "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
            directory.learn(data);
            None
        }
        "CHANNEL_DELETE" => {
            if let Some(id) = snowflake(data, "id") {
                directory.remove(id);
            }
            None
        }
        "MESSAGE_CREATE" => parse_message(data, directory).map(TransportEvent::Message),
        "INTERACTION_CREATE" => parse_interaction(data).map(TransportEvent::Interaction),
        _ => None,
    }
}

/// Convert a `MESSAGE_CREATE` payload into an [`InboundMessage`].
pub fn parse_message(data: &Value, directory: &ChannelDirectory) -> Option<InboundMessage> {
    let id = snowflake(data, "id")?;
    let channel_id = snowflake(data, "channel_id")?;
    let author = data.get("author")?;
    let guild_id = snowflake(data, "guild_id");

    let (channel_name, channel_kind) = match (guild_id, directory.lookup(channel_id)) {
        (None, _) => (String::new(), ChannelKind::Direct),
        // Guild text and announcement channels.
        (Some(_), Some((name, 0 | 5))) => (name.clone(), ChannelKind::Text),
        (Some(_), Some((name, _))) => (name.clone(), ChannelKind::Other),
        (Some(_), None) => (String::new(), ChannelKind::Other),
    };

    let attachments = data
        .get("attachments")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|a| {
                    let url = a.get("url").and_then(Value::as_str)?;
                    let filename = a.get("filename").and_then(Value::as_str).unwrap_or("file");
                    Some(Attachment::new(url, filename))
                })
                .collect()
        })
        .unwrap_or_default();

    Some(InboundMessage {
        id,
        channel_id,
        channel_name,
        channel_kind,
        guild_id,
        author_id: snowflake(author, "id").unwrap_or_default(),
        author_name: display_name(author, data.get("member")),
        author_is_bot: author.get("bot").and_then(Value::as_bool).unwrap_or(false)
            || author.get("system").and_then(Value::as_bool).unwrap_or(false),
        content: data
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        attachments,
    })
}

/// Convert an `INTERACTION_CREATE` button press into an [`Interaction`].
pub fn parse_interaction(data: &Value) -> Option<Interaction> {
    if data.get("type").and_then(Value::as_u64) != Some(MESSAGE_COMPONENT) {
        return None;
    }
    let custom_id = data.pointer("/data/custom_id").and_then(Value::as_str)?;
    let action = ResolutionAction::from_custom_id(custom_id)?;

    let user_id = data
        .pointer("/member/user")
        .or_else(|| data.get("user"))
        .and_then(|u| snowflake(u, "id"));

    Some(Interaction {
        id: data.get("id").and_then(Value::as_str)?.to_string(),
        token: data.get("token").and_then(Value::as_str)?.to_string(),
        message_id: snowflake(data.get("message")?, "id")?,
        channel_id: snowflake(data, "channel_id")?,
        user_id,
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> ChannelDirectory {
        let mut dir = ChannelDirectory::default();
        handle_dispatch(
            "GUILD_CREATE",
            &json!({
                "id": "1",
                "channels": [
                    { "id": "100", "name": "marcelo", "type": 0 },
                    { "id": "101", "name": "voice", "type": 2 },
                ]
            }),
            &mut dir,
        );
        dir
    }

    fn message_payload(channel_id: &str) -> Value {
        json!({
            "id": "555",
            "channel_id": channel_id,
            "guild_id": "1",
            "author": { "id": "42", "username": "alice", "global_name": "Alice" },
            "member": { "nick": null },
            "content": "hello",
            "attachments": [
                { "id": "9", "url": "https://cdn.example/a.png", "filename": "a.png" }
            ]
        })
    }

    #[test]
    fn parses_guild_text_message() {
        let msg = parse_message(&message_payload("100"), &directory()).unwrap();
        assert_eq!(msg.id, 555);
        assert_eq!(msg.channel_name, "marcelo");
        assert_eq!(msg.channel_kind, ChannelKind::Text);
        assert_eq!(msg.guild_id, Some(1));
        assert_eq!(msg.author_id, 42);
        assert_eq!(msg.author_name, "Alice");
        assert!(!msg.author_is_bot);
        assert_eq!(msg.content, "hello");
        assert_eq!(
            msg.attachments,
            vec![Attachment::new("https://cdn.example/a.png", "a.png")]
        );
    }

    #[test]
    fn non_text_and_unknown_channels_are_other() {
        let dir = directory();
        assert_eq!(
            parse_message(&message_payload("101"), &dir).unwrap().channel_kind,
            ChannelKind::Other
        );
        assert_eq!(
            parse_message(&message_payload("999"), &dir).unwrap().channel_kind,
            ChannelKind::Other
        );
    }

    #[test]
    fn message_without_guild_is_direct() {
        let mut payload = message_payload("100");
        payload.as_object_mut().unwrap().remove("guild_id");
        let msg = parse_message(&payload, &directory()).unwrap();
        assert_eq!(msg.channel_kind, ChannelKind::Direct);
    }

    #[test]
    fn bot_author_is_flagged() {
        let mut payload = message_payload("100");
        payload["author"]["bot"] = json!(true);
        assert!(parse_message(&payload, &directory()).unwrap().author_is_bot);
    }

    #[test]
    fn channel_delete_forgets_name() {
        let mut dir = directory();
        handle_dispatch("CHANNEL_DELETE", &json!({ "id": "100" }), &mut dir);
        let msg = parse_message(&message_payload("100"), &dir).unwrap();
        assert_eq!(msg.channel_kind, ChannelKind::Other);
        assert!(msg.channel_name.is_empty());
    }

    #[test]
    fn dispatch_yields_message_event() {
        let mut dir = directory();
        let event = handle_dispatch("MESSAGE_CREATE", &message_payload("100"), &mut dir);
        assert!(matches!(event, Some(TransportEvent::Message(ref m)) if m.id == 555));
        assert!(handle_dispatch("TYPING_START", &json!({}), &mut dir).is_none());
    }

    #[test]
    fn parses_button_interaction() {
        let payload = json!({
            "id": "777",
            "token": "tok",
            "type": 3,
            "channel_id": "100",
            "member": { "user": { "id": "42" } },
            "message": { "id": "9000" },
            "data": { "custom_id": "relay:cancel", "component_type": 2 }
        });
        let interaction = parse_interaction(&payload).unwrap();
        assert_eq!(interaction.id, "777");
        assert_eq!(interaction.token, "tok");
        assert_eq!(interaction.message_id, 9000);
        assert_eq!(interaction.channel_id, 100);
        assert_eq!(interaction.user_id, Some(42));
        assert_eq!(interaction.action, ResolutionAction::Cancel);
    }

    #[test]
    fn ignores_foreign_interactions() {
        let slash_command = json!({ "id": "1", "token": "t", "type": 2, "data": { "name": "ping" } });
        assert!(parse_interaction(&slash_command).is_none());

        let other_button = json!({
            "id": "1", "token": "t", "type": 3, "channel_id": "1",
            "message": { "id": "2" }, "data": { "custom_id": "poll:yes" }
        });
        assert!(parse_interaction(&other_button).is_none());
    }

    #[test]
    fn intents_cover_guild_messages_and_content() {
        assert_eq!(INTENTS, 1 | 512 | 32768);
    }

    #[test]
    fn unacknowledged_heartbeat_ends_session() {
        let mut monitor = HeartbeatMonitor::default();
        assert!(monitor.beat().is_ok());
        monitor.ack();
        assert!(monitor.beat().is_ok());
        assert!(matches!(monitor.beat(), Err(TransportError::Gateway(_))));
    }
}
