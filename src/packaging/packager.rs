//! Packager — turns a drained buffer plus its trigger into an announced package.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::model::Package;
use super::registry::PendingRegistry;
use crate::config::RelayConfig;
use crate::error::TransportError;
use crate::transport::{Attachment, COLOR_BLUE, Embed, InboundMessage, Transport, UserId};

/// Rendered text when neither the buffer nor the trigger carried anything.
pub const EMPTY_PACKAGE_TEXT: &str = "No messages to package.";

/// Title of the review announcement posted to the source channel.
pub const ANNOUNCEMENT_TITLE: &str = "Appointment to make";

/// Transcript and attachments of a package, before it is announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// Render buffered messages, then the trigger's own attachments.
///
/// One line per non-empty text, one line per attachment, in arrival order.
pub fn render(trigger: &InboundMessage, buffered: &[InboundMessage], trigger_token: &str) -> Rendered {
    let mut lines = Vec::new();
    let mut attachments = Vec::new();

    for msg in buffered {
        if !msg.content.is_empty() {
            lines.push(format!("{}: {}", msg.author_name, msg.content));
        }
        for attachment in &msg.attachments {
            lines.push(format!("{} sent an attachment: {}", msg.author_name, attachment.url));
            attachments.push(attachment.clone());
        }
    }
    for attachment in &trigger.attachments {
        lines.push(format!(
            "{} sent an attachment with '{}': {}",
            trigger.author_name, trigger_token, attachment.url
        ));
        attachments.push(attachment.clone());
    }

    let text = if lines.is_empty() {
        EMPTY_PACKAGE_TEXT.to_string()
    } else {
        lines.join("\n")
    };
    Rendered { text, attachments }
}

/// The announcement could not be posted. Carries the drained messages back
/// so the caller can return them to the buffer.
#[derive(Debug, thiserror::Error)]
#[error("Failed to announce package for channel {channel}: {source}")]
pub struct AnnounceError {
    pub channel: String,
    pub source: TransportError,
    pub buffered: Vec<InboundMessage>,
}

/// Builds packages, announces them and registers them as pending.
pub struct Packager {
    transport: Arc<dyn Transport>,
    registry: Arc<PendingRegistry>,
    reviewers: HashMap<String, UserId>,
    trigger_token: String,
}

impl Packager {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<PendingRegistry>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            reviewers: config.reviewers.clone(),
            trigger_token: config.trigger.clone(),
        }
    }

    /// Reviewer for a channel; unmapped channels have none.
    pub fn reviewer_for(&self, channel_name: &str) -> Option<UserId> {
        self.reviewers.get(&channel_name.to_lowercase()).copied()
    }

    pub async fn package(
        &self,
        trigger: InboundMessage,
        buffered: Vec<InboundMessage>,
    ) -> Result<Package, AnnounceError> {
        self.package_at(trigger, buffered, Utc::now()).await
    }

    /// Render, announce to the source channel, and register the package.
    /// The announcement id becomes the package id.
    pub async fn package_at(
        &self,
        trigger: InboundMessage,
        buffered: Vec<InboundMessage>,
        now: DateTime<Utc>,
    ) -> Result<Package, AnnounceError> {
        let rendered = render(&trigger, &buffered, &self.trigger_token);
        let embed = Embed::new(ANNOUNCEMENT_TITLE, rendered.text.clone(), COLOR_BLUE);

        let id = match self
            .transport
            .send_announcement(trigger.channel_id, &embed)
            .await
        {
            Ok(id) => id,
            Err(source) => {
                return Err(AnnounceError {
                    channel: trigger.channel_name.clone(),
                    source,
                    buffered,
                });
            }
        };

        let reviewer = self.reviewer_for(&trigger.channel_name);
        if reviewer.is_none() {
            info!(
                channel = %trigger.channel_name,
                "No reviewer mapped for channel; package will not escalate"
            );
        }

        let package = Package::new(
            id,
            rendered.text,
            rendered.attachments,
            trigger,
            buffered,
            reviewer,
            now,
        );
        self.registry.insert(package.clone()).await;
        Ok(package)
    }
}
