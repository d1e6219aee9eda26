//! Package data model — the reviewable artifact and resolution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::{
    Attachment, ChannelId, GuildId, InboundMessage, MessageId, ResolutionAction, UserId,
};

/// Lifecycle of a package. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    /// Announced and waiting for a reviewer.
    Pending,
    /// Archived and cleaned up.
    Accepted,
    /// Cleaned up without archiving.
    Cancelled,
}

impl From<ResolutionAction> for PackageState {
    fn from(action: ResolutionAction) -> Self {
        match action {
            ResolutionAction::Accept => Self::Accepted,
            ResolutionAction::Cancel => Self::Cancelled,
        }
    }
}

impl std::fmt::Display for PackageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A packaged conversation awaiting review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    /// Id of the announcement message; assigned once the announcement is sent.
    pub id: MessageId,
    /// Author-attributed transcript of the buffered messages.
    pub rendered_text: String,
    /// Attachments collected from the buffer, then from the trigger.
    pub attachments: Vec<Attachment>,
    pub source_channel_id: ChannelId,
    /// Channel label, used for archive titles and reminders.
    pub source_channel_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,
    /// Exactly the buffered messages consumed to build this package.
    pub member_messages: Vec<InboundMessage>,
    /// The trigger message; deleted with the package but not a member.
    pub trigger_message: InboundMessage,
    pub created_at: DateTime<Utc>,
    /// Last reminder time. Starts at `created_at`.
    pub last_notified_at: DateTime<Utc>,
    /// Who gets reminders. `None` means the package never escalates.
    pub target_reviewer_id: Option<UserId>,
}

impl Package {
    pub fn new(
        id: MessageId,
        rendered_text: String,
        attachments: Vec<Attachment>,
        trigger_message: InboundMessage,
        member_messages: Vec<InboundMessage>,
        target_reviewer_id: Option<UserId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            rendered_text,
            attachments,
            source_channel_id: trigger_message.channel_id,
            source_channel_name: trigger_message.channel_name.clone(),
            guild_id: trigger_message.guild_id,
            member_messages,
            trigger_message,
            created_at,
            last_notified_at: created_at,
            target_reviewer_id,
        }
    }

    /// Total time the package has been waiting.
    pub fn pending_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Whether a reminder is owed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>, interval: chrono::Duration) -> bool {
        self.target_reviewer_id.is_some() && now - self.last_notified_at >= interval
    }

    /// Every message to delete on resolution: members, the trigger, then the announcement.
    pub fn cleanup_targets(&self) -> Vec<(ChannelId, MessageId)> {
        self.member_messages
            .iter()
            .map(|m| (m.channel_id, m.id))
            .chain(std::iter::once((
                self.trigger_message.channel_id,
                self.trigger_message.id,
            )))
            .chain(std::iter::once((self.source_channel_id, self.id)))
            .collect()
    }
}

/// What a resolution actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionReport {
    pub package_id: MessageId,
    pub state: PackageState,
    /// Whether an archive copy was posted.
    pub archived: bool,
    pub attachments_archived: usize,
    pub attachments_skipped: usize,
    pub deleted: usize,
    pub delete_failures: usize,
}

/// Result of an accept or cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// This call resolved the package.
    Resolved(ResolutionReport),
    /// The package was already resolved (or never existed); nothing was done.
    AlreadyResolved,
}

impl ResolutionOutcome {
    pub fn report(&self) -> Option<&ResolutionReport> {
        match self {
            Self::Resolved(report) => Some(report),
            Self::AlreadyResolved => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn package(reviewer: Option<UserId>) -> Package {
        let trigger = InboundMessage::new(3, 10, "marcelo", "Alice", "done").with_guild(1);
        let members = vec![
            InboundMessage::new(1, 10, "marcelo", "Alice", "hello"),
            InboundMessage::new(2, 10, "marcelo", "Alice", "world"),
        ];
        Package::new(
            500,
            "Alice: hello\nAlice: world".into(),
            Vec::new(),
            trigger,
            members,
            reviewer,
            Utc::now(),
        )
    }

    #[test]
    fn new_package_starts_notified_at_creation() {
        let pkg = package(Some(7));
        assert_eq!(pkg.last_notified_at, pkg.created_at);
        assert_eq!(pkg.source_channel_name, "marcelo");
        assert_eq!(pkg.source_channel_id, 10);
        assert_eq!(pkg.guild_id, Some(1));
    }

    #[test]
    fn due_only_after_interval_with_reviewer() {
        let pkg = package(Some(7));
        let interval = Duration::seconds(60);
        assert!(!pkg.is_due(pkg.created_at + Duration::seconds(59), interval));
        assert!(pkg.is_due(pkg.created_at + Duration::seconds(60), interval));

        let unreviewed = package(None);
        assert!(!unreviewed.is_due(unreviewed.created_at + Duration::hours(5), interval));
    }

    #[test]
    fn cleanup_targets_cover_members_trigger_and_announcement() {
        let pkg = package(None);
        assert_eq!(pkg.cleanup_targets(), vec![(10, 1), (10, 2), (10, 3), (10, 500)]);
    }

    #[test]
    fn state_follows_action() {
        assert_eq!(PackageState::from(ResolutionAction::Accept), PackageState::Accepted);
        assert_eq!(PackageState::from(ResolutionAction::Cancel), PackageState::Cancelled);
        assert_eq!(PackageState::Pending.to_string(), "pending");
    }

    #[test]
    fn package_serializes_without_guild_when_absent() {
        let mut pkg = package(None);
        pkg.guild_id = None;
        let json = serde_json::to_value(&pkg).unwrap();
        assert!(json.get("guild_id").is_none());
        assert_eq!(json["member_messages"].as_array().unwrap().len(), 2);
    }
}
