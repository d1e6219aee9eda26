//! Resolution handler — the accept and cancel actions on a pending package.

use std::sync::Arc;

use tracing::{info, warn};

use super::model::{Package, PackageState, ResolutionOutcome, ResolutionReport};
use super::registry::PendingRegistry;
use crate::transport::{
    COLOR_GREEN, Embed, MessageId, OutgoingFile, ResolutionAction, Transport,
};

/// Resolves packages: archive on accept, then best-effort cleanup either way.
pub struct ResolutionHandler {
    registry: Arc<PendingRegistry>,
    transport: Arc<dyn Transport>,
    archive_channel: String,
}

/// Counters from archiving one package.
#[derive(Debug, Default)]
struct ArchiveOutcome {
    posted: bool,
    uploaded: usize,
    skipped: usize,
}

impl ResolutionHandler {
    pub fn new(
        registry: Arc<PendingRegistry>,
        transport: Arc<dyn Transport>,
        archive_channel: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            transport,
            archive_channel: archive_channel.into(),
        }
    }

    pub async fn resolve(&self, package_id: MessageId, action: ResolutionAction) -> ResolutionOutcome {
        match action {
            ResolutionAction::Accept => self.accept(package_id).await,
            ResolutionAction::Cancel => self.cancel(package_id).await,
        }
    }

    /// Archive the package, delete its messages, and stop tracking it.
    pub async fn accept(&self, package_id: MessageId) -> ResolutionOutcome {
        let Some(package) = self.registry.claim(package_id).await else {
            return ResolutionOutcome::AlreadyResolved;
        };

        let archive = self.archive(&package).await;
        let (deleted, delete_failures) = self.delete_all(&package).await;

        info!(
            package_id,
            archived = archive.posted,
            attachments = archive.uploaded,
            skipped = archive.skipped,
            deleted,
            "Package accepted"
        );

        ResolutionOutcome::Resolved(ResolutionReport {
            package_id,
            state: PackageState::Accepted,
            archived: archive.posted,
            attachments_archived: archive.uploaded,
            attachments_skipped: archive.skipped,
            deleted,
            delete_failures,
        })
    }

    /// Delete the package's messages without archiving, and stop tracking it.
    pub async fn cancel(&self, package_id: MessageId) -> ResolutionOutcome {
        let Some(package) = self.registry.claim(package_id).await else {
            return ResolutionOutcome::AlreadyResolved;
        };

        let (deleted, delete_failures) = self.delete_all(&package).await;
        info!(package_id, deleted, "Package cancelled");

        ResolutionOutcome::Resolved(ResolutionReport {
            package_id,
            state: PackageState::Cancelled,
            archived: false,
            attachments_archived: 0,
            attachments_skipped: 0,
            deleted,
            delete_failures,
        })
    }

    /// Post the summary and re-uploaded attachments to the archive channel.
    /// Attachments that fail to download are left out.
    async fn archive(&self, package: &Package) -> ArchiveOutcome {
        let mut outcome = ArchiveOutcome::default();

        let channel_id = match self
            .transport
            .find_text_channel(package.guild_id, &self.archive_channel)
            .await
        {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(
                    package_id = package.id,
                    archive = %self.archive_channel,
                    "Archive channel not found; skipping archive copy"
                );
                return outcome;
            }
            Err(e) => {
                warn!(package_id = package.id, error = %e, "Failed to look up archive channel");
                return outcome;
            }
        };

        let mut files = Vec::new();
        for attachment in &package.attachments {
            match self.transport.fetch_attachment(attachment).await {
                Ok(bytes) => files.push(OutgoingFile {
                    filename: attachment.filename.clone(),
                    bytes,
                }),
                Err(e) => {
                    warn!(url = %attachment.url, error = %e, "Failed to download attachment");
                    outcome.skipped += 1;
                }
            }
        }

        let embed = Embed::new(
            format!("Appointment (from {})", package.source_channel_name),
            package.rendered_text.clone(),
            COLOR_GREEN,
        );
        let file_count = files.len();
        match self.transport.send_embed(channel_id, &embed, files).await {
            Ok(_) => {
                outcome.posted = true;
                outcome.uploaded = file_count;
            }
            Err(e) => {
                warn!(package_id = package.id, error = %e, "Failed to post archive copy");
                outcome.skipped += file_count;
            }
        }
        outcome
    }

    /// Delete members, the trigger and the announcement. Each deletion is
    /// independent; failures are logged and counted.
    async fn delete_all(&self, package: &Package) -> (usize, usize) {
        let mut deleted = 0;
        let mut failed = 0;
        for (channel_id, message_id) in package.cleanup_targets() {
            match self.transport.delete_message(channel_id, message_id).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(package_id = package.id, message_id, error = %e, "Failed to delete message");
                    failed += 1;
                }
            }
        }
        (deleted, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::Call;
    use crate::transport::{Attachment, InboundMessage, MemoryTransport};
    use chrono::Utc;

    const ARCHIVE_ID: u64 = 50;

    fn make_package(id: MessageId, attachments: Vec<Attachment>) -> Package {
        let trigger = InboundMessage::new(3, 10, "rita", "Alice", "done");
        let members = vec![
            InboundMessage::new(1, 10, "rita", "Alice", "hello"),
            InboundMessage::new(2, 10, "rita", "Alice", "world"),
        ];
        Package::new(id, "Alice: hello\nAlice: world".into(), attachments, trigger, members, Some(7), Utc::now())
    }

    async fn setup(attachments: Vec<Attachment>) -> (Arc<MemoryTransport>, Arc<PendingRegistry>, ResolutionHandler) {
        let transport = Arc::new(MemoryTransport::new().with_channel("backlog", ARCHIVE_ID));
        let registry = PendingRegistry::new();
        registry.insert(make_package(500, attachments)).await;
        let handler = ResolutionHandler::new(registry.clone(), transport.clone(), "backlog");
        (transport, registry, handler)
    }

    #[tokio::test]
    async fn accept_archives_then_deletes_everything() {
        let (transport, registry, handler) =
            setup(vec![Attachment::new("https://cdn/a.png", "a.png")]).await;

        let outcome = handler.accept(500).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.state, PackageState::Accepted);
        assert!(report.archived);
        assert_eq!(report.attachments_archived, 1);
        assert_eq!(report.deleted, 4);
        assert!(registry.is_empty().await);

        let embeds = transport.embeds();
        assert_eq!(embeds.len(), 1);
        assert_eq!(embeds[0].0, ARCHIVE_ID);
        assert_eq!(embeds[0].1.title, "Appointment (from rita)");
        assert_eq!(embeds[0].1.color, COLOR_GREEN);
        assert_eq!(embeds[0].2, vec!["a.png".to_string()]);
        assert_eq!(transport.deleted(), vec![1, 2, 3, 500]);
    }

    #[tokio::test]
    async fn accept_skips_failed_download() {
        let (transport, registry, handler) = setup(vec![
            Attachment::new("https://cdn/broken.png", "broken.png"),
            Attachment::new("https://cdn/ok.png", "ok.png"),
        ])
        .await;
        transport.fail_download("https://cdn/broken.png");

        let outcome = handler.accept(500).await;
        let report = outcome.report().unwrap();
        assert!(report.archived);
        assert_eq!(report.attachments_archived, 1);
        assert_eq!(report.attachments_skipped, 1);
        assert_eq!(transport.embeds()[0].2, vec!["ok.png".to_string()]);
        assert_eq!(report.deleted, 4);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn missing_archive_channel_still_cleans_up() {
        let transport = Arc::new(MemoryTransport::new());
        let registry = PendingRegistry::new();
        registry.insert(make_package(500, Vec::new())).await;
        let handler = ResolutionHandler::new(registry.clone(), transport.clone(), "backlog");

        let outcome = handler.accept(500).await;
        let report = outcome.report().unwrap();
        assert!(!report.archived);
        assert_eq!(report.deleted, 4);
        assert!(transport.embeds().is_empty());
    }

    #[tokio::test]
    async fn cancel_deletes_without_archiving() {
        let (transport, registry, handler) =
            setup(vec![Attachment::new("https://cdn/a.png", "a.png")]).await;

        let outcome = handler.cancel(500).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.state, PackageState::Cancelled);
        assert!(!report.archived);
        assert!(transport.embeds().is_empty());
        assert!(!transport.calls().iter().any(|c| matches!(c, Call::Fetch { .. })));
        assert_eq!(transport.deleted(), vec![1, 2, 3, 500]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn delete_failures_are_independent() {
        let (transport, _registry, handler) = setup(Vec::new()).await;
        transport.fail_delete(2);

        let outcome = handler.cancel(500).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.deleted, 3);
        assert_eq!(report.delete_failures, 1);
        assert_eq!(transport.deleted(), vec![1, 3, 500]);
    }

    #[tokio::test]
    async fn second_resolution_is_a_no_op() {
        let (transport, _registry, handler) = setup(Vec::new()).await;

        assert!(matches!(handler.accept(500).await, ResolutionOutcome::Resolved(_)));
        let calls_after_first = transport.calls().len();

        assert_eq!(handler.accept(500).await, ResolutionOutcome::AlreadyResolved);
        assert_eq!(handler.cancel(500).await, ResolutionOutcome::AlreadyResolved);
        assert_eq!(transport.calls().len(), calls_after_first);
    }

    #[tokio::test]
    async fn resolve_dispatches_on_action() {
        let (_transport, _registry, handler) = setup(Vec::new()).await;
        let outcome = handler.resolve(500, ResolutionAction::Cancel).await;
        assert_eq!(outcome.report().unwrap().state, PackageState::Cancelled);
    }
}
