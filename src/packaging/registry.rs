//! Pending registry — in-memory table of packages awaiting review.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::model::Package;
use crate::transport::MessageId;

/// Outstanding packages keyed by announcement id.
///
/// Inserted by the packager, touched by the escalation scheduler
/// (`last_notified_at` only), removed by the resolution handler.
pub struct PendingRegistry {
    packages: RwLock<HashMap<MessageId, Package>>,
}

impl PendingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            packages: RwLock::new(HashMap::new()),
        })
    }

    /// Track a new package. Returns false if the id is already tracked,
    /// in which case the existing entry is kept.
    pub async fn insert(&self, package: Package) -> bool {
        let mut packages = self.packages.write().await;
        if packages.contains_key(&package.id) {
            warn!(package_id = package.id, "Package already pending, keeping existing entry");
            return false;
        }

        info!(
            package_id = package.id,
            channel = %package.source_channel_name,
            members = package.member_messages.len(),
            attachments = package.attachments.len(),
            reviewer = ?package.target_reviewer_id,
            "Package pending"
        );
        packages.insert(package.id, package);
        true
    }

    /// Remove and return a package. Only the first caller for an id gets it.
    pub async fn claim(&self, id: MessageId) -> Option<Package> {
        let claimed = self.packages.write().await.remove(&id);
        if claimed.is_none() {
            debug!(package_id = id, "Package not pending");
        }
        claimed
    }

    pub async fn get(&self, id: MessageId) -> Option<Package> {
        self.packages.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: MessageId) -> bool {
        self.packages.read().await.contains_key(&id)
    }

    /// Packages owed a reminder at `now`, oldest first.
    pub async fn due(&self, now: DateTime<Utc>, interval: chrono::Duration) -> Vec<Package> {
        let packages = self.packages.read().await;
        let mut due: Vec<Package> = packages
            .values()
            .filter(|p| p.is_due(now, interval))
            .cloned()
            .collect();
        due.sort_by_key(|p| p.created_at);
        due
    }

    /// Record a reminder. Returns false if the package was resolved meanwhile.
    pub async fn mark_notified(&self, id: MessageId, at: DateTime<Utc>) -> bool {
        match self.packages.write().await.get_mut(&id) {
            Some(package) => {
                package.last_notified_at = at;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.packages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.packages.read().await.is_empty()
    }

    /// Forget every package. Used at shutdown.
    pub async fn clear(&self) -> usize {
        let mut packages = self.packages.write().await;
        let count = packages.len();
        packages.clear();
        if count > 0 {
            info!(count, "Dropped pending packages");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InboundMessage;
    use chrono::Duration;

    fn make_package(id: MessageId, reviewer: Option<u64>, created_at: DateTime<Utc>) -> Package {
        let trigger = InboundMessage::new(id + 1_000, 10, "rita", "Alice", "done");
        Package::new(id, "text".into(), Vec::new(), trigger, Vec::new(), reviewer, created_at)
    }

    #[tokio::test]
    async fn insert_and_get() {
        let registry = PendingRegistry::new();
        assert!(registry.is_empty().await);

        assert!(registry.insert(make_package(1, Some(7), Utc::now())).await);
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(1).await);
        assert_eq!(registry.get(1).await.unwrap().target_reviewer_id, Some(7));
    }

    #[tokio::test]
    async fn duplicate_insert_keeps_original() {
        let registry = PendingRegistry::new();
        let t0 = Utc::now();
        registry.insert(make_package(1, Some(7), t0)).await;
        assert!(!registry.insert(make_package(1, Some(8), t0)).await);
        assert_eq!(registry.get(1).await.unwrap().target_reviewer_id, Some(7));
    }

    #[tokio::test]
    async fn claim_is_exactly_once() {
        let registry = PendingRegistry::new();
        registry.insert(make_package(1, None, Utc::now())).await;

        assert!(registry.claim(1).await.is_some());
        assert!(registry.claim(1).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn due_filters_by_interval_and_reviewer() {
        let registry = PendingRegistry::new();
        let t0 = Utc::now();
        registry.insert(make_package(1, Some(7), t0)).await;
        registry.insert(make_package(2, None, t0)).await;
        registry
            .insert(make_package(3, Some(7), t0 - Duration::seconds(30)))
            .await;

        let interval = Duration::seconds(60);
        assert!(registry.due(t0 + Duration::seconds(10), interval).await.is_empty());

        let due = registry.due(t0 + Duration::seconds(40), interval).await;
        assert_eq!(due.iter().map(|p| p.id).collect::<Vec<_>>(), vec![3]);

        let due = registry.due(t0 + Duration::seconds(60), interval).await;
        assert_eq!(due.iter().map(|p| p.id).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[tokio::test]
    async fn mark_notified_updates_only_last_notified() {
        let registry = PendingRegistry::new();
        let t0 = Utc::now();
        registry.insert(make_package(1, Some(7), t0)).await;

        let t1 = t0 + Duration::seconds(70);
        assert!(registry.mark_notified(1, t1).await);
        let pkg = registry.get(1).await.unwrap();
        assert_eq!(pkg.last_notified_at, t1);
        assert_eq!(pkg.created_at, t0);

        assert!(!registry.mark_notified(99, t1).await);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let registry = PendingRegistry::new();
        registry.insert(make_package(1, None, Utc::now())).await;
        registry.insert(make_package(2, None, Utc::now())).await;
        assert_eq!(registry.clear().await, 2);
        assert!(registry.is_empty().await);
    }
}
