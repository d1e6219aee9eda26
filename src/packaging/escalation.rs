//! Escalation scheduler — periodic reminders for packages left pending.
//!
//! The scan period and the notification interval are independent: the
//! scheduler wakes every `scan_interval`, and a package is reminded only
//! once `notification_interval` has passed since its last reminder.
//! Failed reminders leave `last_notified_at` untouched, so the next scan
//! retries them. Each reminder is bounded by a timeout, and a package whose
//! reminder is still in flight is skipped by overlapping scans.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::model::Package;
use super::registry::PendingRegistry;
use crate::error::TransportError;
use crate::transport::{MessageId, Transport};

/// Upper bound on a single reminder (user lookup plus DM).
const DEFAULT_REMINDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends reminders for overdue pending packages.
pub struct EscalationScheduler {
    registry: Arc<PendingRegistry>,
    transport: Arc<dyn Transport>,
    notification_interval: Duration,
    scan_interval: Duration,
    reminder_timeout: Duration,
    in_flight: Mutex<HashSet<MessageId>>,
}

impl EscalationScheduler {
    pub fn new(
        registry: Arc<PendingRegistry>,
        transport: Arc<dyn Transport>,
        notification_interval: Duration,
        scan_interval: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            notification_interval,
            scan_interval,
            reminder_timeout: notification_interval.min(DEFAULT_REMINDER_TIMEOUT),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_reminder_timeout(mut self, timeout: Duration) -> Self {
        self.reminder_timeout = timeout;
        self
    }

    /// Scan the registry as of `now`. Returns the number of reminders sent.
    ///
    /// Reminders for different packages are sent concurrently and each is
    /// recorded as soon as it completes; one slow or failing reviewer does
    /// not hold up the others.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> usize {
        let interval = chrono::Duration::from_std(self.notification_interval)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let due = self.registry.due(now, interval).await;

        let claimed: Vec<(Package, InFlightSlot<'_>)> = {
            let mut in_flight = lock(&self.in_flight);
            due.into_iter()
                .filter(|pkg| in_flight.insert(pkg.id))
                .map(|pkg| {
                    let slot = InFlightSlot {
                        set: &self.in_flight,
                        id: pkg.id,
                    };
                    (pkg, slot)
                })
                .collect()
        };
        if claimed.is_empty() {
            return 0;
        }
        debug!(count = claimed.len(), "Packages due for a reminder");

        let results = join_all(claimed.into_iter().map(|(pkg, slot)| async move {
            let _slot = slot;
            match self.remind_within_timeout(&pkg, now).await {
                // The package may have been resolved while the reminder was in flight.
                Ok(()) => self.registry.mark_notified(pkg.id, now).await,
                Err(e) => {
                    warn!(package_id = pkg.id, error = %e, "Reminder failed; retrying next scan");
                    false
                }
            }
        }))
        .await;

        results.into_iter().filter(|sent| *sent).count()
    }

    async fn remind_within_timeout(
        &self,
        pkg: &Package,
        now: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        tokio::time::timeout(self.reminder_timeout, self.remind(pkg, now))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Timeout {
                    operation: format!("reminder for package {}", pkg.id),
                    after: self.reminder_timeout,
                })
            })
    }

    async fn remind(&self, pkg: &Package, now: DateTime<Utc>) -> Result<(), TransportError> {
        let Some(reviewer_id) = pkg.target_reviewer_id else {
            return Ok(());
        };
        let user = self.transport.resolve_user(reviewer_id).await?;
        self.transport
            .send_direct(&user, &reminder_text(pkg, now))
            .await?;
        info!(
            package_id = pkg.id,
            reviewer = %user.display_name,
            pending = %format_duration(pkg.pending_for(now)),
            "Reminder sent"
        );
        Ok(())
    }

    /// Start the scan loop. The first scan happens one period after start.
    ///
    /// Each tick spawns its scan, so a slow scan never delays the next one.
    /// Stopping aborts scans still in progress.
    pub fn start(self: Arc<Self>) -> EscalationHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.scan_interval;
        let interval = self.notification_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip immediate first tick
            ticker.tick().await;

            let mut scans = JoinSet::new();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let scheduler = Arc::clone(&self);
                        scans.spawn(async move {
                            scheduler.scan_at(Utc::now()).await;
                        });
                    }
                    Some(result) = scans.join_next(), if !scans.is_empty() => {
                        if let Err(e) = result {
                            warn!("Escalation scan ended abnormally: {e}");
                        }
                    }
                }
            }
            scans.shutdown().await;
            debug!("Escalation loop stopped");
        });

        info!(
            scan_secs = period.as_secs(),
            interval_secs = interval.as_secs(),
            "Escalation scheduler started"
        );
        EscalationHandle { cancel, handle }
    }
}

/// Marks a package as having a reminder in flight until dropped.
struct InFlightSlot<'a> {
    set: &'a Mutex<HashSet<MessageId>>,
    id: MessageId,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.id);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Running scan loop. Dropping the handle does not stop the loop; call [`stop`].
///
/// [`stop`]: EscalationHandle::stop
pub struct EscalationHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl EscalationHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Escalation loop ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Direct message sent to the reviewer.
pub fn reminder_text(pkg: &Package, now: DateTime<Utc>) -> String {
    format!(
        "A package in the {} channel (ID: {}) has been pending for {}.",
        pkg.source_channel_name,
        pkg.id,
        format_duration(pkg.pending_for(now))
    )
}

/// Compact human duration, e.g. `2h 5m 10s`, `1m 0s`, `45s`.
pub fn format_duration(d: chrono::Duration) -> String {
    let total = d.num_seconds().max(0);
    let (days, rem) = (total / 86_400, total % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, seconds) = (rem / 60, rem % 60);

    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
