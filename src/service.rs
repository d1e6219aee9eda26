//! Relay service — routes transport events into the packaging state machine.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::packaging::{
    EscalationHandle, EscalationScheduler, Intake, IntakeRules, MessageBuffer, Package, Packager,
    PendingRegistry, ResolutionHandler, ResolutionOutcome,
};
use crate::transport::{EventStream, InboundMessage, Interaction, Transport, TransportEvent};

/// Owns the buffer and registry and wires every component to one transport.
pub struct RelayService {
    transport: Arc<dyn Transport>,
    rules: IntakeRules,
    buffer: Arc<MessageBuffer>,
    registry: Arc<PendingRegistry>,
    packager: Packager,
    resolver: ResolutionHandler,
    scheduler: Arc<EscalationScheduler>,
}

impl RelayService {
    pub fn new(config: &RelayConfig, transport: Arc<dyn Transport>) -> Self {
        let buffer = MessageBuffer::new();
        let registry = PendingRegistry::new();
        Self {
            rules: IntakeRules::new(&config.monitored_channels, &config.trigger),
            packager: Packager::new(Arc::clone(&transport), Arc::clone(&registry), config),
            resolver: ResolutionHandler::new(
                Arc::clone(&registry),
                Arc::clone(&transport),
                config.archive_channel.clone(),
            ),
            scheduler: Arc::new(EscalationScheduler::new(
                Arc::clone(&registry),
                Arc::clone(&transport),
                config.notification_interval,
                config.scan_interval,
            )),
            transport,
            buffer,
            registry,
        }
    }

    pub fn buffer(&self) -> &Arc<MessageBuffer> {
        &self.buffer
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<EscalationScheduler> {
        &self.scheduler
    }

    /// Buffer a message, or package the channel when it is the trigger.
    /// Returns the package when one was created.
    pub async fn handle_message(&self, message: InboundMessage) -> Option<Package> {
        match self.rules.classify(&message) {
            Intake::Ignore => None,
            Intake::Append => {
                self.buffer.append(message.channel_id, message).await;
                None
            }
            Intake::Trigger => {
                let channel_id = message.channel_id;
                let buffered = self.buffer.drain(channel_id).await;
                debug!(
                    channel = %message.channel_name,
                    buffered = buffered.len(),
                    "Trigger received, packaging"
                );
                match self.packager.package(message, buffered).await {
                    Ok(package) => Some(package),
                    Err(e) => {
                        warn!(error = %e, "Packaging failed; restoring buffer");
                        self.buffer.restore(channel_id, e.buffered).await;
                        None
                    }
                }
            }
        }
    }

    /// Acknowledge a button press, then resolve the package it belongs to.
    pub async fn handle_interaction(&self, interaction: Interaction) -> ResolutionOutcome {
        if let Err(e) = self.transport.acknowledge(&interaction).await {
            warn!(interaction_id = %interaction.id, error = %e, "Failed to acknowledge interaction");
        }
        info!(
            package_id = interaction.message_id,
            action = %interaction.action,
            user = ?interaction.user_id,
            "Resolution requested"
        );
        self.resolver
            .resolve(interaction.message_id, interaction.action)
            .await
    }

    /// Consume events until the stream ends or `shutdown` fires.
    ///
    /// Messages are handled in arrival order. Interactions are resolved in
    /// their own tasks so cleanup never stalls message intake.
    pub async fn run(
        self: Arc<Self>,
        mut events: EventStream,
        shutdown: CancellationToken,
    ) {
        let escalation: EscalationHandle = Arc::clone(&self.scheduler).start();
        info!(transport = self.transport.name(), "Relay service running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.next() => {
                    match event {
                        Some(TransportEvent::Message(message)) => {
                            self.handle_message(message).await;
                        }
                        Some(TransportEvent::Interaction(interaction)) => {
                            let service = Arc::clone(&self);
                            tokio::spawn(async move {
                                service.handle_interaction(interaction).await;
                            });
                        }
                        None => {
                            info!("Event stream ended");
                            break;
                        }
                    }
                }
            }
        }

        escalation.stop().await;
        self.buffer.clear().await;
        self.registry.clear().await;
    }
}
