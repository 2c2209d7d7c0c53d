//! Inbound packet handling.
//!
//! [`Dispatcher::on_receive`] runs on the receive loop and only does cheap work:
//! validation, addressing and an admission attempt. Everything that can wait (audit
//! writes, collaborator calls, generation, paced sending) happens in the reply job on a
//! worker, driven by [`Responder`].
use log::{debug, trace, warn};
use std::sync::Arc;
use std::time::Duration;

use super::addressing::{strip_leading_handle, AddressingState};
use super::admission::AdmissionController;
use super::context::{ContextLedger, Role};
use super::sender::ChunkSender;
use crate::audit::{AuditLog, Direction};
use crate::config::Config;
use crate::config::RelayConfig;
use crate::errors::{RelayError, RelayResult};
use crate::logutil::{outbound_text, redact_for_log, safe_text};
use crate::meshtastic::{InboundPacket, Target, Transport};
use crate::metrics::RelayMetrics;
use crate::services::generation::GenerationBackend;
use crate::services::{split_command, CommandHandler};

/// What happened to one inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingress {
    /// Failed validation (size or encoding).
    Rejected,
    /// Empty, from ourselves, or on a channel we do not serve.
    Ignored,
    Unaddressed,
    /// A reply job was queued for this target.
    Scheduled(Target),
    /// Admission refused the job.
    Dropped(Target),
}

/// Produces the reply text for one addressed message.
pub struct Responder {
    rules: RelayConfig,
    handlers: Vec<Arc<dyn CommandHandler>>,
    ledger: ContextLedger,
    backend: Arc<dyn GenerationBackend>,
    metrics: Arc<RelayMetrics>,
}

impl Responder {
    pub fn new(
        rules: RelayConfig,
        ledger: ContextLedger,
        backend: Arc<dyn GenerationBackend>,
        handlers: Vec<Arc<dyn CommandHandler>>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            rules,
            handlers,
            ledger,
            backend,
            metrics,
        }
    }

    pub fn ledger(&self) -> &ContextLedger {
        &self.ledger
    }

    fn handler_for(&self, keyword: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.handlers.iter().find(|h| h.keyword() == keyword)
    }

    fn contains_any(haystack: &str, needles: &[String]) -> bool {
        needles
            .iter()
            .filter(|n| !n.is_empty())
            .any(|n| haystack.contains(&n.to_lowercase()))
    }

    /// Route `text` from `user` (conversation `target`) and return the reply, with
    /// secrets masked and capped at `max_text_len` characters whichever route produced it.
    pub async fn respond(&self, text: &str, target: Target, user: u32) -> String {
        let reply = self.route(text, target, user).await;
        outbound_text(&reply, self.rules.max_text_len)
    }

    async fn route(&self, text: &str, target: Target, user: u32) -> String {
        let text = strip_leading_handle(text, &self.rules.handle).trim();
        let lower = text.to_lowercase();

        let (keyword, args) = split_command(text);
        if let Some(handler) = self.handler_for(&keyword) {
            debug!("Routing '{}' command from {} on {}", keyword, user, target);
            return handler.handle(args, target, user).await;
        }
        if Self::contains_any(&lower, &self.rules.forbidden_markers) {
            debug!("Refusing prompt-injection attempt from {}", user);
            return self.rules.refusal_reply.clone();
        }
        if lower == "help" {
            return self.rules.help_menu.clone();
        }
        if Self::contains_any(&lower, &self.rules.decline_keywords) {
            return self.rules.decline_reply.clone();
        }

        let history = self.ledger.append(target, Role::User, text);
        let reply = match self.backend.generate(&history).await {
            Ok(reply) => reply,
            Err(e) => {
                self.metrics.inc_upstream_failures();
                warn!("Generation failed for {}: {}", target, e);
                RelayError::from(e).to_string()
            }
        };
        let reply = outbound_text(&reply, self.rules.max_text_len);
        self.ledger.append(target, Role::Assistant, &reply);
        reply
    }
}

pub struct Dispatcher {
    rules: RelayConfig,
    transport: Arc<dyn Transport>,
    addressing: AddressingState,
    admission: AdmissionController,
    responder: Arc<Responder>,
    sender: Arc<ChunkSender>,
    audit: Arc<AuditLog>,
    metrics: Arc<RelayMetrics>,
}

impl Dispatcher {
    /// Wire the relay core together. Must be called inside a Tokio runtime.
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        backend: Arc<dyn GenerationBackend>,
        handlers: Vec<Arc<dyn CommandHandler>>,
        audit: Arc<AuditLog>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let rules = config.relay.clone();
        let mut addressing = AddressingState::new(
            &rules.handle,
            Duration::from_secs(rules.convo_timeout_secs),
        );
        for handler in &handlers {
            addressing.register_command(handler.keyword(), handler.refreshes_warmth());
        }
        let ledger = ContextLedger::new(
            &rules.system_prompt,
            config.context.max_history_len,
            config.context.max_context_chars,
            rules.max_text_len,
        );
        let sender = Arc::new(ChunkSender::new(
            transport.clone(),
            config.sender.clone(),
            metrics.clone(),
        ));
        let responder = Arc::new(Responder::new(
            rules.clone(),
            ledger,
            backend,
            handlers,
            metrics.clone(),
        ));
        let admission = AdmissionController::new(
            config.workers.max_workers,
            config.workers.max_queue_size,
            metrics.clone(),
        );
        Self {
            rules,
            transport,
            addressing,
            admission,
            responder,
            sender,
            audit,
            metrics,
        }
    }

    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }

    pub fn sender(&self) -> &Arc<ChunkSender> {
        &self.sender
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn respond_channels(&self) -> &[u32] {
        &self.rules.respond_channels
    }

    pub fn max_text_len(&self) -> usize {
        self.rules.max_text_len
    }

    /// Handle one packet from the radio. Never blocks on generation or sending and
    /// never fails; problems are logged.
    pub async fn on_receive(&self, packet: InboundPacket) -> Ingress {
        let source = packet.source;
        match self.admit(packet).await {
            Ok(outcome) => outcome,
            Err(RelayError::Validation(reason)) => {
                self.metrics.inc_packets_rejected();
                warn!("Dropping packet from {}: {}", source, reason);
                Ingress::Rejected
            }
            Err(e) => {
                warn!("Error handling packet from {}: {}", source, e);
                Ingress::Ignored
            }
        }
    }

    async fn admit(&self, packet: InboundPacket) -> RelayResult<Ingress> {
        let raw = std::str::from_utf8(&packet.payload)
            .map_err(|e| RelayError::Validation(format!("payload is not UTF-8: {}", e)))?;
        let chars = raw.chars().count();
        if chars > self.rules.max_packet_chars {
            return Err(RelayError::Validation(format!(
                "oversized packet ({} chars)",
                chars
            )));
        }
        let text = safe_text(raw.trim(), self.rules.max_text_len);

        let channel = packet.channel.unwrap_or(0);
        let local = self.transport.local_node_id();
        let direct = !packet.is_broadcast && local == Some(packet.destination);
        trace!(
            "packet from={} to={} channel={} direct={} text='{}'",
            packet.source,
            packet.destination,
            channel,
            direct,
            redact_for_log(&text)
        );
        if text.is_empty() {
            debug!("No text; ignoring packet from {}", packet.source);
            return Ok(Ingress::Ignored);
        }
        if !direct && !self.rules.respond_channels.contains(&channel) {
            debug!("Ignoring packet on channel {} (not a respond channel)", channel);
            return Ok(Ingress::Ignored);
        }
        if local == Some(packet.source) {
            debug!("Ignoring own message");
            return Ok(Ingress::Ignored);
        }

        let user = packet.source;
        if !self
            .addressing
            .evaluate(&text, direct, channel, user)
            .is_addressed()
        {
            debug!("Message from {} not addressed to relay; ignoring", user);
            return Ok(Ingress::Unaddressed);
        }

        let target = if direct {
            Target::Node(user)
        } else {
            Target::Channel(channel)
        };
        let responder = self.responder.clone();
        let sender = self.sender.clone();
        let audit = self.audit.clone();
        let inbound = text.clone();
        let job = async move {
            audit.record(Direction::In, target, &text).await;
            let reply = responder.respond(&text, target, user).await;
            if reply.trim().is_empty() {
                return;
            }
            audit.record(Direction::Out, target, &reply).await;
            sender.send(&reply, target).await;
        };

        if self.admission.try_schedule(job) {
            Ok(Ingress::Scheduled(target))
        } else {
            let e = RelayError::Saturation(format!(
                "dropping message for target {} due to full queue",
                target
            ));
            warn!("{}", e);
            let audit = self.audit.clone();
            tokio::spawn(async move {
                audit.record(Direction::In, target, &inbound).await;
            });
            Ok(Ingress::Dropped(target))
        }
    }

    /// Stop admitting work and let queued replies finish.
    pub async fn shutdown(self) {
        self.admission.shutdown().await;
    }
}
