//! # Relay Server
//!
//! [`RelayServer`] owns the [`Dispatcher`] and the inbound packet channel and runs the
//! main loop:
//!
//! - inbound packets are handed to [`Dispatcher::on_receive`] one at a time;
//! - a one-second housekeeping tick sends the periodic channel greeting
//!   (`interval ± jitter`) and logs a metrics snapshot every few minutes;
//! - Ctrl-C, or the transport closing its channel, ends the loop and drains the
//!   worker pool.
//!
//! On start the server can announce itself on every respond channel with a greeting,
//! the boot message and the command menu.
use anyhow::Result;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::ingress::Dispatcher;
use crate::audit::Direction;
use crate::config::{Config, GreetingConfig};
use crate::logutil::{outbound_text, redact_for_log};
use crate::meshtastic::{InboundPacket, Target};
use crate::metrics::RelayMetrics;

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(300);

pub struct RelayServer {
    dispatcher: Dispatcher,
    inbound: mpsc::Receiver<InboundPacket>,
    greeting: GreetingConfig,
    boot_message: String,
    help_menu: String,
    metrics: Arc<RelayMetrics>,
    rng: StdRng,
}

impl RelayServer {
    pub fn new(
        config: &Config,
        dispatcher: Dispatcher,
        inbound: mpsc::Receiver<InboundPacket>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            dispatcher,
            inbound,
            greeting: config.greeting.clone(),
            boot_message: config.boot_message(),
            help_menu: config.relay.help_menu.clone(),
            metrics,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Delay until the next channel greeting: `interval` shifted by up to `jitter`
    /// either way, never negative.
    pub fn next_greeting_delay(&mut self) -> Duration {
        let interval = self.greeting.interval_secs as i64;
        let jitter = self.greeting.jitter_secs as i64;
        let offset = if jitter > 0 {
            self.rng.gen_range(-jitter..=jitter)
        } else {
            0
        };
        Duration::from_secs((interval + offset).max(0) as u64)
    }

    fn pick_greeting(&mut self) -> Option<String> {
        if self.greeting.messages.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.greeting.messages.len());
        Some(self.greeting.messages[idx].clone())
    }

    /// Broadcast `messages` in order on every respond channel from a background task.
    fn broadcast(&self, messages: Vec<String>) -> Option<tokio::task::JoinHandle<()>> {
        let channels = self.dispatcher.respond_channels().to_vec();
        if channels.is_empty() || messages.is_empty() {
            return None;
        }
        let max_chars = self.dispatcher.max_text_len();
        let messages: Vec<String> = messages
            .iter()
            .map(|m| outbound_text(m, max_chars))
            .collect();
        let sender = self.dispatcher.sender().clone();
        let audit = self.dispatcher.audit().clone();
        Some(tokio::spawn(async move {
            for channel in channels {
                let target = Target::Channel(channel);
                for message in &messages {
                    audit.record(Direction::Out, target, message).await;
                    sender.send(message, target).await;
                }
            }
        }))
    }

    /// Greeting, boot message and menu on every respond channel.
    pub fn announce(&mut self) -> Option<tokio::task::JoinHandle<()>> {
        let hello = self.pick_greeting()?;
        let boot = format!("{}\n{}", self.boot_message, self.help_menu);
        info!("Announcing on channels {:?}", self.dispatcher.respond_channels());
        self.broadcast(vec![hello, boot])
    }

    /// One random greeting on every respond channel.
    pub fn greet(&mut self) -> Option<tokio::task::JoinHandle<()>> {
        let hello = self.pick_greeting()?;
        debug!("Sending periodic greeting '{}'", redact_for_log(&hello));
        self.broadcast(vec![hello])
    }

    pub async fn run(mut self) -> Result<()> {
        let channels = self.dispatcher.respond_channels().to_vec();
        if channels.is_empty() {
            info!("Relay ready. DMs only");
        } else {
            info!("Relay ready. DMs or channel(s) {:?}", channels);
        }
        if self.greeting.announce_on_start {
            self.announce();
        }

        let mut periodic = tokio::time::interval(Duration::from_secs(1));
        periodic.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut next_greeting = Instant::now() + self.next_greeting_delay();
        let mut last_metrics_log = Instant::now();

        loop {
            tokio::select! {
                _ = periodic.tick() => {
                    let now = Instant::now();
                    if self.greeting.enabled && now >= next_greeting {
                        self.greet();
                        next_greeting = now + self.next_greeting_delay();
                    }
                    if now.duration_since(last_metrics_log) >= METRICS_LOG_INTERVAL {
                        debug!("Relay metrics: {}", self.metrics.snapshot());
                        last_metrics_log = now;
                    }
                }

                packet = self.inbound.recv() => {
                    match packet {
                        Some(packet) => {
                            let outcome = self.dispatcher.on_receive(packet).await;
                            debug!("Inbound packet: {:?}", outcome);
                        }
                        None => {
                            info!("Transport closed its inbound channel");
                            break;
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        info!("Draining reply workers; final metrics: {}", self.metrics.snapshot());
        self.dispatcher.shutdown().await;
        Ok(())
    }
}
