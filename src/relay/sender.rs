//! Paced frame transmission.
//!
//! A reply is framed by [`codec::frame`](super::codec::frame) and the frames go out one
//! at a time, in order, on the calling task. Every frame is preceded by a randomized
//! pacing delay so a burst of replies does not hog the channel's duty cycle.
//!
//! - Channel targets are broadcast fire-and-forget: no acknowledgment is requested and a
//!   failed send is only counted.
//! - Node targets request an acknowledgment. A frame is attempted up to
//!   `max_attempts` times; each attempt waits at most `ack_timeout` for the ack. After the
//!   last failed attempt the frame is abandoned with a warning and the next frame is sent.
use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

use super::codec;
use crate::config::SenderConfig;
use crate::errors::{RelayError, RelayResult};
use crate::logutil::{redact_sensitive, truncate_for_log};
use crate::meshtastic::{Target, Transport};
use crate::metrics::RelayMetrics;

pub struct ChunkSender {
    transport: Arc<dyn Transport>,
    config: SenderConfig,
    rng: Mutex<StdRng>,
    metrics: Arc<RelayMetrics>,
}

impl ChunkSender {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SenderConfig,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            transport,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
            metrics,
        }
    }

    /// Use a deterministic pacing sequence.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn frame_limit(&self, target: Target) -> usize {
        if target.is_broadcast() {
            self.config.channel_chunk_bytes
        } else {
            self.config.chunk_bytes
        }
    }

    /// Send `text` to `target`. Delivery problems are logged and counted, never returned.
    pub async fn send(&self, text: &str, target: Target) {
        let frames = codec::frame(text, self.frame_limit(target));
        if frames.is_empty() {
            return;
        }
        debug!(
            "Sending {} frame(s) to {}: '{}'",
            frames.len(),
            target,
            truncate_for_log(&redact_sensitive(text), 60)
        );
        for frame in &frames {
            sleep(self.next_delay()).await;
            let rendered = frame.render();
            if target.is_broadcast() {
                self.send_broadcast(&rendered, target).await;
            } else {
                self.send_reliable(&rendered, target, frame.index, frame.total)
                    .await;
            }
        }
    }

    pub(crate) fn next_delay(&self) -> Duration {
        let (lo, hi) = (self.config.delay_min_ms, self.config.delay_max_ms);
        if hi <= lo {
            return Duration::from_millis(lo);
        }
        let ms = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(lo..=hi),
            Err(_) => hi,
        };
        Duration::from_millis(ms)
    }

    async fn send_broadcast(&self, text: &str, target: Target) {
        match self.transport.send_text(text, target, false).await {
            Ok(_) => {
                self.metrics.inc_frames_sent();
                trace!("Broadcast frame to {}", target);
            }
            Err(e) => {
                self.metrics.inc_broadcast_send_failures();
                debug!("Broadcast frame to {} failed (not retried): {}", target, e);
            }
        }
    }

    async fn send_reliable(&self, text: &str, target: Target, index: usize, total: usize) {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.metrics.inc_reliable_retries();
                sleep(self.config.retry_delay()).await;
            }
            match self.attempt(text, target).await {
                Ok(()) => {
                    self.metrics.inc_reliable_acked();
                    return;
                }
                Err(e) => debug!(
                    "Frame {}/{} to {} attempt {}/{} failed: {}",
                    index, total, target, attempt, attempts, e
                ),
            }
        }
        self.metrics.inc_reliable_abandoned();
        warn!(
            "No ACK for frame {}/{} to {} after {} attempts; moving on",
            index, total, target, attempts
        );
    }

    async fn attempt(&self, text: &str, target: Target) -> RelayResult<()> {
        let packet_id = self.transport.send_text(text, target, true).await?;
        self.metrics.inc_frames_sent();
        timeout(self.config.ack_timeout(), self.transport.wait_for_ack(packet_id))
            .await
            .map_err(|_| {
                RelayError::Transport(format!(
                    "ack for packet {} timed out after {}ms",
                    packet_id, self.config.ack_timeout_ms
                ))
            })?
    }
}
