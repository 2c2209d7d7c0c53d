//! In-memory transport used by the test-suite.
//!
//! Every `send_text` call is recorded in order. Acknowledgment outcomes are scripted
//! with [`AckBehavior`], and sends can be made to fail wholesale.
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Target, Transport};
use crate::errors::{RelayError, RelayResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub text: String,
    pub target: Target,
    pub want_ack: bool,
    pub packet_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckBehavior {
    /// Every wait succeeds immediately.
    Always,
    /// Every wait fails immediately (negative acknowledgment).
    Never,
    /// The first `n` waits fail, later ones succeed.
    FailFirst(usize),
    /// Waits never complete; only the caller's timeout ends them.
    Silent,
}

pub struct MockTransport {
    node_id: Option<u32>,
    sent: Mutex<Vec<SentText>>,
    ack: Mutex<AckBehavior>,
    fail_sends: AtomicBool,
    next_id: AtomicU32,
    ack_waits: AtomicUsize,
}

impl MockTransport {
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id: Some(node_id),
            sent: Mutex::new(Vec::new()),
            ack: Mutex::new(AckBehavior::Always),
            fail_sends: AtomicBool::new(false),
            next_id: AtomicU32::new(1),
            ack_waits: AtomicUsize::new(0),
        }
    }

    pub fn with_ack(self, behavior: AckBehavior) -> Self {
        self.set_ack(behavior);
        self
    }

    pub fn set_ack(&self, behavior: AckBehavior) {
        if let Ok(mut guard) = self.ack.lock() {
            *guard = behavior;
        }
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all recorded send calls, failed ones included.
    pub fn sent(&self) -> Vec<SentText> {
        self.sent.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }

    pub fn ack_waits(&self) -> usize {
        self.ack_waits.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        if let Ok(mut g) = self.sent.lock() {
            g.clear();
        }
        self.ack_waits.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, text: &str, target: Target, want_ack: bool) -> RelayResult<u32> {
        let packet_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut g) = self.sent.lock() {
            g.push(SentText {
                text: text.to_string(),
                target,
                want_ack,
                packet_id,
            });
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(RelayError::Transport("mock send failure".into()));
        }
        Ok(packet_id)
    }

    async fn wait_for_ack(&self, packet_id: u32) -> RelayResult<()> {
        self.ack_waits.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut guard = self
                .ack
                .lock()
                .map_err(|_| RelayError::Transport("mock ack script poisoned".into()))?;
            match *guard {
                AckBehavior::Always => Some(true),
                AckBehavior::Never => Some(false),
                AckBehavior::FailFirst(0) => Some(true),
                AckBehavior::FailFirst(n) => {
                    *guard = AckBehavior::FailFirst(n - 1);
                    Some(false)
                }
                AckBehavior::Silent => None,
            }
        };
        match outcome {
            Some(true) => Ok(()),
            Some(false) => Err(RelayError::Transport(format!(
                "no ack for packet {}",
                packet_id
            ))),
            None => std::future::pending().await,
        }
    }

    fn local_node_id(&self) -> Option<u32> {
        self.node_id
    }
}
