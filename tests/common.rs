//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use meshrelay::audit::AuditLog;
use meshrelay::config::{Config, SenderConfig};
use meshrelay::errors::UpstreamError;
use meshrelay::meshtastic::mock::MockTransport;
use meshrelay::meshtastic::Target;
use meshrelay::metrics::RelayMetrics;
use meshrelay::relay::context::ChatMessage;
use meshrelay::relay::Dispatcher;
use meshrelay::services::generation::GenerationBackend;
use meshrelay::services::CommandHandler;

pub const RELAY_NODE: u32 = 0x1000;
pub const ALICE: u32 = 0x2001;
pub const BOB: u32 = 0x2002;

/// Generation backend that replays scripted outcomes and records every history it saw.
/// Once the script runs out it answers `"ok"`.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, UpstreamError>>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedBackend {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            script: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            seen: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn failing(error: UpstreamError) -> Self {
        Self {
            script: Mutex::new(VecDeque::from(vec![Err(error)])),
            seen: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Every call waits for a permit on `gate` before answering.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            gate: Some(gate),
        }
    }

    pub fn histories(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, UpstreamError> {
        self.seen.lock().unwrap().push(history.to_vec());
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }
}

/// Command handler that echoes its arguments and records each call.
pub struct EchoCommand {
    keyword: &'static str,
    refreshes: bool,
    pub calls: Mutex<Vec<(String, Target, u32)>>,
}

impl EchoCommand {
    pub fn new(keyword: &'static str, refreshes: bool) -> Self {
        Self {
            keyword,
            refreshes,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CommandHandler for EchoCommand {
    fn keyword(&self) -> &'static str {
        self.keyword
    }

    fn refreshes_warmth(&self) -> bool {
        self.refreshes
    }

    async fn handle(&self, args: &str, target: Target, user: u32) -> String {
        self.calls
            .lock()
            .unwrap()
            .push((args.to_string(), target, user));
        format!("{} says {}", self.keyword, args)
    }
}

/// Default config with pacing disabled and channel 0 served.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sender = SenderConfig::immediate();
    config.relay.respond_channels = vec![0];
    config.generation.allow_missing_api_key = true;
    config.greeting.announce_on_start = false;
    config.greeting.enabled = false;
    config
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub transport: Arc<MockTransport>,
    pub metrics: Arc<RelayMetrics>,
    pub audit_dir: tempfile::TempDir,
}

pub fn harness(
    config: &Config,
    backend: Arc<dyn GenerationBackend>,
    handlers: Vec<Arc<dyn CommandHandler>>,
) -> Harness {
    let transport = Arc::new(MockTransport::new(RELAY_NODE));
    let metrics = Arc::new(RelayMetrics::new());
    let audit_dir = tempfile::tempdir().expect("tempdir");
    let audit = Arc::new(AuditLog::new(audit_dir.path(), false));
    let dispatcher = Dispatcher::new(
        config,
        transport.clone(),
        backend,
        handlers,
        audit,
        metrics.clone(),
    );
    Harness {
        dispatcher,
        transport,
        metrics,
        audit_dir,
    }
}

/// Poll until the transport has recorded at least `n` sends, or give up after two seconds.
pub async fn wait_for_sends(transport: &MockTransport, n: usize) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let sent = transport.sent_texts();
        if sent.len() >= n || tokio::time::Instant::now() >= deadline {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until the last recorded frame is `[n/n]`, or give up after two seconds.
pub async fn wait_for_final_frame(transport: &MockTransport) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let sent = transport.sent_texts();
        let total = sent.len();
        let done = sent
            .last()
            .map(|s| s.starts_with(&format!("[{}/{}]", total, total)))
            .unwrap_or(false);
        if done || tokio::time::Instant::now() >= deadline {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Read every audit line written so far.
pub fn audit_lines(dir: &std::path::Path) -> Vec<String> {
    let mut lines = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Ok(body) = std::fs::read_to_string(entry.path()) {
                lines.extend(body.lines().map(str::to_string));
            }
        }
    }
    lines
}
