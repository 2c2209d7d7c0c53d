//! # Meshrelay - Conversational Relay for Meshtastic Networks
//!
//! Meshrelay listens on a Meshtastic mesh, decides which messages are meant for it, and
//! answers them through an OpenAI-compatible language model or a handful of built-in
//! services, splitting every reply into frames that fit the radio's packet limit.
//!
//! ## Features
//!
//! - **Framed Delivery**: Replies are split at natural boundaries into `[i/n]` numbered
//!   frames; direct messages are acknowledged and retried, channel broadcasts are paced
//!   fire-and-forget.
//! - **Addressing Rules**: DMs always get a reply; on shared channels the relay answers
//!   its handle, its command keywords, and warm follow-ups from the same user.
//! - **Bounded Work**: A fixed worker pool behind a non-blocking admission check keeps
//!   a burst of traffic from piling up.
//! - **Per-Peer Context**: Chat history per peer or channel, bounded by entry count and
//!   total characters, with the persona prompt pinned first.
//! - **Built-in Services**: `weather`, a per-channel `bbs`, and a small `zork`-style
//!   text adventure.
//! - **Audit Trail**: Daily, sanitized IN/OUT message logs with secret redaction.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshrelay::audit::AuditLog;
//! use meshrelay::config::Config;
//! use meshrelay::meshtastic::console::ConsoleTransport;
//! use meshrelay::metrics::RelayMetrics;
//! use meshrelay::relay::{Dispatcher, RelayServer};
//! use meshrelay::services::generation::OpenAiBackend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     let metrics = Arc::new(RelayMetrics::new());
//!     let (transport, inbound) = ConsoleTransport::open(64);
//!     let dispatcher = Dispatcher::new(
//!         &config,
//!         Arc::new(transport),
//!         Arc::new(OpenAiBackend::new(config.generation.clone())?),
//!         Vec::new(),
//!         Arc::new(AuditLog::new(&config.logging.audit_dir, false)),
//!         metrics.clone(),
//!     );
//!     RelayServer::new(&config, dispatcher, inbound, metrics).run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`relay`] - Framing, sending, admission, addressing, context and dispatch
//! - [`meshtastic`] - Transport trait plus serial, console and mock transports
//! - [`services`] - Generation backend and the command collaborators
//! - [`config`] - Configuration loading and validation
//! - [`audit`] - Daily IN/OUT message log
//! - [`errors`], [`logutil`], [`metrics`] - shared plumbing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Relay Server   │ ← receive loop, greetings, shutdown
//! └─────────────────┘
//!          │
//! ┌─────────────────┐     ┌──────────────────┐
//! │   Dispatcher    │ ──→ │ Services (LLM,   │
//! │ (admission pool)│     │ weather/bbs/zork)│
//! └─────────────────┘     └──────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Chunk Sender   │ ← framing, pacing, ack retries
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Transport     │ ← serial device / console / mock
//! └─────────────────┘
//! ```

pub mod audit;
pub mod config;
pub mod errors;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod relay;
pub mod services;
