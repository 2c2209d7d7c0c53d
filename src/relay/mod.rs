//! # Relay Core
//!
//! The pieces between the radio and the collaborators:
//!
//! - [`codec`] splits replies into numbered frames that fit one packet.
//! - [`sender`] paces frames out, with acknowledgment retries for direct messages.
//! - [`admission`] bounds how many replies may be in flight or waiting.
//! - [`addressing`] decides whether a channel message is meant for the relay.
//! - [`context`] keeps the bounded per-peer chat history.
//! - [`ingress`] ties them together for each inbound packet.
//! - [`server`] runs the receive loop, greetings and shutdown.
pub mod addressing;
pub mod admission;
pub mod codec;
pub mod context;
pub mod ingress;
pub mod sender;
pub mod server;

pub use ingress::{Dispatcher, Ingress, Responder};
pub use server::RelayServer;
