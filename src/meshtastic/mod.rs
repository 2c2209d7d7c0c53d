//! # Meshtastic Transport Layer
//!
//! The relay core talks to the mesh through the [`Transport`] trait: send one text
//! packet to a node or channel, optionally wait for its routing acknowledgment, and learn
//! the local node number. Inbound packets arrive separately on a Tokio channel handed out
//! when a transport is opened.
//!
//! ## Implementations
//!
//! - `serial::SerialTransport` (feature `serial`): a Meshtastic device on USB/UART speaking
//!   the protobuf stream API (`0x94 0xC3 <len>` framed `ToRadio`/`FromRadio` messages).
//! - [`console::ConsoleTransport`]: stdin/stdout stand-in for running the relay without
//!   a radio.
//! - [`mock::MockTransport`]: records sends and scripts acknowledgments for tests.
//!
//! ## Addressing
//!
//! Node numbers and channel indexes live in separate namespaces, so every outbound
//! destination and every conversation key is a [`Target`].
use async_trait::async_trait;
use std::fmt;

use crate::errors::RelayResult;

pub mod console;
#[cfg(feature = "meshtastic-proto")]
pub mod framer;
pub mod mock;
#[cfg(feature = "meshtastic-proto")]
pub mod proto;
#[cfg(feature = "serial")]
pub mod serial;

/// Meshtastic broadcast node number.
pub const BROADCAST_ADDR: u32 = 0xffff_ffff;

/// A unicast correspondent or a broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Node(u32),
    Channel(u32),
}

impl Target {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Target::Channel(_))
    }

    /// Audit-log kind label.
    pub fn kind(&self) -> &'static str {
        match self {
            Target::Node(_) => "peer",
            Target::Channel(_) => "channel",
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Target::Node(id) | Target::Channel(id) => *id,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// One text packet as delivered by the radio. The payload is raw so the dispatcher can
/// reject bad encodings itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub source: u32,
    pub destination: u32,
    pub channel: Option<u32>,
    pub payload: Vec<u8>,
    pub is_broadcast: bool,
}

impl InboundPacket {
    /// Convenience constructor for a UTF-8 text packet.
    pub fn text(source: u32, destination: u32, channel: Option<u32>, text: &str) -> Self {
        Self {
            source,
            destination,
            channel,
            payload: text.as_bytes().to_vec(),
            is_broadcast: destination == BROADCAST_ADDR,
        }
    }
}

/// Opaque send/acknowledge primitive over the mesh.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue one text packet. Returns the packet id used to correlate the acknowledgment
    /// when `want_ack` is set.
    async fn send_text(&self, text: &str, target: Target, want_ack: bool) -> RelayResult<u32>;

    /// Wait until the radio confirms `packet_id` was delivered. A negative acknowledgment
    /// is an error. Callers bound the wait with their own timeout.
    async fn wait_for_ack(&self, packet_id: u32) -> RelayResult<()>;

    /// The local node number, once the radio has reported it.
    fn local_node_id(&self) -> Option<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_and_channel_targets_do_not_collide() {
        assert_ne!(Target::Node(1), Target::Channel(1));
        assert_eq!(Target::Node(42).to_string(), "peer:42");
        assert_eq!(Target::Channel(2).to_string(), "channel:2");
        assert!(Target::Channel(0).is_broadcast());
    }

    #[test]
    fn text_packet_detects_broadcast() {
        let p = InboundPacket::text(7, BROADCAST_ADDR, Some(1), "hi");
        assert!(p.is_broadcast);
        assert_eq!(p.payload, b"hi");
        let dm = InboundPacket::text(7, 99, None, "hi");
        assert!(!dm.is_broadcast);
    }
}
