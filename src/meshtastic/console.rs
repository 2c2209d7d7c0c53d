//! Console transport: run the relay without a radio attached.
//!
//! Each stdin line becomes a direct message from a fixed console peer. A line of the
//! form `#<channel> <text>` is delivered as a broadcast on that channel instead, which is
//! enough to exercise the addressing rules by hand. Outbound frames are printed to
//! stdout and acknowledged immediately.
use async_trait::async_trait;
use log::{debug, info};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::{InboundPacket, Target, Transport, BROADCAST_ADDR};
use crate::errors::RelayResult;

pub const CONSOLE_NODE_ID: u32 = 0x00c0_ffee;
pub const CONSOLE_PEER_ID: u32 = 0x0000_0001;

pub struct ConsoleTransport {
    next_id: AtomicU32,
}

impl ConsoleTransport {
    /// Start the stdin reader and return the transport with its inbound channel.
    pub fn open(buffer: usize) -> (Self, mpsc::Receiver<InboundPacket>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(parse_console_line(&line)).await.is_err() {
                    break;
                }
            }
            debug!("console input closed");
        });
        info!("Console transport ready (local node 0x{:08x})", CONSOLE_NODE_ID);
        (
            Self {
                next_id: AtomicU32::new(1),
            },
            rx,
        )
    }
}

fn parse_console_line(line: &str) -> InboundPacket {
    if let Some(rest) = line.strip_prefix('#') {
        let (chan, text) = rest.split_once(' ').unwrap_or((rest, ""));
        if let Ok(channel) = chan.parse::<u32>() {
            return InboundPacket::text(CONSOLE_PEER_ID, BROADCAST_ADDR, Some(channel), text);
        }
    }
    InboundPacket::text(CONSOLE_PEER_ID, CONSOLE_NODE_ID, None, line)
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_text(&self, text: &str, target: Target, want_ack: bool) -> RelayResult<u32> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!("-> {}{} {}", target, if want_ack { " (ack)" } else { "" }, text);
        Ok(id)
    }

    async fn wait_for_ack(&self, _packet_id: u32) -> RelayResult<()> {
        Ok(())
    }

    fn local_node_id(&self) -> Option<u32> {
        Some(CONSOLE_NODE_ID)
    }
}
