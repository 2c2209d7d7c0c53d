//! Serial transport for a Meshtastic device speaking the protobuf stream API.
//!
//! Outbound: each text becomes a `ToRadio { packet }` written with the `0x94 0xC3 <len>`
//! header. Inbound: a blocking reader task feeds raw bytes through a [`StreamFramer`],
//! decodes `FromRadio` messages and turns them into [`RadioEvent`]s: text packets go
//! to the inbound channel, routing replies complete the matching ack waiter, and
//! `my_info` records the local node number.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use prost::Message;
use serialport::SerialPort;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use super::framer::{encode_frame, StreamFramer};
use super::proto::{
    from_radio, mesh_packet, port, priority, routing, to_radio, Data, FromRadio, Heartbeat,
    MeshPacket, Routing, ToRadio, ROUTING_ERROR_NONE,
};
use super::{InboundPacket, Target, Transport, BROADCAST_ADDR};
use crate::errors::{RelayError, RelayResult};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);
const READ_TIMEOUT: Duration = Duration::from_millis(500);

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;
type AckWaiters = Arc<Mutex<HashMap<u32, oneshot::Sender<bool>>>>;

/// What one decoded `FromRadio` message means to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    MyNode(u32),
    Text(InboundPacket),
    Ack { packet_id: u32, delivered: bool },
    ConfigComplete(u32),
}

/// Interpret a `FromRadio` message; `None` for anything the relay does not use.
pub fn classify(msg: FromRadio) -> Option<RadioEvent> {
    match msg.payload_variant? {
        from_radio::PayloadVariant::MyInfo(info) => Some(RadioEvent::MyNode(info.my_node_num)),
        from_radio::PayloadVariant::ConfigCompleteId(id) => Some(RadioEvent::ConfigComplete(id)),
        from_radio::PayloadVariant::Packet(pkt) => {
            let Some(mesh_packet::PayloadVariant::Decoded(data)) = pkt.payload_variant else {
                return None;
            };
            match data.portnum {
                port::TEXT_MESSAGE_APP => Some(RadioEvent::Text(InboundPacket {
                    source: pkt.from,
                    destination: pkt.to,
                    channel: Some(pkt.channel),
                    payload: data.payload,
                    is_broadcast: pkt.to == BROADCAST_ADDR,
                })),
                port::ROUTING_APP if data.request_id != 0 => {
                    let delivered = match Routing::decode(data.payload.as_slice()) {
                        Ok(Routing {
                            variant: Some(routing::Variant::ErrorReason(reason)),
                        }) => reason == ROUTING_ERROR_NONE,
                        Ok(_) => true,
                        Err(_) => false,
                    };
                    Some(RadioEvent::Ack {
                        packet_id: data.request_id,
                        delivered,
                    })
                }
                _ if pkt.priority == priority::ACK && data.reply_id != 0 => Some(RadioEvent::Ack {
                    packet_id: data.reply_id,
                    delivered: true,
                }),
                _ => None,
            }
        }
    }
}

pub struct SerialTransport {
    port: SharedPort,
    local_node: Arc<AtomicU32>,
    acks: AckWaiters,
    waiters: Mutex<HashMap<u32, oneshot::Receiver<bool>>>,
    next_id: AtomicU32,
    primary_channel: u32,
    hop_limit: u32,
    closed: Arc<AtomicBool>,
}

impl SerialTransport {
    /// Open the device, request its configuration and start the reader and heartbeat
    /// tasks.
    pub async fn open(
        port_name: &str,
        baud_rate: u32,
        primary_channel: u32,
        hop_limit: u32,
        buffer: usize,
    ) -> Result<(Self, mpsc::Receiver<InboundPacket>)> {
        debug!("Opening serial port {} at {} baud", port_name, baud_rate);
        let mut builder = serialport::new(port_name, baud_rate).timeout(READ_TIMEOUT);
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;

        // Toggle DTR/RTS so the device wakes up
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        sleep(Duration::from_millis(150)).await;

        // Drop any boot banner text
        let mut purge_buf = [0u8; 512];
        if let Ok(available) = port.bytes_to_read() {
            if available > 0 {
                let _ = port.read(&mut purge_buf);
            }
        }

        let reader = port
            .try_clone()
            .map_err(|e| anyhow!("Failed to clone serial port for reading: {}", e))?;

        let (tx, rx) = mpsc::channel(buffer.max(1));
        let transport = Self {
            port: Arc::new(Mutex::new(port)),
            local_node: Arc::new(AtomicU32::new(0)),
            acks: Arc::new(Mutex::new(HashMap::new())),
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(rand::random::<u32>() & 0x7fff_ffff),
            primary_channel,
            hop_limit,
            closed: Arc::new(AtomicBool::new(false)),
        };

        transport.spawn_reader(reader, tx);
        let config_id = rand::random::<u32>();
        transport
            .write_to_radio(ToRadio {
                payload_variant: Some(to_radio::PayloadVariant::WantConfigId(config_id)),
            })
            .await
            .map_err(|e| anyhow!("Failed to request device config: {}", e))?;
        transport.spawn_heartbeat();
        info!("Serial transport ready on {}", port_name);
        Ok((transport, rx))
    }

    fn spawn_reader(&self, mut reader: Box<dyn SerialPort>, tx: mpsc::Sender<InboundPacket>) {
        let local_node = self.local_node.clone();
        let acks = self.acks.clone();
        let closed = self.closed.clone();
        tokio::task::spawn_blocking(move || {
            let mut framer = StreamFramer::new();
            let mut buf = [0u8; 1024];
            while !closed.load(Ordering::Relaxed) {
                match reader.read(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => framer.push(&buf[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => {
                        error!("Serial read failed: {}", e);
                        break;
                    }
                }
                for frame in framer.drain_frames() {
                    let msg = match FromRadio::decode(frame.as_slice()) {
                        Ok(msg) => msg,
                        Err(e) => {
                            trace!("Skipping undecodable frame ({} bytes): {}", frame.len(), e);
                            continue;
                        }
                    };
                    match classify(msg) {
                        Some(RadioEvent::MyNode(id)) => {
                            info!("Local node is 0x{:08x}", id);
                            local_node.store(id, Ordering::Relaxed);
                        }
                        Some(RadioEvent::ConfigComplete(id)) => {
                            debug!("Device config complete (id {})", id);
                        }
                        Some(RadioEvent::Ack {
                            packet_id,
                            delivered,
                        }) => {
                            let waiter = acks.lock().ok().and_then(|mut m| m.remove(&packet_id));
                            if let Some(waiter) = waiter {
                                let _ = waiter.send(delivered);
                            }
                        }
                        Some(RadioEvent::Text(packet)) => {
                            if tx.blocking_send(packet).is_err() {
                                debug!("Inbound receiver dropped; stopping reader");
                                return;
                            }
                        }
                        None => {}
                    }
                }
            }
            debug!("Serial reader exiting");
        });
    }

    fn spawn_heartbeat(&self) {
        let port = self.port.clone();
        let closed = self.closed.clone();
        tokio::spawn(async move {
            loop {
                sleep(HEARTBEAT_INTERVAL).await;
                if closed.load(Ordering::Relaxed) {
                    break;
                }
                let msg = ToRadio {
                    payload_variant: Some(to_radio::PayloadVariant::Heartbeat(Heartbeat {
                        nonce: rand::random(),
                    })),
                };
                if let Err(e) = write_blocking(port.clone(), msg).await {
                    warn!("Heartbeat write failed: {}", e);
                }
            }
        });
    }

    fn next_packet_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    async fn write_to_radio(&self, msg: ToRadio) -> RelayResult<()> {
        write_blocking(self.port.clone(), msg).await
    }
}

async fn write_blocking(port: SharedPort, msg: ToRadio) -> RelayResult<()> {
    let frame = encode_frame(&msg.encode_to_vec())?;
    tokio::task::spawn_blocking(move || {
        let mut port = port
            .lock()
            .map_err(|_| RelayError::Transport("serial port lock poisoned".into()))?;
        port.write_all(&frame)
            .and_then(|_| port.flush())
            .map_err(|e| RelayError::Transport(format!("serial write failed: {}", e)))
    })
    .await
    .map_err(|e| RelayError::Transport(format!("serial write task failed: {}", e)))?
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Removes an abandoned ack registration when the waiting future is dropped.
struct AckGuard<'a> {
    acks: &'a AckWaiters,
    packet_id: u32,
}

impl Drop for AckGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut acks) = self.acks.lock() {
            acks.remove(&self.packet_id);
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send_text(&self, text: &str, target: Target, want_ack: bool) -> RelayResult<u32> {
        let id = self.next_packet_id();
        let (to, channel) = match target {
            Target::Node(node) => (node, self.primary_channel),
            Target::Channel(index) => (BROADCAST_ADDR, index),
        };
        let packet = MeshPacket {
            from: 0,
            to,
            channel,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                portnum: port::TEXT_MESSAGE_APP,
                payload: text.as_bytes().to_vec(),
                ..Default::default()
            })),
            id,
            hop_limit: self.hop_limit,
            want_ack,
            priority: if want_ack {
                priority::RELIABLE
            } else {
                priority::DEFAULT
            },
        };

        if want_ack {
            let (ack_tx, ack_rx) = oneshot::channel();
            if let Ok(mut acks) = self.acks.lock() {
                acks.insert(id, ack_tx);
            }
            if let Ok(mut waiters) = self.waiters.lock() {
                waiters.insert(id, ack_rx);
            }
        }

        let result = self
            .write_to_radio(ToRadio {
                payload_variant: Some(to_radio::PayloadVariant::Packet(packet)),
            })
            .await;
        if let Err(e) = result {
            if let Ok(mut acks) = self.acks.lock() {
                acks.remove(&id);
            }
            if let Ok(mut waiters) = self.waiters.lock() {
                waiters.remove(&id);
            }
            return Err(e);
        }
        trace!("Wrote packet {} to {} ({} bytes)", id, target, text.len());
        Ok(id)
    }

    async fn wait_for_ack(&self, packet_id: u32) -> RelayResult<()> {
        let rx = self
            .waiters
            .lock()
            .ok()
            .and_then(|mut w| w.remove(&packet_id))
            .ok_or_else(|| {
                RelayError::Transport(format!("no ack registration for packet {}", packet_id))
            })?;
        let _guard = AckGuard {
            acks: &self.acks,
            packet_id,
        };
        match rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RelayError::Transport(format!(
                "packet {} was not delivered",
                packet_id
            ))),
            Err(_) => Err(RelayError::Transport(format!(
                "ack waiter for packet {} closed",
                packet_id
            ))),
        }
    }

    fn local_node_id(&self) -> Option<u32> {
        match self.local_node.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }
}
