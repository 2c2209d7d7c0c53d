//! The subset of the Meshtastic protobuf schema the relay needs.
//!
//! Field numbers follow `meshtastic/mesh.proto` and `meshtastic/portnums.proto`; only the
//! messages and fields touched by text relaying and acknowledgment tracking are declared.
//! Unknown fields are skipped by prost on decode.

pub mod port {
    pub const TEXT_MESSAGE_APP: i32 = 1;
    pub const ROUTING_APP: i32 = 5;
}

pub mod priority {
    pub const DEFAULT: i32 = 64;
    pub const RELIABLE: i32 = 70;
    pub const ACK: i32 = 120;
}

/// `Routing.Error.NONE`: delivery confirmed.
pub const ROUTING_ERROR_NONE: i32 = 0;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Data {
    #[prost(int32, tag = "1")]
    pub portnum: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub want_response: bool,
    #[prost(fixed32, tag = "4")]
    pub dest: u32,
    #[prost(fixed32, tag = "5")]
    pub source: u32,
    #[prost(fixed32, tag = "6")]
    pub request_id: u32,
    #[prost(fixed32, tag = "7")]
    pub reply_id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeshPacket {
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
    pub payload_variant: Option<mesh_packet::PayloadVariant>,
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    #[prost(bool, tag = "10")]
    pub want_ack: bool,
    #[prost(int32, tag = "11")]
    pub priority: i32,
}

pub mod mesh_packet {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "4")]
        Decoded(super::Data),
        #[prost(bytes = "vec", tag = "5")]
        Encrypted(Vec<u8>),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MyNodeInfo {
    #[prost(uint32, tag = "1")]
    pub my_node_num: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Routing {
    #[prost(oneof = "routing::Variant", tags = "3")]
    pub variant: Option<routing::Variant>,
}

pub mod routing {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        #[prost(int32, tag = "3")]
        ErrorReason(i32),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Heartbeat {
    #[prost(uint32, tag = "1")]
    pub nonce: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FromRadio {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(oneof = "from_radio::PayloadVariant", tags = "2, 3, 7")]
    pub payload_variant: Option<from_radio::PayloadVariant>,
}

pub mod from_radio {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "2")]
        Packet(super::MeshPacket),
        #[prost(message, tag = "3")]
        MyInfo(super::MyNodeInfo),
        #[prost(uint32, tag = "7")]
        ConfigCompleteId(u32),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToRadio {
    #[prost(oneof = "to_radio::PayloadVariant", tags = "1, 3, 7")]
    pub payload_variant: Option<to_radio::PayloadVariant>,
}

pub mod to_radio {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "1")]
        Packet(super::MeshPacket),
        #[prost(uint32, tag = "3")]
        WantConfigId(u32),
        #[prost(message, tag = "7")]
        Heartbeat(super::Heartbeat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn text_packet_survives_the_wire() {
        let pkt = MeshPacket {
            from: 0x1234_5678,
            to: 0xffff_ffff,
            channel: 2,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                portnum: port::TEXT_MESSAGE_APP,
                payload: b"hi".to_vec(),
                ..Default::default()
            })),
            id: 7,
            hop_limit: 3,
            want_ack: false,
            priority: priority::DEFAULT,
        };
        let msg = FromRadio {
            id: 1,
            payload_variant: Some(from_radio::PayloadVariant::Packet(pkt.clone())),
        };
        let bytes = msg.encode_to_vec();
        let back = FromRadio::decode(bytes.as_slice()).unwrap();
        assert_eq!(back.payload_variant, Some(from_radio::PayloadVariant::Packet(pkt)));
    }

    #[test]
    fn routing_error_none_is_encoded_as_field_three() {
        let r = Routing {
            variant: Some(routing::Variant::ErrorReason(ROUTING_ERROR_NONE)),
        };
        // tag 3, varint wire type, value 0
        assert_eq!(r.encode_to_vec(), vec![0x18, 0x00]);
    }
}
