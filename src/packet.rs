//! # MQTT Packet Structures, Builders (C4) and Parser (C5)
//!
//! Every outbound packet type implements [`PacketBuilder`], which is run in
//! the two passes spec §4.4 requires: `body_len()` is pass one (pure
//! calculation, no cursor, no buffer write) and `write_body()` is pass two
//! (writes the variable header + payload into an already-sized buffer). The
//! session calls [`total_len`] after pass one to size its send buffer
//! request, then [`build`] to run pass two into the allocated buffer.
//!
//! [`decode_packet`] is the C5 dispatcher: it reads the fixed header,
//! validates `1 + varint_len + remaining_length == buf.len()`, and hands the
//! remaining-length body off to the matching per-type decoder.

use crate::codec;
use crate::error::{MqttError, ProtocolError, ReasonCode};
use crate::packet_type::{PacketType, TypeMask};
use crate::property::{self, Property, PropertyId, PropertyValue, MAX_PROPERTIES};
use crate::transport;
use heapless::Vec;

type CodecResult<T> = Result<T, MqttError<transport::ErrorPlaceHolder>>;

/// Maximum number of topic filters this engine can SUBSCRIBE/UNSUBSCRIBE to
/// in a single call.
pub const MAX_SUBSCRIBE_ENTRIES: usize = 8;

/// Quality of Service levels (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> CodecResult<QoS> {
        match v {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(MqttError::Protocol(ProtocolError::InvalidQoS)),
        }
    }
}

/// Runs pass one (`body_len`) and returns the total on-wire size the caller
/// must allocate: `1 (fixed header type/flags byte) + varint_len(remaining)
/// + remaining`.
pub fn total_len<P: PacketBuilder>(packet: &P) -> usize {
    let remaining = packet.body_len();
    1 + codec::varint_len(remaining as u32) + remaining
}

/// Runs pass two: writes the fixed header then the packet's variable header
/// and payload into `buf`, which must be at least [`total_len`] bytes.
/// Returns the number of bytes written.
pub fn build<P: PacketBuilder>(packet: &P, buf: &mut [u8]) -> CodecResult<usize> {
    let remaining = packet.body_len();
    let header_len = 1 + codec::varint_len(remaining as u32);
    if buf.len() < header_len + remaining {
        return Err(MqttError::BufferTooSmall);
    }
    let mut cursor = 0;
    codec::write_byte(
        &mut cursor,
        buf,
        ((packet.packet_type() as u8) << 4) | packet.flags(),
    )?;
    codec::write_varint(&mut cursor, buf, remaining as u32)?;
    debug_assert_eq!(cursor, header_len);
    let body_start = cursor;
    packet.write_body(&mut cursor, buf)?;
    debug_assert_eq!(cursor - body_start, remaining);
    Ok(cursor)
}

/// Implemented by every outbound control packet (spec §4.4, C4).
pub trait PacketBuilder {
    fn packet_type(&self) -> PacketType;
    fn flags(&self) -> u8;
    /// Pass one: exact size of the variable header + payload. Must not write
    /// anything, and must return the same value
    /// [`write_body`](Self::write_body) actually consumes (spec §8 property
    /// law 4: the two passes agree to the byte).
    fn body_len(&self) -> usize;
    /// Pass two: writes the variable header + payload at `buf[*cursor..]`.
    fn write_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()>;
}

// --- Property allow-lists per packet context (spec §6.1 "Appears in") ---

pub(crate) const CONNECT_PROPS: &[PropertyId] = &[
    PropertyId::SessionExpiryInterval,
    PropertyId::AuthenticationMethod,
    PropertyId::AuthenticationData,
    PropertyId::RequestProblemInformation,
    PropertyId::RequestResponseInformation,
    PropertyId::ReceiveMaximum,
    PropertyId::TopicAliasMaximum,
    PropertyId::MaximumPacketSize,
    PropertyId::UserProperty,
];

const CONNACK_PROPS: &[PropertyId] = &[
    PropertyId::SessionExpiryInterval,
    PropertyId::AssignedClientIdentifier,
    PropertyId::ServerKeepAlive,
    PropertyId::AuthenticationMethod,
    PropertyId::AuthenticationData,
    PropertyId::ResponseInformation,
    PropertyId::ServerReference,
    PropertyId::ReasonString,
    PropertyId::ReceiveMaximum,
    PropertyId::TopicAliasMaximum,
    PropertyId::MaximumQoS,
    PropertyId::RetainAvailable,
    PropertyId::UserProperty,
    PropertyId::MaximumPacketSize,
    PropertyId::WildcardSubscriptionAvailable,
    PropertyId::SubscriptionIdentifierAvailable,
    PropertyId::SharedSubscriptionAvailable,
];

const PUBLISH_PROPS: &[PropertyId] = &[
    PropertyId::PayloadFormatIndicator,
    PropertyId::MessageExpiryInterval,
    PropertyId::ContentType,
    PropertyId::ResponseTopic,
    PropertyId::CorrelationData,
    PropertyId::SubscriptionIdentifier,
    PropertyId::TopicAlias,
    PropertyId::UserProperty,
];

const ACK_PROPS: &[PropertyId] = &[PropertyId::ReasonString, PropertyId::UserProperty];

const DISCONNECT_PROPS: &[PropertyId] = &[
    PropertyId::SessionExpiryInterval,
    PropertyId::ServerReference,
    PropertyId::ReasonString,
    PropertyId::UserProperty,
];

type PropList<'a> = Vec<Property<'a>, MAX_PROPERTIES>;

fn empty_props<'a>() -> PropList<'a> {
    Vec::new()
}

// --- CONNECT ---

/// The Will message carried by a CONNECT with the Will flag set (spec §4.4).
#[derive(Debug, Clone)]
pub struct Will<'a> {
    pub qos: QoS,
    pub retain: bool,
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub properties: PropList<'a>,
}

#[derive(Debug, Clone)]
pub struct Connect<'a> {
    pub clean_start: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub user_name: Option<&'a str>,
    pub password: Option<&'a [u8]>,
    pub will: Option<Will<'a>>,
    pub properties: PropList<'a>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_start: bool) -> Self {
        Self {
            clean_start,
            keep_alive,
            client_id,
            user_name: None,
            password: None,
            will: None,
            properties: empty_props(),
        }
    }
}

impl<'a> PacketBuilder for Connect<'a> {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }
    fn flags(&self) -> u8 {
        0
    }

    fn body_len(&self) -> usize {
        let mut len = 2 + 1 + 1 + 2; // "MQTT" string + protocol level + connect flags + keep_alive
        len += property::encoded_len(&self.properties);
        len += 2 + self.client_id.len();
        if let Some(will) = &self.will {
            len += property::encoded_len(&will.properties);
            len += 2 + will.topic.len();
            len += 2 + will.payload.len();
        }
        if let Some(u) = self.user_name {
            len += 2 + u.len();
        }
        if let Some(p) = self.password {
            len += 2 + p.len();
        }
        len
    }

    fn write_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        codec::write_utf8_string(cursor, buf, "MQTT")?;
        codec::write_byte(cursor, buf, 5)?; // protocol level: MQTT 5.0

        let mut flags: u8 = 0;
        if self.clean_start {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.user_name.is_some() {
            flags |= 0x80;
        }
        codec::write_byte(cursor, buf, flags)?;
        codec::write_u16(cursor, buf, self.keep_alive)?;

        property::encode_properties(cursor, buf, &self.properties)?;
        codec::write_utf8_string(cursor, buf, self.client_id)?;

        if let Some(will) = &self.will {
            property::encode_properties(cursor, buf, &will.properties)?;
            codec::write_utf8_string(cursor, buf, will.topic)?;
            codec::write_binary(cursor, buf, will.payload)?;
        }
        if let Some(u) = self.user_name {
            codec::write_utf8_string(cursor, buf, u)?;
        }
        if let Some(p) = self.password {
            codec::write_binary(cursor, buf, p)?;
        }
        Ok(())
    }
}

// --- CONNACK ---

/// Server-advertised limits captured on CONNACK (spec §3 `connack_info`),
/// each defaulted per the MQTT 5.0 specification when the server omits it.
#[derive(Debug, Clone)]
pub struct ConnAckInfo<'a> {
    pub session_present: bool,
    pub reason_code: ReasonCode,
    pub session_expiry_interval: u32,
    pub max_qos: QoS,
    pub retain_available: bool,
    pub wildcard_subscription_available: bool,
    pub shared_subscription_available: bool,
    pub subscription_identifiers_available: bool,
    pub server_keep_alive: Option<u16>,
    pub receive_maximum: u16,
    pub max_packet_size: Option<u32>,
    pub topic_alias_maximum: u16,
    pub assigned_client_id: Option<&'a str>,
    pub response_information: Option<&'a str>,
    pub server_reference: Option<&'a str>,
    pub reason_string: Option<&'a str>,
}

impl<'a> ConnAckInfo<'a> {
    fn decode(body: &'a [u8]) -> CodecResult<Self> {
        let mut cursor = 0;
        let ack_flags = codec::read_byte(&mut cursor, body)?;
        let session_present = ack_flags & 0x01 != 0;
        let reason_code = ReasonCode::from(codec::read_byte(&mut cursor, body)?);
        let props = property::decode_properties(&mut cursor, body, CONNACK_PROPS)?;

        let mut info = ConnAckInfo {
            session_present,
            reason_code,
            session_expiry_interval: 0,
            max_qos: QoS::ExactlyOnce,
            retain_available: true,
            wildcard_subscription_available: true,
            shared_subscription_available: true,
            subscription_identifiers_available: true,
            server_keep_alive: None,
            receive_maximum: 65535,
            max_packet_size: None,
            topic_alias_maximum: 0,
            assigned_client_id: None,
            response_information: None,
            server_reference: None,
            reason_string: None,
        };
        for p in &props {
            match (&p.id, &p.value) {
                (PropertyId::SessionExpiryInterval, PropertyValue::U32(v)) => {
                    info.session_expiry_interval = *v;
                }
                (PropertyId::MaximumQoS, PropertyValue::Byte(v)) => {
                    info.max_qos = QoS::from_u8(*v)?;
                }
                (PropertyId::RetainAvailable, PropertyValue::Byte(v)) => {
                    info.retain_available = *v != 0;
                }
                (PropertyId::WildcardSubscriptionAvailable, PropertyValue::Byte(v)) => {
                    info.wildcard_subscription_available = *v != 0;
                }
                (PropertyId::SharedSubscriptionAvailable, PropertyValue::Byte(v)) => {
                    info.shared_subscription_available = *v != 0;
                }
                (PropertyId::SubscriptionIdentifierAvailable, PropertyValue::Byte(v)) => {
                    info.subscription_identifiers_available = *v != 0;
                }
                (PropertyId::ServerKeepAlive, PropertyValue::U16(v)) => {
                    info.server_keep_alive = Some(*v);
                }
                (PropertyId::ReceiveMaximum, PropertyValue::U16(v)) => {
                    info.receive_maximum = *v;
                }
                (PropertyId::MaximumPacketSize, PropertyValue::U32(v)) => {
                    info.max_packet_size = Some(*v);
                }
                (PropertyId::TopicAliasMaximum, PropertyValue::U16(v)) => {
                    info.topic_alias_maximum = *v;
                }
                (PropertyId::AssignedClientIdentifier, PropertyValue::Utf8String(s)) => {
                    info.assigned_client_id = Some(s);
                }
                (PropertyId::ResponseInformation, PropertyValue::Utf8String(s)) => {
                    info.response_information = Some(s);
                }
                (PropertyId::ServerReference, PropertyValue::Utf8String(s)) => {
                    info.server_reference = Some(s);
                }
                (PropertyId::ReasonString, PropertyValue::Utf8String(s)) => {
                    info.reason_string = Some(s);
                }
                _ => {}
            }
        }
        Ok(info)
    }
}

// --- PUBLISH ---

#[derive(Debug, Clone)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<u16>,
    pub payload: &'a [u8],
    pub properties: PropList<'a>,
}

impl<'a> Publish<'a> {
    pub fn new(topic: &'a str, payload: &'a [u8], qos: QoS, retain: bool) -> Self {
        Self {
            topic,
            qos,
            retain,
            dup: false,
            packet_id: None,
            payload,
            properties: empty_props(),
        }
    }

    fn decode(body: &'a [u8], flags: u8) -> CodecResult<Self> {
        let retain = flags & 0x01 != 0;
        let qos = QoS::from_u8((flags >> 1) & 0x03)?;
        let dup = flags & 0x08 != 0;

        let mut cursor = 0;
        let topic = codec::read_utf8_string(&mut cursor, body)?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(codec::read_u16(&mut cursor, body)?)
        } else {
            None
        };
        let properties = property::decode_properties(&mut cursor, body, PUBLISH_PROPS)?;

        if let Some(PropertyValue::Byte(1)) = property::find(&properties, PropertyId::PayloadFormatIndicator) {
            if !crate::utf8::is_valid_utf8(&body[cursor..], false) {
                return Err(MqttError::Protocol(ProtocolError::InvalidEncoding));
            }
        }

        Ok(Publish {
            topic,
            qos,
            retain,
            dup,
            packet_id,
            payload: &body[cursor..],
            properties,
        })
    }
}

impl<'a> PacketBuilder for Publish<'a> {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }
    fn flags(&self) -> u8 {
        ((self.dup as u8) << 3) | ((self.qos as u8) << 1) | (self.retain as u8)
    }

    fn body_len(&self) -> usize {
        let mut len = 2 + self.topic.len();
        if self.qos != QoS::AtMostOnce {
            len += 2;
        }
        len += property::encoded_len(&self.properties);
        len += self.payload.len();
        len
    }

    fn write_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        codec::write_utf8_string(cursor, buf, self.topic)?;
        if self.qos != QoS::AtMostOnce {
            let id = self.packet_id.ok_or(MqttError::InvalidArgument)?;
            codec::write_u16(cursor, buf, id)?;
        }
        property::encode_properties(cursor, buf, &self.properties)?;
        let slice = buf
            .get_mut(*cursor..*cursor + self.payload.len())
            .ok_or(MqttError::BufferTooSmall)?;
        slice.copy_from_slice(self.payload);
        *cursor += self.payload.len();
        Ok(())
    }
}

// --- ACK family: PUBACK / PUBREC / PUBREL / PUBCOMP ---

/// Shared shape of PUBACK/PUBREC/PUBREL/PUBCOMP (spec §4.4): packet_id,
/// reason_code, properties — with the short-form optimisation that omits the
/// reason code and properties entirely when reason is Success and there are
/// no properties.
#[derive(Debug, Clone)]
pub struct AckReason<'a> {
    pub packet_id: u16,
    pub reason_code: ReasonCode,
    pub properties: PropList<'a>,
}

impl<'a> AckReason<'a> {
    pub fn success(packet_id: u16) -> Self {
        Self {
            packet_id,
            reason_code: ReasonCode::SUCCESS,
            properties: empty_props(),
        }
    }

    fn decode(body: &'a [u8]) -> CodecResult<Self> {
        let mut cursor = 0;
        let packet_id = codec::read_u16(&mut cursor, body)?;
        if cursor == body.len() {
            return Ok(Self::success(packet_id));
        }
        let reason_code = ReasonCode::from(codec::read_byte(&mut cursor, body)?);
        let properties = if cursor == body.len() {
            empty_props()
        } else {
            property::decode_properties(&mut cursor, body, ACK_PROPS)?
        };
        Ok(Self {
            packet_id,
            reason_code,
            properties,
        })
    }

    fn body_len(&self) -> usize {
        if self.reason_code == ReasonCode::SUCCESS && self.properties.is_empty() {
            2
        } else {
            2 + 1 + property::encoded_len(&self.properties)
        }
    }

    fn write_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        codec::write_u16(cursor, buf, self.packet_id)?;
        if self.reason_code == ReasonCode::SUCCESS && self.properties.is_empty() {
            return Ok(());
        }
        codec::write_byte(cursor, buf, self.reason_code.0)?;
        property::encode_properties(cursor, buf, &self.properties)
    }
}

/// Thin wrapper so PUBACK/PUBREC/PUBCOMP (flags always 0) and PUBREL (flags
/// `0b0010`, spec §4.4) can share [`AckReason`]'s encode/decode logic while
/// still reporting the right packet type and flags to [`build`].
macro_rules! ack_builder {
    ($name:ident, $ptype:expr, $flags:expr) => {
        #[derive(Debug, Clone)]
        pub struct $name<'a>(pub AckReason<'a>);

        impl<'a> PacketBuilder for $name<'a> {
            fn packet_type(&self) -> PacketType {
                $ptype
            }
            fn flags(&self) -> u8 {
                $flags
            }
            fn body_len(&self) -> usize {
                self.0.body_len()
            }
            fn write_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
                self.0.write_body(cursor, buf)
            }
        }
    };
}

ack_builder!(PubAck, PacketType::PubAck, 0);
ack_builder!(PubRec, PacketType::PubRec, 0);
ack_builder!(PubRel, PacketType::PubRel, 0b0010);
ack_builder!(PubComp, PacketType::PubComp, 0);

// --- SUBSCRIBE / SUBACK ---

#[derive(Debug, Clone, Copy)]
pub struct SubscribeEntry<'a> {
    pub topic_filter: &'a str,
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: u8,
}

impl<'a> SubscribeEntry<'a> {
    pub fn new(topic_filter: &'a str, qos: QoS) -> Self {
        Self {
            topic_filter,
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: 0,
        }
    }

    fn options_byte(&self) -> u8 {
        (self.retain_handling << 4)
            | ((self.retain_as_published as u8) << 3)
            | ((self.no_local as u8) << 2)
            | (self.qos as u8)
    }
}

#[derive(Debug, Clone)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub entries: Vec<SubscribeEntry<'a>, MAX_SUBSCRIBE_ENTRIES>,
    pub properties: PropList<'a>,
}

impl<'a> PacketBuilder for Subscribe<'a> {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }
    fn flags(&self) -> u8 {
        0b0010
    }

    fn body_len(&self) -> usize {
        let mut len = 2 + property::encoded_len(&self.properties);
        for e in &self.entries {
            len += 2 + e.topic_filter.len() + 1;
        }
        len
    }

    fn write_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        codec::write_u16(cursor, buf, self.packet_id)?;
        property::encode_properties(cursor, buf, &self.properties)?;
        for e in &self.entries {
            codec::write_utf8_string(cursor, buf, e.topic_filter)?;
            codec::write_byte(cursor, buf, e.options_byte())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SubAck<'a> {
    pub packet_id: u16,
    pub reason_codes: Vec<ReasonCode, MAX_SUBSCRIBE_ENTRIES>,
    pub properties: PropList<'a>,
}

impl<'a> SubAck<'a> {
    fn decode(body: &'a [u8]) -> CodecResult<Self> {
        let mut cursor = 0;
        let packet_id = codec::read_u16(&mut cursor, body)?;
        let properties = property::decode_properties(&mut cursor, body, ACK_PROPS)?;
        let mut reason_codes = Vec::new();
        while cursor < body.len() {
            reason_codes
                .push(ReasonCode::from(codec::read_byte(&mut cursor, body)?))
                .map_err(|_| MqttError::Protocol(ProtocolError::MalformedPacket))?;
        }
        Ok(Self {
            packet_id,
            reason_codes,
            properties,
        })
    }
}

// --- UNSUBSCRIBE / UNSUBACK ---

#[derive(Debug, Clone)]
pub struct Unsubscribe<'a> {
    pub packet_id: u16,
    pub topic_filters: Vec<&'a str, MAX_SUBSCRIBE_ENTRIES>,
    pub properties: PropList<'a>,
}

impl<'a> PacketBuilder for Unsubscribe<'a> {
    fn packet_type(&self) -> PacketType {
        PacketType::Unsubscribe
    }
    fn flags(&self) -> u8 {
        0b0010
    }

    fn body_len(&self) -> usize {
        let mut len = 2 + property::encoded_len(&self.properties);
        for f in &self.topic_filters {
            len += 2 + f.len();
        }
        len
    }

    fn write_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        codec::write_u16(cursor, buf, self.packet_id)?;
        property::encode_properties(cursor, buf, &self.properties)?;
        for f in &self.topic_filters {
            codec::write_utf8_string(cursor, buf, f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UnsubAck<'a> {
    pub packet_id: u16,
    pub reason_codes: Vec<ReasonCode, MAX_SUBSCRIBE_ENTRIES>,
    pub properties: PropList<'a>,
}

impl<'a> UnsubAck<'a> {
    fn decode(body: &'a [u8]) -> CodecResult<Self> {
        let mut cursor = 0;
        let packet_id = codec::read_u16(&mut cursor, body)?;
        let properties = property::decode_properties(&mut cursor, body, ACK_PROPS)?;
        let mut reason_codes = Vec::new();
        while cursor < body.len() {
            reason_codes
                .push(ReasonCode::from(codec::read_byte(&mut cursor, body)?))
                .map_err(|_| MqttError::Protocol(ProtocolError::MalformedPacket))?;
        }
        Ok(Self {
            packet_id,
            reason_codes,
            properties,
        })
    }
}

// --- PINGREQ ---

pub struct PingReq;

impl PacketBuilder for PingReq {
    fn packet_type(&self) -> PacketType {
        PacketType::PingReq
    }
    fn flags(&self) -> u8 {
        0
    }
    fn body_len(&self) -> usize {
        0
    }
    fn write_body(&self, _cursor: &mut usize, _buf: &mut [u8]) -> CodecResult<()> {
        Ok(())
    }
}

// --- DISCONNECT ---

#[derive(Debug, Clone)]
pub struct Disconnect<'a> {
    pub reason_code: ReasonCode,
    pub properties: PropList<'a>,
}

impl<'a> Disconnect<'a> {
    pub fn new(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: empty_props(),
        }
    }

    fn decode(body: &'a [u8]) -> CodecResult<Self> {
        if body.is_empty() {
            return Ok(Self::new(ReasonCode::SUCCESS));
        }
        let mut cursor = 0;
        let reason_code = ReasonCode::from(codec::read_byte(&mut cursor, body)?);
        let properties = if cursor == body.len() {
            empty_props()
        } else {
            property::decode_properties(&mut cursor, body, DISCONNECT_PROPS)?
        };
        Ok(Self {
            reason_code,
            properties,
        })
    }
}

impl<'a> PacketBuilder for Disconnect<'a> {
    fn packet_type(&self) -> PacketType {
        PacketType::Disconnect
    }
    fn flags(&self) -> u8 {
        0
    }

    fn body_len(&self) -> usize {
        if self.reason_code == ReasonCode::SUCCESS && self.properties.is_empty() {
            0
        } else {
            1 + property::encoded_len(&self.properties)
        }
    }

    fn write_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        if self.reason_code == ReasonCode::SUCCESS && self.properties.is_empty() {
            return Ok(());
        }
        codec::write_byte(cursor, buf, self.reason_code.0)?;
        property::encode_properties(cursor, buf, &self.properties)
    }
}

// --- Parser dispatch (C5) ---

/// Every inbound packet type this engine decodes (spec §4.5's list: CONNACK,
/// PUBLISH, PUBACK, PUBREC, PUBREL, PUBCOMP, SUBACK, UNSUBACK, DISCONNECT,
/// PINGRESP).
#[derive(Debug)]
pub enum InboundPacket<'a> {
    ConnAck(ConnAckInfo<'a>),
    Publish(Publish<'a>),
    PubAck(AckReason<'a>),
    PubRec(AckReason<'a>),
    PubRel(AckReason<'a>),
    PubComp(AckReason<'a>),
    SubAck(SubAck<'a>),
    UnsubAck(UnsubAck<'a>),
    Disconnect(Disconnect<'a>),
    PingResp,
}

/// Reads the fixed header, validates total length, rejects packet types not
/// in `expected`, and dispatches to the matching per-type decoder (spec §4.5,
/// C5).
pub fn decode_packet<'a>(buf: &'a [u8], expected: TypeMask) -> CodecResult<InboundPacket<'a>> {
    if buf.is_empty() {
        return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
    }
    let first = buf[0];
    let ptype_nibble = first >> 4;
    let flags = first & 0x0F;
    let ptype = PacketType::from_u8(ptype_nibble)
        .ok_or(MqttError::Protocol(ProtocolError::InvalidPacketType(ptype_nibble)))?;

    let mut cursor = 1;
    let remaining_len = codec::read_varint(&mut cursor, buf)? as usize;
    if cursor + remaining_len != buf.len() {
        return Err(MqttError::Protocol(ProtocolError::InvalidPacketSize));
    }
    if !expected.contains(ptype) {
        return Err(MqttError::Protocol(ProtocolError::UnexpectedPacketType));
    }
    let body = &buf[cursor..];

    Ok(match ptype {
        PacketType::ConnAck => InboundPacket::ConnAck(ConnAckInfo::decode(body)?),
        PacketType::Publish => InboundPacket::Publish(Publish::decode(body, flags)?),
        PacketType::PubAck => InboundPacket::PubAck(AckReason::decode(body)?),
        PacketType::PubRec => InboundPacket::PubRec(AckReason::decode(body)?),
        PacketType::PubRel => InboundPacket::PubRel(AckReason::decode(body)?),
        PacketType::PubComp => InboundPacket::PubComp(AckReason::decode(body)?),
        PacketType::SubAck => InboundPacket::SubAck(SubAck::decode(body)?),
        PacketType::UnsubAck => InboundPacket::UnsubAck(UnsubAck::decode(body)?),
        PacketType::Disconnect => InboundPacket::Disconnect(Disconnect::decode(body)?),
        PacketType::PingResp => InboundPacket::PingResp,
        _ => {
            return Err(MqttError::Protocol(ProtocolError::InvalidPacketType(
                ptype_nibble,
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! assert_protocol_err {
        ($result:expr, $variant:pat) => {
            match $result {
                Err(MqttError::Protocol($variant)) => {}
                other => panic!("expected protocol error, got {:?}", other),
            }
        };
    }

    #[test]
    fn qos0_publish_matches_s1_bytes() {
        let publish = Publish::new("a/b", b"hi", QoS::AtMostOnce, false);
        let mut buf = [0u8; 32];
        let n = build(&publish, &mut buf).unwrap();
        // fixed header (type=3, flags=0) + remaining_length=8: 2+3 topic, 1 empty-properties, 2 payload
        assert_eq!(
            &buf[..n],
            &[0x30, 0x08, 0x00, 0x03, b'a', b'/', b'b', 0x00, b'h', b'i']
        );
    }

    #[test]
    fn qos1_publish_matches_s2_bytes() {
        let mut publish = Publish::new("a/b", b"hi", QoS::AtLeastOnce, false);
        publish.packet_id = Some(1);
        let mut buf = [0u8; 32];
        let n = build(&publish, &mut buf).unwrap();
        assert_eq!(
            &buf[..n],
            &[0x32, 0x0A, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x01, 0x00, b'h', b'i']
        );
    }

    #[test]
    fn puback_short_form_omits_reason_and_properties() {
        let ack = PubAck(AckReason::success(1));
        let mut buf = [0u8; 8];
        let n = build(&ack, &mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x40, 0x02, 0x00, 0x01]);
    }

    #[test]
    fn decode_puback_short_form() {
        let bytes = [0x00u8, 0x01];
        let decoded = AckReason::decode(&bytes).unwrap();
        assert_eq!(decoded.packet_id, 1);
        assert_eq!(decoded.reason_code, ReasonCode::SUCCESS);
        assert!(decoded.properties.is_empty());
    }

    #[test]
    fn pubrel_flags_are_reserved_bit() {
        let rel = PubRel(AckReason::success(1));
        let mut buf = [0u8; 8];
        let n = build(&rel, &mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x62, 0x02, 0x00, 0x01]);
    }

    #[test]
    fn subscribe_reserved_flags_nibble() {
        let mut entries = Vec::new();
        entries.push(SubscribeEntry::new("sensors/+", QoS::AtLeastOnce)).unwrap();
        let sub = Subscribe {
            packet_id: 1,
            entries,
            properties: empty_props(),
        };
        let mut buf = [0u8; 32];
        let n = build(&sub, &mut buf).unwrap();
        assert_eq!(buf[0] & 0x0F, 0b0010);
        assert_eq!(
            &buf[..n],
            &[
                0x82, 0x0F, 0x00, 0x01, 0x00, 0x00, 0x09, b's', b'e', b'n', b's', b'o', b'r', b's',
                b'/', b'+', 0x01
            ]
        );
    }

    #[test]
    fn decode_suback_grants_and_reason_codes() {
        let bytes = [0x00u8, 0x01, 0x00, 0x01];
        let suback = SubAck::decode(&bytes).unwrap();
        assert_eq!(suback.packet_id, 1);
        assert_eq!(suback.reason_codes.len(), 1);
        assert_eq!(suback.reason_codes[0], ReasonCode::GRANTED_QOS_1);
    }

    #[test]
    fn decode_publish_with_packet_id_and_payload() {
        let bytes = [
            0x00, 0x09, b's', b'e', b'n', b's', b'o', b'r', b's', b'/', b'x', 0x00, 0x2A, 0x00,
            b'2', b'3', b'.', b'5',
        ];
        let publish = Publish::decode(&bytes, 0x02).unwrap();
        assert_eq!(publish.topic, "sensors/x");
        assert_eq!(publish.packet_id, Some(0x002A));
        assert_eq!(publish.payload, b"23.5");
    }

    #[test]
    fn invalid_packet_size_is_rejected() {
        // Fixed header declares remaining length 20 but only 8 bytes follow
        // the header (spec S5).
        let buf = [0x30u8, 20, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut mask = TypeMask::empty();
        mask.insert(PacketType::Publish);
        assert_protocol_err!(decode_packet(&buf, mask), ProtocolError::InvalidPacketSize);
    }

    #[test]
    fn surrogate_topic_is_rejected_as_invalid_encoding() {
        // PUBLISH topic byte sequence ED A0 80 is a surrogate (spec S6).
        let buf = [0x30u8, 0x06, 0x00, 0x03, 0xED, 0xA0, 0x80, 0x00];
        let mut mask = TypeMask::empty();
        mask.insert(PacketType::Publish);
        assert_protocol_err!(decode_packet(&buf, mask), ProtocolError::InvalidEncoding);
    }

    #[test]
    fn unexpected_packet_type_is_rejected() {
        let bytes = [0xD0u8, 0x00]; // PINGRESP
        let mask = TypeMask::empty(); // PINGRESP not expected
        assert_protocol_err!(decode_packet(&bytes, mask), ProtocolError::UnexpectedPacketType);
    }
}
