//! # Property Codec (C3)
//!
//! MQTT 5.0 property lists: a `varint(total_bytes)` length prefix followed by
//! a packed sequence of `(1-byte id, typed value)` pairs. The distilled spec
//! calls out that the reference implementation re-implements this decode
//! loop once per packet type (~10 times) and names that as "the single
//! largest source of accidental complexity" (spec §9). This module collapses
//! it to one generic decode/encode pair, parameterised per call site by the
//! *allowed-id list* for that packet context (the "decoder record" spec §9
//! asks for) — CONNACK, PUBLISH, SUBSCRIBE etc. each pass their own slice of
//! [`PropertyId`] and get `UnknownIdentifier` for anything outside it.

use crate::codec;
use crate::error::{MqttError, ProtocolError};
use crate::transport;
use heapless::Vec;

type CodecResult<T> = Result<T, MqttError<transport::ErrorPlaceHolder>>;

/// Upper bound on the number of properties a single packet carries in this
/// engine. User Property may repeat, so this must cover CONNECT/PUBLISH's
/// worst case of a handful of fixed properties plus several user pairs.
pub const MAX_PROPERTIES: usize = 16;

/// Property identifiers recognised by this engine (spec §6.1's subset of the
/// MQTT 5.0 registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PropertyId {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,
}

/// The wire representation each property id is encoded/decoded as (spec §6.1
/// "Type" column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireType {
    Byte,
    U16,
    U32,
    VarInt,
    Utf8String,
    Binary,
    StringPair,
}

impl PropertyId {
    fn wire_type(self) -> WireType {
        use PropertyId::*;
        match self {
            PayloadFormatIndicator | RequestProblemInformation | RequestResponseInformation
            | MaximumQoS | RetainAvailable | WildcardSubscriptionAvailable
            | SubscriptionIdentifierAvailable | SharedSubscriptionAvailable => WireType::Byte,
            ServerKeepAlive | ReceiveMaximum | TopicAliasMaximum | TopicAlias => WireType::U16,
            MessageExpiryInterval | SessionExpiryInterval | WillDelayInterval
            | MaximumPacketSize => WireType::U32,
            SubscriptionIdentifier => WireType::VarInt,
            ContentType | ResponseTopic | AssignedClientIdentifier | AuthenticationMethod
            | ResponseInformation | ServerReference | ReasonString => WireType::Utf8String,
            CorrelationData | AuthenticationData => WireType::Binary,
            UserProperty => WireType::StringPair,
        }
    }

    fn from_u8(id: u8) -> Option<PropertyId> {
        use PropertyId::*;
        Some(match id {
            0x01 => PayloadFormatIndicator,
            0x02 => MessageExpiryInterval,
            0x03 => ContentType,
            0x08 => ResponseTopic,
            0x09 => CorrelationData,
            0x0B => SubscriptionIdentifier,
            0x11 => SessionExpiryInterval,
            0x12 => AssignedClientIdentifier,
            0x13 => ServerKeepAlive,
            0x15 => AuthenticationMethod,
            0x16 => AuthenticationData,
            0x17 => RequestProblemInformation,
            0x18 => WillDelayInterval,
            0x19 => RequestResponseInformation,
            0x1A => ResponseInformation,
            0x1C => ServerReference,
            0x1F => ReasonString,
            0x21 => ReceiveMaximum,
            0x22 => TopicAliasMaximum,
            0x23 => TopicAlias,
            0x24 => MaximumQoS,
            0x25 => RetainAvailable,
            0x26 => UserProperty,
            0x27 => MaximumPacketSize,
            0x28 => WildcardSubscriptionAvailable,
            0x29 => SubscriptionIdentifierAvailable,
            0x2A => SharedSubscriptionAvailable,
            _ => return None,
        })
    }
}

/// A decoded or to-be-encoded property value, borrowing string/binary data
/// from whichever buffer owns it (the receive buffer on decode, a caller's
/// buffer on encode).
#[derive(Debug, Clone, Copy)]
pub enum PropertyValue<'a> {
    Byte(u8),
    U16(u16),
    U32(u32),
    VarInt(u32),
    Utf8String(&'a str),
    Binary(&'a [u8]),
    StringPair(&'a str, &'a str),
}

#[derive(Debug, Clone, Copy)]
pub struct Property<'a> {
    pub id: PropertyId,
    pub value: PropertyValue<'a>,
}

fn encoded_value_len(value: &PropertyValue<'_>) -> usize {
    match value {
        PropertyValue::Byte(_) => 1,
        PropertyValue::U16(_) => 2,
        PropertyValue::U32(_) => 4,
        PropertyValue::VarInt(v) => codec::varint_len(*v),
        PropertyValue::Utf8String(s) => 2 + s.len(),
        PropertyValue::Binary(b) => 2 + b.len(),
        PropertyValue::StringPair(k, v) => 2 + k.len() + 2 + v.len(),
    }
}

/// Total encoded size of a property list, *including* its own varint length
/// prefix. Used by packet builders' first pass (C4) to size the buffer.
pub fn encoded_len(properties: &[Property<'_>]) -> usize {
    let body: usize = properties
        .iter()
        .map(|p| 1 + encoded_value_len(&p.value))
        .sum();
    codec::varint_len(body as u32) + body
}

/// Writes `varint(body_len)` followed by each `(id, value)` pair, in list
/// order (MQTT allows any order except among User Property repeats, whose
/// relative order this preserves because the caller's list order is kept).
pub fn encode_properties(
    cursor: &mut usize,
    buf: &mut [u8],
    properties: &[Property<'_>],
) -> CodecResult<()> {
    let body: usize = properties
        .iter()
        .map(|p| 1 + encoded_value_len(&p.value))
        .sum();
    codec::write_varint(cursor, buf, body as u32)?;
    for p in properties {
        codec::write_byte(cursor, buf, p.id as u8)?;
        match p.value {
            PropertyValue::Byte(v) => codec::write_byte(cursor, buf, v)?,
            PropertyValue::U16(v) => codec::write_u16(cursor, buf, v)?,
            PropertyValue::U32(v) => codec::write_u32(cursor, buf, v)?,
            PropertyValue::VarInt(v) => codec::write_varint(cursor, buf, v)?,
            PropertyValue::Utf8String(s) => codec::write_utf8_string(cursor, buf, s)?,
            PropertyValue::Binary(b) => codec::write_binary(cursor, buf, b)?,
            PropertyValue::StringPair(k, v) => {
                codec::write_utf8_string(cursor, buf, k)?;
                codec::write_utf8_string(cursor, buf, v)?;
            }
        }
    }
    Ok(())
}

fn decode_value<'a>(wire_type: WireType, cursor: &mut usize, buf: &'a [u8]) -> CodecResult<PropertyValue<'a>> {
    Ok(match wire_type {
        WireType::Byte => PropertyValue::Byte(codec::read_byte(cursor, buf)?),
        WireType::U16 => PropertyValue::U16(codec::read_u16(cursor, buf)?),
        WireType::U32 => PropertyValue::U32(codec::read_u32(cursor, buf)?),
        WireType::VarInt => PropertyValue::VarInt(codec::read_varint(cursor, buf)?),
        WireType::Utf8String => PropertyValue::Utf8String(codec::read_utf8_string(cursor, buf)?),
        WireType::Binary => PropertyValue::Binary(codec::read_binary(cursor, buf)?),
        WireType::StringPair => {
            let k = codec::read_utf8_string(cursor, buf)?;
            let v = codec::read_utf8_string(cursor, buf)?;
            PropertyValue::StringPair(k, v)
        }
    })
}

/// Reads a property list: `varint(len)` then repeated `(id, value)` pairs
/// until `len` bytes are consumed. `allowed` is the accepted-id list for the
/// calling packet's context (spec §4.3's "Recognised identifiers per packet
/// context", listed per-packet in spec §6.1); an id outside that list, known
/// or not, yields `UnknownIdentifier`. A remaining-length underflow (a
/// property whose decode would read past `len`) yields `MalformedPacket`.
///
/// This single function is called from every packet decoder (CONNECT,
/// CONNACK, PUBLISH, PUBACK/PUBREC/PUBREL/PUBCOMP, SUBSCRIBE/SUBACK,
/// UNSUBSCRIBE/UNSUBACK, DISCONNECT) instead of each re-implementing the
/// loop, per spec §9's design note.
pub fn decode_properties<'a>(
    cursor: &mut usize,
    buf: &'a [u8],
    allowed: &[PropertyId],
) -> CodecResult<Vec<Property<'a>, MAX_PROPERTIES>> {
    let len = codec::read_varint(cursor, buf)? as usize;
    let end = *cursor + len;
    if end > buf.len() {
        return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
    }
    let mut out = Vec::new();
    while *cursor < end {
        let raw_id = codec::read_byte(cursor, buf)?;
        let id = PropertyId::from_u8(raw_id)
            .ok_or(MqttError::Protocol(ProtocolError::UnknownIdentifier))?;
        if !allowed.contains(&id) {
            return Err(MqttError::Protocol(ProtocolError::UnknownIdentifier));
        }
        let value = decode_value(id.wire_type(), cursor, buf)?;
        if *cursor > end {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }
        out.push(Property { id, value })
            .map_err(|_| MqttError::Protocol(ProtocolError::MalformedPacket))?;
    }
    if *cursor != end {
        return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
    }
    Ok(out)
}

/// Looks up the first property of the given id, if present.
pub fn find<'a, 'b>(
    properties: &'b [Property<'a>],
    id: PropertyId,
) -> Option<&'b PropertyValue<'a>> {
    properties.iter().find(|p| p.id == id).map(|p| &p.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_property_list() {
        let props: Vec<Property, 4> = Vec::from_slice(&[
            Property {
                id: PropertyId::PayloadFormatIndicator,
                value: PropertyValue::Byte(1),
            },
            Property {
                id: PropertyId::MessageExpiryInterval,
                value: PropertyValue::U32(3600),
            },
            Property {
                id: PropertyId::ContentType,
                value: PropertyValue::Utf8String("text/plain"),
            },
            Property {
                id: PropertyId::UserProperty,
                value: PropertyValue::StringPair("k", "v"),
            },
        ])
        .unwrap();

        let mut buf = [0u8; 64];
        let mut w = 0;
        encode_properties(&mut w, &mut buf, &props).unwrap();
        assert_eq!(w, encoded_len(&props));

        let allowed = [
            PropertyId::PayloadFormatIndicator,
            PropertyId::MessageExpiryInterval,
            PropertyId::ContentType,
            PropertyId::UserProperty,
        ];
        let mut r = 0;
        let decoded = decode_properties(&mut r, &buf, &allowed).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(r, w);
    }

    #[test]
    fn empty_property_list_is_one_byte() {
        let props: Vec<Property, 1> = Vec::new();
        let mut buf = [0u8; 4];
        let mut w = 0;
        encode_properties(&mut w, &mut buf, &props).unwrap();
        assert_eq!(w, 1);
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn disallowed_id_in_context_is_unknown_identifier() {
        let props: Vec<Property, 1> = Vec::from_slice(&[Property {
            id: PropertyId::TopicAlias,
            value: PropertyValue::U16(4),
        }])
        .unwrap();
        let mut buf = [0u8; 16];
        let mut w = 0;
        encode_properties(&mut w, &mut buf, &props).unwrap();

        let allowed = [PropertyId::ContentType]; // TopicAlias not allowed here
        let mut r = 0;
        assert!(decode_properties(&mut r, &buf, &allowed).is_err());
    }

    #[test]
    fn unrecognised_raw_id_is_unknown_identifier() {
        let mut buf = [0u8; 4];
        buf[0] = 2; // property length = 2 bytes
        buf[1] = 0x7D; // not in the registry
        buf[2] = 0x00;
        let allowed = [PropertyId::PayloadFormatIndicator];
        let mut r = 0;
        assert!(decode_properties(&mut r, &buf, &allowed).is_err());
    }
}
