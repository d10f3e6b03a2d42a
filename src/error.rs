//! # Error Types
//!
//! This module defines the error types used throughout the MQTT engine,
//! covering wire-format violations, pending-table exhaustion, and transport
//! failures surfaced verbatim from the injected transport.

use crate::transport;

/// A placeholder error type used in generic contexts where the specific
/// transport error is not yet known. This is a common pattern for
/// implementing `encode`/`decode` methods that need to return a `Result`
/// compatible with the session's error type before a transport is attached.
#[derive(Debug)]
pub struct ErrorPlaceHolder;

impl transport::TransportError for ErrorPlaceHolder {
    // Marker implementation, no body needed.
}

/// The primary error enum for the MQTT engine.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying network transport (e.g. TCP, UART).
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// A protocol- or codec-level violation (spec §7's
    /// `MalformedPacket`/`InvalidEncoding`/`InvalidQoS`/... family).
    Protocol(ProtocolError),
    /// CONNACK reported a reason code >= 0x80 (spec §7 `ServerDeclined`).
    ServerDeclined(ReasonCode),
    /// The client is not currently connected to the broker.
    NotConnected,
    /// A CONNECT is in flight (the transport has accepted `open_conn` but has
    /// not yet signalled `connected()`, or the built CONNECT is still queued
    /// for send): retry once the connection completes (spec §4.7).
    Pending,
    /// The pending table has no free slot for a new in-flight packet id.
    OutOfResource,
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
    /// A caller passed an argument the engine cannot act on, e.g. qos > 2 or
    /// packet_id == 0 where a non-zero id is required.
    InvalidArgument,
}

/// Implements the `From` trait to allow for automatic conversion of any transport
/// error into an `MqttError`. This is what allows the `?` operator to work
/// seamlessly on `Result`s from the transport layer.
impl<T: transport::TransportError> From<T> for MqttError<T> {
    fn from(err: T) -> Self {
        MqttError::Transport(err)
    }
}

impl<T: transport::TransportError> MqttError<T> {
    /// A helper method to convert an `MqttError` with a placeholder transport error
    /// into an `MqttError` with a specific transport error type `T`.
    ///
    /// This is used to bridge the gap between generic packet encoding/decoding
    /// functions and the specific error type required by the session's `Result`.
    pub fn cast_transport_error<E: transport::TransportError>(
        other: MqttError<E>,
    ) -> MqttError<T> {
        match other {
            MqttError::Protocol(p) => MqttError::Protocol(p),
            MqttError::ServerDeclined(r) => MqttError::ServerDeclined(r),
            MqttError::NotConnected => MqttError::NotConnected,
            MqttError::Pending => MqttError::Pending,
            MqttError::OutOfResource => MqttError::OutOfResource,
            MqttError::BufferTooSmall => MqttError::BufferTooSmall,
            MqttError::InvalidArgument => MqttError::InvalidArgument,
            // Codec logic never produces a transport error directly.
            MqttError::Transport(_) => panic!("cannot cast a transport error"),
        }
    }
}

/// Fine-grained codec / protocol-rule violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// The fixed header named a packet type the codec does not recognise.
    InvalidPacketType(u8),
    /// A packet was not correctly formed (bad varint, truncated field, ...).
    MalformedPacket,
    /// The declared remaining length did not match the bytes actually present.
    InvalidPacketSize,
    /// A string field was not valid UTF-8 under the RFC 3629 profile.
    InvalidEncoding,
    /// A property id was not recognised in its packet context.
    UnknownIdentifier,
    /// A packet arrived that is not currently expected, or its packet_id did
    /// not match a pending table entry.
    UnexpectedPacketType,
    /// packet_id was zero where a non-zero identifier is required.
    InvalidPacketId,
    /// A requested QoS value is not one of {0, 1, 2}.
    InvalidQoS,
    /// A requested QoS exceeds the server's advertised Maximum QoS.
    QoSNotSupported,
    /// `retain` was requested but the server advertised Retain Available = 0.
    RetainNotSupported,
    /// A topic filter/name failed the engine's validity rules (e.g. a
    /// wildcard in a PUBLISH topic name).
    InvalidTopic,
    /// The server does not advertise support for a requested feature
    /// (wildcard subscriptions, shared subscriptions, subscription
    /// identifiers, ...).
    Unsupported,
    /// The payload of a message exceeds the maximum allowable size.
    PayloadTooLarge,
}

/// MQTT 5.0 reason code, shared by CONNACK and the ACK-family packets.
///
/// Values below 0x80 are successful outcomes; 0x80 and above are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReasonCode(pub u8);

impl ReasonCode {
    pub const SUCCESS: ReasonCode = ReasonCode(0x00);
    pub const GRANTED_QOS_1: ReasonCode = ReasonCode(0x01);
    pub const GRANTED_QOS_2: ReasonCode = ReasonCode(0x02);
    pub const DISCONNECT_WITH_WILL_MESSAGE: ReasonCode = ReasonCode(0x04);
    pub const NO_MATCHING_SUBSCRIBERS: ReasonCode = ReasonCode(0x10);
    pub const NO_SUBSCRIPTION_EXISTED: ReasonCode = ReasonCode(0x11);
    pub const UNSPECIFIED_ERROR: ReasonCode = ReasonCode(0x80);
    pub const MALFORMED_PACKET: ReasonCode = ReasonCode(0x81);
    pub const PROTOCOL_ERROR: ReasonCode = ReasonCode(0x82);
    pub const NOT_AUTHORIZED: ReasonCode = ReasonCode(0x87);
    pub const SERVER_UNAVAILABLE: ReasonCode = ReasonCode(0x88);
    pub const BAD_USER_NAME_OR_PASSWORD: ReasonCode = ReasonCode(0x8C);
    pub const TOPIC_NAME_INVALID: ReasonCode = ReasonCode(0x90);
    pub const PACKET_IDENTIFIER_IN_USE: ReasonCode = ReasonCode(0x91);
    pub const PACKET_IDENTIFIER_NOT_FOUND: ReasonCode = ReasonCode(0x92);
    pub const QUOTA_EXCEEDED: ReasonCode = ReasonCode(0x97);
    pub const PAYLOAD_FORMAT_INVALID: ReasonCode = ReasonCode(0x99);
    pub const RETAIN_NOT_SUPPORTED: ReasonCode = ReasonCode(0x9A);
    pub const QOS_NOT_SUPPORTED: ReasonCode = ReasonCode(0x9B);
    pub const SUBSCRIPTION_IDENTIFIERS_NOT_SUPPORTED: ReasonCode = ReasonCode(0xA1);
    pub const WILDCARD_SUBSCRIPTIONS_NOT_SUPPORTED: ReasonCode = ReasonCode(0xA2);
    pub const SHARED_SUBSCRIPTIONS_NOT_SUPPORTED: ReasonCode = ReasonCode(0x9E);

    /// True for reason codes >= 0x80 ("If reason >= 0x80, yields ServerDeclined").
    pub const fn is_error(self) -> bool {
        self.0 >= 0x80
    }
}

impl From<u8> for ReasonCode {
    fn from(val: u8) -> Self {
        ReasonCode(val)
    }
}
