//! # Session State Machine (C7)
//!
//! The session is the aggregate described in spec §3: connection status,
//! the `expected_ptypes` mask, the pending table, the packet_id counter, and
//! the server limits captured off CONNACK. Spec §9 names the actual state
//! machine precisely: "the pending table + expected-packet-type bitmask is
//! the whole session state machine" — there is no separate explicit FSM type
//! here because [`PendingTable`] and [`TypeMask`] already are one.
//!
//! Outbound operations ([`Session::publish`], [`Session::subscribe`], ...)
//! run the two-pass build from [`crate::packet`] against a buffer the
//! transport hands out. [`Session::process_packet`] is the inbound entry
//! point (spec §9 OQ-5): a push-model transport calls it directly with
//! whatever bytes it received; [`Session::poll`] additionally drives a
//! polling-model transport's optional `recv`.

use crate::error::{MqttError, ProtocolError, ReasonCode};
use crate::packet::{self, PacketBuilder, QoS};
use crate::packet_type::{PacketType, TypeMask};
use crate::pending::PendingTable;
use crate::property::{self, Property, PropertyId, PropertyValue, MAX_PROPERTIES};
use crate::transport::{self, MqttTransport, RecvOutcome};
use heapless::{String, Vec};

/// Capacity of owned string fields this engine keeps around after a packet's
/// receive buffer has gone out of scope (client id, assigned client id,
/// server reference, ...). Not a spec-named constant, just this crate's
/// heapless sizing choice.
pub const MAX_CLIENT_ID_LEN: usize = 32;
pub const MAX_STRING_LEN: usize = 64;
pub const MAX_TOPIC_LEN: usize = 64;
pub const MAX_CONTENT_TYPE_LEN: usize = 32;
pub const MAX_WILL_PAYLOAD_LEN: usize = 128;

/// Scratch capacity for the CONNECT packet the session keeps around across a
/// deferred-connect window (spec §4.7: the transport may report `open_conn`
/// success before `connected()` flips true; the engine must hold the built
/// CONNECT until then rather than rebuild it).
pub const MAX_CONNECT_PACKET_LEN: usize = 512;

/// Stack buffer size for `poll`'s internal copy of an inbound packet, bounding
/// the largest packet this engine can process via the polling `recv` path.
/// Spec §6.3 does not name a maximum inbound packet size for a polling
/// transport; pushed via `process_packet` directly, a caller may hand in a
/// packet of any size it already owns.
pub const MAX_RECV_PACKET_LEN: usize = 1024;

type PropList<'a> = Vec<Property<'a>, MAX_PROPERTIES>;

/// Lifecycle state (spec §4.7). `Connecting` covers both "CONNECT sent,
/// awaiting CONNACK" and "open_conn accepted, CONNECT not yet sent because
/// the transport hasn't signalled `connected()` yet" — [`Session::deferred_connect`]
/// distinguishes the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Will-specific MQTT 5.0 properties (spec §6.1 "Will" column): a small
/// named subset rather than a raw `Property` list, the same flattening
/// [`SessionConfig`] already applies to CONNECT-level properties
/// (`session_expiry_interval`, `receive_maximum`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WillProperties<'a> {
    pub will_delay_interval: Option<u32>,
    pub payload_format_indicator: Option<bool>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<&'a str>,
    pub response_topic: Option<&'a str>,
    pub correlation_data: Option<&'a [u8]>,
}

/// Server-advertised Will configuration for CONNECT (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct WillConfig<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
    pub properties: WillProperties<'a>,
}

struct StoredWill {
    topic: String<MAX_TOPIC_LEN>,
    payload: Vec<u8, MAX_WILL_PAYLOAD_LEN>,
    qos: QoS,
    retain: bool,
    will_delay_interval: Option<u32>,
    payload_format_indicator: Option<bool>,
    message_expiry_interval: Option<u32>,
    content_type: Option<String<MAX_CONTENT_TYPE_LEN>>,
    response_topic: Option<String<MAX_TOPIC_LEN>>,
    correlation_data: Option<Vec<u8, MAX_WILL_PAYLOAD_LEN>>,
}

/// Construction-time session configuration (SPEC_FULL §12 `ClientOptions`).
/// Borrowed: only consumed by [`Session::new`], which copies what it needs
/// into owned, fixed-capacity fields so the session has no outstanding
/// borrow on the caller's strings.
pub struct SessionConfig<'a> {
    pub client_id: &'a str,
    pub keep_alive: u16,
    pub clean_start: bool,
    pub user_name: Option<&'a str>,
    pub password: Option<&'a [u8]>,
    pub will: Option<WillConfig<'a>>,
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
}

impl<'a> SessionConfig<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_start: true,
            user_name: None,
            password: None,
            will: None,
            session_expiry_interval: None,
            receive_maximum: None,
        }
    }
}

/// Server limits captured off CONNACK (spec §3 `connack_info`), each
/// defaulted to its MQTT 5.0 specified value until the server overrides it.
/// `server_keep_alive` defaults to the client's own proposed keep-alive
/// rather than `Option::None` (spec §4.7: "`server_keep_alive` ... defaulting
/// to the client's proposed keep_alive" when the server omits the property).
#[derive(Debug, Clone)]
pub struct ConnAckSummary {
    pub session_present: bool,
    pub session_expiry_interval: u32,
    pub max_qos: QoS,
    pub retain_available: bool,
    pub wildcard_subscription_available: bool,
    pub shared_subscription_available: bool,
    pub subscription_identifiers_available: bool,
    pub server_keep_alive: u16,
    pub receive_maximum: u16,
    pub max_packet_size: Option<u32>,
    pub topic_alias_maximum: u16,
    pub assigned_client_id: Option<String<MAX_CLIENT_ID_LEN>>,
    pub server_reference: Option<String<MAX_STRING_LEN>>,
}

impl Default for ConnAckSummary {
    fn default() -> Self {
        Self {
            session_present: false,
            session_expiry_interval: 0,
            max_qos: QoS::ExactlyOnce,
            retain_available: true,
            wildcard_subscription_available: true,
            shared_subscription_available: true,
            subscription_identifiers_available: true,
            server_keep_alive: 0,
            receive_maximum: 65535,
            max_packet_size: None,
            topic_alias_maximum: 0,
            assigned_client_id: None,
            server_reference: None,
        }
    }
}

/// A message to publish (spec §4.4 PUBLISH). `packet_id` is filled in by
/// [`Session::publish`] for qos > 0 and should be left `None` by the caller.
#[derive(Debug, Clone, Copy)]
pub struct PublishMessage<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<u16>,
    pub response_topic: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub correlation_data: Option<&'a [u8]>,
}

impl<'a> PublishMessage<'a> {
    pub fn new(topic: &'a str, payload: &'a [u8], qos: QoS) -> Self {
        Self {
            topic,
            payload,
            qos,
            retain: false,
            dup: false,
            packet_id: None,
            response_topic: None,
            content_type: None,
            correlation_data: None,
        }
    }
}

/// A received PUBLISH (spec §3), owning the string fields and borrowing
/// `payload`/`correlation_data` from the buffer `process_packet` was called
/// with. Correlation data wider than [`crate::CORRELATION_DATA_MAXIMUM`] is
/// dropped, not truncated (spec §6.3): a truncated correlation id would be
/// silently wrong rather than simply absent.
#[derive(Debug)]
pub struct ReceivedPublish<'a> {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<u16>,
    pub response_topic: Option<String<MAX_TOPIC_LEN>>,
    pub content_type: Option<String<MAX_CONTENT_TYPE_LEN>>,
    pub correlation_data: Option<&'a [u8]>,
    pub subscription_identifier: Option<u32>,
}

/// One entry of a SUBSCRIBE request (spec §4.4).
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
}

/// Notification sink: one no-op-by-default method per event the session can
/// report (spec §9: "a single trait/interface with one method per
/// notification, with a no-op default" in place of the reference
/// implementation's weak function pointers).
pub trait NotificationSink {
    fn connected(&mut self, _info: &ConnAckSummary) {}
    fn publish_acknowledged(&mut self, _packet_id: u16, _reason_code: ReasonCode) {}
    fn publish_completed(&mut self, _packet_id: u16, _reason_code: ReasonCode) {}
    fn subscription_granted(&mut self, _packet_id: u16, _index: usize, _qos: QoS) {}
    fn subscription_declined(&mut self, _packet_id: u16, _index: usize, _reason_code: ReasonCode) {}
    fn unsubscribed(&mut self, _packet_id: u16, _index: usize, _reason_code: ReasonCode) {}
    fn message_received(&mut self, _publish: &ReceivedPublish<'_>) {}
    fn received_disconnect(&mut self, _reason_code: ReasonCode) {}
    fn ping_received(&mut self) {}
}

/// No-op sink, useful for callers that only care about [`Session::poll`]'s
/// side effects (acks, retransmits) and not the notifications themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;
impl NotificationSink for NullSink {}

/// The session engine (C7): one instance per connection, generic over the
/// injected transport (C8) and the caller's notification sink.
pub struct Session<T: MqttTransport, S: NotificationSink> {
    transport: T,
    sink: S,
    state: SessionState,
    expected: TypeMask,
    pending: PendingTable,
    next_packet_id: u16,
    deferred_connect: bool,
    connect_scratch: Vec<u8, MAX_CONNECT_PACKET_LEN>,

    client_id: String<MAX_CLIENT_ID_LEN>,
    keep_alive: u16,
    clean_start: bool,
    user_name: Option<String<MAX_STRING_LEN>>,
    password: Option<Vec<u8, MAX_STRING_LEN>>,
    will: Option<StoredWill>,
    session_expiry_interval: Option<u32>,
    receive_maximum: Option<u16>,

    info: ConnAckSummary,
}

impl<T: MqttTransport, S: NotificationSink> Session<T, S> {
    pub fn new(transport: T, sink: S, config: SessionConfig<'_>) -> Result<Self, MqttError<T::Error>> {
        let client_id: String<MAX_CLIENT_ID_LEN> =
            config.client_id.parse().map_err(|_| MqttError::BufferTooSmall)?;
        let user_name = config
            .user_name
            .map(|s| s.parse::<String<MAX_STRING_LEN>>())
            .transpose()
            .map_err(|_| MqttError::BufferTooSmall)?;
        let password = match config.password {
            Some(p) => Some(Vec::from_slice(p).map_err(|_| MqttError::BufferTooSmall)?),
            None => None,
        };
        let will = match config.will {
            Some(w) => Some(StoredWill {
                topic: w.topic.parse().map_err(|_| MqttError::BufferTooSmall)?,
                payload: Vec::from_slice(w.payload).map_err(|_| MqttError::BufferTooSmall)?,
                qos: w.qos,
                retain: w.retain,
                will_delay_interval: w.properties.will_delay_interval,
                payload_format_indicator: w.properties.payload_format_indicator,
                message_expiry_interval: w.properties.message_expiry_interval,
                content_type: w
                    .properties
                    .content_type
                    .map(|s| s.parse::<String<MAX_CONTENT_TYPE_LEN>>())
                    .transpose()
                    .map_err(|_| MqttError::BufferTooSmall)?,
                response_topic: w
                    .properties
                    .response_topic
                    .map(|s| s.parse::<String<MAX_TOPIC_LEN>>())
                    .transpose()
                    .map_err(|_| MqttError::BufferTooSmall)?,
                correlation_data: w
                    .properties
                    .correlation_data
                    .map(Vec::from_slice)
                    .transpose()
                    .map_err(|_| MqttError::BufferTooSmall)?,
            }),
            None => None,
        };

        let mut expected = TypeMask::empty();
        // spec §4.7's transition table never adds PINGRESP via any later
        // transition, so it must already be in the base mask: this engine
        // always accepts a PINGRESP in reply to its own periodic PINGREQ,
        // independent of the pending table (there is no per-ping pending
        // entry). Reading the table's initial-mask row literally as
        // `{PINGREQ}` would make every PINGRESP unparseable forever, so this
        // is treated as that row naming the wrong half of the ping exchange.
        expected.insert(PacketType::PingResp);

        Ok(Self {
            transport,
            sink,
            state: SessionState::Disconnected,
            expected,
            pending: PendingTable::new(),
            next_packet_id: 1,
            deferred_connect: false,
            connect_scratch: Vec::new(),
            client_id,
            keep_alive: config.keep_alive,
            clean_start: config.clean_start,
            user_name,
            password,
            will,
            session_expiry_interval: config.session_expiry_interval,
            receive_maximum: config.receive_maximum,
            info: ConnAckSummary::default(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connack_info(&self) -> &ConnAckSummary {
        &self.info
    }

    fn build_connect(&self) -> packet::Connect<'_> {
        let mut properties: PropList = Vec::new();
        if let Some(sei) = self.session_expiry_interval {
            let _ = properties.push(Property {
                id: PropertyId::SessionExpiryInterval,
                value: PropertyValue::U32(sei),
            });
        }
        if let Some(rm) = self.receive_maximum {
            let _ = properties.push(Property {
                id: PropertyId::ReceiveMaximum,
                value: PropertyValue::U16(rm),
            });
        }
        let mut connect = packet::Connect::new(&self.client_id, self.keep_alive, self.clean_start);
        connect.user_name = self.user_name.as_deref();
        connect.password = self.password.as_deref();
        connect.properties = properties;
        if let Some(w) = &self.will {
            let mut will_properties: PropList = Vec::new();
            if let Some(v) = w.will_delay_interval {
                let _ = will_properties.push(Property {
                    id: PropertyId::WillDelayInterval,
                    value: PropertyValue::U32(v),
                });
            }
            if let Some(v) = w.payload_format_indicator {
                let _ = will_properties.push(Property {
                    id: PropertyId::PayloadFormatIndicator,
                    value: PropertyValue::Byte(v as u8),
                });
            }
            if let Some(v) = w.message_expiry_interval {
                let _ = will_properties.push(Property {
                    id: PropertyId::MessageExpiryInterval,
                    value: PropertyValue::U32(v),
                });
            }
            if let Some(ct) = w.content_type.as_deref() {
                let _ = will_properties.push(Property {
                    id: PropertyId::ContentType,
                    value: PropertyValue::Utf8String(ct),
                });
            }
            if let Some(rt) = w.response_topic.as_deref() {
                let _ = will_properties.push(Property {
                    id: PropertyId::ResponseTopic,
                    value: PropertyValue::Utf8String(rt),
                });
            }
            if let Some(cd) = w.correlation_data.as_deref() {
                let _ = will_properties.push(Property {
                    id: PropertyId::CorrelationData,
                    value: PropertyValue::Binary(cd),
                });
            }
            connect.will = Some(packet::Will {
                qos: w.qos,
                retain: w.retain,
                topic: &w.topic,
                payload: &w.payload,
                properties: will_properties,
            });
        }
        connect
    }

    /// Opens the transport and sends (or schedules, if the transport hasn't
    /// signalled `connected()` yet) the CONNECT packet (spec §4.7).
    pub fn connect(&mut self, address: &str, port: u16) -> Result<(), MqttError<T::Error>> {
        self.transport
            .open_conn(address, port)
            .map_err(MqttError::Transport)?;

        let packet = self.build_connect();
        let mut scratch = [0u8; MAX_CONNECT_PACKET_LEN];
        let n = packet::build(&packet, &mut scratch).map_err(MqttError::<T::Error>::cast_transport_error)?;
        drop(packet);
        self.connect_scratch.clear();
        self.connect_scratch
            .extend_from_slice(&scratch[..n])
            .map_err(|_| MqttError::BufferTooSmall)?;

        self.expected.insert(PacketType::ConnAck);
        self.state = SessionState::Connecting;
        if self.transport.connected() {
            self.flush_connect()?;
        } else {
            self.deferred_connect = true;
        }
        Ok(())
    }

    fn flush_connect(&mut self) -> Result<(), MqttError<T::Error>> {
        let len = self.connect_scratch.len();
        let mut send_buf = self.transport.alloc_send_buf(len).map_err(MqttError::Transport)?;
        send_buf.data[..len].copy_from_slice(&self.connect_scratch[..len]);
        let result = self.transport.send(&send_buf, len);
        self.transport.free_send_buf(send_buf);
        self.deferred_connect = false;
        result.map_err(MqttError::Transport)
    }

    fn send_packet<P: PacketBuilder>(&mut self, packet: &P) -> Result<(), MqttError<T::Error>> {
        let total = packet::total_len(packet);
        let mut send_buf = self.transport.alloc_send_buf(total).map_err(MqttError::Transport)?;
        let n = match packet::build(packet, send_buf.data) {
            Ok(n) => n,
            Err(e) => {
                self.transport.free_send_buf(send_buf);
                return Err(MqttError::cast_transport_error(e));
            }
        };
        let result = self.transport.send(&send_buf, n);
        self.transport.free_send_buf(send_buf);
        result.map_err(MqttError::Transport)
    }

    /// Pre-flight check shared by every outbound operation that requires
    /// `Connected` (spec §4.7: "An attempt to send any other packet while
    /// Connecting yields `NotConnected` (or `Pending` if deferred)").
    fn require_connected(&self) -> Result<(), MqttError<T::Error>> {
        if self.state == SessionState::Connected {
            return Ok(());
        }
        if self.deferred_connect {
            Err(MqttError::Pending)
        } else {
            Err(MqttError::NotConnected)
        }
    }

    fn reset_for_disconnect(&mut self) {
        self.state = SessionState::Disconnected;
        self.deferred_connect = false;
        self.expected = TypeMask::empty();
        self.expected.insert(PacketType::PingResp);
        self.pending.clear();
    }

    /// Services the deferred-connect window and, if the transport supports
    /// polling `recv`, drains any inbound packets. Transports that only push
    /// bytes via [`Session::process_packet`] can ignore this and never call
    /// it; `poll` degrades to only servicing the deferred connect in that
    /// case, since `alloc_recv_buf`'s default returns an error.
    pub fn poll(&mut self) -> Result<(), MqttError<T::Error>> {
        if self.state == SessionState::Connecting && self.deferred_connect && self.transport.connected() {
            self.flush_connect()?;
        }

        // Size the request from the server's advertised max_packet_size
        // (spec §9 OQ-4), floored at MIN_RECV_BUFFER so a pre-CONNACK
        // `None` (or a server-advertised 0) never yields a zero-length
        // request, and capped at MAX_RECV_PACKET_LEN since that is all the
        // local copy buffer below can hold.
        let recv_request_len = match self.info.max_packet_size {
            Some(m) => (m as usize).clamp(crate::MIN_RECV_BUFFER, MAX_RECV_PACKET_LEN),
            None => MAX_RECV_PACKET_LEN,
        };

        loop {
            let mut recv_buf = match self.transport.alloc_recv_buf(recv_request_len) {
                Ok(b) => b,
                Err(_) => break,
            };
            let outcome = match self.transport.recv(&mut recv_buf) {
                Ok(o) => o,
                Err(e) => {
                    self.transport.free_recv_buf(recv_buf);
                    return Err(MqttError::Transport(e));
                }
            };
            match outcome {
                RecvOutcome::Ready(len) => {
                    let copy_len = len.min(MAX_RECV_PACKET_LEN);
                    let mut local = [0u8; MAX_RECV_PACKET_LEN];
                    local[..copy_len].copy_from_slice(&recv_buf.data[..copy_len]);
                    self.transport.free_recv_buf(recv_buf);
                    self.process_packet(&local[..copy_len])?;
                }
                RecvOutcome::Passed => {
                    self.transport.free_recv_buf(recv_buf);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Decodes and handles one inbound packet (spec §9 OQ-5: the public push
    /// entry point a callback-driven transport calls directly).
    pub fn process_packet(&mut self, bytes: &[u8]) -> Result<(), MqttError<T::Error>> {
        let decoded = packet::decode_packet(bytes, self.expected)
            .map_err(MqttError::<T::Error>::cast_transport_error)?;
        match decoded {
            packet::InboundPacket::ConnAck(info) => self.on_connack(info),
            packet::InboundPacket::Publish(p) => self.on_publish(p),
            packet::InboundPacket::PubAck(a) => self.on_puback(a),
            packet::InboundPacket::PubRec(a) => self.on_pubrec(a),
            packet::InboundPacket::PubRel(a) => self.on_pubrel(a),
            packet::InboundPacket::PubComp(a) => self.on_pubcomp(a),
            packet::InboundPacket::SubAck(s) => self.on_suback(s),
            packet::InboundPacket::UnsubAck(s) => self.on_unsuback(s),
            packet::InboundPacket::Disconnect(d) => self.on_disconnect(d),
            packet::InboundPacket::PingResp => {
                self.sink.ping_received();
                Ok(())
            }
        }
    }

    fn on_connack(&mut self, info: packet::ConnAckInfo<'_>) -> Result<(), MqttError<T::Error>> {
        self.expected.remove(PacketType::ConnAck);
        if info.reason_code.is_error() {
            self.reset_for_disconnect();
            let _ = self.transport.close_conn();
            return Err(MqttError::ServerDeclined(info.reason_code));
        }

        self.state = SessionState::Connected;
        // spec §4.7: on CONNACK success, |= {PUBLISH, DISCONNECT}.
        self.expected.insert(PacketType::Publish);
        self.expected.insert(PacketType::Disconnect);

        self.info = ConnAckSummary {
            session_present: info.session_present,
            session_expiry_interval: info.session_expiry_interval,
            max_qos: info.max_qos,
            retain_available: info.retain_available,
            wildcard_subscription_available: info.wildcard_subscription_available,
            shared_subscription_available: info.shared_subscription_available,
            subscription_identifiers_available: info.subscription_identifiers_available,
            server_keep_alive: info.server_keep_alive.unwrap_or(self.keep_alive),
            receive_maximum: info.receive_maximum,
            max_packet_size: info.max_packet_size,
            topic_alias_maximum: info.topic_alias_maximum,
            assigned_client_id: info.assigned_client_id.and_then(|s| s.parse().ok()),
            server_reference: info.server_reference.and_then(|s| s.parse().ok()),
        };
        self.sink.connected(&self.info);
        Ok(())
    }

    fn on_publish(&mut self, p: packet::Publish<'_>) -> Result<(), MqttError<T::Error>> {
        let response_topic = match property::find(&p.properties, PropertyId::ResponseTopic) {
            Some(PropertyValue::Utf8String(s)) => s.parse().ok(),
            _ => None,
        };
        let content_type = match property::find(&p.properties, PropertyId::ContentType) {
            Some(PropertyValue::Utf8String(s)) => s.parse().ok(),
            _ => None,
        };
        let subscription_identifier = match property::find(&p.properties, PropertyId::SubscriptionIdentifier) {
            Some(PropertyValue::VarInt(n)) => Some(*n),
            _ => None,
        };
        let correlation_data = match property::find(&p.properties, PropertyId::CorrelationData) {
            Some(PropertyValue::Binary(b)) if b.len() <= crate::CORRELATION_DATA_MAXIMUM => Some(*b),
            _ => None,
        };
        let topic: String<MAX_TOPIC_LEN> = p.topic.parse().map_err(|_| MqttError::BufferTooSmall)?;

        let received = ReceivedPublish {
            topic,
            payload: p.payload,
            qos: p.qos,
            retain: p.retain,
            dup: p.dup,
            packet_id: p.packet_id,
            response_topic,
            content_type,
            correlation_data,
            subscription_identifier,
        };
        self.sink.message_received(&received);

        match p.qos {
            QoS::AtMostOnce => Ok(()),
            QoS::AtLeastOnce => {
                let id = p.packet_id.ok_or(MqttError::Protocol(ProtocolError::InvalidPacketId))?;
                self.send_packet(&packet::PubAck(packet::AckReason::success(id)))
            }
            QoS::ExactlyOnce => {
                let id = p.packet_id.ok_or(MqttError::Protocol(ProtocolError::InvalidPacketId))?;
                self.send_packet(&packet::PubRec(packet::AckReason::success(id)))?;
                self.pending
                    .reserve_for_inbound(id, PacketType::PubRel)
                    .map_err(|_| MqttError::OutOfResource)?;
                // spec §4.7: inbound qos=2 PUBLISH |= {PUBREL}.
                self.expected.insert(PacketType::PubRel);
                Ok(())
            }
        }
    }

    fn on_puback(&mut self, a: packet::AckReason<'_>) -> Result<(), MqttError<T::Error>> {
        if self.pending.expected_for(a.packet_id) != PacketType::PubAck {
            return Err(MqttError::Protocol(ProtocolError::UnexpectedPacketType));
        }
        self.pending
            .release(a.packet_id)
            .map_err(|_| MqttError::Protocol(ProtocolError::UnexpectedPacketType))?;
        if !self.pending.any_awaits(PacketType::PubAck) {
            self.expected.remove(PacketType::PubAck);
        }
        self.sink.publish_acknowledged(a.packet_id, a.reason_code);
        Ok(())
    }

    fn on_pubrec(&mut self, a: packet::AckReason<'_>) -> Result<(), MqttError<T::Error>> {
        if self.pending.expected_for(a.packet_id) != PacketType::PubRec {
            return Err(MqttError::Protocol(ProtocolError::UnexpectedPacketType));
        }
        self.pending.advance(a.packet_id, PacketType::PubComp);
        self.expected.insert(PacketType::PubComp);
        if !self.pending.any_awaits(PacketType::PubRec) {
            self.expected.remove(PacketType::PubRec);
        }
        self.send_packet(&packet::PubRel(packet::AckReason::success(a.packet_id)))
    }

    fn on_pubrel(&mut self, a: packet::AckReason<'_>) -> Result<(), MqttError<T::Error>> {
        if self.pending.expected_for(a.packet_id) != PacketType::PubRel {
            return Err(MqttError::Protocol(ProtocolError::UnexpectedPacketType));
        }
        self.pending
            .release(a.packet_id)
            .map_err(|_| MqttError::Protocol(ProtocolError::UnexpectedPacketType))?;
        if !self.pending.any_awaits(PacketType::PubRel) {
            self.expected.remove(PacketType::PubRel);
        }
        self.send_packet(&packet::PubComp(packet::AckReason::success(a.packet_id)))
    }

    fn on_pubcomp(&mut self, a: packet::AckReason<'_>) -> Result<(), MqttError<T::Error>> {
        if self.pending.expected_for(a.packet_id) != PacketType::PubComp {
            return Err(MqttError::Protocol(ProtocolError::UnexpectedPacketType));
        }
        self.pending
            .release(a.packet_id)
            .map_err(|_| MqttError::Protocol(ProtocolError::UnexpectedPacketType))?;
        if !self.pending.any_awaits(PacketType::PubComp) {
            self.expected.remove(PacketType::PubComp);
        }
        self.sink.publish_completed(a.packet_id, a.reason_code);
        Ok(())
    }

    fn on_suback(&mut self, s: packet::SubAck<'_>) -> Result<(), MqttError<T::Error>> {
        if self.pending.expected_for(s.packet_id) != PacketType::SubAck {
            return Err(MqttError::Protocol(ProtocolError::UnexpectedPacketType));
        }
        self.pending
            .release(s.packet_id)
            .map_err(|_| MqttError::Protocol(ProtocolError::UnexpectedPacketType))?;
        if !self.pending.any_awaits(PacketType::SubAck) {
            self.expected.remove(PacketType::SubAck);
        }
        for (index, code) in s.reason_codes.iter().enumerate() {
            // spec §4.5: "if <= 2 fire subscription_granted, else
            // subscription_declined" — not `code.is_error()` (>= 0x80), which
            // would silently treat the undefined 0x03-0x7F range as granted.
            if code.0 <= 2 {
                let qos = QoS::from_u8(code.0).unwrap_or(QoS::AtMostOnce);
                self.sink.subscription_granted(s.packet_id, index, qos);
            } else {
                self.sink.subscription_declined(s.packet_id, index, *code);
            }
        }
        Ok(())
    }

    fn on_unsuback(&mut self, s: packet::UnsubAck<'_>) -> Result<(), MqttError<T::Error>> {
        if self.pending.expected_for(s.packet_id) != PacketType::UnsubAck {
            return Err(MqttError::Protocol(ProtocolError::UnexpectedPacketType));
        }
        self.pending
            .release(s.packet_id)
            .map_err(|_| MqttError::Protocol(ProtocolError::UnexpectedPacketType))?;
        if !self.pending.any_awaits(PacketType::UnsubAck) {
            self.expected.remove(PacketType::UnsubAck);
        }
        for (index, code) in s.reason_codes.iter().enumerate() {
            self.sink.unsubscribed(s.packet_id, index, *code);
        }
        Ok(())
    }

    fn on_disconnect(&mut self, d: packet::Disconnect<'_>) -> Result<(), MqttError<T::Error>> {
        self.reset_for_disconnect();
        let _ = self.transport.close_conn();
        self.sink.received_disconnect(d.reason_code);
        Ok(())
    }

    /// Publish orchestration (spec §4.7): pre-flight validation, conditional
    /// pending-table reservation, two-pass build, hand-off to the transport,
    /// mask update.
    pub fn publish(&mut self, msg: &mut PublishMessage<'_>) -> Result<(), MqttError<T::Error>> {
        self.require_connected()?;
        if msg.topic.contains('+') || msg.topic.contains('#') {
            return Err(MqttError::Protocol(ProtocolError::InvalidTopic));
        }
        if (msg.qos as u8) > (self.info.max_qos as u8) {
            return Err(MqttError::Protocol(ProtocolError::QoSNotSupported));
        }
        if msg.retain && !self.info.retain_available {
            return Err(MqttError::Protocol(ProtocolError::RetainNotSupported));
        }

        let expected_ack = match msg.qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(PacketType::PubAck),
            QoS::ExactlyOnce => Some(PacketType::PubRec),
        };
        if let Some(expected) = expected_ack {
            let id = self
                .pending
                .reserve_for_outbound(&mut self.next_packet_id, expected)
                .map_err(|_| MqttError::OutOfResource)?;
            msg.packet_id = Some(id);
        } else {
            msg.packet_id = None;
        }

        let mut properties: PropList = Vec::new();
        if let Some(rt) = msg.response_topic {
            let _ = properties.push(Property {
                id: PropertyId::ResponseTopic,
                value: PropertyValue::Utf8String(rt),
            });
        }
        if let Some(ct) = msg.content_type {
            let _ = properties.push(Property {
                id: PropertyId::ContentType,
                value: PropertyValue::Utf8String(ct),
            });
        }
        if let Some(cd) = msg.correlation_data {
            let _ = properties.push(Property {
                id: PropertyId::CorrelationData,
                value: PropertyValue::Binary(cd),
            });
        }

        let pkt = packet::Publish {
            topic: msg.topic,
            qos: msg.qos,
            retain: msg.retain,
            dup: msg.dup,
            packet_id: msg.packet_id,
            payload: msg.payload,
            properties,
        };
        self.send_packet(&pkt)?;
        if let Some(expected) = expected_ack {
            self.expected.insert(expected);
        }
        Ok(())
    }

    /// Subscribe orchestration (spec §4.7): per-entry validation against the
    /// server's advertised capabilities, then a single SUBSCRIBE packet.
    pub fn subscribe(&mut self, entries: &[SubscribeEntry<'_>]) -> Result<u16, MqttError<T::Error>> {
        self.require_connected()?;
        if entries.is_empty() || entries.len() > packet::MAX_SUBSCRIBE_ENTRIES {
            return Err(MqttError::InvalidArgument);
        }
        for e in entries {
            if (e.qos as u8) > (self.info.max_qos as u8) {
                return Err(MqttError::Protocol(ProtocolError::QoSNotSupported));
            }
            if e.retain_handling > 2 {
                return Err(MqttError::InvalidArgument);
            }
            let has_wildcard = e.topic_filter.contains('+') || e.topic_filter.contains('#');
            if has_wildcard && !self.info.wildcard_subscription_available {
                return Err(MqttError::Protocol(ProtocolError::Unsupported));
            }
            if e.topic_filter.starts_with("$share/") && !self.info.shared_subscription_available {
                return Err(MqttError::Protocol(ProtocolError::Unsupported));
            }
        }

        let id = self
            .pending
            .reserve_for_outbound(&mut self.next_packet_id, PacketType::SubAck)
            .map_err(|_| MqttError::OutOfResource)?;

        let mut owned_entries: Vec<packet::SubscribeEntry<'_>, { packet::MAX_SUBSCRIBE_ENTRIES }> = Vec::new();
        for e in entries {
            let entry = {
                let mut se = packet::SubscribeEntry::new(e.topic_filter, e.qos);
                se.no_local = e.no_local;
                se.retain_as_published = e.retain_as_published;
                se.retain_handling = e.retain_handling;
                se
            };
            owned_entries.push(entry).map_err(|_| MqttError::OutOfResource)?;
        }
        let pkt = packet::Subscribe {
            packet_id: id,
            entries: owned_entries,
            properties: Vec::new(),
        };
        self.send_packet(&pkt)?;
        self.expected.insert(PacketType::SubAck);
        Ok(id)
    }

    /// Unsubscribe orchestration (spec §4.7), mirroring `subscribe` minus the
    /// per-entry qos/wildcard checks (UNSUBSCRIBE carries no options byte).
    pub fn unsubscribe(&mut self, topic_filters: &[&str]) -> Result<u16, MqttError<T::Error>> {
        self.require_connected()?;
        if topic_filters.is_empty() || topic_filters.len() > packet::MAX_SUBSCRIBE_ENTRIES {
            return Err(MqttError::InvalidArgument);
        }

        let id = self
            .pending
            .reserve_for_outbound(&mut self.next_packet_id, PacketType::UnsubAck)
            .map_err(|_| MqttError::OutOfResource)?;

        let mut owned_filters: Vec<&str, { packet::MAX_SUBSCRIBE_ENTRIES }> = Vec::new();
        for f in topic_filters {
            owned_filters.push(*f).map_err(|_| MqttError::OutOfResource)?;
        }
        let pkt = packet::Unsubscribe {
            packet_id: id,
            topic_filters: owned_filters,
            properties: Vec::new(),
        };
        self.send_packet(&pkt)?;
        self.expected.insert(PacketType::UnsubAck);
        Ok(id)
    }

    pub fn ping(&mut self) -> Result<(), MqttError<T::Error>> {
        self.require_connected()?;
        self.send_packet(&packet::PingReq)
    }

    /// Client-initiated graceful disconnect. Best-effort: the DISCONNECT send
    /// failing does not stop the local state from resetting, since there is
    /// nothing further to do with a transport that just rejected a write.
    pub fn disconnect(&mut self, reason_code: ReasonCode) -> Result<(), MqttError<T::Error>> {
        if self.state == SessionState::Connected {
            let pkt = packet::Disconnect::new(reason_code);
            let _ = self.send_packet(&pkt);
        }
        self.reset_for_disconnect();
        self.transport.close_conn().map_err(MqttError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonCode;
    use std::boxed::Box;
    use std::vec::Vec as StdVec;

    struct MockTransport {
        is_connected: bool,
        sent: StdVec<StdVec<u8>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                is_connected: true,
                sent: StdVec::new(),
            }
        }

        fn last_sent(&self) -> &[u8] {
            self.sent.last().expect("nothing sent")
        }
    }

    impl MqttTransport for MockTransport {
        type Error = transport::ErrorPlaceHolder;

        fn open_conn(&mut self, _address: &str, _port: u16) -> Result<(), Self::Error> {
            Ok(())
        }
        fn close_conn(&mut self) -> Result<(), Self::Error> {
            self.is_connected = false;
            Ok(())
        }
        fn connected(&self) -> bool {
            self.is_connected
        }
        fn alloc_send_buf(&mut self, len: usize) -> Result<transport::SendBuf, Self::Error> {
            let boxed: &'static mut [u8] = Box::leak(std::vec![0u8; len].into_boxed_slice());
            Ok(transport::SendBuf { data: boxed })
        }
        fn free_send_buf(&mut self, buf: transport::SendBuf) {
            self.sent.push(StdVec::from(&buf.data[..]));
        }
        fn send(&mut self, _buf: &transport::SendBuf, _len: usize) -> Result<(), Self::Error> {
            Ok(())
        }
        fn unsupported_error(&self) -> Self::Error {
            transport::ErrorPlaceHolder
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        connected: usize,
        acked: StdVec<(u16, ReasonCode)>,
        completed: StdVec<(u16, ReasonCode)>,
        granted: StdVec<(u16, usize, QoS)>,
        declined: StdVec<(u16, usize, ReasonCode)>,
        messages: StdVec<std::string::String>,
    }

    impl NotificationSink for RecordingSink {
        fn connected(&mut self, _info: &ConnAckSummary) {
            self.connected += 1;
        }
        fn publish_acknowledged(&mut self, packet_id: u16, reason_code: ReasonCode) {
            self.acked.push((packet_id, reason_code));
        }
        fn publish_completed(&mut self, packet_id: u16, reason_code: ReasonCode) {
            self.completed.push((packet_id, reason_code));
        }
        fn subscription_granted(&mut self, packet_id: u16, index: usize, qos: QoS) {
            self.granted.push((packet_id, index, qos));
        }
        fn subscription_declined(&mut self, packet_id: u16, index: usize, reason_code: ReasonCode) {
            self.declined.push((packet_id, index, reason_code));
        }
        fn message_received(&mut self, publish: &ReceivedPublish<'_>) {
            self.messages.push(std::string::String::from(publish.topic.as_str()));
        }
    }

    fn connected_session() -> Session<MockTransport, RecordingSink> {
        let config = SessionConfig::new("client-1", 30);
        let mut session = Session::new(MockTransport::new(), RecordingSink::default(), config).unwrap();
        session.state = SessionState::Connected;
        session.expected.insert(PacketType::Publish);
        session.expected.insert(PacketType::Disconnect);
        session
    }

    #[test]
    fn new_session_expects_only_pingresp() {
        let config = SessionConfig::new("c", 30);
        let session = Session::new(MockTransport::new(), NullSink, config).unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.expected.contains(PacketType::PingResp));
        assert!(!session.expected.contains(PacketType::ConnAck));
    }

    #[test]
    fn connect_sends_immediately_when_transport_already_connected() {
        let config = SessionConfig::new("c", 30);
        let mut session = Session::new(MockTransport::new(), NullSink, config).unwrap();
        session.connect("broker", 1883).unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.expected.contains(PacketType::ConnAck));
        assert!(!session.deferred_connect);
        assert_eq!(session.transport.last_sent()[0] >> 4, PacketType::Connect as u8);
    }

    #[test]
    fn connect_defers_until_transport_reports_connected() {
        let config = SessionConfig::new("c", 30);
        let mut session = Session::new(MockTransport::new(), NullSink, config).unwrap();
        session.transport.is_connected = false;
        session.connect("broker", 1883).unwrap();
        assert!(session.deferred_connect);
        assert!(session.transport.sent.is_empty());

        session.transport.is_connected = true;
        session.poll().unwrap();
        assert!(!session.deferred_connect);
        assert_eq!(session.transport.sent.len(), 1);
    }

    #[test]
    fn qos1_publish_round_trips_through_puback() {
        let mut session = connected_session();
        let mut msg = PublishMessage::new("a/b", b"hi", QoS::AtLeastOnce);
        session.publish(&mut msg).unwrap();
        let id = msg.packet_id.unwrap();
        assert!(session.expected.contains(PacketType::PubAck));

        let puback = packet::PubAck(packet::AckReason::success(id));
        let mut buf = [0u8; 8];
        let n = packet::build(&puback, &mut buf).unwrap();
        session.process_packet(&buf[..n]).unwrap();

        assert_eq!(session.sink.acked, std::vec![(id, ReasonCode::SUCCESS)]);
        assert!(!session.expected.contains(PacketType::PubAck));
    }

    #[test]
    fn qos2_round_trip_then_duplicate_pubcomp_is_rejected() {
        let mut session = connected_session();
        let mut msg = PublishMessage::new("a/b", b"hi", QoS::ExactlyOnce);
        session.publish(&mut msg).unwrap();
        let id = msg.packet_id.unwrap();
        assert!(session.expected.contains(PacketType::PubRec));

        let mut buf = [0u8; 8];
        let pubrec = packet::PubRec(packet::AckReason::success(id));
        let n = packet::build(&pubrec, &mut buf).unwrap();
        session.process_packet(&buf[..n]).unwrap();
        assert!(session.expected.contains(PacketType::PubComp));
        // the engine must have answered PUBREC with a PUBREL of its own
        assert_eq!(session.transport.last_sent()[0] >> 4, PacketType::PubRel as u8);

        let pubcomp = packet::PubComp(packet::AckReason::success(id));
        let n = packet::build(&pubcomp, &mut buf).unwrap();
        session.process_packet(&buf[..n]).unwrap();
        assert_eq!(session.sink.completed, std::vec![(id, ReasonCode::SUCCESS)]);
        assert!(!session.expected.contains(PacketType::PubComp));

        // S3: a duplicate PUBCOMP after the slot is released is rejected.
        let result = session.process_packet(&buf[..n]);
        match result {
            Err(MqttError::Protocol(ProtocolError::UnexpectedPacketType)) => {}
            other => panic!("expected UnexpectedPacketType, got {:?}", other),
        }
    }

    #[test]
    fn inbound_qos2_publish_answers_pubrec_and_awaits_pubrel() {
        let mut session = connected_session();
        let publish = packet::Publish::new("sensors/x", b"23.5", QoS::ExactlyOnce, false);
        let mut built = {
            let mut p = publish;
            p.packet_id = Some(42);
            p
        };
        let mut buf = [0u8; 32];
        let n = packet::build(&mut built, &mut buf).unwrap();
        session.process_packet(&buf[..n]).unwrap();

        assert_eq!(session.sink.messages, std::vec![std::string::String::from("sensors/x")]);
        assert!(session.expected.contains(PacketType::PubRel));
        assert_eq!(session.transport.last_sent()[0] >> 4, PacketType::PubRec as u8);

        let pubrel = packet::PubRel(packet::AckReason::success(42));
        let n = packet::build(&pubrel, &mut buf).unwrap();
        session.process_packet(&buf[..n]).unwrap();
        assert!(!session.expected.contains(PacketType::PubRel));
        assert_eq!(session.transport.last_sent()[0] >> 4, PacketType::PubComp as u8);
    }

    #[test]
    fn suback_fires_granted_and_declined_per_entry() {
        let mut session = connected_session();
        let entries = [SubscribeEntry::new("sensors/+", QoS::AtLeastOnce)];
        let id = session.subscribe(&entries).unwrap();
        assert!(session.expected.contains(PacketType::SubAck));

        let mut reason_codes = Vec::new();
        reason_codes.push(ReasonCode::GRANTED_QOS_1).unwrap();
        reason_codes.push(ReasonCode::UNSPECIFIED_ERROR).unwrap();
        let suback = packet::SubAck {
            packet_id: id,
            reason_codes,
            properties: Vec::new(),
        };
        let mut buf = [0u8; 16];
        let n = packet::build(&suback, &mut buf).unwrap();
        session.process_packet(&buf[..n]).unwrap();

        assert_eq!(session.sink.granted, std::vec![(id, 0, QoS::AtLeastOnce)]);
        assert_eq!(session.sink.declined, std::vec![(id, 1, ReasonCode::UNSPECIFIED_ERROR)]);
        assert!(!session.expected.contains(PacketType::SubAck));
    }

    #[test]
    fn publish_rejects_wildcard_topic() {
        let mut session = connected_session();
        let mut msg = PublishMessage::new("a/+/b", b"x", QoS::AtMostOnce);
        match session.publish(&mut msg) {
            Err(MqttError::Protocol(ProtocolError::InvalidTopic)) => {}
            other => panic!("expected InvalidTopic, got {:?}", other),
        }
    }

    #[test]
    fn publish_while_disconnected_is_rejected() {
        let config = SessionConfig::new("c", 30);
        let mut session = Session::new(MockTransport::new(), NullSink, config).unwrap();
        let mut msg = PublishMessage::new("a/b", b"x", QoS::AtMostOnce);
        assert!(matches!(session.publish(&mut msg), Err(MqttError::NotConnected)));
    }
}
