//! # Packet Type & Expected-Type Mask
//!
//! `PacketType` mirrors the MQTT 5.0 control-packet-type discriminants.
//! `TypeMask` is the `expected_ptypes` bitmask the session state machine (C7)
//! uses to reject packets that arrive unsolicited (spec §3, §4.7).

/// MQTT 5.0 control packet type. `Unknown` (0) means "no expectation" and is
/// never a valid value for a received fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    Unknown = 0,
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    pub const fn from_u8(v: u8) -> Option<PacketType> {
        Some(match v {
            0 => PacketType::Unknown,
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            15 => PacketType::Auth,
            _ => return None,
        })
    }

    const fn bit(self) -> u16 {
        1u16 << (self as u8)
    }
}

/// A bitmask over [`PacketType`] discriminants, used as the session's
/// `expected_ptypes` (spec §3/§4.7). `PacketType::Unknown`'s bit is never set
/// and never tested; it exists only as the "no expectation" sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TypeMask(u16);

impl TypeMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, t: PacketType) {
        self.0 |= t.bit();
    }

    pub fn remove(&mut self, t: PacketType) {
        self.0 &= !t.bit();
    }

    pub fn contains(&self, t: PacketType) -> bool {
        self.0 & t.bit() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_tracks_insert_and_remove() {
        let mut mask = TypeMask::empty();
        assert!(!mask.contains(PacketType::PingReq));
        mask.insert(PacketType::PingReq);
        mask.insert(PacketType::ConnAck);
        assert!(mask.contains(PacketType::PingReq));
        assert!(mask.contains(PacketType::ConnAck));
        mask.remove(PacketType::PingReq);
        assert!(!mask.contains(PacketType::PingReq));
        assert!(mask.contains(PacketType::ConnAck));
    }

    #[test]
    fn from_u8_round_trips_registry_range() {
        for v in 0u8..=15 {
            assert_eq!(PacketType::from_u8(v).map(|t| t as u8), Some(v));
        }
        assert_eq!(PacketType::from_u8(16), None);
    }
}
