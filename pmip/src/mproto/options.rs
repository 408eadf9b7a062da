//! Mobility option TLVs carried by PBU and PBA messages.
//!
//! Options follow the fixed message data as type-length-value triples. Both
//! message types carry the same three options: the mobile node identifier,
//! the handoff indicator and the access technology type. Pad1 and PadN
//! options bring the total message up to its 8 byte alignment.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::nai::MobileNodeId;

/// Single zero byte of padding, no length field.
const OPTION_PAD1: u8 = 0;
/// N bytes of padding, the value is ignored on receipt.
const OPTION_PADN: u8 = 1;
/// Mobile node identifier option as defined in
/// [RFC 4283](https://datatracker.ietf.org/doc/html/rfc4283).
const OPTION_NAI: u8 = 8;
/// Handoff indicator option.
const OPTION_HANDOFF: u8 = 15;
/// Access technology type option.
const OPTION_ATT: u8 = 17;

/// Identifier subtype for a network access identifier.
const NAI_SUBTYPE: u8 = 1;

/// Reason code for a (re-)registration event, carried in the handoff
/// indicator option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandoffIndicator {
    /// Attachment over a new interface: the first registration for a node.
    FirstAttach = 1,
    /// Handoff between two different mobile access gateways for the same
    /// interface.
    BetweenMags = 2,
    /// Handoff between two different interfaces of the mobile node.
    BetweenInterfaces = 3,
    /// Handoff state unknown.
    Unknown = 4,
    /// Handoff state not changed: a re-registration refreshing the binding.
    ReRegistration = 5,
}

impl TryFrom<u8> for HandoffIndicator {
    type Error = io::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HandoffIndicator::FirstAttach),
            2 => Ok(HandoffIndicator::BetweenMags),
            3 => Ok(HandoffIndicator::BetweenInterfaces),
            4 => Ok(HandoffIndicator::Unknown),
            5 => Ok(HandoffIndicator::ReRegistration),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid handoff indicator",
            )),
        }
    }
}

/// Coded identifier of the access link class a mobile node attaches over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "u8")]
#[repr(u8)]
pub enum AccessTechnology {
    Reserved = 0,
    /// Logical network interface.
    Virtual = 1,
    Ppp = 2,
    /// IEEE 802.3 wired ethernet.
    Ethernet = 3,
    /// IEEE 802.11 a/b/g wireless.
    Ieee80211 = 4,
    /// IEEE 802.16e.
    Wimax = 5,
    /// 3GPP cellular access.
    Cellular = 6,
}

impl TryFrom<u8> for AccessTechnology {
    type Error = io::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AccessTechnology::Reserved),
            1 => Ok(AccessTechnology::Virtual),
            2 => Ok(AccessTechnology::Ppp),
            3 => Ok(AccessTechnology::Ethernet),
            4 => Ok(AccessTechnology::Ieee80211),
            5 => Ok(AccessTechnology::Wimax),
            6 => Ok(AccessTechnology::Cellular),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid access technology type",
            )),
        }
    }
}

/// The option set shared by both mobility message types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobilityOptions {
    /// The mobile node the message is about.
    pub mn_id: MobileNodeId,
    /// Why this registration event happened.
    pub handoff: HandoffIndicator,
    /// The technology of the access link involved.
    pub att: AccessTechnology,
}

impl MobilityOptions {
    /// Size on the wire of all options, without trailing padding.
    pub fn wire_size(&self) -> usize {
        // NAI: type + length + subtype + identifier bytes.
        // Handoff and ATT: type + length + one value byte each.
        3 + self.mn_id.as_bytes().len() + 3 + 3
    }

    /// Encode the options in their canonical order.
    pub fn write_bytes(&self, dst: &mut BytesMut) {
        dst.put_u8(OPTION_NAI);
        dst.put_u8(self.mn_id.as_bytes().len() as u8 + 1);
        dst.put_u8(NAI_SUBTYPE);
        dst.put_slice(self.mn_id.as_bytes());

        dst.put_u8(OPTION_HANDOFF);
        dst.put_u8(1);
        dst.put_u8(self.handoff as u8);

        dst.put_u8(OPTION_ATT);
        dst.put_u8(1);
        dst.put_u8(self.att as u8);
    }

    /// Parse the options from the remainder of a message frame. Padding is
    /// skipped, unrecognized options are skipped over their stated length,
    /// and a message missing one of the three required options is malformed.
    pub fn from_bytes(src: &mut BytesMut) -> Result<Self, io::Error> {
        let mut mn_id = None;
        let mut handoff = None;
        let mut att = None;

        while src.has_remaining() {
            let option_type = src.get_u8();
            if option_type == OPTION_PAD1 {
                continue;
            }

            if !src.has_remaining() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Mobility option without a length field",
                ));
            }
            let len = src.get_u8() as usize;
            if src.remaining() < len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Mobility option length exceeds the message",
                ));
            }

            match option_type {
                OPTION_PADN => {
                    src.advance(len);
                }
                OPTION_NAI => {
                    if len < 2 {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "Mobile node identifier option too short",
                        ));
                    }
                    let subtype = src.get_u8();
                    if subtype != NAI_SUBTYPE {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "Unsupported mobile node identifier subtype",
                        ));
                    }
                    let id = std::str::from_utf8(&src[..len - 1])
                        .map_err(|_| {
                            io::Error::new(
                                io::ErrorKind::InvalidData,
                                "Mobile node identifier is not valid UTF-8",
                            )
                        })?
                        .to_string();
                    src.advance(len - 1);
                    mn_id = Some(MobileNodeId::new(id).map_err(|e| {
                        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
                    })?);
                }
                OPTION_HANDOFF => {
                    if len != 1 {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "Handoff indicator option has the wrong length",
                        ));
                    }
                    handoff = Some(HandoffIndicator::try_from(src.get_u8())?);
                }
                OPTION_ATT => {
                    if len != 1 {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "Access technology type option has the wrong length",
                        ));
                    }
                    att = Some(AccessTechnology::try_from(src.get_u8())?);
                }
                _ => {
                    // Unrecognized option, skip over it.
                    trace!(option_type, "Skipping unrecognized mobility option");
                    src.advance(len);
                }
            }
        }

        match (mn_id, handoff, att) {
            (Some(mn_id), Some(handoff), Some(att)) => Ok(MobilityOptions {
                mn_id,
                handoff,
                att,
            }),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Message is missing a required mobility option",
            )),
        }
    }
}

/// Write `amount` bytes of padding options.
pub fn write_padding(dst: &mut BytesMut, amount: usize) {
    match amount {
        0 => {}
        1 => dst.put_u8(OPTION_PAD1),
        n => {
            dst.put_u8(OPTION_PADN);
            dst.put_u8(n as u8 - 2);
            dst.put_bytes(0, n - 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::{AccessTechnology, HandoffIndicator, MobilityOptions};
    use crate::nai::MobileNodeId;

    fn options() -> MobilityOptions {
        MobilityOptions {
            mn_id: MobileNodeId::new("mn1@example.com").unwrap(),
            handoff: HandoffIndicator::FirstAttach,
            att: AccessTechnology::Ieee80211,
        }
    }

    #[test]
    fn encoding() {
        let mut buf = BytesMut::new();
        options().write_bytes(&mut buf);

        assert_eq!(buf.len(), 24);
        assert_eq!(
            buf[..24],
            [
                8, 16, 1, b'm', b'n', b'1', b'@', b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'.',
                b'c', b'o', b'm', 15, 1, 1, 17, 1, 4
            ]
        );
    }

    #[test]
    fn roundtrip_with_padding() {
        let src = options();
        let mut buf = BytesMut::new();
        src.write_bytes(&mut buf);
        super::write_padding(&mut buf, 2);

        let decoded = MobilityOptions::from_bytes(&mut buf).unwrap();
        assert_eq!(decoded, src);
    }

    #[test]
    fn unknown_option_is_skipped() {
        let src = options();
        let mut buf = BytesMut::new();
        // A vendor specific option before the recognized ones.
        buf.extend_from_slice(&[19, 2, 0xde, 0xad]);
        src.write_bytes(&mut buf);

        let decoded = MobilityOptions::from_bytes(&mut buf).unwrap();
        assert_eq!(decoded, src);
    }

    #[test]
    fn missing_option_is_malformed() {
        let mut buf = BytesMut::new();
        // Only handoff and ATT, no identifier.
        buf.extend_from_slice(&[15, 1, 1, 17, 1, 4]);
        assert!(MobilityOptions::from_bytes(&mut buf).is_err());
    }

    #[test]
    fn overrunning_length_is_malformed() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[8, 200, 1]);
        assert!(MobilityOptions::from_bytes(&mut buf).is_err());
    }
}
