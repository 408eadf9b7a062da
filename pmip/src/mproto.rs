//! This module contains the mobility protocol structs.
//!
//! Messages are carried in a Mobility Header as defined in
//! [RFC 6275 §6.1](https://datatracker.ietf.org/doc/html/rfc6275#section-6.1),
//! with the proxy message types and options of
//! [RFC 5213](https://datatracker.ietf.org/doc/html/rfc5213). Only the two
//! proxy messages are implemented; everything else the mobility header can
//! carry is dropped on receipt.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::nai::MobileNodeId;
use crate::sequence_number::SeqNo;

pub use self::options::{AccessTechnology, HandoffIndicator};
pub use self::pba::{BindingStatus, ProxyBindingAck};
pub use self::pbu::ProxyBindingUpdate;

mod options;
mod pba;
mod pbu;

/// Payload protocol value for "no next header", carried in the first byte of
/// the mobility header.
const PAYLOAD_PROTO_NONE: u8 = 59;

/// Mobility header type of a proxy binding update.
const MH_TYPE_PBU: u8 = 5;
/// Mobility header type of a proxy binding acknowledgement.
const MH_TYPE_PBA: u8 = 6;

/// Size of the fixed mobility header on the wire: payload proto, header
/// length, MH type, reserved and checksum.
const HEADER_WIRE_SIZE: usize = 6;

/// Wire lifetimes are counted in units of 4 seconds; internally they are
/// kept with millisecond precision.
const LIFETIME_UNIT_MS: u64 = 4_000;

/// Convert an internal lifetime to its wire representation.
fn lifetime_to_wire(lifetime: Duration) -> u16 {
    (lifetime.as_millis() as u64 / LIFETIME_UNIT_MS) as u16
}

/// Convert a wire lifetime back to a [`Duration`].
fn lifetime_from_wire(lifetime: u16) -> Duration {
    Duration::from_millis(lifetime as u64 * LIFETIME_UNIT_MS)
}

/// A single mobility message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A registration request sent by a MAG.
    Pbu(ProxyBindingUpdate),
    /// An acknowledgement sent by an LMA.
    Pba(ProxyBindingAck),
}

impl From<ProxyBindingUpdate> for Message {
    fn from(value: ProxyBindingUpdate) -> Self {
        Message::Pbu(value)
    }
}

impl From<ProxyBindingAck> for Message {
    fn from(value: ProxyBindingAck) -> Self {
        Message::Pba(value)
    }
}

/// The fields the binding state machines exchange with the protocol layer:
/// the peer transport address plus the mobility message body, independent of
/// direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBindingInfo {
    /// Transport address of the peer the message came from or goes to.
    pub peer: SocketAddr,
    /// The mobile node the message is about.
    pub mn_id: MobileNodeId,
    /// Sequence number of the registration.
    pub sequence: SeqNo,
    /// Requested or granted lifetime, in milliseconds internally.
    pub lifetime: Duration,
    /// Why this registration event happened.
    pub handoff: HandoffIndicator,
    /// The technology of the access link involved.
    pub att: AccessTechnology,
    /// Registration outcome. Only meaningful on acknowledgements; carried as
    /// [`BindingStatus::Accepted`] on updates.
    pub status: BindingStatus,
}

impl ProxyBindingInfo {
    /// Capture the info of a received update.
    pub fn from_pbu(peer: SocketAddr, pbu: &ProxyBindingUpdate) -> Self {
        ProxyBindingInfo {
            peer,
            mn_id: pbu.mn_id.clone(),
            sequence: pbu.sequence,
            lifetime: pbu.lifetime,
            handoff: pbu.handoff,
            att: pbu.att,
            status: BindingStatus::Accepted,
        }
    }

    /// Capture the info of a received acknowledgement.
    pub fn from_pba(peer: SocketAddr, pba: &ProxyBindingAck) -> Self {
        ProxyBindingInfo {
            peer,
            mn_id: pba.mn_id.clone(),
            sequence: pba.sequence,
            lifetime: pba.lifetime,
            handoff: pba.handoff,
            att: pba.att,
            status: pba.status,
        }
    }

    /// Build the update message this info describes.
    pub fn update(&self) -> ProxyBindingUpdate {
        ProxyBindingUpdate {
            sequence: self.sequence,
            lifetime: self.lifetime,
            mn_id: self.mn_id.clone(),
            handoff: self.handoff,
            att: self.att,
        }
    }

    /// Build the acknowledgement message this info describes.
    pub fn acknowledgement(&self) -> ProxyBindingAck {
        ProxyBindingAck {
            status: self.status,
            sequence: self.sequence,
            lifetime: self.lifetime,
            mn_id: self.mn_id.clone(),
            handoff: self.handoff,
            att: self.att,
        }
    }
}

/// A codec which can send and receive whole mobility header messages on the
/// wire.
///
/// The total message length is always a multiple of 8 bytes; the encoder
/// appends padding options as needed and the header length field counts
/// 8-octet units. The checksum field is written as zero: the raw socket
/// deployment path leaves it to kernel checksum offload, and the UDP
/// transport has its own.
#[derive(Debug, Clone, Default)]
pub struct Codec {}

impl Codec {
    /// Create a new mobility header `Codec`.
    pub fn new() -> Self {
        Self {}
    }
}

/// Round a length up to the next multiple of 8.
fn align8(len: usize) -> usize {
    (len + 7) & !7
}

impl Decoder for Codec {
    type Item = Message;

    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // The header length field lives in the second byte, so the full
        // frame size is known as soon as the fixed header is buffered.
        if src.remaining() < 8 {
            trace!("Insufficient bytes to read a mobility header");
            return Ok(None);
        }

        let total_len = (src[1] as usize + 1) * 8;
        if src.remaining() < total_len {
            trace!("Insufficient bytes to read a full mobility message");
            src.reserve(total_len - src.remaining());
            return Ok(None);
        }

        let mut frame = src.split_to(total_len);

        let payload_proto = frame.get_u8();
        if payload_proto != PAYLOAD_PROTO_NONE {
            trace!(payload_proto, "Unexpected payload proto in mobility header");
        }
        let _hdr_len = frame.get_u8();
        let mh_type = frame.get_u8();
        let _reserved = frame.get_u8();
        let _checksum = frame.get_u16();

        match mh_type {
            MH_TYPE_PBU => Ok(Some(ProxyBindingUpdate::from_bytes(&mut frame)?.into())),
            MH_TYPE_PBA => Ok(Some(ProxyBindingAck::from_bytes(&mut frame)?.into())),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Unhandled mobility header type",
            )),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                // A datagram or a closed stream ended in the middle of a
                // message. Consume the leftover so the endpoint is clean
                // for the next datagram, and report this one.
                src.clear();
                Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Truncated mobility message",
                ))
            }
        }
    }
}

impl Encoder<Message> for Codec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mh_type, data_len) = match &item {
            Message::Pbu(pbu) => (MH_TYPE_PBU, pbu.data_wire_size()),
            Message::Pba(pba) => (MH_TYPE_PBA, pba.data_wire_size()),
        };
        let unpadded_len = HEADER_WIRE_SIZE + data_len;
        let total_len = align8(unpadded_len);
        dst.reserve(total_len);

        dst.put_u8(PAYLOAD_PROTO_NONE);
        dst.put_u8((total_len / 8 - 1) as u8);
        dst.put_u8(mh_type);
        dst.put_u8(0);
        // Checksum, owned by kernel offload on the raw socket path.
        dst.put_u16(0);

        match item {
            Message::Pbu(pbu) => pbu.write_bytes(dst),
            Message::Pba(pba) => pba.write_bytes(dst),
        }

        options::write_padding(dst, total_len - unpadded_len);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{Decoder, Encoder, Framed};

    use super::{
        AccessTechnology, BindingStatus, Codec, HandoffIndicator, Message, ProxyBindingAck,
        ProxyBindingUpdate,
    };
    use crate::nai::MobileNodeId;

    fn test_pbu() -> ProxyBindingUpdate {
        ProxyBindingUpdate {
            sequence: 1.into(),
            lifetime: Duration::from_millis(3_600_000),
            mn_id: MobileNodeId::new("mn1@example.com").unwrap(),
            handoff: HandoffIndicator::FirstAttach,
            att: AccessTechnology::Ieee80211,
        }
    }

    fn test_pba() -> ProxyBindingAck {
        ProxyBindingAck {
            status: BindingStatus::Accepted,
            sequence: 1.into(),
            lifetime: Duration::from_millis(3_600_000),
            mn_id: MobileNodeId::new("mn1@example.com").unwrap(),
            handoff: HandoffIndicator::FirstAttach,
            att: AccessTechnology::Ieee80211,
        }
    }

    #[test]
    fn pbu_encoding() {
        let mut buf = BytesMut::new();
        Codec::new()
            .encode(test_pbu().into(), &mut buf)
            .expect("Encoding into a growable buffer never fails; qed");

        // 6 byte header + 8 byte message data + 24 bytes of options + 2
        // bytes of padding.
        assert_eq!(buf.len(), 40);
        assert_eq!(
            buf[..40],
            [
                // Mobility header: proto none, 5 * 8 byte units, PBU type.
                59, 4, 5, 0, 0, 0,
                // A and P flags, sequence 1, lifetime 900 * 4s, reserved.
                0x82, 0, 0, 1, 0x03, 0x84, 0, 0,
                // NAI option.
                8, 16, 1, b'm', b'n', b'1', b'@', b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'.',
                b'c', b'o', b'm',
                // Handoff and ATT options, PadN.
                15, 1, 1, 17, 1, 4, 1, 0
            ]
        );
    }

    #[test]
    fn pba_encoding() {
        let mut buf = BytesMut::new();
        Codec::new()
            .encode(test_pba().into(), &mut buf)
            .expect("Encoding into a growable buffer never fails; qed");

        assert_eq!(buf.len(), 40);
        assert_eq!(
            buf[..14],
            [
                // Mobility header with PBA type.
                59, 4, 6, 0, 0, 0,
                // Status 0, P flag, sequence 1, lifetime 900 * 4s.
                0, 0x20, 0, 1, 0x03, 0x84, 0, 0
            ]
        );
        // Options are identical to the update's, which starts its options at
        // the same offset.
        let mut pbu_buf = BytesMut::new();
        Codec::new()
            .encode(test_pbu().into(), &mut pbu_buf)
            .expect("Encoding into a growable buffer never fails; qed");
        assert_eq!(buf[14..], pbu_buf[14..]);
    }

    #[test]
    fn alignment_is_preserved_for_any_identifier_length() {
        for len in 1..=64 {
            let mut pbu = test_pbu();
            pbu.mn_id = MobileNodeId::new("a".repeat(len)).unwrap();

            let mut buf = BytesMut::new();
            Codec::new()
                .encode(pbu.into(), &mut buf)
                .expect("Encoding into a growable buffer never fails; qed");

            assert_eq!(buf.len() % 8, 0, "message for id length {len} not aligned");
            assert_eq!(buf.len(), (buf[1] as usize + 1) * 8);
        }
    }

    #[test]
    fn decode_rejects_unknown_mh_type() {
        let mut buf = BytesMut::new();
        Codec::new()
            .encode(test_pbu().into(), &mut buf)
            .expect("Encoding into a growable buffer never fails; qed");
        // Binding refresh request, which this node never handles.
        buf[2] = 0;

        assert!(Codec::new().decode(&mut buf).is_err());
    }

    #[test]
    fn decode_waits_for_a_full_frame() {
        let mut buf = BytesMut::new();
        Codec::new()
            .encode(test_pbu().into(), &mut buf)
            .expect("Encoding into a growable buffer never fails; qed");

        let mut partial = BytesMut::from(&buf[..12]);
        assert!(Codec::new()
            .decode(&mut partial)
            .expect("A partial frame is not an error")
            .is_none());

        // At the end of a datagram the partial frame is malformed, and the
        // leftover is consumed so the endpoint stays usable.
        assert!(Codec::new().decode_eof(&mut partial).is_err());
        assert!(partial.is_empty());
    }

    #[tokio::test]
    async fn codec_pbu() {
        let (tx, rx) = tokio::io::duplex(1024);
        let mut sender = Framed::new(tx, Codec::new());
        let mut receiver = Framed::new(rx, Codec::new());

        let pbu = test_pbu();

        sender
            .send(pbu.clone().into())
            .await
            .expect("Send on a non-networked buffer can never fail; qed");
        let recv_pbu = receiver
            .next()
            .await
            .expect("Buffer isn't closed so this is always `Some`; qed")
            .expect("Can decode the previously encoded value");
        assert_eq!(Message::from(pbu), recv_pbu);
    }

    #[tokio::test]
    async fn codec_pba() {
        let (tx, rx) = tokio::io::duplex(1024);
        let mut sender = Framed::new(tx, Codec::new());
        let mut receiver = Framed::new(rx, Codec::new());

        let pba = ProxyBindingAck {
            status: BindingStatus::SequenceOutOfWindow,
            lifetime: Duration::ZERO,
            ..test_pba()
        };

        sender
            .send(pba.clone().into())
            .await
            .expect("Send on a non-networked buffer can never fail; qed");
        let recv_pba = receiver
            .next()
            .await
            .expect("Buffer isn't closed so this is always `Some`; qed")
            .expect("Can decode the previously encoded value");
        assert_eq!(Message::from(pba), recv_pba);
    }

    #[test]
    fn binding_info_is_direction_neutral() {
        let peer = "[2001:db8:ffff::2]:5436".parse().unwrap();
        let info = super::ProxyBindingInfo::from_pbu(peer, &test_pbu());
        assert_eq!(info.peer, peer);
        assert_eq!(info.update(), test_pbu());

        // The acknowledgement built from the same info echoes every field.
        let pba = info.acknowledgement();
        assert_eq!(pba.sequence, test_pbu().sequence);
        assert_eq!(pba.mn_id, test_pbu().mn_id);
        assert_eq!(pba.status, BindingStatus::Accepted);

        let info = super::ProxyBindingInfo::from_pba(peer, &pba);
        assert_eq!(info.acknowledgement(), pba);
    }

    #[test]
    fn deregistration_has_zero_lifetime() {
        let mut pbu = test_pbu();
        assert!(!pbu.is_deregistration());
        pbu.lifetime = Duration::ZERO;
        assert!(pbu.is_deregistration());

        let mut buf = BytesMut::new();
        Codec::new()
            .encode(pbu.into(), &mut buf)
            .expect("Encoding into a growable buffer never fails; qed");
        let decoded = Codec::new()
            .decode(&mut buf)
            .expect("Can decode the previously encoded value")
            .expect("A full frame was buffered");
        let Message::Pbu(decoded) = decoded else {
            panic!("Encoded a PBU, decoded something else")
        };
        assert!(decoded.is_deregistration());
    }
}
