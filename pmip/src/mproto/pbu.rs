//! The proxy binding update message
//! ([RFC 5213 §8.1](https://datatracker.ietf.org/doc/html/rfc5213#section-8.1)).

use std::io;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use super::options::{AccessTechnology, HandoffIndicator, MobilityOptions};
use super::{lifetime_from_wire, lifetime_to_wire};
use crate::nai::MobileNodeId;
use crate::sequence_number::SeqNo;

/// Flag bit requesting an acknowledgement. Proxy registrations always set
/// this.
const FLAG_ACK: u16 = 0x8000;
/// Flag bit marking a proxy registration, in its canonical position after
/// the A, H, L, K, M and R flags. Mandatory for this protocol.
const FLAG_PROXY_REG: u16 = 0x0200;

/// Wire size of the fixed message data, before options.
const PBU_DATA_WIRE_SIZE: usize = 8;

/// A proxy binding update: the registration request a MAG sends to an LMA on
/// behalf of an attached mobile node. A lifetime of zero requests
/// deregistration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBindingUpdate {
    /// Sequence number matching this update to its acknowledgement.
    pub sequence: SeqNo,
    /// Requested binding lifetime. Kept in milliseconds internally, counted
    /// in 4 second units on the wire.
    pub lifetime: Duration,
    /// The mobile node being registered.
    pub mn_id: MobileNodeId,
    /// Why this registration happens.
    pub handoff: HandoffIndicator,
    /// The technology of the access link the node attached over.
    pub att: AccessTechnology,
}

impl ProxyBindingUpdate {
    /// Size on the wire of the message data including options, without
    /// trailing padding and without the mobility header itself.
    pub fn data_wire_size(&self) -> usize {
        PBU_DATA_WIRE_SIZE
            + MobilityOptions {
                mn_id: self.mn_id.clone(),
                handoff: self.handoff,
                att: self.att,
            }
            .wire_size()
    }

    /// Whether this update requests deregistration of the binding.
    pub fn is_deregistration(&self) -> bool {
        self.lifetime.is_zero()
    }

    /// Construct a `ProxyBindingUpdate` from the message data of a frame,
    /// options included.
    pub fn from_bytes(src: &mut BytesMut) -> Result<Self, io::Error> {
        if src.remaining() < PBU_DATA_WIRE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Proxy binding update message data truncated",
            ));
        }

        let flags = src.get_u16();
        if flags & FLAG_PROXY_REG == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Binding update without the proxy registration flag",
            ));
        }
        let sequence = src.get_u16().into();
        let lifetime = lifetime_from_wire(src.get_u16());
        let _reserved = src.get_u16();

        let options = MobilityOptions::from_bytes(src)?;

        Ok(ProxyBindingUpdate {
            sequence,
            lifetime,
            mn_id: options.mn_id,
            handoff: options.handoff,
            att: options.att,
        })
    }

    /// Encode the message data, options included, without padding.
    pub fn write_bytes(&self, dst: &mut BytesMut) {
        dst.put_u16(FLAG_ACK | FLAG_PROXY_REG);
        dst.put_u16(self.sequence.into());
        dst.put_u16(lifetime_to_wire(self.lifetime));
        dst.put_u16(0);

        MobilityOptions {
            mn_id: self.mn_id.clone(),
            handoff: self.handoff,
            att: self.att,
        }
        .write_bytes(dst);
    }
}
