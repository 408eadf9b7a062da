//! The proxy binding acknowledgement message
//! ([RFC 5213 §8.2](https://datatracker.ietf.org/doc/html/rfc5213#section-8.2)).

use std::io;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use super::options::{AccessTechnology, HandoffIndicator, MobilityOptions};
use super::{lifetime_from_wire, lifetime_to_wire};
use crate::nai::MobileNodeId;
use crate::sequence_number::SeqNo;

/// Flag bit marking a proxy registration in the acknowledgement flag byte,
/// following the K and R flags.
const FLAG_PROXY_REG: u8 = 0x20;

/// Wire size of the fixed message data, before options.
const PBA_DATA_WIRE_SIZE: usize = 8;

/// Result of processing a proxy binding update, carried in the status field
/// of the acknowledgement. Values below 128 indicate success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStatus {
    /// The registration was accepted.
    Accepted,
    /// The sequence number was older than the last accepted one.
    SequenceOutOfWindow,
    /// The sender is not authorized to send proxy registrations for this
    /// mobile node, or the node is not provisioned at all.
    NotAuthorizedForProxyReg,
    /// Any other status value. Kept verbatim so acknowledgements survive a
    /// decode/encode roundtrip.
    Other(u8),
}

impl BindingStatus {
    /// Whether this status reports a successfully processed registration.
    pub fn is_success(&self) -> bool {
        u8::from(*self) < 128
    }
}

impl From<u8> for BindingStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => BindingStatus::Accepted,
            135 => BindingStatus::SequenceOutOfWindow,
            152 => BindingStatus::NotAuthorizedForProxyReg,
            other => BindingStatus::Other(other),
        }
    }
}

impl From<BindingStatus> for u8 {
    fn from(value: BindingStatus) -> Self {
        match value {
            BindingStatus::Accepted => 0,
            BindingStatus::SequenceOutOfWindow => 135,
            BindingStatus::NotAuthorizedForProxyReg => 152,
            BindingStatus::Other(other) => other,
        }
    }
}

/// A proxy binding acknowledgement: the LMA's answer to a proxy binding
/// update, echoing the sequence number and reporting the granted lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBindingAck {
    /// Outcome of the registration.
    pub status: BindingStatus,
    /// Sequence number echoed from the update being acknowledged.
    pub sequence: SeqNo,
    /// Granted binding lifetime. Zero on a deregistration acknowledgement.
    pub lifetime: Duration,
    /// The mobile node the acknowledged update was about.
    pub mn_id: MobileNodeId,
    /// Handoff indicator echoed from the update.
    pub handoff: HandoffIndicator,
    /// Access technology type echoed from the update.
    pub att: AccessTechnology,
}

impl ProxyBindingAck {
    /// Size on the wire of the message data including options, without
    /// trailing padding and without the mobility header itself.
    pub fn data_wire_size(&self) -> usize {
        PBA_DATA_WIRE_SIZE
            + MobilityOptions {
                mn_id: self.mn_id.clone(),
                handoff: self.handoff,
                att: self.att,
            }
            .wire_size()
    }

    /// Construct a `ProxyBindingAck` from the message data of a frame,
    /// options included.
    pub fn from_bytes(src: &mut BytesMut) -> Result<Self, io::Error> {
        if src.remaining() < PBA_DATA_WIRE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Proxy binding acknowledgement message data truncated",
            ));
        }

        let status = BindingStatus::from(src.get_u8());
        let flags = src.get_u8();
        if flags & FLAG_PROXY_REG == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Binding acknowledgement without the proxy registration flag",
            ));
        }
        let sequence = src.get_u16().into();
        let lifetime = lifetime_from_wire(src.get_u16());
        let _reserved = src.get_u16();

        let options = MobilityOptions::from_bytes(src)?;

        Ok(ProxyBindingAck {
            status,
            sequence,
            lifetime,
            mn_id: options.mn_id,
            handoff: options.handoff,
            att: options.att,
        })
    }

    /// Encode the message data, options included, without padding.
    pub fn write_bytes(&self, dst: &mut BytesMut) {
        dst.put_u8(self.status.into());
        dst.put_u8(FLAG_PROXY_REG);
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
