//! Mobile node identifiers
//! ([network access identifiers](https://datatracker.ietf.org/doc/html/rfc4283)).

use core::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// The maximum length in bytes of a [`MobileNodeId`]. The identifier travels
/// in a mobility option whose length field is a single byte, one of which is
/// taken by the identifier subtype.
pub const MAX_NAI_LEN: usize = 254;

/// The globally unique name of a mobile node, as provisioned in the node
/// database and carried in the NAI mobility option of every PBU and PBA.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct MobileNodeId(String);

/// An error returned when constructing a [`MobileNodeId`] which does not fit
/// in its wire option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaiLengthError;

impl MobileNodeId {
    /// Create a new `MobileNodeId` from the given identifier string.
    pub fn new(id: impl Into<String>) -> Result<Self, NaiLengthError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_NAI_LEN {
            return Err(NaiLengthError);
        }
        Ok(MobileNodeId(id))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier bytes as they appear on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for MobileNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MobileNodeId {
    type Err = NaiLengthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MobileNodeId::new(s)
    }
}

impl TryFrom<String> for MobileNodeId {
    type Error = NaiLengthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MobileNodeId::new(value)
    }
}

impl fmt::Display for NaiLengthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Mobile node identifier is empty or too long for its wire option")
    }
}

impl std::error::Error for NaiLengthError {}

#[cfg(test)]
mod tests {
    use super::{MobileNodeId, MAX_NAI_LEN};

    #[test]
    fn length_bounds() {
        assert!(MobileNodeId::new("mn1@example.com").is_ok());
        assert!(MobileNodeId::new("").is_err());
        assert!(MobileNodeId::new("a".repeat(MAX_NAI_LEN)).is_ok());
        assert!(MobileNodeId::new("a".repeat(MAX_NAI_LEN + 1)).is_err());
    }
}
