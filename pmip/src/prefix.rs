//! A dedicated home network prefix module.
//!
//! The standard library only exposes [`Ipv6Addr`] and friends, without a type
//! for an address + prefix length pair. This wraps [`ipnet::Ipv6Net`] in the
//! small surface the mobility core needs: home network prefixes delegated to
//! mobile nodes, and route destinations derived from them.

use core::fmt;
use std::hash::Hash;
use std::net::Ipv6Addr;
use std::str::FromStr;

use ipnet::Ipv6Net;
use serde::Deserialize;

/// An IPv6 prefix: an address and a prefix length between 1 and 128.
#[derive(Debug, Clone, Copy, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct Ipv6Prefix {
    inner: Ipv6Net,
}

/// An error returned when creating a new [`Ipv6Prefix`] with an invalid
/// prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixLenError;

impl Ipv6Prefix {
    /// Create a new `Ipv6Prefix` from the given [`Ipv6Addr`] and prefix length.
    pub fn new(addr: Ipv6Addr, prefix_len: u8) -> Result<Ipv6Prefix, PrefixLenError> {
        if prefix_len == 0 {
            return Err(PrefixLenError);
        }
        Ok(Self {
            inner: Ipv6Net::new(addr, prefix_len).map_err(|_| PrefixLenError)?,
        })
    }

    /// Returns the size of the prefix in bits.
    pub fn prefix_len(&self) -> u8 {
        self.inner.prefix_len()
    }

    /// Returns the address used to construct this `Ipv6Prefix`.
    pub fn address(&self) -> Ipv6Addr {
        self.inner.addr()
    }

    /// Returns the network part of the prefix. All non prefix bits are set
    /// to 0.
    pub fn network(&self) -> Ipv6Addr {
        self.inner.network()
    }

    /// Checks if this `Ipv6Prefix` contains the provided [`Ipv6Addr`].
    pub fn contains_ip(&self, ip: Ipv6Addr) -> bool {
        self.inner.contains(&ip)
    }
}

impl fmt::Display for Ipv6Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl FromStr for Ipv6Prefix {
    type Err = PrefixLenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = Ipv6Net::from_str(s).map_err(|_| PrefixLenError)?;
        if inner.prefix_len() == 0 {
            return Err(PrefixLenError);
        }
        Ok(Self { inner })
    }
}

impl TryFrom<String> for Ipv6Prefix {
    type Error = PrefixLenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl PartialEq for Ipv6Prefix {
    fn eq(&self, other: &Self) -> bool {
        // Quick check, prefixes of different sizes are never equal.
        if self.prefix_len() != other.prefix_len() {
            return false;
        }

        // Full check
        self.network() == other.network()
    }
}

impl Hash for Ipv6Prefix {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // First write the prefix size. Then write the network address, which
        // sets the non prefix bits to 0, so hash values are equal according
        // to the PartialEq rules.
        state.write_u8(self.prefix_len());
        self.network().hash(state)
    }
}

impl fmt::Display for PrefixLenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Invalid prefix length for this address")
    }
}

impl std::error::Error for PrefixLenError {}
