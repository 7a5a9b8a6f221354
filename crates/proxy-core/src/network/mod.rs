//! Private/public classification of destinations.
//!
//! A destination inside one of the configured private ranges is reached
//! through the proxy's own address; anything else must see the public IP in
//! Contact and Via.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::common::{ProxyError, Result, SipEndpoint};

/// Ranges treated as private when nothing is configured
pub const DEFAULT_PRIVATE_RANGES: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "fc00::/7",
    "fe80::/10",
    "::1/128",
];

/// A CIDR block, e.g. `10.0.0.0/8`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn new(network: IpAddr, prefix: u8) -> Result<Self> {
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(ProxyError::InvalidNetworkRange(format!("{}/{}", network, prefix)));
        }
        Ok(Self { network, prefix })
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        // IPv4-mapped IPv6 addresses are compared as IPv4
        let address = match address {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(address),
            v4 => v4,
        };

        match (self.network, address) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = prefix_mask_v4(self.prefix);
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = prefix_mask_v6(self.prefix);
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_v4(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_v6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for IpRange {
    type Err = ProxyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ProxyError::InvalidNetworkRange(s.to_string());
        let (network, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let network: IpAddr = network.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        IpRange::new(network, prefix)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Decides whether a resolved destination sits on the proxy's private network
#[derive(Debug, Clone)]
pub struct NetworkClassifier {
    private_ranges: Vec<IpRange>,
}

impl Default for NetworkClassifier {
    fn default() -> Self {
        let private_ranges = DEFAULT_PRIVATE_RANGES
            .iter()
            .filter_map(|range| range.parse().ok())
            .collect();
        Self { private_ranges }
    }
}

impl NetworkClassifier {
    pub fn new(private_ranges: Vec<IpRange>) -> Self {
        Self { private_ranges }
    }

    pub fn from_cidrs<S: AsRef<str>>(ranges: &[S]) -> Result<Self> {
        let private_ranges = ranges
            .iter()
            .map(|range| range.as_ref().parse())
            .collect::<Result<Vec<IpRange>>>()?;
        Ok(Self { private_ranges })
    }

    pub fn private_ranges(&self) -> &[IpRange] {
        &self.private_ranges
    }

    pub fn is_local_address(&self, address: IpAddr) -> bool {
        self.private_ranges.iter().any(|range| range.contains(address))
    }

    pub fn is_local_network(&self, endpoint: &SipEndpoint) -> bool {
        self.is_local_address(endpoint.address)
    }

    /// Public IP to substitute when sending to `destination`, if any.
    ///
    /// `None` for private destinations, `public_ip` otherwise.
    pub fn public_ip_for(&self, destination: &SipEndpoint, public_ip: Option<IpAddr>) -> Option<IpAddr> {
        if self.is_local_network(destination) {
            None
        } else {
            public_ip
        }
    }
}
