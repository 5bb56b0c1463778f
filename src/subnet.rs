use crate::error::{ThrottlerError, ThrottlerResult};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IPv4 or IPv6 network, e.g. `10.0.0.0/8` or `2001:db8::/32`.
///
/// Host bits are cleared on construction, so `127.0.0.1/24` and
/// `127.0.0.0/24` are the same subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    network: IpAddr,
    prefix_len: u8,
}

impl Subnet {
    /// An IPv4-mapped IPv6 network of at least 96 bits, such as
    /// `::ffff:10.0.0.0/104`, is stored as the equivalent IPv4 network.
    pub fn new(addr: IpAddr, prefix_len: u8) -> ThrottlerResult<Self> {
        let max_len = max_prefix_len(&addr);
        if prefix_len > max_len {
            return Err(ThrottlerError::InvalidSubnet(format!(
                "{}/{}: prefix length exceeds {} bits",
                addr, prefix_len, max_len
            )));
        }

        let (network, prefix_len) = match addr {
            IpAddr::V4(ip) => (IpAddr::V4(mask_v4(ip, prefix_len)), prefix_len),
            IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
                Some(v4) if prefix_len >= 96 => {
                    let prefix_len = prefix_len - 96;
                    (IpAddr::V4(mask_v4(v4, prefix_len)), prefix_len)
                }
                _ => (IpAddr::V6(mask_v6(ip, prefix_len)), prefix_len),
            },
        };

        Ok(Self {
            network,
            prefix_len,
        })
    }

    /// A subnet holding exactly one address.
    pub fn host(addr: IpAddr) -> Self {
        let addr = addr.to_canonical();
        Self {
            network: addr,
            prefix_len: max_prefix_len(&addr),
        }
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `addr` lies inside this subnet. IPv4-mapped IPv6 addresses
    /// match IPv4 subnets.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => mask_v4(*ip, self.prefix_len) == net,
            (IpAddr::V4(net), IpAddr::V6(ip)) => ip
                .to_ipv4_mapped()
                .is_some_and(|ip| mask_v4(ip, self.prefix_len) == net),
            (IpAddr::V6(net), IpAddr::V6(ip)) => mask_v6(*ip, self.prefix_len) == net,
            (IpAddr::V6(net), IpAddr::V4(ip)) => {
                mask_v6(ip.to_ipv6_mapped(), self.prefix_len) == net
            }
        }
    }
}

impl FromStr for Subnet {
    type Err = ThrottlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ThrottlerError::InvalidSubnet(s.to_string());

        match s.split_once('/') {
            Some((addr, len)) => {
                let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
                let len: u8 = len.parse().map_err(|_| invalid())?;
                Subnet::new(addr, len)
            }
            None => s.parse().map(Subnet::host).map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

fn max_prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask_v4(ip: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
    Ipv4Addr::from(u32::from(ip) & mask)
}

fn mask_v6(ip: Ipv6Addr, prefix_len: u8) -> Ipv6Addr {
    let mask = u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0);
    Ipv6Addr::from(u128::from(ip) & mask)
}
