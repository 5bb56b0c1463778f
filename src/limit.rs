use crate::error::{ThrottlerError, ThrottlerResult};
use crate::subnet::Subnet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Raw value that stands for [`Threshold::Unlimited`].
pub const UNLIMITED: i64 = -1;

/// How many requests a key may make per window before being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Threshold {
    /// Never throttle.
    Unlimited,
    /// Reject once the window count goes above this value.
    Limit(u64),
}

impl Threshold {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Threshold::Unlimited)
    }

    /// Whether a window that has seen `count` requests is over this threshold.
    pub fn is_exceeded_by(&self, count: i64) -> bool {
        match self {
            Threshold::Unlimited => false,
            Threshold::Limit(limit) => u64::try_from(count).is_ok_and(|count| count > *limit),
        }
    }
}

impl TryFrom<i64> for Threshold {
    type Error = ThrottlerError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            UNLIMITED => Ok(Threshold::Unlimited),
            n if n >= 0 => Ok(Threshold::Limit(n as u64)),
            n => Err(ThrottlerError::InvalidThreshold(n)),
        }
    }
}

impl From<Threshold> for i64 {
    fn from(threshold: Threshold) -> Self {
        match threshold {
            Threshold::Unlimited => UNLIMITED,
            Threshold::Limit(n) => i64::try_from(n).unwrap_or(i64::MAX),
        }
    }
}

impl From<u64> for Threshold {
    fn from(limit: u64) -> Self {
        Threshold::Limit(limit)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Unlimited => write!(f, "unlimited"),
            Threshold::Limit(n) => write!(f, "{}", n),
        }
    }
}

/// Per-subnet thresholds that take precedence over the default.
///
/// When several subnets contain an address the one with the longest prefix
/// wins. Adding a subnet that is already present replaces its threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeOverrides {
    ranges: Vec<(Subnet, Threshold)>,
}

impl RangeOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subnet: Subnet, threshold: Threshold) {
        match self.ranges.iter_mut().find(|(existing, _)| *existing == subnet) {
            Some(entry) => entry.1 = threshold,
            None => self.ranges.push((subnet, threshold)),
        }
    }

    /// Parse `"cidr" -> raw threshold` pairs as found in config files.
    pub fn parse<'a, I>(pairs: I) -> ThrottlerResult<Self>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut overrides = Self::new();
        for (cidr, raw) in pairs {
            overrides.insert(cidr.parse()?, Threshold::try_from(raw)?);
        }
        Ok(overrides)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (Subnet, Threshold)> {
        self.ranges.iter()
    }

    /// The threshold of the most specific subnet containing `addr`.
    pub fn lookup(&self, addr: &IpAddr) -> Option<Threshold> {
        self.ranges
            .iter()
            .filter(|(subnet, _)| subnet.contains(addr))
            .max_by_key(|(subnet, _)| subnet.prefix_len())
            .map(|(_, threshold)| *threshold)
    }
}

impl FromIterator<(Subnet, Threshold)> for RangeOverrides {
    fn from_iter<T: IntoIterator<Item = (Subnet, Threshold)>>(iter: T) -> Self {
        let mut overrides = Self::new();
        for (subnet, threshold) in iter {
            overrides.insert(subnet, threshold);
        }
        overrides
    }
}

/// Picks the threshold that applies to a resolved key.
#[derive(Debug, Clone)]
pub struct LimitSelector {
    default: Threshold,
    overrides: Option<RangeOverrides>,
}

impl LimitSelector {
    pub fn new(default: Threshold, overrides: Option<RangeOverrides>) -> Self {
        Self { default, overrides }
    }

    pub fn default_threshold(&self) -> Threshold {
        self.default
    }

    pub fn overrides(&self) -> Option<&RangeOverrides> {
        self.overrides.as_ref()
    }

    /// True when no key can ever be throttled and the store need not be
    /// consulted. An empty override set still counts as configured.
    pub fn is_disabled(&self) -> bool {
        self.default.is_unlimited() && self.overrides.is_none()
    }

    /// Keys that are not IP addresses only ever get the default.
    pub fn threshold_for(&self, key: &str) -> Threshold {
        let Some(overrides) = &self.overrides else {
            return self.default;
        };

        key.parse::<IpAddr>()
            .ok()
            .and_then(|addr| overrides.lookup(&addr))
            .unwrap_or(self.default)
    }
}
