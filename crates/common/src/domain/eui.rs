use crate::domain::{DomainError, DomainResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 64-bit extended unique identifier naming a physical device.
///
/// The canonical text form is eight upper-case hex pairs joined by `-`,
/// e.g. `58-A0-CB-00-00-20-07-B9`. Storage keys devices by [`Eui64::id`],
/// the same 64 bits reinterpreted as a signed integer so they fit `int8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Eui64(u64);

impl Eui64 {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn from_id(id: i64) -> Self {
        Self(id as u64)
    }

    pub const fn id(&self) -> i64 {
        self.0 as i64
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Parse an address, accepting `-` or `:` separated pairs or 16 bare hex digits.
    pub fn parse(s: &str) -> DomainResult<Self> {
        let trimmed = s.trim();
        let digits: String = if trimmed.contains(['-', ':']) {
            let groups: Vec<&str> = trimmed.split(['-', ':']).collect();
            if groups.len() != 8 || groups.iter().any(|g| g.len() != 2) {
                return Err(DomainError::InvalidAddress(s.to_string()));
            }
            groups.concat()
        } else {
            trimmed.to_string()
        };

        if digits.len() != 16 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidAddress(s.to_string()));
        }

        u64::from_str_radix(&digits, 16)
            .map(Self)
            .map_err(|_| DomainError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl FromStr for Eui64 {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Eui64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Eui64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
