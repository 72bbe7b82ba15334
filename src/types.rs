//! Domain identifiers and ledger records

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::units::Amount;
use crate::{Error, Result};

/// Length of an account address in hex characters, without the `0x` prefix
const ADDRESS_HEX_LEN: usize = 40;

/// Lease length the listing UI signs by default
pub const DEFAULT_LEASE_MONTHS: u32 = 12;

/// Account or contract address
///
/// Keeps the checksummed form for display. Equality and hashing use the
/// lowercase form, so differently-cased spellings of one account compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse a `0x`-prefixed 20-byte hex address
    pub fn parse(s: &str) -> Result<Self> {
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| Error::InvalidAddress(format!("{} is missing the 0x prefix", s)))?;

        if hex.len() != ADDRESS_HEX_LEN || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidAddress(format!(
                "{} is not a 20-byte hex address",
                s
            )));
        }

        Ok(Self(format!("0x{}", hex)))
    }

    /// The all-zero address, which the ledger uses for unset owners
    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(ADDRESS_HEX_LEN)))
    }

    pub fn is_zero(&self) -> bool {
        self.0[2..].chars().all(|c| c == '0')
    }

    /// Lowercase form used for comparisons
    pub fn normalized(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

/// Network (chain) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deserialize a uint256 id that fits in `u64`, sent as a decimal string or a number
pub(crate) fn deserialize_uint_id<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| serde::de::Error::custom(format!("id {:?} is not a u64: {}", s, e))),
        Repr::Number(n) => Ok(n),
    }
}

/// Listing identifier assigned by the contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(pub u64);

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease identifier assigned by the contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(pub u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction hash reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-through copy of an on-chain listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub id: ListingId,
    pub owner: Address,
    pub property_address: String,
    pub monthly_rent: Amount,
    pub is_available: bool,
    /// Opaque JSON metadata stored alongside the listing
    pub details: String,
}

impl Listing {
    /// Parse `details` as [`PropertyDetails`], if it has that shape
    pub fn property_details(&self) -> Option<PropertyDetails> {
        serde_json::from_str(&self.details).ok()
    }
}

/// Lease created by a confirmed `signLease`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    pub listing_id: ListingId,
    pub tenant: Address,
    pub duration_months: u32,
    /// Always one month's rent
    pub security_deposit: Amount,
}

/// Property metadata serialized into a listing's `details` field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDetails {
    #[serde(default)]
    pub bedrooms: u32,
    #[serde(default)]
    pub bathrooms: f32,
    #[serde(default)]
    pub sqft: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amenities: String,
}

/// Form fields for a new listing
#[derive(Debug, Clone, PartialEq)]
pub struct ListingFields {
    pub property_address: String,
    pub monthly_rent: Amount,
    pub details: PropertyDetails,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_address_case_insensitive_equality() {
        let checksummed = Address::parse("0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0").unwrap();
        let lower = Address::parse("0x742d35cc6634c0532925a3b844bc9e7595f0beb0").unwrap();
        assert_eq!(checksummed, lower);
        assert_eq!(checksummed.to_string(), "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0");

        let mut set = HashSet::new();
        set.insert(checksummed);
        assert!(set.contains(&lower));
    }

    #[test]
    fn test_address_rejects_malformed() {
        assert!(Address::parse("742d35cc6634c0532925a3b844bc9e7595f0beb0").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzz2d35cc6634c0532925a3b844bc9e7595f0beb0").is_err());
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::zero().is_zero());
        assert!(!Address::parse("0x0000000000000000000000000000000000000001")
            .unwrap()
            .is_zero());
    }

    #[test]
    fn test_address_serde() {
        let addr: Address =
            serde_json::from_str("\"0xdD2FD4581271e230360230F9337D5c0430Bf44C0\"").unwrap();
        assert_eq!(
            serde_json::to_string(&addr).unwrap(),
            "\"0xdD2FD4581271e230360230F9337D5c0430Bf44C0\""
        );
        assert!(serde_json::from_str::<Address>("\"nope\"").is_err());
    }

    #[derive(Deserialize)]
    struct IdOnly {
        #[serde(deserialize_with = "deserialize_uint_id")]
        id: u64,
    }

    #[test]
    fn test_uint_id_from_string_or_number() {
        let text: IdOnly = serde_json::from_str(r#"{"id":"42"}"#).unwrap();
        let number: IdOnly = serde_json::from_str(r#"{"id":42}"#).unwrap();
        assert_eq!(text.id, 42);
        assert_eq!(number.id, 42);

        // beyond u64, or not an integer at all
        assert!(serde_json::from_str::<IdOnly>(r#"{"id":"18446744073709551616"}"#).is_err());
        assert!(serde_json::from_str::<IdOnly>(r#"{"id":"1.5"}"#).is_err());
    }

    #[test]
    fn test_property_details_defaults() {
        let details: PropertyDetails = serde_json::from_str(r#"{"bedrooms":3}"#).unwrap();
        assert_eq!(details.bedrooms, 3);
        assert_eq!(details.description, "");
    }
}
