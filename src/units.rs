//! Display amounts and ledger base units
//!
//! The ledger accounts in an integer base unit with [`BASE_UNIT_DECIMALS`]
//! decimal places. [`Amount`] is an exact decimal in display units, so the
//! display -> base conversion either succeeds exactly or fails with
//! [`Error::PrecisionLoss`]; it never rounds a value that funds a transaction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Decimal places between a display unit and a base unit
pub const BASE_UNIT_DECIMALS: u32 = 18;

fn pow10(exp: u32) -> Option<u128> {
    10u128.checked_pow(exp)
}

/// Integer amount in the ledger's smallest unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BaseUnits(pub u128);

impl BaseUnits {
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BaseUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BaseUnits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u128>()
            .map(BaseUnits)
            .map_err(|e| Error::InvalidAmount(format!("{} is not a base-unit integer: {}", s, e)))
    }
}

// uint256 values travel as decimal strings
impl Serialize for BaseUnits {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for BaseUnits {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Number(n) => Ok(BaseUnits(n as u128)),
        }
    }
}

/// Exact non-negative decimal amount in display units
///
/// Stored as `mantissa / 10^scale` with trailing zeros stripped, so derived
/// equality is numeric equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Amount {
    mantissa: u128,
    scale: u32,
}

impl Amount {
    pub fn zero() -> Self {
        Self { mantissa: 0, scale: 0 }
    }

    /// Whole display units
    pub fn from_whole(units: u64) -> Self {
        Self {
            mantissa: units as u128,
            scale: 0,
        }
    }

    /// Parse a decimal string such as `"1200"` or `"0.05"`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(Error::InvalidAmount(format!("{:?} has no digits", s)));
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidAmount(format!(
                "{:?} is not a non-negative decimal",
                s
            )));
        }

        let frac_part = frac_part.trim_end_matches('0');
        let overflow = || {
            let decimals = frac_part.len() as u32;
            if decimals > BASE_UNIT_DECIMALS {
                Error::PrecisionLoss {
                    amount: s.to_string(),
                    decimals,
                    max: BASE_UNIT_DECIMALS,
                }
            } else {
                Error::InvalidAmount(format!("{} is too large", s))
            }
        };

        let mut mantissa: u128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let digit = c.to_digit(10).unwrap_or_default() as u128;
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(digit))
                .ok_or_else(overflow)?;
        }

        Ok(Self {
            mantissa,
            scale: frac_part.len() as u32,
        }
        .normalized())
    }

    fn normalized(mut self) -> Self {
        while self.scale > 0 && self.mantissa % 10 == 0 {
            self.mantissa /= 10;
            self.scale -= 1;
        }
        if self.mantissa == 0 {
            self.scale = 0;
        }
        self
    }

    /// Decimal places needed to represent this amount exactly
    pub fn decimals(&self) -> u32 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    /// Convert to base units, failing rather than rounding
    pub fn to_base_units(&self) -> Result<BaseUnits> {
        if self.scale > BASE_UNIT_DECIMALS {
            return Err(Error::PrecisionLoss {
                amount: self.to_string(),
                decimals: self.scale,
                max: BASE_UNIT_DECIMALS,
            });
        }

        pow10(BASE_UNIT_DECIMALS - self.scale)
            .and_then(|factor| self.mantissa.checked_mul(factor))
            .map(BaseUnits)
            .ok_or_else(|| Error::InvalidAmount(format!("{} overflows base units", self)))
    }

    /// Convert base units back to display units; exact at this scale
    pub fn from_base_units(units: BaseUnits) -> Self {
        Self {
            mantissa: units.0,
            scale: BASE_UNIT_DECIMALS,
        }
        .normalized()
    }

    /// Truncate toward zero to at most `places` decimals, for display only
    pub fn truncated(&self, places: u32) -> Self {
        if self.scale <= places {
            return *self;
        }
        let divisor = pow10(self.scale - places).unwrap_or(u128::MAX);
        Self {
            mantissa: self.mantissa / divisor,
            scale: places,
        }
        .normalized()
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<u64> for Amount {
    fn from(units: u64) -> Self {
        Self::from_whole(units)
    }
}

impl FromStr for Amount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.to_string();
        if self.scale == 0 {
            return f.write_str(&digits);
        }

        let scale = self.scale as usize;
        if digits.len() > scale {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{}.{}", int, frac)
        } else {
            write!(f, "0.{}{}", "0".repeat(scale - digits.len()), digits)
        }
    }
}
