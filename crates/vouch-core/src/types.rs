/// PROTOCOL PRIMITIVES
///
/// Accounts, monetary units, price identifiers and the structured request key
/// shared by every layer of the escalation protocol.
///
/// Amounts are unsigned integers in the smallest denomination of a currency.
/// Outcomes are signed fixed-point values with 18 decimals.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Seconds since the Unix epoch
pub type Timestamp = u64;

/// Monetary amount in the smallest denomination
pub type Amount = u128;

/// Fixed-point scale: 1e18 represents 100% / logical true
pub const FIXED_POINT_SCALE: i128 = 1_000_000_000_000_000_000;

/// Canonical "yes" value
pub const CANONICAL_TRUE: i128 = FIXED_POINT_SCALE;

/// Canonical "no" value
pub const CANONICAL_FALSE: i128 = 0;

/// Identifier used for binary questions
pub const YES_OR_NO_QUERY: &str = "YES_OR_NO_QUERY";

/// `amount * fraction / 1e18`, rounded down. The amount is split at the scale
/// so the product stays in range for any amount when `fraction <= 1e18`.
pub fn scale_by_fraction(amount: Amount, fraction: Amount) -> Option<Amount> {
    let unit = FIXED_POINT_SCALE as Amount;
    let whole = (amount / unit).checked_mul(fraction)?;
    let part = (amount % unit).checked_mul(fraction)? / unit;
    whole.checked_add(part)
}

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }
    };
}

string_newtype!(
    /// Account identifier (wallet, consumer module or escrow holder)
    Address
);

string_newtype!(
    /// Monetary unit symbol
    Currency
);

string_newtype!(
    /// Price identifier (the kind of question being asked)
    Identifier
);

/// Opaque bytes distinguishing otherwise identical requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AncillaryData(pub Vec<u8>);

impl AncillaryData {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        AncillaryData(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a `key:value` pair, comma separated when data is already present
    pub fn append_key_value(&self, key: &str, value: &str) -> Self {
        let mut bytes = self.0.clone();
        if !bytes.is_empty() {
            bytes.push(b',');
        }
        bytes.extend_from_slice(key.as_bytes());
        bytes.push(b':');
        bytes.extend_from_slice(value.as_bytes());
        AncillaryData(bytes)
    }
}

impl From<&str> for AncillaryData {
    fn from(value: &str) -> Self {
        AncillaryData(value.as_bytes().to_vec())
    }
}

/// Resolved or proposed value of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// A concrete fixed-point answer
    Value(i128),
    /// The question cannot be answered yet; the requester should ask again later
    TooEarly,
}

impl Outcome {
    pub fn yes() -> Self {
        Outcome::Value(CANONICAL_TRUE)
    }

    pub fn no() -> Self {
        Outcome::Value(CANONICAL_FALSE)
    }

    pub fn value(&self) -> Option<i128> {
        match self {
            Outcome::Value(v) => Some(*v),
            Outcome::TooEarly => None,
        }
    }

    pub fn is_canonical_true(&self) -> bool {
        matches!(self, Outcome::Value(v) if *v == CANONICAL_TRUE)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(v) => write!(f, "{}", v),
            Outcome::TooEarly => f.write_str("TOO_EARLY"),
        }
    }
}

/// Composite key of a price request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub requester: Address,
    pub identifier: Identifier,
    pub timestamp: Timestamp,
    pub ancillary: AncillaryData,
}

impl RequestKey {
    pub fn new(
        requester: Address,
        identifier: Identifier,
        timestamp: Timestamp,
        ancillary: AncillaryData,
    ) -> Self {
        RequestKey {
            requester,
            identifier,
            timestamp,
            ancillary,
        }
    }

    /// Fixed-width digest of the key, used only when the key has to cross into
    /// another layer as opaque bytes.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        // bincode of plain strings/bytes/ints cannot fail; fall back to field bytes anyway
        match bincode::serialize(self) {
            Ok(encoded) => hasher.update(&encoded),
            Err(_) => {
                hasher.update(self.requester.as_str().as_bytes());
                hasher.update(self.identifier.as_str().as_bytes());
                hasher.update(self.timestamp.to_le_bytes());
                hasher.update(self.ancillary.as_bytes());
            }
        }
        hasher.finalize().into()
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}#{}",
            self.requester,
            self.identifier,
            self.timestamp,
            &self.digest_hex()[..8]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ancillary: &str) -> RequestKey {
        RequestKey::new(
            Address::from("requester"),
            Identifier::from(YES_OR_NO_QUERY),
            100,
            AncillaryData::from(ancillary),
        )
    }

    #[test]
    fn test_scale_by_fraction_is_exact_at_large_amounts() {
        let unit = FIXED_POINT_SCALE as Amount;
        let big: Amount = 1_000_000 * unit + 7;

        assert_eq!(scale_by_fraction(big, unit), Some(big));
        assert_eq!(scale_by_fraction(big, 0), Some(0));
        assert_eq!(scale_by_fraction(big, unit / 2), Some(500_000 * unit + 3));
        assert_eq!(scale_by_fraction(Amount::MAX, unit), Some(Amount::MAX));
        assert_eq!(scale_by_fraction(99, unit / 4), Some(24));
    }

    #[test]
    fn test_digest_distinguishes_single_byte() {
        assert_ne!(key("q: rain?").digest(), key("q: rain!").digest());
        assert_eq!(key("q: rain?").digest(), key("q: rain?").digest());
    }

    #[test]
    fn test_append_key_value() {
        let empty = AncillaryData::default().append_key_value("policyId", "ab");
        assert_eq!(empty.as_bytes(), b"policyId:ab");

        let data = AncillaryData::from("q: x").append_key_value("k", "v");
        assert_eq!(data.as_bytes(), b"q: x,k:v");
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(Outcome::yes().is_canonical_true());
        assert!(!Outcome::no().is_canonical_true());
        assert_eq!(Outcome::TooEarly.value(), None);
        assert_eq!(Outcome::TooEarly.to_string(), "TOO_EARLY");
    }
}
