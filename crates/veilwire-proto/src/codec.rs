//! Serde helpers for handshake fields
//!
//! Big integers travel as decimal strings because JSON numbers lose
//! precision past 2^53 in most parsers. Numbers that fit in a `u64` are also
//! accepted on input. Byte fields travel as standard base64.
//!
//! Decimal parsing is superlinear in the digit count, so strings longer than
//! [`MAX_DECIMAL_DIGITS`] are rejected before any arithmetic runs.

/// Longest decimal string accepted for a big integer. Covers 8192-bit values.
pub const MAX_DECIMAL_DIGITS: usize = 2500;

/// `BigUint` as a decimal string
pub mod decimal {
    use std::fmt;

    use num_bigint::BigUint;
    use serde::{
        Deserializer, Serializer,
        de::{self, Visitor},
    };

    use super::MAX_DECIMAL_DIGITS;

    /// Serialize as a decimal string.
    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    /// Deserialize from a decimal string or a non-negative integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        deserializer.deserialize_any(DecimalVisitor)
    }

    struct DecimalVisitor;

    impl Visitor<'_> for DecimalVisitor {
        type Value = BigUint;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer or decimal string")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<BigUint, E> {
            Ok(BigUint::from(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<BigUint, E> {
            u64::try_from(value)
                .map(BigUint::from)
                .map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<BigUint, E> {
            if value.len() > MAX_DECIMAL_DIGITS {
                return Err(E::invalid_length(value.len(), &"at most 2500 decimal digits"));
            }
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(E::invalid_value(de::Unexpected::Str(value), &self));
            }
            BigUint::parse_bytes(value.as_bytes(), 10)
                .ok_or_else(|| E::invalid_value(de::Unexpected::Str(value), &self))
        }
    }
}

/// `Vec<u8>` as standard base64
pub mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de};

    /// Serialize as padded standard base64.
    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    /// Deserialize from padded standard base64.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}
