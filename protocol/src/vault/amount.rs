//! # Amount Encoding
//!
//! Amounts are `u128` counts of base units. With 18 decimals a `u64` runs out
//! at about 18.4 coins, which is too small for ordinary prices.
//!
//! Binary formats (bincode on disk) carry the integer as-is. Human-readable
//! formats (JSON on the API) carry it as a decimal string, because JSON
//! numbers past 2^53 do not survive a round trip through most parsers and
//! `serde_json::Value` cannot hold one past `u64::MAX`. On input, plain JSON
//! integers up to `u64::MAX` are accepted as well.
//!
//! Use it as a field attribute:
//!
//! ```ignore
//! #[serde(with = "agora_protocol::vault::amount")]
//! pub price: Amount,
//! ```

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serializer};

/// An amount of native value, in base units.
pub type Amount = u128;

/// Parses a plain decimal amount. Signs, whitespace, separators and
/// exponents are rejected, as is anything past `u128::MAX`.
pub fn parse_amount(s: &str) -> Option<Amount> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Serializes an amount: decimal string for human-readable formats, raw
/// `u128` otherwise.
pub fn serialize<S>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if serializer.is_human_readable() {
        serializer.collect_str(amount)
    } else {
        serializer.serialize_u128(*amount)
    }
}

/// Deserializes an amount written by [`serialize`], or a plain non-negative
/// integer that fits in `u64`.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
where
    D: Deserializer<'de>,
{
    if deserializer.is_human_readable() {
        deserializer.deserialize_any(AmountVisitor)
    } else {
        Amount::deserialize(deserializer)
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer amount as a decimal string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        parse_amount(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(Amount::from(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        Amount::try_from(v).map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        // Integers past u64::MAX arrive here already rounded; refuse them.
        Err(E::invalid_type(de::Unexpected::Float(v), &self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UNIT;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Priced {
        #[serde(with = "crate::vault::amount")]
        price: Amount,
    }

    #[test]
    fn json_carries_amounts_as_strings() {
        let priced = Priced { price: 20 * UNIT };
        let json = serde_json::to_value(&priced).unwrap();
        assert_eq!(json["price"], "20000000000000000000");

        let back: Priced = serde_json::from_value(json).unwrap();
        assert_eq!(back, priced);
    }

    #[test]
    fn json_accepts_small_plain_numbers() {
        let priced: Priced = serde_json::from_str(r#"{"price":1000}"#).unwrap();
        assert_eq!(priced.price, 1000);
    }

    #[test]
    fn json_accepts_values_past_u64() {
        let priced: Priced =
            serde_json::from_str(r#"{"price":"340282366920938463463374607431768211455"}"#).unwrap();
        assert_eq!(priced.price, u128::MAX);
    }

    #[test]
    fn json_rejects_rounded_and_negative_values() {
        for body in [
            r#"{"price":20000000000000000000}"#,
            r#"{"price":1.5}"#,
            r#"{"price":-1}"#,
            r#"{"price":"-1"}"#,
            r#"{"price":"+1"}"#,
            r#"{"price":"1e18"}"#,
            r#"{"price":""}"#,
            r#"{"price":"340282366920938463463374607431768211456"}"#,
        ] {
            assert!(serde_json::from_str::<Priced>(body).is_err(), "{body}");
        }
    }

    #[test]
    fn parse_amount_is_strict() {
        assert_eq!(parse_amount("0"), Some(0));
        assert_eq!(parse_amount("20000000000000000000"), Some(20 * UNIT));
        assert_eq!(parse_amount(" 1"), None);
        assert_eq!(parse_amount("1_000"), None);
    }

    #[test]
    fn bincode_keeps_the_raw_integer() {
        let priced = Priced { price: u128::MAX };
        let bytes = bincode::serialize(&priced).unwrap();
        assert_eq!(bytes.len(), 16);
        let back: Priced = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, priced);
    }
}
