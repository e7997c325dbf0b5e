//! Plain-number JSON encoding for measurement values
//!
//! Snapshot blobs store decimals as bare JSON numbers with no exponent
//! notation and no trailing zero padding: a reading of `6.00` is written
//! as `6`, and `12.3400` as `12.34`. Parsing accepts any JSON number,
//! including scientific notation found in hand-edited blobs.

use rust_decimal::Decimal;
use serde_json::Number;
use std::str::FromStr;

/// Parse a JSON number into a `Decimal`.
pub fn decimal_from_number(number: &Number) -> Result<Decimal, rust_decimal::Error> {
    let text = number.to_string();
    Decimal::from_str_exact(&text).or_else(|_| Decimal::from_scientific(&text))
}

/// Render a decimal as a JSON number in canonical plain form.
pub fn number_from_decimal(value: &Decimal) -> Result<Number, serde_json::Error> {
    Number::from_str(&value.normalize().to_string())
}

/// Serde adapter for `Decimal` fields: `#[serde(with = "numeric::plain")]`.
pub mod plain {
    use super::{decimal_from_number, number_from_decimal};
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Number;

    pub fn serialize<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let number = number_from_decimal(value).map_err(serde::ser::Error::custom)?;
        number.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let number = Number::deserialize(deserializer)?;
        decimal_from_number(&number).map_err(serde::de::Error::custom)
    }
}

/// Geographic position carried on profiles and mirrored onto readings.
///
/// Nominally a `[lat, lon]` pair. Rows written before coordinates were
/// validated occasionally carry a different arity, so the stored shape is
/// an arbitrary numeric sequence and renderers check [`Coordinate::as_pair`]
/// before plotting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinate(Vec<Decimal>);

impl Coordinate {
    /// Well-formed `[lat, lon]` pair
    pub fn pair(lat: Decimal, lon: Decimal) -> Self {
        Self(vec![lat, lon])
    }

    /// Arbitrary-arity sequence, as found in legacy rows
    pub fn from_parts(parts: Vec<Decimal>) -> Self {
        Self(parts)
    }

    /// Raw component slice
    pub fn parts(&self) -> &[Decimal] {
        &self.0
    }

    /// The `(lat, lon)` pair, or None when the arity is wrong
    pub fn as_pair(&self) -> Option<(Decimal, Decimal)> {
        match self.0.as_slice() {
            [lat, lon] => Some((*lat, *lon)),
            _ => None,
        }
    }
}

impl serde::Serialize for Coordinate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;

        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for part in &self.0 {
            let number = number_from_decimal(part).map_err(serde::ser::Error::custom)?;
            seq.serialize_element(&number)?;
        }
        seq.end()
    }
}

impl<'de> serde::Deserialize<'de> for Coordinate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let numbers = Vec::<Number>::deserialize(deserializer)?;
        let parts = numbers
            .iter()
            .map(decimal_from_number)
            .collect::<Result<Vec<_>, _>>()
            .map_err(serde::de::Error::custom)?;
        Ok(Self(parts))
    }
}
