//! Textual caveat codec.

use std::fmt;
use std::str::FromStr;

use crate::constants::EXPIRATION_CONDITION;
use crate::error::LsatError;

/// The delimiter between a caveat's condition and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Comparator {
    /// `=`
    Equal,
    /// `<`
    LessThan,
    /// `>`
    GreaterThan,
}

impl Comparator {
    /// Returns the character this comparator is encoded as.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Equal => '=',
            Self::LessThan => '<',
            Self::GreaterThan => '>',
        }
    }

    /// Looks up a comparator from its character.
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            '=' => Some(Self::Equal),
            '<' => Some(Self::LessThan),
            '>' => Some(Self::GreaterThan),
            _ => None,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A single restriction predicate: `<condition><comparator><value>`.
///
/// Decoding splits on the *first* comparator character, so a value may
/// itself contain `=`, `<` or `>` and still survive a round trip.
///
/// # Examples
///
/// ```
/// use lsat_paywall::{Caveat, Comparator};
///
/// let caveat = Caveat::decode("expiration=1338=").unwrap();
/// assert_eq!(caveat.condition(), "expiration");
/// assert_eq!(caveat.comparator(), Comparator::Equal);
/// assert_eq!(caveat.value(), "1338=");
/// assert_eq!(caveat.encode(), "expiration=1338=");
///
/// let route = Caveat::new("route", "/api/data");
/// assert_eq!(route.to_string(), "route=/api/data");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caveat {
    condition: String,
    comparator: Comparator,
    value: String,
}

impl Caveat {
    /// Creates an equality caveat.
    #[must_use]
    pub fn new(condition: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_comparator(condition, Comparator::Equal, value)
    }

    /// Creates a caveat with an explicit comparator.
    #[must_use]
    pub fn with_comparator(
        condition: impl Into<String>,
        comparator: Comparator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            condition: condition.into(),
            comparator,
            value: value.into(),
        }
    }

    /// Creates an `expiration` caveat for a timestamp in milliseconds.
    #[must_use]
    pub fn expiration(valid_until_ms: i64) -> Self {
        Self::new(EXPIRATION_CONDITION, valid_until_ms.to_string())
    }

    /// Returns the condition name.
    #[must_use]
    pub fn condition(&self) -> &str {
        &self.condition
    }

    /// Returns the comparator.
    #[must_use]
    pub const fn comparator(&self) -> Comparator {
        self.comparator
    }

    /// Returns the value as text.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the value parsed as an integer, if it is one.
    #[must_use]
    pub fn numeric_value(&self) -> Option<i64> {
        self.value.parse().ok()
    }

    /// Encodes the caveat as `<condition><comparator><value>`.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decodes a caveat string.
    ///
    /// Everything before the first comparator (trimmed) is the condition,
    /// everything after it (trimmed) is the value.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvalidCaveat` if the text has no comparator, or
    /// if the first comparator is at position 0 (empty condition).
    pub fn decode(text: &str) -> Result<Self, LsatError> {
        let invalid = || LsatError::InvalidCaveat {
            caveat: text.to_string(),
        };

        let (index, comparator) = text
            .char_indices()
            .find_map(|(i, c)| Comparator::from_char(c).map(|comp| (i, comp)))
            .ok_or_else(invalid)?;
        if index == 0 {
            return Err(invalid());
        }

        // comparators are ASCII, so index + 1 is a char boundary
        let condition = text[..index].trim();
        let value = text[index + 1..].trim();

        Ok(Self {
            condition: condition.to_string(),
            comparator,
            value: value.to_string(),
        })
    }
}

impl fmt::Display for Caveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.condition, self.comparator, self.value)
    }
}

impl FromStr for Caveat {
    type Err = LsatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Caveat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.encode())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Caveat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Returns the value of the most recent `expiration` caveat, or 0 if none.
///
/// Caveats that are not numeric are ignored.
#[must_use]
pub fn expiration_from_caveats<'a>(caveats: impl IntoIterator<Item = &'a Caveat>) -> i64 {
    caveats
        .into_iter()
        .filter(|c| c.condition() == EXPIRATION_CONDITION)
        .filter_map(Caveat::numeric_value)
        .last()
        .unwrap_or(0)
}
