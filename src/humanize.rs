//! Byte sizes as people write them in config files ("100MB", "64KB")

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty size string")]
    Empty,

    #[error("invalid size number '{0}'")]
    InvalidNumber(String),

    #[error("unknown size unit '{0}'")]
    InvalidUnit(String),

    #[error("size '{0}' does not fit in 64 bits")]
    Overflow(String),
}

const KIB: u64 = 1024;
const UNITS: &[(&str, u64)] = &[
    ("TB", KIB * KIB * KIB * KIB),
    ("GB", KIB * KIB * KIB),
    ("MB", KIB * KIB),
    ("KB", KIB),
];

/// Byte count with binary-unit parsing and display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn kib(n: u64) -> Self {
        Self(n * KIB)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n * KIB * KIB)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Shortest exact-ish rendering: whole units when divisible, one decimal otherwise.
    pub fn to_human_readable(&self) -> String {
        for &(unit, divisor) in UNITS {
            if self.0 >= divisor {
                let whole = self.0 / divisor;
                let tenths = (self.0 % divisor) * 10 / divisor;
                return if tenths == 0 {
                    format!("{whole}{unit}")
                } else {
                    format!("{whole}.{tenths}{unit}")
                };
            }
        }
        format!("{}B", self.0)
    }
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    match unit {
        "" | "B" => Some(1),
        "K" | "KB" | "KIB" => Some(KIB),
        "M" | "MB" | "MIB" => Some(KIB * KIB),
        "G" | "GB" | "GIB" => Some(KIB * KIB * KIB),
        "T" | "TB" | "TIB" => Some(KIB * KIB * KIB * KIB),
        _ => None,
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_uppercase();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let multiplier =
            unit_multiplier(unit.trim()).ok_or_else(|| ParseError::InvalidUnit(unit.to_string()))?;

        // "1.5MB" is accepted; fractional bytes are truncated.
        if let Some((whole, frac)) = number.split_once('.') {
            let whole: u64 = whole
                .parse()
                .map_err(|_| ParseError::InvalidNumber(number.to_string()))?;
            let frac_digits = frac.len() as u32;
            let frac: u64 = if frac.is_empty() {
                0
            } else {
                frac.parse()
                    .map_err(|_| ParseError::InvalidNumber(number.to_string()))?
            };
            let scale = 10u64
                .checked_pow(frac_digits)
                .ok_or_else(|| ParseError::Overflow(s.clone()))?;
            let total = whole
                .checked_mul(multiplier)
                .and_then(|w| w.checked_add(frac.checked_mul(multiplier)? / scale))
                .ok_or_else(|| ParseError::Overflow(s.clone()))?;
            return Ok(ByteSize(total));
        }

        let number: u64 = number
            .parse()
            .map_err(|_| ParseError::InvalidNumber(number.to_string()))?;
        number
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or(ParseError::Overflow(s))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_human_readable())
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_human_readable())
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl serde::de::Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte count or a size string such as \"100MB\"")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ByteSize(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom("byte size cannot be negative"))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse::<ByteSize>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_sizes() {
        assert_eq!("2048".parse::<ByteSize>().unwrap(), ByteSize(2048));
        assert_eq!("64KB".parse::<ByteSize>().unwrap(), ByteSize::kib(64));
        assert_eq!("100mb".parse::<ByteSize>().unwrap(), ByteSize::mib(100));
        assert_eq!(" 1 GiB ".parse::<ByteSize>().unwrap().as_u64(), 1 << 30);
    }

    #[test]
    fn parses_fractional_sizes() {
        assert_eq!("1.5MB".parse::<ByteSize>().unwrap(), ByteSize(1536 * 1024));
        assert_eq!("0.5KB".parse::<ByteSize>().unwrap(), ByteSize(512));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!("".parse::<ByteSize>(), Err(ParseError::Empty)));
        assert!(matches!(
            "12PB".parse::<ByteSize>(),
            Err(ParseError::InvalidUnit(_))
        ));
        assert!(matches!(
            "MB".parse::<ByteSize>(),
            Err(ParseError::InvalidNumber(_))
        ));
    }

    #[test]
    fn renders_human_readable() {
        assert_eq!(ByteSize(512).to_string(), "512B");
        assert_eq!(ByteSize::kib(64).to_string(), "64KB");
        assert_eq!(ByteSize(1536 * 1024).to_string(), "1.5MB");
        assert_eq!(ByteSize::mib(100).to_string(), "100MB");
    }

    #[test]
    fn deserializes_from_string_or_number() {
        #[derive(Deserialize)]
        struct Limits {
            max: ByteSize,
        }
        let from_str: Limits = serde_json::from_str(r#"{"max": "10MB"}"#).unwrap();
        assert_eq!(from_str.max, ByteSize::mib(10));
        let from_num: Limits = serde_json::from_str(r#"{"max": 4096}"#).unwrap();
        assert_eq!(from_num.max, ByteSize(4096));
        assert!(serde_json::from_str::<Limits>(r#"{"max": -1}"#).is_err());
    }
}
