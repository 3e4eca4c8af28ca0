//! Fixed-point currency amounts
//!
//! Savings estimates arrive as loosely formatted strings (`"$1,234.50"`,
//! `"50"`, `"12.5"`). They are parsed into whole cents so aggregation is
//! exact and rendering is stable.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(-)?\$?\s*(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,2}))?$")
        .expect("currency pattern is valid")
});

/// An amount of money in cents, serialized as its display string (`"$50.00"`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub const ZERO: Money = Money { cents: 0 };

    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Parse a currency string; `None` if it is not a recognisable amount
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = CURRENCY_RE.captures(raw.trim())?;
        let whole: i64 = caps.get(2)?.as_str().replace(',', "").parse().ok()?;
        let fraction = match caps.get(3) {
            Some(m) if m.as_str().len() == 1 => m.as_str().parse::<i64>().ok()? * 10,
            Some(m) => m.as_str().parse::<i64>().ok()?,
            None => 0,
        };
        let cents = whole.checked_mul(100)?.checked_add(fraction)?;
        Some(Self {
            cents: if caps.get(1).is_some() { -cents } else { cents },
        })
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money {
            cents: self.cents.saturating_add(rhs.cents),
        }
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        let whole = (abs / 100).to_string();

        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (i, ch) in whole.chars().enumerate() {
            if i > 0 && (whole.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        write!(f, "{sign}${grouped}.{:02}", abs % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Money::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid currency amount '{raw}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepted_forms() {
        assert_eq!(Money::parse("$50.00"), Some(Money::from_cents(5000)));
        assert_eq!(Money::parse("50"), Some(Money::from_cents(5000)));
        assert_eq!(Money::parse("12.5"), Some(Money::from_cents(1250)));
        assert_eq!(Money::parse(" $1,234.56 "), Some(Money::from_cents(123456)));
        assert_eq!(Money::parse("-$3.10"), Some(Money::from_cents(-310)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Money::parse(""), None);
        assert_eq!(Money::parse("N/A"), None);
        assert_eq!(Money::parse("$12.345"), None);
        assert_eq!(Money::parse("1,23"), None);
        assert_eq!(Money::parse("about $5"), None);
    }

    #[test]
    fn test_display_groups_thousands() {
        assert_eq!(Money::ZERO.to_string(), "$0.00");
        assert_eq!(Money::from_cents(5000).to_string(), "$50.00");
        assert_eq!(Money::from_cents(123456789).to_string(), "$1,234,567.89");
        assert_eq!(Money::from_cents(-5).to_string(), "-$0.05");
    }

    #[test]
    fn test_serde_uses_display_form() {
        let json = serde_json::to_string(&Money::from_cents(123456)).unwrap();
        assert_eq!(json, "\"$1,234.56\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Money::from_cents(123456));
    }

    #[test]
    fn test_sum() {
        let total: Money = ["$1.00", "$2.50"]
            .iter()
            .filter_map(|s| Money::parse(s))
            .sum();
        assert_eq!(total, Money::from_cents(350));
    }
}
