//! Instance size classes and their total order

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size class of an instance-like resource.
///
/// Ordered `nano < micro < small < medium < large < xlarge < 2xlarge < ...`;
/// `XLarge(n)` stands for `{n}xlarge` with `xlarge` itself being `XLarge(1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SizeClass {
    Nano,
    Micro,
    Small,
    Medium,
    Large,
    XLarge(u16),
}

impl SizeClass {
    /// Extract the size class from a configuration token such as
    /// `t3.medium` or `db.r5.2xlarge` (the segment after the last `.`).
    pub fn from_token(token: &str) -> Option<Self> {
        token.rsplit('.').next()?.parse().ok()
    }
}

impl FromStr for SizeClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "nano" => Ok(SizeClass::Nano),
            "micro" => Ok(SizeClass::Micro),
            "small" => Ok(SizeClass::Small),
            "medium" => Ok(SizeClass::Medium),
            "large" => Ok(SizeClass::Large),
            "xlarge" => Ok(SizeClass::XLarge(1)),
            other => other
                .strip_suffix("xlarge")
                .and_then(|n| n.parse::<u16>().ok())
                .filter(|n| *n >= 1)
                .map(SizeClass::XLarge)
                .ok_or_else(|| format!("unknown size class '{s}'")),
        }
    }
}

impl TryFrom<String> for SizeClass {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SizeClass> for String {
    fn from(size: SizeClass) -> Self {
        size.to_string()
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeClass::Nano => f.write_str("nano"),
            SizeClass::Micro => f.write_str("micro"),
            SizeClass::Small => f.write_str("small"),
            SizeClass::Medium => f.write_str("medium"),
            SizeClass::Large => f.write_str("large"),
            SizeClass::XLarge(1) => f.write_str("xlarge"),
            SizeClass::XLarge(n) => write!(f, "{n}xlarge"),
        }
    }
}
