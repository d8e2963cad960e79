//! Declared tag types and per-type value coercion.
//!
//! A typed tag is promoted to a relationship only when its value coerces.
//! Coercion failures are returned as [`CoercionError`] so the extractor can
//! demote the tag to cosmetic-only explicitly.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::slug::slugify;

/// The closed set of relationship types a tag can be declared as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagType {
    String,
    Integer,
    Float,
    Date,
    Ip,
    IpNetwork,
    Article,
}

impl TagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Date => "date",
            Self::Ip => "ip",
            Self::IpNetwork => "ip-network",
            Self::Article => "article",
        }
    }

    /// Parse a declared type name, accepting the common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "string" | "text" => Some(Self::String),
            "integer" | "int" | "long" => Some(Self::Integer),
            "float" | "number" | "double" => Some(Self::Float),
            "date" => Some(Self::Date),
            "ip" | "ip-address" => Some(Self::Ip),
            "ip-network" | "cidr" | "network" => Some(Self::IpNetwork),
            "article" => Some(Self::Article),
            _ => None,
        }
    }

    /// Coerce a raw tag value into a relationship value of this type.
    pub fn coerce(&self, raw: Option<&str>) -> Result<RelationshipValue, CoercionError> {
        let raw = raw.ok_or(CoercionError::MissingValue)?;
        let invalid = || CoercionError::Invalid {
            tag_type: *self,
            value: raw.to_string(),
        };

        match self {
            Self::String => {
                if raw.is_empty() {
                    Err(CoercionError::MissingValue)
                } else {
                    Ok(RelationshipValue::Text(raw.to_string()))
                }
            }
            Self::Integer => raw
                .trim()
                .parse::<i64>()
                .map(RelationshipValue::Integer)
                .map_err(|_| invalid()),
            Self::Float => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(RelationshipValue::Float(v)),
                _ => Err(invalid()),
            },
            Self::Date => normalize_date(raw.trim())
                .map(RelationshipValue::Text)
                .ok_or_else(invalid),
            Self::Ip => raw
                .trim()
                .parse::<IpAddr>()
                .map(|ip| RelationshipValue::Text(ip.to_string()))
                .map_err(|_| invalid()),
            Self::IpNetwork => normalize_network(raw.trim())
                .map(RelationshipValue::Text)
                .ok_or_else(invalid),
            Self::Article => {
                let id = slugify(raw);
                if id.is_empty() {
                    Err(invalid())
                } else {
                    Ok(RelationshipValue::Text(id))
                }
            }
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a typed tag value was not promoted to a relationship.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoercionError {
    #[error("typed tag has no value")]
    MissingValue,

    #[error("invalid {tag_type} value: {value:?}")]
    Invalid { tag_type: TagType, value: String },
}

/// A coerced relationship value as persisted in `relationships[tag]`.
///
/// Dates, addresses, networks and article references are stored in their
/// normalized text form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RelationshipValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Integer(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for RelationshipValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Accepts RFC 3339 timestamps, `YYYY-MM-DDTHH:MM:SS` (taken as UTC) and
/// plain `YYYY-MM-DD` dates.
fn normalize_date(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(
            naive
                .and_utc()
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Normalize `addr[/prefix]` to the network address in CIDR form. A bare
/// address is a host network (`/32` or `/128`).
pub fn normalize_network(raw: &str) -> Option<String> {
    let (addr, prefix) = match raw.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix.trim().parse::<u8>().ok()?)),
        None => (raw, None),
    };

    match addr.trim().parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => {
            let prefix = prefix.unwrap_or(32);
            if prefix > 32 {
                return None;
            }
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix))
            };
            let network = Ipv4Addr::from(u32::from(v4) & mask);
            Some(format!("{network}/{prefix}"))
        }
        IpAddr::V6(v6) => {
            let prefix = prefix.unwrap_or(128);
            if prefix > 128 {
                return None;
            }
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix))
            };
            let network = Ipv6Addr::from(u128::from(v6) & mask);
            Some(format!("{network}/{prefix}"))
        }
    }
}
