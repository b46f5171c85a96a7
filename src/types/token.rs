//! Change tokens (CSNs) and the identifiers they are built from

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Length of the canonical hex form: 16 (timestamp) + 4 (replica) + 8 (sequence)
pub const TOKEN_HEX_LEN: usize = 28;

/// Identifier of an independently replicated partition (naming context)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(String);

impl PartitionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of the replica (server) that originated an update
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ReplicaId(pub u16);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally comparable identifier of one replicated update.
///
/// Ordering compares `timestamp_ms`, then `replica_id`, then `sequence`;
/// the derived `Ord` relies on that field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChangeToken {
    pub timestamp_ms: u64,
    pub replica_id: ReplicaId,
    pub sequence: u32,
}

impl ChangeToken {
    pub fn new(timestamp_ms: u64, replica_id: ReplicaId, sequence: u32) -> Self {
        Self {
            timestamp_ms,
            replica_id,
            sequence,
        }
    }

    /// Create a token stamped with the current wall clock
    pub fn now(replica_id: ReplicaId, sequence: u32) -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        Self::new(millis, replica_id, sequence)
    }

    /// Strictly older than `other`
    pub fn is_older_than(&self, other: &ChangeToken) -> bool {
        self < other
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp_ms)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}{:04x}{:08x}",
            self.timestamp_ms, self.replica_id.0, self.sequence
        )?;
        if f.alternate() {
            if let Some(ts) = self.timestamp() {
                write!(f, " ({})", ts.to_rfc3339())?;
            }
        }
        Ok(())
    }
}

impl FromStr for ChangeToken {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DecodeError::InvalidToken(s.to_string());
        if s.len() != TOKEN_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let timestamp_ms = u64::from_str_radix(&s[0..16], 16).map_err(|_| invalid())?;
        let replica = u16::from_str_radix(&s[16..20], 16).map_err(|_| invalid())?;
        let sequence = u32::from_str_radix(&s[20..28], 16).map_err(|_| invalid())?;
        Ok(Self::new(timestamp_ms, ReplicaId(replica), sequence))
    }
}

impl TryFrom<String> for ChangeToken {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChangeToken> for String {
    fn from(token: ChangeToken) -> Self {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_timestamp_then_replica_then_sequence() {
        let a = ChangeToken::new(10, ReplicaId(9), 9);
        let b = ChangeToken::new(11, ReplicaId(1), 0);
        let c = ChangeToken::new(11, ReplicaId(2), 0);
        let d = ChangeToken::new(11, ReplicaId(2), 1);

        assert!(a.is_older_than(&b));
        assert!(b.is_older_than(&c));
        assert!(c.is_older_than(&d));
        assert!(!d.is_older_than(&d));
    }

    #[test]
    fn test_hex_form() {
        let token = ChangeToken::new(0x13f, ReplicaId(0x2a), 7);
        assert_eq!(token.to_string(), "000000000000013f002a00000007");
        assert_eq!(token.to_string().len(), TOKEN_HEX_LEN);
        assert_eq!("000000000000013f002a00000007".parse::<ChangeToken>(), Ok(token));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<ChangeToken>().is_err());
        assert!("000000000000013f002a0000000".parse::<ChangeToken>().is_err());
        assert!("000000000000013f002a0000000z".parse::<ChangeToken>().is_err());
        assert!("+00000000000013f002a00000007".parse::<ChangeToken>().is_err());
    }

    #[test]
    fn test_alternate_display_includes_time() {
        let token = ChangeToken::new(0, ReplicaId(1), 1);
        let rendered = format!("{:#}", token);
        assert!(rendered.starts_with("00000000000000000001"));
        assert!(rendered.contains("1970-01-01T00:00:00"));
    }

    #[test]
    fn test_serde_uses_hex_string() {
        let token = ChangeToken::new(1, ReplicaId(2), 3);
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"0000000000000001000200000003\"");
        let back: ChangeToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
        assert!(serde_json::from_str::<ChangeToken>("\"nope\"").is_err());
    }
}
