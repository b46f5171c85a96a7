//! Change-number index record
//!
//! Records are immutable once stored and are serialized as one JSON object
//! per line in the index log.

use serde::{Deserialize, Serialize};

use super::token::{ChangeToken, PartitionId};

/// One entry of the change-number index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Position in the index's total order; never reused
    pub change_number: u64,
    /// Partition the underlying update belongs to
    pub partition_id: PartitionId,
    /// Token of the replicated update
    pub change_token: ChangeToken,
    /// Progress cookie at the time of the update. Opaque to readers.
    #[serde(default)]
    pub progress_snapshot: String,
}

impl ChangeRecord {
    pub fn new(
        change_number: u64,
        partition_id: PartitionId,
        change_token: ChangeToken,
        progress_snapshot: impl Into<String>,
    ) -> Self {
        Self {
            change_number,
            partition_id,
            change_token,
            progress_snapshot: progress_snapshot.into(),
        }
    }

    /// Serialize record to a single JSON line
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize record from a JSON line
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

impl std::fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "changeNumber={} partition={} token={} cookie={}",
            self.change_number, self.partition_id, self.change_token, self.progress_snapshot
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReplicaId;

    #[test]
    fn test_json_line_field_names() {
        let record = ChangeRecord::new(
            42,
            PartitionId::new("dc=example,dc=com"),
            ChangeToken::new(1, ReplicaId(2), 3),
            "dc=example,dc=com:0000000000000001000200000003;",
        );

        let line = record.to_json_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["changeNumber"], 42);
        assert_eq!(value["partitionId"], "dc=example,dc=com");
        assert_eq!(value["changeToken"], "0000000000000001000200000003");
        assert!(!line.contains('\n'));

        assert_eq!(ChangeRecord::from_json_line(&line).unwrap(), record);
    }

    #[test]
    fn test_missing_snapshot_defaults_to_empty() {
        let line = r#"{"changeNumber":1,"partitionId":"o=x","changeToken":"0000000000000001000200000003"}"#;
        let record = ChangeRecord::from_json_line(line).unwrap();
        assert_eq!(record.progress_snapshot, "");
    }
}
