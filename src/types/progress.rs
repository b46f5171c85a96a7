//! Replication progress vectors and multi-partition progress cookies
//!
//! A `ProgressVector` records, per replica, the newest change token seen.
//! A `ProgressCookie` groups one vector per partition and is what each
//! index record stores (as text) in its `progress_snapshot`.
//!
//! Cookie text form: `<partition>:<token> <token>;<partition>:<token>;`

use std::collections::BTreeMap;
use std::fmt;

use crate::error::DecodeError;

use super::token::{ChangeToken, PartitionId, ReplicaId};

/// Newest known change token per replica
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressVector {
    tokens: BTreeMap<ReplicaId, ChangeToken>,
}

impl ProgressVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `token`, keeping only the newest token per replica.
    /// Returns true if the vector changed.
    pub fn update(&mut self, token: ChangeToken) -> bool {
        match self.tokens.get(&token.replica_id) {
            Some(existing) if !existing.is_older_than(&token) => false,
            _ => {
                self.tokens.insert(token.replica_id, token);
                true
            }
        }
    }

    pub fn get(&self, replica: ReplicaId) -> Option<&ChangeToken> {
        self.tokens.get(&replica)
    }

    /// True iff every replica in `other` has a token here that is not older.
    pub fn covers(&self, other: &ProgressVector) -> bool {
        other.tokens.values().all(|theirs| match self.get(theirs.replica_id) {
            Some(ours) => !ours.is_older_than(theirs),
            None => false,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeToken> {
        self.tokens.values()
    }

    /// Parse the space separated token list of one cookie section
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let mut vector = Self::new();
        for part in text.split_whitespace() {
            vector.update(part.parse()?);
        }
        Ok(vector)
    }
}

impl FromIterator<ChangeToken> for ProgressVector {
    fn from_iter<I: IntoIterator<Item = ChangeToken>>(iter: I) -> Self {
        let mut vector = Self::new();
        for token in iter {
            vector.update(token);
        }
        vector
    }
}

impl fmt::Display for ProgressVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in self.tokens.values() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", token)?;
            first = false;
        }
        Ok(())
    }
}

/// Progress vectors for every partition known when a record was written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressCookie {
    partitions: BTreeMap<PartitionId, ProgressVector>,
}

impl ProgressCookie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, partition: PartitionId, vector: ProgressVector) {
        self.partitions.insert(partition, vector);
    }

    /// Merge `token` into the vector of `partition`
    pub fn update(&mut self, partition: &PartitionId, token: ChangeToken) {
        self.partitions
            .entry(partition.clone())
            .or_default()
            .update(token);
    }

    pub fn get(&self, partition: &PartitionId) -> Option<&ProgressVector> {
        self.partitions.get(partition)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Decode the cookie text stored in a record
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let mut cookie = Self::new();
        for section in text.split(';') {
            let section = section.trim();
            if section.is_empty() {
                continue;
            }
            let (partition, tokens) = section.split_once(':').ok_or_else(|| {
                DecodeError::MalformedCookie(format!("missing ':' in {:?}", section))
            })?;
            let partition = partition.trim();
            if partition.is_empty() {
                return Err(DecodeError::MalformedCookie(format!(
                    "empty partition in {:?}",
                    section
                )));
            }
            cookie.insert(PartitionId::new(partition), ProgressVector::parse(tokens)?);
        }
        Ok(cookie)
    }
}

impl fmt::Display for ProgressCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (partition, vector) in &self.partitions {
            write!(f, "{}:{};", partition, vector)?;
        }
        Ok(())
    }
}
