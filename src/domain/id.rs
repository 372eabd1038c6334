//! Identifiers for tasks and users
//!
//! ID Format:
//! - Task IDs: `t-{8-char-hash}` (e.g., `t-7f2b4c19`) for tasks created here,
//!   but any non-empty string is accepted so IDs minted elsewhere round-trip.
//! - User IDs: any non-empty string (e.g., `default-user`).
//!
//! Hash is derived from name + creation timestamp + a process-wide counter,
//! so tasks created in the same instant (as `split` does) still get
//! distinct IDs.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum IdError {
    #[error("Invalid task ID: must not be empty")]
    EmptyTaskId,

    #[error("Invalid user ID: must not be empty")]
    EmptyUserId,

    #[error("No task matches '{0}'")]
    NoMatch(String),

    #[error("Task ID prefix '{prefix}' is ambiguous: {candidates:?}")]
    Ambiguous {
        prefix: String,
        candidates: Vec<String>,
    },
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates an 8-character hash from name and timestamp
fn generate_hash(name: &str, timestamp: DateTime<Utc>) -> String {
    let salt = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let input = format!(
        "{}{}{}",
        name,
        timestamp.timestamp_nanos_opt().unwrap_or(0),
        salt
    );
    let hash = blake3::hash(input.as_bytes());
    let hex = hash.to_hex();
    hex[..8].to_string()
}

/// Opaque task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Mints a fresh task ID from the task name and creation time
    pub fn generate(name: &str, timestamp: DateTime<Utc>) -> Self {
        Self(format!("t-{}", generate_hash(name, timestamp)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::EmptyTaskId);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for TaskId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// Owning user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::EmptyUserId);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Resolves a possibly-abbreviated task ID against a set of known IDs.
///
/// An exact match always wins. Otherwise the partial ID must be a
/// case-insensitive prefix of exactly one known ID.
pub fn resolve_prefix<'a, I>(known: I, partial: &str) -> Result<TaskId, IdError>
where
    I: IntoIterator<Item = &'a TaskId>,
{
    let partial = partial.trim();
    if partial.is_empty() {
        return Err(IdError::EmptyTaskId);
    }
    let needle = partial.to_lowercase();

    let mut candidates: Vec<&TaskId> = Vec::new();
    for id in known {
        if id.as_str() == partial {
            return Ok(id.clone());
        }
        if id.as_str().to_lowercase().starts_with(&needle) {
            candidates.push(id);
        }
    }

    match candidates.len() {
        0 => Err(IdError::NoMatch(partial.to_string())),
        1 => Ok(candidates[0].clone()),
        _ => {
            let mut names: Vec<String> = candidates.iter().map(|id| id.to_string()).collect();
            names.sort();
            Err(IdError::Ambiguous {
                prefix: partial.to_string(),
                candidates: names,
            })
        }
    }
}

/// Returns the shortest prefix of `id` that no other known ID shares
pub fn minimum_unique_prefix<'a, I>(known: I, id: &TaskId) -> String
where
    I: IntoIterator<Item = &'a TaskId>,
{
    let others: Vec<String> = known
        .into_iter()
        .filter(|other| *other != id)
        .map(|other| other.as_str().to_lowercase())
        .collect();

    let chars: Vec<(usize, char)> = id.as_str().char_indices().collect();
    for n in 0..chars.len() {
        let end = chars.get(n + 1).map(|(i, _)| *i).unwrap_or(id.as_str().len());
        let prefix = id.as_str()[..end].to_lowercase();
        if !others.iter().any(|o| o.starts_with(&prefix)) {
            return id.as_str()[..end].to_string();
        }
    }
    id.to_string()
}
