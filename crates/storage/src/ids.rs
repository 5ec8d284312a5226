use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, StorageError, StorageResult};

/// Stable identifier for one persisted conversation.
///
/// Minted client-side; v7 keeps ids time-sortable while the random tail makes
/// collisions negligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new(raw: Uuid) -> Self {
        Self(raw)
    }

    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(raw: &str) -> StorageResult<Self> {
        let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
            stage: "parse-session-id",
            raw: raw.to_string(),
        })?;
        Ok(Self(parsed))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        Self::new(value)
    }
}

impl From<SessionId> for Uuid {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

impl FromStr for SessionId {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        Self::parse(raw)
    }
}
