//! Identity newtypes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::MAX_USER_NAME_LEN;

/// User identity as supplied by the PAM layer
///
/// The name is opaque to the core. It is validated once on construction and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a new UserId, rejecting empty, oversized, or control-character names
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidUser("empty user name".to_string()));
        }
        if name.len() > MAX_USER_NAME_LEN {
            return Err(Error::InvalidUser(format!(
                "user name exceeds {} bytes",
                MAX_USER_NAME_LEN
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(Error::InvalidUser(
                "user name contains control characters".to_string(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe key for this user (hex SHA256 of the name)
    pub fn storage_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(user: UserId) -> Self {
        user.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Template ID - random UUID assigned at enrollment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(pub Uuid);

impl TemplateId {
    /// Generate a fresh random template ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short display format (first 8 hex digits)
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Enrolled finger, named the way fprintd names them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Finger {
    LeftThumb,
    LeftIndexFinger,
    LeftMiddleFinger,
    LeftRingFinger,
    LeftLittleFinger,
    RightThumb,
    RightIndexFinger,
    RightMiddleFinger,
    RightRingFinger,
    RightLittleFinger,
}

impl Finger {
    /// All fingers in enrollment order
    pub const ALL: [Finger; 10] = [
        Finger::LeftThumb,
        Finger::LeftIndexFinger,
        Finger::LeftMiddleFinger,
        Finger::LeftRingFinger,
        Finger::LeftLittleFinger,
        Finger::RightThumb,
        Finger::RightIndexFinger,
        Finger::RightMiddleFinger,
        Finger::RightRingFinger,
        Finger::RightLittleFinger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Finger::LeftThumb => "left-thumb",
            Finger::LeftIndexFinger => "left-index-finger",
            Finger::LeftMiddleFinger => "left-middle-finger",
            Finger::LeftRingFinger => "left-ring-finger",
            Finger::LeftLittleFinger => "left-little-finger",
            Finger::RightThumb => "right-thumb",
            Finger::RightIndexFinger => "right-index-finger",
            Finger::RightMiddleFinger => "right-middle-finger",
            Finger::RightRingFinger => "right-ring-finger",
            Finger::RightLittleFinger => "right-little-finger",
        }
    }
}

impl FromStr for Finger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Finger::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| Error::InvalidFinger(s.to_string()))
    }
}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
