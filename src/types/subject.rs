use crate::error::{CounterError, CounterResult};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Longest fingerprint accepted from a client.
pub const MAX_FINGERPRINT_LEN: usize = 256;

/// Identifier of a post accruing counts.
///
/// Zero is reserved: clients that omit the id frequently send `0` or `""`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubjectId(u64);

impl SubjectId {
    pub fn new(id: u64) -> CounterResult<Self> {
        if id == 0 {
            return Err(CounterError::InvalidArgument(
                "Post ID is required".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubjectId {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CounterError::InvalidArgument(
                "Post ID is required".to_string(),
            ));
        }
        let id = trimmed.parse::<u64>().map_err(|_| {
            CounterError::InvalidArgument(format!("Invalid post ID: {}", trimmed))
        })?;
        Self::new(id)
    }
}

impl<'de> Deserialize<'de> for SubjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Clients send ids both as JSON numbers and as strings
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => SubjectId::new(n).map_err(serde::de::Error::custom),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Client-derived pseudo-identity used for deduplication only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ActorFingerprint(String);

impl ActorFingerprint {
    pub fn new(raw: impl AsRef<str>) -> CounterResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(CounterError::InvalidArgument(
                "Actor fingerprint is required".to_string(),
            ));
        }
        if trimmed.len() > MAX_FINGERPRINT_LEN {
            return Err(CounterError::InvalidArgument(format!(
                "Actor fingerprint exceeds {} bytes",
                MAX_FINGERPRINT_LEN
            )));
        }
        if trimmed.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(CounterError::InvalidArgument(
                "Actor fingerprint contains whitespace or control characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Derive a device fingerprint from the client address and user agent.
    ///
    /// Only the first hop of `x-forwarded-for` is used; a missing part is
    /// replaced by `unknown`.
    pub fn derive(forwarded_for: Option<&str>, user_agent: Option<&str>) -> Self {
        let ip = forwarded_for
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("unknown");
        let ua = user_agent
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("unknown");

        let digest = Sha256::digest(format!("{}-{}", ip, ua).as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ActorFingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ActorFingerprint::new(raw).map_err(serde::de::Error::custom)
    }
}
