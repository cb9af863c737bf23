//! Cache key layout.
//!
//! ```text
//! {kind}:counter:{subject}          pending counter, no TTL
//! {kind}:seen:{subject}:{actor}     dedup marker, per-kind TTL
//! {kind}:flush-lock                 reconciler mutex, short TTL
//! ```
//!
//! `{kind}` is the plural prefix (`views`, `likes`, `shares`), which keeps
//! counters readable by flush jobs that scan `views:counter:*`.

use super::{ActionKind, ActorFingerprint, SubjectId};
use crate::error::{CounterError, CounterResult};

pub fn counter_prefix(kind: ActionKind) -> String {
    format!("{}:counter:", kind.prefix())
}

pub fn counter_key(kind: ActionKind, subject: SubjectId) -> String {
    format!("{}:counter:{}", kind.prefix(), subject)
}

pub fn marker_key(kind: ActionKind, subject: SubjectId, actor: &ActorFingerprint) -> String {
    format!("{}:seen:{}:{}", kind.prefix(), subject, actor)
}

pub fn lock_key(kind: ActionKind) -> String {
    format!("{}:flush-lock", kind.prefix())
}

/// Recover the subject encoded in a pending-counter key.
pub fn parse_counter_key(kind: ActionKind, key: &str) -> CounterResult<SubjectId> {
    let prefix = counter_prefix(kind);
    let rest = key.strip_prefix(prefix.as_str()).ok_or_else(|| {
        CounterError::ParseError(format!("Key {} is not under {}", key, prefix))
    })?;
    rest.parse()
        .map_err(|_| CounterError::ParseError(format!("Key {} has no valid post ID", key)))
}
